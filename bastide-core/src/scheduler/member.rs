//! Live view of scheduled contexts

use std::fmt::Write as _;

/// One row of the scheduler table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberSnapshot {
    /// Context name
    pub name: String,
    /// Forwarded local port, if configured
    pub local_port: Option<u16>,
    /// Whether the tunnel is up
    pub connected: bool,
    /// Last status line
    pub status: String,
    /// Region of the context
    pub region: Option<String>,
}

impl MemberSnapshot {
    /// Creates an idle row
    #[must_use]
    pub fn new(name: impl Into<String>, local_port: Option<u16>) -> Self {
        Self {
            name: name.into(),
            local_port,
            ..Self::default()
        }
    }
}

/// Formats rows as the "Bastion Sessions" table
#[must_use]
pub fn render_table(rows: &[MemberSnapshot]) -> String {
    if rows.is_empty() {
        return "No contexts scheduled.".to_string();
    }

    let ports: Vec<String> = rows
        .iter()
        .map(|r| {
            r.local_port
                .map_or_else(|| "Not Specified".to_string(), |p| p.to_string())
        })
        .collect();
    let name_width = rows.iter().map(|r| r.name.len()).max().unwrap_or(4).max(4);
    let port_width = ports.iter().map(String::len).max().unwrap_or(10).max(10);
    let active_width = 6;

    let mut output = String::new();
    let _ = writeln!(output, "Bastion Sessions");
    let _ = writeln!(
        output,
        "{:<name_width$}  {:<port_width$}  {:>active_width$}  STATUS",
        "NAME", "LOCAL PORT", "ACTIVE"
    );
    let _ = writeln!(
        output,
        "{:-<name_width$}  {:-<port_width$}  {:->active_width$}  ------",
        "", "", ""
    );
    for (row, port) in rows.iter().zip(&ports) {
        let _ = writeln!(
            output,
            "{:<name_width$}  {:<port_width$}  {:>active_width$}  {}",
            row.name, port, row.connected, row.status
        );
    }

    output.trim_end().to_string()
}
