//! Property-based tests for tunnel command construction

use std::path::PathBuf;

use bastide_core::{PortForwardTarget, TunnelCommand};
use proptest::prelude::*;

fn target(local_port: u16, target_port: u16, ip: String) -> PortForwardTarget {
    PortForwardTarget {
        context: "prop".to_string(),
        bastion_id: "ocid1.bastion.prop".to_string(),
        host: "host.bastion.example.com".to_string(),
        display_name: "bastide-ctx-prop".to_string(),
        target_ip: ip,
        target_port,
        local_port,
        ttl_seconds: 10_800,
        public_key: PathBuf::from("/keys/id.pub"),
        private_key: PathBuf::from("/keys/id"),
        region: None,
        custom_args: None,
        username: None,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// The forward argument, session login and key always appear; relaxed host
    /// key checking only with force
    #[test]
    fn prop_forward_command_shape(
        local in 1u16..,
        remote in 1u16..,
        octets in prop::array::uniform4(0u8..),
        force in any::<bool>(),
    ) {
        let ip = format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3]);
        let command = TunnelCommand::port_forward(&target(local, remote, ip.clone()), "sid", force);
        let args = command.args().join(" ");

        let forward = format!("-L {local}:{ip}:{remote}");
        prop_assert!(args.contains(&forward));
        prop_assert!(args.contains("sid@host.bastion.example.com"));
        prop_assert!(args.contains("-i /keys/id"));
        prop_assert!(args.contains("-N"));
        prop_assert_eq!(args.contains("StrictHostKeyChecking=no"), force);
        prop_assert!(!command.is_interactive());
    }
}
