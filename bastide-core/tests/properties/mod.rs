//! Property test modules

mod auth_budget_tests;
mod reconnect_decision_tests;
mod retry_tests;
mod status_record_tests;
mod tunnel_command_tests;
