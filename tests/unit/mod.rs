mod config_tests;
mod logging_tests;
mod state_machine_tests;
