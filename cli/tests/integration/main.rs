//! Integration tests for tether CLI
//!
//! These tests spawn the actual binary and test end-to-end behavior.
//! They are slower and should be run separately from unit tests.

mod check_command;
mod cli_tests;
mod match_command;
