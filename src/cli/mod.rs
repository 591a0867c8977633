//! CLI Module
//!
//! Exit codes and result mapping for the `atmos` command-line runner

pub mod exit_codes;

pub use exit_codes::{exit_code_description, print_exit_codes, CliResult, ExitCodes};
