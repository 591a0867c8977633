//! Core module containing the bench functionality of ATMOS
//!
//! This module provides:
//! - Timed, key-protected line lock
//! - Serial line transport (system ports and loopback)
//! - Test script parser and interpreter
//! - Test case façade, registry and export

pub mod lock;
pub mod registry;
pub mod report;
pub mod script;
pub mod test_case;
pub mod transport;
