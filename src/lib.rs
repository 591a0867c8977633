//! # ATMOS Core Library
//!
//! Hardware-in-the-loop test bench for microcontroller units reached over
//! serial lines:
//! - Time-windowed, key-protected line locking
//! - Serial transports with a settle guard after every open
//! - A small line-oriented test script language
//! - Script interpreter with a run log and JSON result export
//!
//! ## Example
//!
//! ```rust,no_run
//! use atmos_core::{LineConfig, SerialTransport, TestCase};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut test = TestCase::parse("Ping", "start\nwait 2000\ntx iic 0x1f\nrx iic 50\nstop")?;
//!     test.attach_line(SerialTransport::from_config(LineConfig::new("iic", "/dev/ttyUSB0", 9600)));
//!
//!     let passed = test.run_full().await;
//!     for entry in test.log() {
//!         println!("{entry}");
//!     }
//!     test.export("ping_results.json");
//!     std::process::exit(if passed { 0 } else { 1 });
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::{AppConfig, BenchSettings, ConfigError, LoggingConfig};
pub use crate::core::lock::{Secret, TimedLock};
pub use crate::core::registry::{LoadError, SampleTest, TestBench, TestRegistry};
pub use crate::core::report::{ReportError, TestReport};
pub use crate::core::script::{
    Action, Comparator, LogSink, Operand, ParseError, RunContext, RunOutcome, RunStatus, Runner,
    RuntimeError, Script, ScriptParser,
};
pub use crate::core::test_case::{Procedure, TestCase, TestParams};
pub use crate::core::transport::{
    EventHook, LineConfig, LoopbackHandle, LoopbackPort, PortDriver, SerialParity,
    SerialFlowControl, SerialTransport, SystemPort, TransportError, TransportEvent,
    TransportStats,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
