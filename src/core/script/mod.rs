//! Test scripts
//!
//! Text is parsed into a [`Script`] by [`ScriptParser`], then executed by a
//! [`Runner`] against a [`RunContext`].

mod action;
mod parser;
mod runner;

pub use action::{Action, Comparator, Operand, Script};
pub use parser::{ParseError, ScriptParser};
pub use runner::{LogSink, RunContext, RunOutcome, RunStatus, Runner, RuntimeError};
