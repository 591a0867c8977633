//! Script interpreter
//!
//! Walks an action list with an explicit program counter. Each linear
//! action appends exactly one entry to the run log. Retryable transport
//! errors (`Locked`, `Timeout`) are logged and the run continues;
//! structural errors and hard transport failures end the run as
//! [`RunStatus::Failed`].

use super::action::Action;
use crate::core::transport::{SerialTransport, TransportError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Display sink receiving every run log entry as it is appended
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Errors that end a run
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Script referenced a line that is not registered
    #[error("unknown line `{line}`")]
    UnknownLine {
        /// Requested line name
        line: String,
    },

    /// Block opener or closer without its partner
    #[error("unmatched block at action {index}")]
    UnmatchedBlock {
        /// Index of the offending action
        index: usize,
    },

    /// Non-retryable transport failure
    #[error("line `{line}`: {source}")]
    Transport {
        /// Line that failed
        line: String,
        /// Underlying error
        #[source]
        source: TransportError,
    },
}

/// Completion status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Nothing has run yet
    #[default]
    NotRun,
    /// Every action was attempted without an unrecoverable error
    Completed,
    /// The run stopped on an unrecoverable error
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRun => write!(f, "not run"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Result of one interpreter run
#[derive(Debug)]
pub struct RunOutcome {
    /// Final status
    pub status: RunStatus,
    /// Error that ended the run, if any
    pub error: Option<RuntimeError>,
    /// Number of actions executed (skipped loop bodies not counted)
    pub executed: usize,
}

impl RunOutcome {
    /// Whether the run completed
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Mutable state threaded through one execution: run log, named lines and
/// the last bytes captured per line.
#[derive(Default)]
pub struct RunContext {
    log: Vec<String>,
    sink: Option<LogSink>,
    lines: BTreeMap<String, SerialTransport>,
    buffers: HashMap<String, Bytes>,
}

impl RunContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror every log entry into `sink`
    #[must_use]
    pub fn with_sink(mut self, sink: LogSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replace the display sink
    pub fn set_sink(&mut self, sink: Option<LogSink>) {
        self.sink = sink;
    }

    /// Append one entry to the run log
    pub fn log(&mut self, entry: impl Into<String>) {
        let entry = entry.into();
        tracing::debug!(target: "atmos::run", "{entry}");
        if let Some(sink) = &self.sink {
            sink(&entry);
        }
        self.log.push(entry);
    }

    /// Log entries in display order
    pub fn entries(&self) -> &[String] {
        &self.log
    }

    /// Drop the log and captured buffers, keeping lines and sink
    pub fn reset(&mut self) {
        self.log.clear();
        self.buffers.clear();
    }

    /// Register a line under its name, returning any line it replaces
    pub fn add_line(&mut self, line: SerialTransport) -> Option<SerialTransport> {
        self.lines.insert(line.name().to_string(), line)
    }

    /// Remove a line by name
    pub fn remove_line(&mut self, name: &str) -> Option<SerialTransport> {
        self.lines.remove(name)
    }

    /// Look up a line
    pub fn line(&self, name: &str) -> Option<&SerialTransport> {
        self.lines.get(name)
    }

    /// Look up a line mutably
    pub fn line_mut(&mut self, name: &str) -> Option<&mut SerialTransport> {
        self.lines.get_mut(name)
    }

    /// Registered line names, sorted
    pub fn line_names(&self) -> Vec<String> {
        self.lines.keys().cloned().collect()
    }

    /// Last bytes captured into `name`
    pub fn buffer(&self, name: &str) -> Option<&Bytes> {
        self.buffers.get(name)
    }

    /// Store captured bytes under `name`
    pub fn set_buffer(&mut self, name: &str, data: Bytes) {
        self.buffers.insert(name.to_string(), data);
    }

    /// Open every closed line, returning the names that were opened
    pub fn open_lines(&mut self) -> Result<Vec<String>, RuntimeError> {
        let mut opened = Vec::new();
        for (name, line) in &mut self.lines {
            if line.is_open() {
                continue;
            }
            line.open().map_err(|source| RuntimeError::Transport {
                line: name.clone(),
                source,
            })?;
            opened.push(name.clone());
        }
        Ok(opened)
    }

    /// Close every open line, returning the names that were closed
    pub fn close_lines(&mut self) -> Vec<String> {
        let mut closed = Vec::new();
        for (name, line) in &mut self.lines {
            if line.is_open() {
                line.close();
                closed.push(name.clone());
            }
        }
        closed
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("log", &self.log)
            .field("lines", &self.lines)
            .field("buffers", &self.buffers.keys().collect::<Vec<_>>())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// Interpreter over one action list
#[derive(Debug)]
pub struct Runner<'a> {
    actions: &'a [Action],
    pc: usize,
    executed: usize,
}

impl<'a> Runner<'a> {
    /// Create a runner positioned at the first action
    pub fn new(actions: &'a [Action]) -> Self {
        Self {
            actions,
            pc: 0,
            executed: 0,
        }
    }

    /// Execute until the action list is exhausted or an error ends the run
    pub async fn run(mut self, ctx: &mut RunContext) -> RunOutcome {
        tracing::debug!(actions = self.actions.len(), "run started");

        while self.pc < self.actions.len() {
            match self.step(ctx).await {
                Ok(next) => {
                    self.executed += 1;
                    self.pc = next;
                }
                Err(error) => {
                    tracing::error!(pc = self.pc, %error, "run aborted");
                    ctx.log(format!("error: {error}"));
                    return RunOutcome {
                        status: RunStatus::Failed,
                        error: Some(error),
                        executed: self.executed,
                    };
                }
            }
        }

        tracing::debug!(executed = self.executed, "run completed");
        RunOutcome {
            status: RunStatus::Completed,
            error: None,
            executed: self.executed,
        }
    }

    /// Execute the action at `pc`, returning the next program counter
    async fn step(&mut self, ctx: &mut RunContext) -> Result<usize, RuntimeError> {
        let actions = self.actions;
        let action = &actions[self.pc];

        match action {
            Action::Start => {
                let opened = ctx.open_lines()?;
                ctx.log(with_names("start", "opened", &opened));
            }
            Action::Stop => {
                let closed = ctx.close_lines();
                ctx.log(with_names("stop", "closed", &closed));
            }
            Action::Wait { millis } => {
                tokio::time::sleep(Duration::from_millis(u64::from(*millis))).await;
                ctx.log(format!("wait {millis} ms"));
            }
            Action::Tx { line, data } => {
                let result = resolve(ctx, line)?.transmit(data);
                match result {
                    Ok(written) => ctx.log(format!(
                        "tx {line} 0x{} ({written} byte{})",
                        hex::encode(data),
                        if written == 1 { "" } else { "s" }
                    )),
                    Err(e) => log_retryable(ctx, action, line, e)?,
                }
            }
            Action::Rx { line, timeout_ms } => {
                let timeout = Duration::from_millis(u64::from(*timeout_ms));
                let result = resolve(ctx, line)?.receive(timeout).await;
                match result {
                    Ok(data) => {
                        ctx.log(format!("rx {line}: {}", render_bytes(&data)));
                        ctx.set_buffer(line, data);
                    }
                    Err(e) => log_retryable(ctx, action, line, e)?,
                }
            }
            Action::Disp { buffer } => {
                let shown = ctx
                    .buffer(buffer)
                    .map_or_else(|| "<empty>".to_string(), |data| render_bytes(data));
                ctx.log(format!("disp {buffer}: {shown}"));
            }
            Action::ForBegin { .. } | Action::WhileBegin { .. } => {
                let end = self.matching_end()?;
                ctx.log(format!("{action}: loop recognized, body skipped"));
                return Ok(end + 1);
            }
            Action::ForEnd | Action::WhileEnd => {
                return Err(RuntimeError::UnmatchedBlock { index: self.pc });
            }
        }

        Ok(self.pc + 1)
    }

    /// Index of the closer matching the opener at `pc`
    fn matching_end(&self) -> Result<usize, RuntimeError> {
        let mut open: Vec<&Action> = vec![&self.actions[self.pc]];

        for (index, action) in self.actions.iter().enumerate().skip(self.pc + 1) {
            if action.opens_block() {
                open.push(action);
            } else if matches!(action, Action::ForEnd | Action::WhileEnd) {
                match open.pop() {
                    Some(opener) if action.closes(opener) => {
                        if open.is_empty() {
                            return Ok(index);
                        }
                    }
                    _ => return Err(RuntimeError::UnmatchedBlock { index }),
                }
            }
        }

        Err(RuntimeError::UnmatchedBlock { index: self.pc })
    }
}

fn resolve<'c>(ctx: &'c mut RunContext, line: &str) -> Result<&'c mut SerialTransport, RuntimeError> {
    ctx.line_mut(line).ok_or_else(|| RuntimeError::UnknownLine {
        line: line.to_string(),
    })
}

fn log_retryable(
    ctx: &mut RunContext,
    action: &Action,
    line: &str,
    error: TransportError,
) -> Result<(), RuntimeError> {
    if error.is_retryable() {
        tracing::warn!(%line, %error, "retryable transport error");
        ctx.log(format!("{action}: {error} (retryable, skipped)"));
        Ok(())
    } else {
        Err(RuntimeError::Transport {
            line: line.to_string(),
            source: error,
        })
    }
}

fn with_names(keyword: &str, verb: &str, names: &[String]) -> String {
    if names.is_empty() {
        keyword.to_string()
    } else {
        format!("{keyword} ({verb} {})", names.join(", "))
    }
}

/// `0x48690a "Hi."`: hex plus printable ASCII, other bytes as `.`
fn render_bytes(data: &[u8]) -> String {
    if data.is_empty() {
        return "<empty line>".to_string();
    }
    let text: String = data
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect();
    format!("0x{} \"{text}\"", hex::encode(data))
}
