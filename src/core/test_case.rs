//! Test case façade
//!
//! A [`TestCase`] is either a parsed script or a procedural [`Procedure`],
//! plus the [`RunContext`] it runs against and the status of its last run.

use super::report::TestReport;
use super::script::{
    LogSink, ParseError, RunContext, RunStatus, Runner, Script, ScriptParser,
};
use super::transport::SerialTransport;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use uuid::Uuid;

/// Named parameters passed to a run
pub type TestParams = BTreeMap<String, String>;

/// Hand-written test body
#[async_trait]
pub trait Procedure: Send {
    /// Liveness probe run before `execute`.
    ///
    /// No handshake is defined for the bench yet, so the default accepts.
    fn check_connection(&self) -> bool {
        true
    }

    /// Run the test; `true` means pass
    async fn execute(&mut self, ctx: &mut RunContext, params: &TestParams) -> bool;
}

enum Body {
    Script(Script),
    Procedure(Box<dyn Procedure>),
}

#[derive(Debug, Clone)]
struct LastRun {
    run_id: Uuid,
    started: DateTime<Local>,
    duration_ms: u64,
    error: Option<String>,
}

/// One loadable test
pub struct TestCase {
    name: String,
    body: Body,
    context: RunContext,
    status: RunStatus,
    last_run: Option<LastRun>,
}

impl TestCase {
    /// Wrap an already parsed script
    pub fn from_script(name: &str, script: Script) -> Self {
        Self::with_body(name, Body::Script(script))
    }

    /// Parse script text; nothing is loaded if parsing fails
    pub fn parse(name: &str, text: &str) -> Result<Self, ParseError> {
        Ok(Self::from_script(name, ScriptParser::parse(text)?))
    }

    /// Wrap a procedural body
    pub fn procedural(name: &str, procedure: impl Procedure + 'static) -> Self {
        Self::with_body(name, Body::Procedure(Box::new(procedure)))
    }

    fn with_body(name: &str, body: Body) -> Self {
        Self {
            name: name.to_string(),
            body,
            context: RunContext::new(),
            status: RunStatus::NotRun,
            last_run: None,
        }
    }

    /// Test name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The script, for script-backed tests
    pub fn script(&self) -> Option<&Script> {
        match &self.body {
            Body::Script(script) => Some(script),
            Body::Procedure(_) => None,
        }
    }

    /// Status of the last run
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Log of the last run
    pub fn log(&self) -> &[String] {
        self.context.entries()
    }

    /// Run context (lines, buffers, log)
    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Mutable run context
    pub fn context_mut(&mut self) -> &mut RunContext {
        &mut self.context
    }

    /// Register a line for the test to use
    pub fn attach_line(&mut self, line: SerialTransport) {
        if let Some(previous) = self.context.add_line(line) {
            tracing::debug!(line = previous.name(), "line replaced");
        }
    }

    /// Mirror run log entries into `sink`
    pub fn set_sink(&mut self, sink: Option<LogSink>) {
        self.context.set_sink(sink);
    }

    /// Liveness probe; scripts have no handshake and always pass it
    pub fn check_connection(&self) -> bool {
        match &self.body {
            Body::Script(_) => true,
            Body::Procedure(procedure) => procedure.check_connection(),
        }
    }

    /// Check the connection, then execute with no parameters
    pub async fn run_full(&mut self) -> bool {
        self.run_full_with(&TestParams::new()).await
    }

    /// Check the connection, then execute. `true` only if both succeed.
    pub async fn run_full_with(&mut self, params: &TestParams) -> bool {
        self.context.reset();
        let run_id = Uuid::new_v4();
        let started = Local::now();
        let clock = Instant::now();
        tracing::info!(test = %self.name, %run_id, "test started");

        let (status, error) = if self.check_connection() {
            self.execute(params).await
        } else {
            let message = "connection check failed".to_string();
            self.context.log(message.clone());
            (RunStatus::Failed, Some(message))
        };

        self.status = status;
        self.last_run = Some(LastRun {
            run_id,
            started,
            duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
            error,
        });
        tracing::info!(test = %self.name, %run_id, %status, "test finished");
        status == RunStatus::Completed
    }

    async fn execute(&mut self, params: &TestParams) -> (RunStatus, Option<String>) {
        match &mut self.body {
            Body::Script(script) => {
                let outcome = Runner::new(script.actions()).run(&mut self.context).await;
                (outcome.status, outcome.error.map(|e| e.to_string()))
            }
            Body::Procedure(procedure) => {
                if procedure.execute(&mut self.context, params).await {
                    (RunStatus::Completed, None)
                } else {
                    (RunStatus::Failed, Some("procedure reported failure".to_string()))
                }
            }
        }
    }

    /// Snapshot of the last run
    pub fn report(&self) -> TestReport {
        let (run_id, timestamp, duration_ms, error) = match &self.last_run {
            Some(run) => (Some(run.run_id), run.started, run.duration_ms, run.error.clone()),
            None => (None, Local::now(), 0, None),
        };
        TestReport {
            test_name: self.name.clone(),
            passed: self.status == RunStatus::Completed,
            status: self.status,
            error,
            log: self.context.entries().to_vec(),
            timestamp,
            run_id,
            duration_ms,
        }
    }

    /// Write the last run's report as JSON. Returns `false` if it could not
    /// be written.
    pub fn export(&self, location: impl AsRef<Path>) -> bool {
        let location = location.as_ref();
        match self.report().write_to(location) {
            Ok(()) => {
                tracing::info!(test = %self.name, path = %location.display(), "results exported");
                true
            }
            Err(e) => {
                tracing::warn!(test = %self.name, path = %location.display(), error = %e, "export failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field(
                "kind",
                &match self.body {
                    Body::Script(_) => "script",
                    Body::Procedure(_) => "procedure",
                },
            )
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}
