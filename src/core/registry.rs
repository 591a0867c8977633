//! Test registry and the single-slot test bench
//!
//! The registry is built once at startup: built-in procedural tests plus
//! any script directory the caller registers explicitly. The bench keeps
//! at most one test loaded and always unloads before loading.

use super::script::{LogSink, ParseError, RunContext, Script, ScriptParser};
use super::test_case::{Procedure, TestCase, TestParams};
use super::transport::{EventHook, LineConfig, SerialTransport, DEFAULT_GUARD};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File extension of test scripts
pub const SCRIPT_EXTENSION: &str = "atm";

/// Builds a fresh instance of a registered test
pub type TestFactory = Box<dyn Fn() -> TestCase + Send + Sync>;

/// Test loading errors
#[derive(Error, Debug)]
pub enum LoadError {
    /// No test registered under that name
    #[error("Unknown test: {0}")]
    UnknownTest(String),

    /// Script file or directory could not be read
    #[error("Cannot read {}: {source}", path.display())]
    Io {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Script file failed to parse
    #[error("{}: {source}", path.display())]
    Parse {
        /// Offending script
        path: PathBuf,
        /// Parse failure
        #[source]
        source: ParseError,
    },
}

/// Debug test: logs a greeting and passes
#[derive(Debug, Default)]
pub struct SampleTest;

#[async_trait]
impl Procedure for SampleTest {
    async fn execute(&mut self, ctx: &mut RunContext, _params: &TestParams) -> bool {
        ctx.log("Hello, world!");
        true
    }
}

/// Name-to-factory mapping of loadable tests
#[derive(Default)]
pub struct TestRegistry {
    factories: BTreeMap<String, TestFactory>,
}

impl TestRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in tests
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("SampleTest", || TestCase::procedural("SampleTest", SampleTest));
        registry
    }

    /// Register (or replace) a factory under `name`
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> TestCase + Send + Sync + 'static,
    {
        if self.factories.insert(name.to_string(), Box::new(factory)).is_some() {
            tracing::warn!(test = name, "test registration replaced");
        }
    }

    /// Register a parsed script under `name`
    pub fn register_script(&mut self, name: &str, script: Script) {
        let test_name = name.to_string();
        self.register(name, move || TestCase::from_script(&test_name, script.clone()));
    }

    /// Parse and register one script file as `<Stem>Test`
    pub fn register_script_file(&mut self, path: &Path) -> Result<String, LoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let script = ScriptParser::parse(&text).map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let name = test_name_for_stem(&stem);
        self.register_script(&name, script);
        tracing::debug!(test = %name, path = %path.display(), "script registered");
        Ok(name)
    }

    /// Register every `*.atm` file in `dir`, in file name order
    pub fn register_script_dir(&mut self, dir: &Path) -> Result<Vec<String>, LoadError> {
        let io_err = |source| LoadError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == SCRIPT_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();

        paths.iter().map(|path| self.register_script_file(path)).collect()
    }

    /// Registered test names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build a fresh instance of `name`
    pub fn create(&self, name: &str) -> Option<TestCase> {
        self.factories.get(name).map(|factory| factory())
    }
}

impl std::fmt::Debug for TestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRegistry")
            .field("tests", &self.names())
            .finish()
    }
}

/// `power_on` becomes `Power_OnTest`
fn test_name_for_stem(stem: &str) -> String {
    let mut name = String::with_capacity(stem.len() + 4);
    let mut at_word_start = true;
    for c in stem.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                name.extend(c.to_uppercase());
            } else {
                name.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            name.push(c);
            at_word_start = true;
        }
    }
    name.push_str("Test");
    name
}

/// Holds at most one loaded test and the lines every test gets
pub struct TestBench {
    registry: TestRegistry,
    lines: Vec<LineConfig>,
    guard: Duration,
    poll_interval: Duration,
    sink: Option<LogSink>,
    hook: Option<EventHook>,
    loaded: Option<TestCase>,
}

impl TestBench {
    /// Create an empty bench over `registry`
    pub fn new(registry: TestRegistry) -> Self {
        Self {
            registry,
            lines: Vec::new(),
            guard: DEFAULT_GUARD,
            poll_interval: Duration::from_millis(10),
            sink: None,
            hook: None,
            loaded: None,
        }
    }

    /// Lines attached to every loaded test
    #[must_use]
    pub fn with_lines(mut self, lines: Vec<LineConfig>) -> Self {
        self.lines = lines;
        self
    }

    /// Guard window armed when a line opens
    #[must_use]
    pub fn with_guard(mut self, guard: Duration) -> Self {
        self.guard = guard;
        self
    }

    /// Receive polling slice
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Display sink for run log entries
    #[must_use]
    pub fn with_sink(mut self, sink: LogSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Observer for line activity
    #[must_use]
    pub fn with_hook(mut self, hook: EventHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// The registry backing this bench
    pub fn registry(&self) -> &TestRegistry {
        &self.registry
    }

    /// Unload the current test, then build and load `name`
    pub fn load(&mut self, name: &str) -> Result<&mut TestCase, LoadError> {
        self.unload();

        let mut test = self
            .registry
            .create(name)
            .ok_or_else(|| LoadError::UnknownTest(name.to_string()))?;

        for config in &self.lines {
            let mut line = SerialTransport::from_config(config.clone())
                .with_guard(self.guard)
                .with_poll_interval(self.poll_interval);
            line.set_hook(self.hook.clone());
            test.attach_line(line);
        }
        test.set_sink(self.sink.clone());

        tracing::info!(test = name, lines = self.lines.len(), "test loaded");
        Ok(self.loaded.insert(test))
    }

    /// Drop the loaded test, closing its lines
    pub fn unload(&mut self) {
        if let Some(test) = self.loaded.take() {
            tracing::info!(test = test.name(), "test unloaded");
        }
    }

    /// The loaded test
    pub fn loaded(&self) -> Option<&TestCase> {
        self.loaded.as_ref()
    }

    /// The loaded test, mutably
    pub fn loaded_mut(&mut self) -> Option<&mut TestCase> {
        self.loaded.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::script::RunStatus;
    use std::fs;

    #[test]
    fn test_stem_naming() {
        assert_eq!(test_name_for_stem("sample"), "SampleTest");
        assert_eq!(test_name_for_stem("power_on"), "Power_OnTest");
        assert_eq!(test_name_for_stem("i2c_scan"), "I2C_ScanTest");
        assert_eq!(test_name_for_stem("UART"), "UartTest");
    }

    #[tokio::test]
    async fn test_builtin_sample() {
        let registry = TestRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["SampleTest"]);

        let mut test = registry.create("SampleTest").unwrap();
        assert!(test.check_connection());
        assert!(test.run_full().await);
        assert_eq!(test.log(), &["Hello, world!"]);
        assert!(registry.create("MissingTest").is_none());
    }

    #[test]
    fn test_script_dir_registration() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("power_on.atm"), "start\nwait 5\nstop\n").unwrap();
        fs::write(dir.path().join("blink.atm"), "start\nstop\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "not a script").unwrap();

        let mut registry = TestRegistry::with_builtins();
        let names = registry.register_script_dir(dir.path()).unwrap();

        assert_eq!(names, vec!["BlinkTest", "Power_OnTest"]);
        assert!(registry.contains("Power_OnTest"));
        let test = registry.create("Power_OnTest").unwrap();
        assert_eq!(test.name(), "Power_OnTest");
        assert_eq!(test.script().map(Script::len), Some(3));
    }

    #[test]
    fn test_script_dir_parse_error_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.atm"), "start\nfrobnicate\n").unwrap();

        let err = TestRegistry::new().register_script_dir(dir.path()).unwrap_err();
        match err {
            LoadError::Parse { path, source } => {
                assert!(path.ends_with("bad.atm"));
                assert_eq!(source.line_no(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bench_unloads_before_loading() {
        let mut registry = TestRegistry::with_builtins();
        registry.register_script("LineTest", ScriptParser::parse("start\nstop").unwrap());

        let mut bench = TestBench::new(registry).with_lines(vec![LineConfig::loopback("iic")]);

        let test = bench.load("LineTest").unwrap();
        assert!(test.run_full().await);
        assert_eq!(test.log(), &["start (opened iic)", "stop (closed iic)"]);
        assert_eq!(test.status(), RunStatus::Completed);

        bench.load("SampleTest").unwrap();
        assert_eq!(bench.loaded().map(TestCase::name), Some("SampleTest"));
        assert_eq!(bench.loaded().map(TestCase::status), Some(RunStatus::NotRun));

        assert!(matches!(bench.load("Nope"), Err(LoadError::UnknownTest(_))));
        assert!(bench.loaded().is_none());
    }
}
