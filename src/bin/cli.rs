//! ATMOS CLI - run bench tests from a terminal or a CI job
//!
//! Exit status follows [`ExitCodes`], so pipelines can tell a failing test
//! from a broken script or an unreachable port.

use atmos_core::config::{self, AppConfig, LoggingConfig};
use atmos_core::core::transport::list_ports;
use atmos_core::{
    CliResult, ExitCodes, LineConfig, LogSink, ScriptParser, TestBench, TestParams, TestRegistry,
};
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// CLI output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format for scripting
    Json,
}

/// ATMOS CLI
#[derive(Parser, Debug)]
#[command(
    name = "atmos",
    version,
    about = "Hardware-in-the-loop test bench for serial-attached MCUs",
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, env = "ATMOS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory of `*.atm` scripts to register
    #[arg(long, global = true)]
    tests_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered tests
    List,

    /// List available serial ports
    Ports,

    /// Parse a script and report the first error
    Check {
        /// Script file
        script: PathBuf,
    },

    /// Load and run a test, then export its results
    Run {
        /// Registered test name or path to a script file
        target: String,

        /// Attach a line: NAME=PORT[@BAUD]
        #[arg(short, long = "line", value_parser = parse_line_arg)]
        lines: Vec<LineConfig>,

        /// Attach an in-memory echo line
        #[arg(long = "loopback")]
        loopbacks: Vec<String>,

        /// Parameter passed to procedural tests: KEY=VALUE
        #[arg(short, long = "param", value_parser = parse_param_arg)]
        params: Vec<(String, String)>,

        /// Write the JSON report here
        #[arg(short, long)]
        export: Option<PathBuf>,

        /// Override the open guard (seconds)
        #[arg(long)]
        guard: Option<f64>,
    },

    /// Write a starter configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show exit codes
    ExitCodes,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::InitConfig { force } = &cli.command {
        let result = init_config(cli.config.as_deref(), *force);
        return finish(&cli, result);
    }

    let loaded = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    let app_config = match loaded {
        Ok(app_config) => app_config,
        Err(e) => return finish(&cli, CliResult::from(e)),
    };

    let _guard = match init_logging(&app_config.logging, cli.verbose, cli.quiet) {
        Ok(guard) => guard,
        Err(e) => return finish(&cli, CliResult::error(ExitCodes::CONFIG_ERROR, format!("{e:#}"))),
    };
    tracing::debug!("Starting ATMOS v{}", env!("CARGO_PKG_VERSION"));

    let result = match &cli.command {
        Commands::List => list_tests(&cli, &app_config),
        Commands::Ports => show_ports(&cli),
        Commands::Check { script } => check_script(&cli, script),
        Commands::Run {
            target,
            lines,
            loopbacks,
            params,
            export,
            guard,
        } => {
            let mut app_config = app_config.clone();
            for line in lines {
                app_config.upsert_line(line.clone());
            }
            for name in loopbacks {
                app_config.upsert_line(LineConfig::loopback(name));
            }
            if let Some(secs) = guard {
                app_config.bench.guard_secs = *secs;
            }
            let params: TestParams = params.iter().cloned().collect();
            run_test(&cli, app_config, target, &params, export.as_deref()).await
        }
        Commands::ExitCodes => {
            atmos_core::cli::print_exit_codes();
            CliResult::success()
        }
        Commands::InitConfig { force } => init_config(cli.config.as_deref(), *force),
    };

    finish(&cli, result)
}

fn finish(cli: &Cli, result: CliResult) -> ExitCode {
    match &result {
        CliResult::Success(Some(msg)) if !cli.quiet => println!("{msg}"),
        CliResult::Error(code, msg) => {
            tracing::debug!(code, "command failed");
            eprintln!("Error: {msg}");
        }
        CliResult::Success(_) => {}
    }
    result.to_exit_code()
}

fn init_logging(
    logging: &LoggingConfig,
    verbose: bool,
    quiet: bool,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        logging.level.as_str()
    };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level)
            .with_context(|| format!("invalid log level `{default_level}`"))?,
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if logging.json {
        layers.push(fmt::layer().json().with_writer(std::io::stderr).boxed());
    } else {
        layers.push(fmt::layer().with_target(false).with_writer(std::io::stderr).boxed());
    }

    let mut guard = None;
    if let Some(path) = &logging.file {
        let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create log directory {}", dir.display()))?;
        let file_name = path.file_name().map_or_else(|| "atmos.log".into(), ToOwned::to_owned);
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (writer, worker) = tracing_appender::non_blocking(appender);
        layers.push(fmt::layer().with_ansi(false).with_writer(writer).boxed());
        guard = Some(worker);
    }

    layers.push(filter.boxed());
    Registry::default()
        .with(layers)
        .try_init()
        .context("logging already initialized")?;
    Ok(guard)
}

fn init_config(path: Option<&Path>, force: bool) -> CliResult {
    let Some(path) = path.map(Path::to_path_buf).or_else(config::default_config_path) else {
        return CliResult::error(ExitCodes::CONFIG_ERROR, "no configuration directory available");
    };
    if path.exists() && !force {
        return CliResult::error(
            ExitCodes::CONFIG_ERROR,
            format!("{} already exists (use --force to overwrite)", path.display()),
        );
    }
    if let Some(parent) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return CliResult::from(e);
        }
    }

    let mut starter = AppConfig::default();
    starter.upsert_line(LineConfig::loopback("iic"));
    match starter.save_to(&path) {
        Ok(()) => CliResult::success_with_message(format!("Wrote {}", path.display())),
        Err(e) => CliResult::from(e),
    }
}

fn parse_line_arg(s: &str) -> Result<LineConfig, String> {
    let (name, rest) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PORT[@BAUD], got `{s}`"))?;
    let (port, baud) = match rest.rsplit_once('@') {
        Some((port, baud)) => {
            let baud = baud.parse::<u32>().map_err(|e| format!("invalid baud `{baud}`: {e}"))?;
            (port, baud)
        }
        None => (rest, 9600),
    };
    if name.is_empty() || port.is_empty() {
        return Err(format!("expected NAME=PORT[@BAUD], got `{s}`"));
    }
    Ok(LineConfig::new(name, port, baud))
}

fn parse_param_arg(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))
}

fn build_registry(cli: &Cli, app_config: &AppConfig) -> Result<TestRegistry, CliResult> {
    let mut registry = TestRegistry::with_builtins();
    let tests_dir = cli.tests_dir.as_ref().or(app_config.bench.tests_dir.as_ref());
    if let Some(dir) = tests_dir {
        let names = registry.register_script_dir(dir)?;
        tracing::debug!(dir = %dir.display(), count = names.len(), "scripts registered");
    }
    Ok(registry)
}

fn list_tests(cli: &Cli, app_config: &AppConfig) -> CliResult {
    let registry = match build_registry(cli, app_config) {
        Ok(registry) => registry,
        Err(result) => return result,
    };

    match cli.format {
        OutputFormat::Json => match serde_json::to_string_pretty(&registry.names()) {
            Ok(json) => println!("{json}"),
            Err(e) => return CliResult::error(ExitCodes::INTERNAL_ERROR, e.to_string()),
        },
        OutputFormat::Text => {
            for name in registry.names() {
                println!("{name}");
            }
        }
    }
    CliResult::success()
}

fn show_ports(cli: &Cli) -> CliResult {
    let ports = match list_ports() {
        Ok(ports) => ports,
        Err(e) => return CliResult::from(e),
    };

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            match serde_json::to_string_pretty(&json) {
                Ok(text) => println!("{text}"),
                Err(e) => return CliResult::error(ExitCodes::INTERNAL_ERROR, e.to_string()),
            }
        }
        OutputFormat::Text if ports.is_empty() => {
            if !cli.quiet {
                println!("No serial ports found.");
            }
        }
        OutputFormat::Text => {
            for port in &ports {
                println!("{} [{:?}]", port.port_name, port.port_type);
            }
        }
    }
    CliResult::success()
}

fn check_script(cli: &Cli, path: &Path) -> CliResult {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return CliResult::file_not_found(&path.display().to_string())
        }
        Err(e) => return CliResult::from(e),
    };

    match ScriptParser::parse(&text) {
        Ok(script) => {
            if !cli.quiet && cli.format == OutputFormat::Text {
                for (index, action) in script.actions().iter().enumerate() {
                    println!("{:>4}  {action}", index + 1);
                }
            }
            CliResult::success_with_message(format!(
                "{}: {} action(s), OK",
                path.display(),
                script.len()
            ))
        }
        Err(e) => CliResult::error(ExitCodes::SCRIPT_ERROR, format!("{}: {e}", path.display())),
    }
}

async fn run_test(
    cli: &Cli,
    app_config: AppConfig,
    target: &str,
    params: &TestParams,
    export: Option<&Path>,
) -> CliResult {
    if let Err(e) = app_config.validate() {
        return CliResult::from(e);
    }

    let mut registry = match build_registry(cli, &app_config) {
        Ok(registry) => registry,
        Err(result) => return result,
    };

    let target_path = Path::new(target);
    let name = if registry.contains(target) {
        target.to_string()
    } else if target_path.is_file() {
        match registry.register_script_file(target_path) {
            Ok(name) => name,
            Err(e) => return CliResult::from(e),
        }
    } else {
        return CliResult::invalid_args(format!(
            "`{target}` is neither a registered test nor a script file"
        ));
    };

    let mut bench = TestBench::new(registry)
        .with_lines(app_config.lines.clone())
        .with_guard(app_config.bench.guard())
        .with_poll_interval(app_config.bench.poll_interval());
    if cli.format == OutputFormat::Text && !cli.quiet {
        let sink: LogSink = Arc::new(|entry: &str| println!("{entry}"));
        bench = bench.with_sink(sink);
    }

    let test = match bench.load(&name) {
        Ok(test) => test,
        Err(e) => return CliResult::from(e),
    };
    let passed = test.run_full_with(params).await;
    let report = test.report();

    if cli.format == OutputFormat::Json {
        match report.to_json() {
            Ok(json) => println!("{json}"),
            Err(e) => return CliResult::error(ExitCodes::INTERNAL_ERROR, e.to_string()),
        }
    }

    let location = export.map(Path::to_path_buf).or_else(|| {
        app_config
            .bench
            .results_dir
            .clone()
            .or_else(config::results_dir)
            .map(|dir| dir.join(format!("{name}_{}.json", report.timestamp.format("%Y%m%d_%H%M%S"))))
    });
    if let Some(location) = location {
        if export.is_none() {
            if let Some(parent) = location.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    tracing::warn!(path = %parent.display(), error = %e, "cannot create results directory");
                }
            }
        }
        if test.export(&location) && !cli.quiet && cli.format == OutputFormat::Text {
            println!("Results: {}", location.display());
        }
    }

    if passed {
        CliResult::success_with_message(format!("{name}: PASSED"))
    } else {
        let reason = report.error.unwrap_or_else(|| "failed".to_string());
        CliResult::test_failed(format!("{name}: FAILED ({reason})"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_arg() {
        let line = parse_line_arg("iic=/dev/ttyUSB0@115200").unwrap();
        assert_eq!(line.name, "iic");
        assert_eq!(line.port, "/dev/ttyUSB0");
        assert_eq!(line.baud, 115_200);

        let line = parse_line_arg("uart=COM3").unwrap();
        assert_eq!(line.baud, 9600);

        assert!(parse_line_arg("iic").is_err());
        assert!(parse_line_arg("iic=COM3@fast").is_err());
        assert!(parse_line_arg("=COM3").is_err());
    }

    #[test]
    fn test_parse_param_arg() {
        assert_eq!(
            parse_param_arg("vdd=3.3").unwrap(),
            ("vdd".to_string(), "3.3".to_string())
        );
        assert!(parse_param_arg("vdd").is_err());
    }

    #[test]
    fn test_init_config_writes_loadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        assert!(init_config(Some(&path), false).is_success());
        let written = AppConfig::load_from(&path).unwrap();
        assert_eq!(written.lines, vec![LineConfig::loopback("iic")]);

        assert_eq!(init_config(Some(&path), false).code(), ExitCodes::CONFIG_ERROR);
        assert!(init_config(Some(&path), true).is_success());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "atmos", "run", "SampleTest", "--line", "iic=COM3@9600", "--loopback", "uart",
            "--param", "k=v", "--format", "json",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Run { target, lines, loopbacks, params, .. } => {
                assert_eq!(target, "SampleTest");
                assert_eq!(lines.len(), 1);
                assert_eq!(loopbacks, vec!["uart"]);
                assert_eq!(params, vec![("k".to_string(), "v".to_string())]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
