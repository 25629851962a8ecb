//! comply-harness - launch comply-server and run the integration suite against it
//!
//! Exits 0 when the server became ready and every check passed, 1 otherwise.

use anyhow::Context;
use clap::Parser;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use comply_harness::{suite, Harness, HarnessConfig, RunOutcome, TestStatus};

#[derive(Parser, Debug)]
#[command(name = "comply-harness")]
#[command(about = "Integration test harness for comply-server")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "HARNESS_CONFIG")]
    config: Option<PathBuf>,

    /// Server binary to launch
    #[arg(long, env = "HARNESS_SERVER_BINARY")]
    server_binary: Option<String>,

    /// Argument passed to the server (repeatable; replaces the default `--port <port>`)
    #[arg(long = "server-arg", allow_hyphen_values = true)]
    server_args: Vec<String>,

    /// Host the server listens on
    #[arg(long)]
    host: Option<String>,

    /// Port the server listens on (default: $SERVER_PORT or 8080)
    #[arg(short, long)]
    port: Option<u16>,

    /// Health endpoint polled before the suite starts
    #[arg(long)]
    health_path: Option<String>,

    /// Readiness attempts before giving up
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Delay between readiness attempts, in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Directory for the summary, failure reports and server log
    #[arg(short, long, env = "HARNESS_RESULTS_DIR")]
    results_dir: Option<PathBuf>,

    /// Version recorded in the summary and used to tag output files
    #[arg(long)]
    runtime_version: Option<String>,

    /// YAML suite to run instead of the built-in checks
    #[arg(short, long)]
    suite: Option<PathBuf>,

    /// Print the suite's test names and exit
    #[arg(long)]
    list: bool,

    /// Enable verbose output (includes server output)
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<(HarnessConfig, Option<PathBuf>, bool)> {
        self.into_config_with(|key| std::env::var(key).ok())
    }

    /// Layer defaults, the config file, `env` and the flags, lowest to highest
    fn into_config_with(
        self,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<(HarnessConfig, Option<PathBuf>, bool)> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::load(path)?,
            None => HarnessConfig::default(),
        };
        config.apply_env_from(env)?;

        if let Some(binary) = self.server_binary {
            config.server.binary = binary;
        }
        if !self.server_args.is_empty() {
            config.server.args = Some(self.server_args);
        }
        if let Some(host) = self.host {
            config.http.host = host;
        }
        if let Some(port) = self.port {
            config.http.port = port;
        }
        if let Some(path) = self.health_path {
            config.readiness.health_path = path;
        }
        if let Some(attempts) = self.max_attempts {
            config.readiness.max_attempts = attempts;
        }
        if let Some(ms) = self.interval_ms {
            config.readiness.interval = Duration::from_millis(ms);
        }
        if let Some(dir) = self.results_dir {
            config.results_dir = dir;
        }
        if let Some(version) = self.runtime_version {
            config.runtime_version = version;
        }

        config.validate()?;
        Ok((config, self.suite, self.list))
    }
}

fn main() {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    match runtime.block_on(async_main(args)) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn async_main(args: Args) -> anyhow::Result<i32> {
    let (config, suite_path, list_only) = args.into_config()?;

    let cases = match &suite_path {
        Some(path) => suite::from_file(path)
            .with_context(|| format!("loading suite {}", path.display()))?,
        None => suite::builtin_suite(),
    };

    if list_only {
        for case in &cases {
            println!("{}", case.name);
        }
        return Ok(0);
    }

    info!("Starting tests with {}", config.runtime_version);
    info!("Starting {}...", config.server.binary);

    let mut harness = Harness::new(config);
    let outcome = harness.run(&cases).await;
    print_outcome(&outcome);

    Ok(outcome.exit_code())
}

fn print_outcome(outcome: &RunOutcome) {
    if let Some((phase, e)) = &outcome.error {
        error!("Test suite failed while {}: {}", phase, e);
        let stderr = e.stderr_tail().unwrap_or(&outcome.server_stderr);
        if !stderr.is_empty() {
            eprintln!("--- server stderr ---");
            eprintln!("{}", stderr);
        }
        return;
    }

    let Some(results) = &outcome.suite else {
        return;
    };

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Test", "Status", "Error"]);
    for test in &results.tests {
        let status = match test.status {
            TestStatus::Passed => "✓ PASSED",
            TestStatus::Failed => "✗ FAILED",
        };
        table.add_row(vec![
            test.name.clone(),
            status.to_string(),
            test.error.clone().unwrap_or_default(),
        ]);
    }

    println!();
    println!("{}", "=".repeat(50));
    println!("Test Results for {}", results.runtime_version);
    println!("{}", "=".repeat(50));
    println!("{table}");
    println!("Passed: {}", results.passed);
    println!("Failed: {}", results.failed);
    println!("{}", "=".repeat(50));
    if let Some(path) = &outcome.summary_path {
        println!("Results written to {}", path.display());
    }
}
