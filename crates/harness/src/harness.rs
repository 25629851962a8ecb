//! The run driver: launch, wait, test, report, and always terminate

use std::fmt;
use std::path::PathBuf;
use tracing::{debug, error, warn};

use crate::client::HttpClient;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::readiness::wait_until_ready;
use crate::results::{ResultWriter, TestSuiteResult};
use crate::runner::TestRunner;
use crate::server::{LaunchOptions, ServerHandle};
use crate::suite::TestCase;

/// Lines of server stderr kept on the outcome for diagnosis
const OUTCOME_STDERR_LINES: usize = 40;

/// Phases of a run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Launching,
    AwaitingReady,
    RunningTests,
    Reporting,
    Terminating,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Init => "init",
            RunPhase::Launching => "launching",
            RunPhase::AwaitingReady => "awaiting-ready",
            RunPhase::RunningTests => "running-tests",
            RunPhase::Reporting => "reporting",
            RunPhase::Terminating => "terminating",
            RunPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// What a run produced
#[derive(Debug)]
pub struct RunOutcome {
    /// Present once the tests ran
    pub suite: Option<TestSuiteResult>,

    /// Present if the summary was written
    pub summary_path: Option<PathBuf>,

    /// The fatal error that ended the run early, with the phase it happened in
    pub error: Option<(RunPhase, HarnessError)>,

    /// Most recent server stderr, for diagnosis
    pub server_stderr: String,
}

impl RunOutcome {
    /// 0 iff the server became ready and every test passed
    pub fn exit_code(&self) -> i32 {
        if self.succeeded() {
            0
        } else {
            1
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.suite.as_ref().is_some_and(TestSuiteResult::all_passed)
    }
}

/// Drives one full run against a freshly launched server
pub struct Harness {
    config: HarnessConfig,
    phase: RunPhase,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            phase: RunPhase::Init,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn enter(&mut self, phase: RunPhase) {
        debug!("Run phase {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    /// Run `cases` against a newly launched server. The server, once started,
    /// is stopped before this returns, whatever happened.
    pub async fn run(&mut self, cases: &[TestCase]) -> RunOutcome {
        self.enter(RunPhase::Init);
        let writer = ResultWriter::new(&self.config.results_dir, &self.config.version_tag());
        writer.purge_stale().await;

        let mut server: Option<ServerHandle> = None;
        let result = self.run_phases(cases, &writer, &mut server).await;

        self.enter(RunPhase::Terminating);
        let mut server_stderr = String::new();
        if let Some(mut server) = server.take() {
            if let Err(e) = server.stop().await {
                warn!("Failed to stop server: {}", e);
            }
            server_stderr = server.stderr_tail(OUTCOME_STDERR_LINES);
        }
        self.enter(RunPhase::Done);

        match result {
            Ok((suite, summary_path)) => RunOutcome {
                suite: Some(suite),
                summary_path,
                error: None,
                server_stderr,
            },
            Err((phase, e)) => RunOutcome {
                suite: None,
                summary_path: None,
                error: Some((phase, e)),
                server_stderr,
            },
        }
    }

    async fn run_phases(
        &mut self,
        cases: &[TestCase],
        writer: &ResultWriter,
        server: &mut Option<ServerHandle>,
    ) -> Result<(TestSuiteResult, Option<PathBuf>), (RunPhase, HarnessError)> {
        self.enter(RunPhase::Launching);
        let (client, runner) = self.prepare().map_err(|e| (RunPhase::Launching, e))?;
        let handle = ServerHandle::launch(LaunchOptions::from(&self.config))
            .await
            .map_err(|e| (RunPhase::Launching, e))?;
        let handle = server.insert(handle);
        debug!(
            "Server pid {} logging to {}",
            handle.pid().unwrap_or_default(),
            handle.log_path().display()
        );

        self.enter(RunPhase::AwaitingReady);
        let readiness = &self.config.readiness;
        let exited = tokio::select! {
            ready = wait_until_ready(
                &client,
                &readiness.health_path,
                readiness.max_attempts,
                readiness.interval,
            ) => {
                ready.map_err(|e| (RunPhase::AwaitingReady, e))?;
                None
            }
            status = handle.exited() => Some(status),
        };
        if let Some(status) = exited {
            let e = handle.startup_failure(status).await;
            return Err((RunPhase::AwaitingReady, e));
        }

        self.enter(RunPhase::RunningTests);
        let results = runner.run(cases).await;

        self.enter(RunPhase::Reporting);
        let summary_path = match writer.write(&results).await {
            Ok(path) => Some(path),
            Err(e) => {
                error!("Failed to write results summary: {}", e);
                None
            }
        };

        Ok((results, summary_path))
    }

    fn prepare(&self) -> HarnessResult<(HttpClient, TestRunner)> {
        self.config.validate()?;
        Ok((
            HttpClient::new(&self.config.http)?,
            TestRunner::from_config(&self.config)?,
        ))
    }
}
