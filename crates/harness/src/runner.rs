//! Sequential execution of test cases with per-test failure isolation

use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::client::{HttpClient, TestContext};
use crate::config::HarnessConfig;
use crate::error::HarnessResult;
use crate::log_tail::LogTailer;
use crate::report::FailureReporter;
use crate::results::{ResultCollector, TestResult, TestSuiteResult};
use crate::suite::TestCase;

/// Runs test cases one at a time against a ready server
///
/// Each case gets its own log checkpoint, so cases must never overlap: the
/// log lines attached to a failure are everything the server wrote between
/// the checkpoint and the end of that case.
pub struct TestRunner {
    client: HttpClient,
    tailer: LogTailer,
    reporter: FailureReporter,
    runtime_version: String,
    log_settle: Duration,
}

impl TestRunner {
    pub fn new(
        client: HttpClient,
        tailer: LogTailer,
        reporter: FailureReporter,
        runtime_version: &str,
    ) -> Self {
        Self {
            client,
            tailer,
            reporter,
            runtime_version: runtime_version.to_string(),
            log_settle: Duration::ZERO,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> HarnessResult<Self> {
        let runner = Self::new(
            HttpClient::new(&config.http)?,
            LogTailer::new(config.log_file(), config.log_tail_max_lines),
            FailureReporter::new(&config.results_dir, &config.version_tag()),
            &config.runtime_version,
        )
        .with_log_settle(config.log_settle);
        Ok(runner)
    }

    /// Quiet period awaited before each checkpoint and before reading the log of
    /// a failed test, letting in-flight server output land in the right window
    pub fn with_log_settle(mut self, settle: Duration) -> Self {
        self.log_settle = settle;
        self
    }

    /// Run every case in order. Failures are recorded, never propagated.
    pub async fn run(&self, cases: &[TestCase]) -> TestSuiteResult {
        let start = Instant::now();
        let mut collector = ResultCollector::new(&self.runtime_version);

        info!("Running {} test(s)...", cases.len());
        debug!("Correlating failures with {}", self.tailer.path().display());

        for case in cases {
            collector.record(self.run_case(case).await);
        }

        let results = collector.finish();
        info!(
            "Test Results: {} passed, {} failed ({} ms)",
            results.passed,
            results.failed,
            start.elapsed().as_millis()
        );
        results
    }

    /// Run a single case inside its own error boundary
    pub async fn run_case(&self, case: &TestCase) -> TestResult {
        let start = Instant::now();
        let checkpoint = self.tailer.settled_checkpoint(self.log_settle).await;
        let mut ctx = TestContext::new();

        debug!("Running test: {} ({:?})", case.name, checkpoint);

        match case.run(&self.client, &mut ctx).await {
            Ok(()) => {
                info!("✓ {} ({} ms)", case.name, start.elapsed().as_millis());
                TestResult::passed(&case.name)
            }
            Err(e) => {
                let message = e.to_string();
                error!("✗ {}: {}", case.name, message);

                if !self.log_settle.is_zero() {
                    sleep(self.log_settle).await;
                }
                let log_tail = self.tailer.tail_since(&checkpoint).await;
                self.reporter
                    .report(
                        &case.name,
                        &message,
                        ctx.request.as_ref(),
                        ctx.response.as_ref(),
                        &log_tail,
                    )
                    .await;

                TestResult::failed(&case.name, message)
            }
        }
    }
}
