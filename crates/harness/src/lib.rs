//! comply-server integration harness
//!
//! This crate drives black-box checks against a freshly launched server:
//! - Spawns the server binary and streams its output into a log file
//! - Polls a health endpoint until the server is ready
//! - Runs an ordered suite of HTTP checks, one at a time
//! - Writes a failure report per failed check, with the exact exchange and
//!   the server log lines emitted while it ran
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Harness (run driver)                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Init           purge test-results-<tag>.json and reports   │
//! │  Launching      ServerHandle::launch() -> server.log        │
//! │  AwaitingReady  wait_until_ready(GET /heartbeat)            │
//! │  RunningTests   TestRunner::run(&[TestCase])                │
//! │                   ├── LogTailer::checkpoint()               │
//! │                   ├── TestCase::run(HttpClient, Context)    │
//! │                   └── on failure: LogTailer::tail_since()   │
//! │                                   FailureReporter::report() │
//! │  Reporting      ResultWriter::write(TestSuiteResult)        │
//! │  Terminating    ServerHandle::stop()  (always)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod harness;
pub mod log_tail;
pub mod readiness;
pub mod report;
pub mod results;
pub mod runner;
pub mod server;
pub mod suite;

pub use client::{HttpClient, RequestSnapshot, ResponseSnapshot, TestContext};
pub use config::HarnessConfig;
pub use error::{HarnessError, HarnessResult};
pub use harness::{Harness, RunOutcome, RunPhase};
pub use log_tail::{LogCheckpoint, LogTailer};
pub use report::FailureReporter;
pub use results::{ResultCollector, ResultWriter, TestResult, TestStatus, TestSuiteResult};
pub use runner::TestRunner;
pub use server::{LaunchOptions, ServerHandle};
pub use suite::{BodyShape, Expectations, RequestSpec, TestCase};
