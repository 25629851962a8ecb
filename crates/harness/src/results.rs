//! Test outcomes, the JSON summary and cleanup of earlier runs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::HarnessResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    Passed,
    Failed,
}

/// Outcome of a single test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestResult {
    pub fn passed(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: TestStatus::Passed,
            error: None,
        }
    }

    pub fn failed(name: &str, error: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: TestStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn is_passed(&self) -> bool {
        self.status == TestStatus::Passed
    }
}

/// Result of running all tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSuiteResult {
    #[serde(rename = "nodeVersion")]
    pub runtime_version: String,
    pub tests: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
}

impl TestSuiteResult {
    pub fn total(&self) -> usize {
        self.tests.len()
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Accumulates results in execution order
#[derive(Debug)]
pub struct ResultCollector {
    runtime_version: String,
    tests: Vec<TestResult>,
    passed: usize,
    failed: usize,
}

impl ResultCollector {
    pub fn new(runtime_version: &str) -> Self {
        Self {
            runtime_version: runtime_version.to_string(),
            tests: Vec::new(),
            passed: 0,
            failed: 0,
        }
    }

    pub fn record(&mut self, result: TestResult) {
        if result.is_passed() {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.tests.push(result);
    }

    pub fn finish(self) -> TestSuiteResult {
        TestSuiteResult {
            runtime_version: self.runtime_version,
            tests: self.tests,
            passed: self.passed,
            failed: self.failed,
        }
    }
}

/// Name of the summary file for `version_tag`
pub fn summary_file_name(version_tag: &str) -> String {
    format!("test-results-{}.json", version_tag)
}

/// Persists the summary and removes artifacts left by earlier runs with the same tag
#[derive(Debug, Clone)]
pub struct ResultWriter {
    results_dir: PathBuf,
    version_tag: String,
}

impl ResultWriter {
    pub fn new(results_dir: impl Into<PathBuf>, version_tag: &str) -> Self {
        Self {
            results_dir: results_dir.into(),
            version_tag: version_tag.to_string(),
        }
    }

    pub fn summary_path(&self) -> PathBuf {
        self.results_dir.join(summary_file_name(&self.version_tag))
    }

    fn is_stale(&self, file_name: &str) -> bool {
        let report_suffix = format!("-failure-report-{}.txt", self.version_tag);
        file_name == summary_file_name(&self.version_tag)
            || (file_name.ends_with(&report_suffix) && file_name.len() > report_suffix.len())
    }

    /// Delete the summary and failure reports carrying this run's tag.
    /// Returns how many were removed.
    pub async fn purge_stale(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.results_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Nothing to purge in {}: {}", self.results_dir.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Error listing {}: {}", self.results_dir.display(), e);
                    break;
                }
            };
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !self.is_stale(name) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    debug!("Removed stale artifact {}", name);
                    removed += 1;
                }
                Err(e) => warn!("Could not remove stale artifact {}: {}", name, e),
            }
        }

        if removed > 0 {
            info!("Removed {} artifact(s) from a previous run", removed);
        }
        removed
    }

    /// Write the summary, replacing any earlier file for the same tag
    pub async fn write(&self, results: &TestSuiteResult) -> HarnessResult<PathBuf> {
        tokio::fs::create_dir_all(&self.results_dir).await?;

        let path = self.summary_path();
        let json = serde_json::to_string_pretty(results)?;
        tokio::fs::write(&path, json).await?;

        info!("Results written to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collector_counts_in_order() {
        let mut collector = ResultCollector::new("v20.11.1");
        collector.record(TestResult::passed("Server Version"));
        collector.record(TestResult::failed("Server Status", "Expected status 200, got 500"));
        collector.record(TestResult::passed("Invalid Endpoint Returns 404"));

        let suite = collector.finish();
        assert_eq!(suite.passed, 2);
        assert_eq!(suite.failed, 1);
        assert_eq!(suite.total(), 3);
        assert!(!suite.all_passed());
        assert_eq!(suite.tests[1].name, "Server Status");
    }

    #[test]
    fn test_summary_json_shape() {
        let mut collector = ResultCollector::new("v20.11.1");
        collector.record(TestResult::passed("Server Version"));
        collector.record(TestResult::failed("Server Status", "Expected status 200, got 500"));

        let value = serde_json::to_value(collector.finish()).unwrap();
        assert_eq!(
            value,
            json!({
                "nodeVersion": "v20.11.1",
                "tests": [
                    { "name": "Server Version", "status": "PASSED" },
                    {
                        "name": "Server Status",
                        "status": "FAILED",
                        "error": "Expected status 200, got 500"
                    }
                ],
                "passed": 1,
                "failed": 1
            })
        );
    }

    #[test]
    fn test_stale_matching_respects_tag_boundaries() {
        let writer = ResultWriter::new("/tmp", "v1");
        assert!(writer.is_stale("test-results-v1.json"));
        assert!(writer.is_stale("server-status-failure-report-v1.txt"));
        assert!(!writer.is_stale("server-status-failure-report-v10.txt"));
        assert!(!writer.is_stale("test-results-v10.json"));
        assert!(!writer.is_stale("server-v1.log"));
        assert!(!writer.is_stale("-failure-report-v1.txt"));
    }

    #[tokio::test]
    async fn test_purge_removes_only_same_tag_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "test-results-v1.json",
            "server-status-failure-report-v1.txt",
            "list-plugins-failure-report-v1.txt",
            "server-status-failure-report-v2.txt",
            "test-results-v2.json",
            "server-v1.log",
        ] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }

        let writer = ResultWriter::new(dir.path(), "v1");
        assert_eq!(writer.purge_stale().await, 3);

        let mut left: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        left.sort();
        assert_eq!(
            left,
            ["server-status-failure-report-v2.txt", "server-v1.log", "test-results-v2.json"]
        );
    }

    #[tokio::test]
    async fn test_purge_of_missing_dir_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(dir.path().join("missing"), "v1");
        assert_eq!(writer.purge_stale().await, 0);
    }

    #[tokio::test]
    async fn test_write_overwrites_previous_summary() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(dir.path().join("out"), "v1");

        let mut first = ResultCollector::new("v1");
        first.record(TestResult::failed("Server Status", "boom"));
        writer.write(&first.finish()).await.unwrap();

        let mut second = ResultCollector::new("v1");
        second.record(TestResult::passed("Server Status"));
        let path = writer.write(&second.finish()).await.unwrap();

        let written: TestSuiteResult =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written.passed, 1);
        assert_eq!(written.failed, 0);
    }
}
