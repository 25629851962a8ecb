//! Per-test failure reports
//!
//! A report is a plain-text document holding everything needed to understand
//! one failed check without re-running it: the error, the request as sent, the
//! response as received and the server log lines emitted while the test ran.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::client::{RequestSnapshot, ResponseSnapshot};

/// Filesystem-safe form of a test name: lower-case, whitespace runs become a
/// dash, everything outside `[a-z0-9-]` is dropped.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut in_space = false;
    for c in name.trim().chars() {
        if c.is_whitespace() {
            if !in_space {
                slug.push('-');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        for lower in c.to_lowercase() {
            if lower.is_ascii_lowercase() || lower.is_ascii_digit() || lower == '-' {
                slug.push(lower);
            }
        }
    }
    if slug.is_empty() {
        "unnamed-test".to_string()
    } else {
        slug
    }
}

/// File name of the report for `test_name`
pub fn report_file_name(test_name: &str, version_tag: &str) -> String {
    format!("{}-failure-report-{}.txt", slugify(test_name), version_tag)
}

/// Everything known about one failed test
#[derive(Debug, Clone)]
pub struct FailureReport<'a> {
    pub test_name: &'a str,
    pub error: &'a str,
    pub request: Option<&'a RequestSnapshot>,
    pub response: Option<&'a ResponseSnapshot>,
    pub log_tail: &'a str,
    pub timestamp: DateTime<Utc>,
}

impl FailureReport<'_> {
    pub fn render(&self) -> String {
        let mut out = String::new();

        section(&mut out, "Test Failure Report", '=');
        let _ = writeln!(out, "Test:      {}", self.test_name);
        let _ = writeln!(
            out,
            "Timestamp: {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        out.push('\n');

        section(&mut out, "Error", '-');
        let _ = writeln!(out, "{}", self.error);
        out.push('\n');

        section(&mut out, "Request", '-');
        match self.request {
            Some(request) => {
                let _ = writeln!(out, "{} {}", request.method, request.url());
                headers(&mut out, &request.headers);
                body(&mut out, request.body.as_deref());
            }
            None => out.push_str("(no request was sent)\n"),
        }
        out.push('\n');

        section(&mut out, "Response", '-');
        match self.response {
            Some(response) => {
                let _ = writeln!(out, "Status: {}", response.status);
                headers(&mut out, &response.headers);
                body(&mut out, Some(response.body.as_str()));
            }
            None => out.push_str("(no response received)\n"),
        }
        out.push('\n');

        section(&mut out, "Server Log (output during this test)", '-');
        let _ = writeln!(out, "{}", self.log_tail);

        out
    }
}

fn section(out: &mut String, title: &str, underline: char) {
    let _ = writeln!(out, "{}", title);
    let _ = writeln!(out, "{}", underline.to_string().repeat(title.chars().count()));
}

fn headers(out: &mut String, headers: &[(String, String)]) {
    out.push_str("Headers:\n");
    if headers.is_empty() {
        out.push_str("  (none)\n");
    }
    for (name, value) in headers {
        let _ = writeln!(out, "  {}: {}", name, value);
    }
}

fn body(out: &mut String, body: Option<&str>) {
    out.push_str("Body:\n");
    match body {
        Some(body) if !body.is_empty() => {
            let _ = writeln!(out, "{}", body);
        }
        _ => out.push_str("  (none)\n"),
    }
}

/// Writes failure reports into the results directory
#[derive(Debug, Clone)]
pub struct FailureReporter {
    results_dir: PathBuf,
    version_tag: String,
}

impl FailureReporter {
    pub fn new(results_dir: impl Into<PathBuf>, version_tag: &str) -> Self {
        Self {
            results_dir: results_dir.into(),
            version_tag: version_tag.to_string(),
        }
    }

    pub fn path_for(&self, test_name: &str) -> PathBuf {
        self.results_dir
            .join(report_file_name(test_name, &self.version_tag))
    }

    /// Write the report for a failed test. I/O errors are logged, never returned.
    pub async fn report(
        &self,
        test_name: &str,
        error: &str,
        request: Option<&RequestSnapshot>,
        response: Option<&ResponseSnapshot>,
        log_tail: &str,
    ) -> Option<PathBuf> {
        let document = FailureReport {
            test_name,
            error,
            request,
            response,
            log_tail,
            timestamp: Utc::now(),
        }
        .render();

        let path = self.path_for(test_name);
        match write_report(&self.results_dir, &path, &document).await {
            Ok(()) => {
                info!("  Failure report: {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Could not write failure report for '{}': {}", test_name, e);
                None
            }
        }
    }
}

async fn write_report(dir: &Path, path: &Path, document: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, document).await
}
