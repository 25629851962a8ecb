//! Line-delta slices of the server log
//!
//! The server log only ever grows while a run is in progress, so the lines a
//! test caused are the lines appended between its checkpoint and its end.
//! Nothing here returns an error: an unreadable log degrades to a placeholder
//! string inside the failure report.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Upper bound on quiet-period rounds before a checkpoint is taken anyway
const MAX_SETTLE_ROUNDS: u32 = 10;

/// Line count of the log taken right before a test starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogCheckpoint {
    Lines(usize),
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct LogTailer {
    path: PathBuf,
    max_lines: usize,
}

impl LogTailer {
    pub fn new(path: impl Into<PathBuf>, max_lines: usize) -> Self {
        Self {
            path: path.into(),
            max_lines: max_lines.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn checkpoint(&self) -> LogCheckpoint {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => LogCheckpoint::Lines(count_lines(&String::from_utf8_lossy(&bytes))),
            Err(e) => LogCheckpoint::Unavailable(format!(
                "could not read {}: {}",
                self.path.display(),
                e
            )),
        }
    }

    /// Checkpoint taken once the line count has held still for `quiet`.
    ///
    /// Output the server produced for the previous test can still be in flight
    /// towards the file when the next test starts; waiting it out keeps those
    /// lines in the previous test's window. A log that never goes quiet is
    /// checkpointed after `MAX_SETTLE_ROUNDS` rounds.
    pub async fn settled_checkpoint(&self, quiet: Duration) -> LogCheckpoint {
        let mut current = self.checkpoint().await;
        if quiet.is_zero() {
            return current;
        }
        for _ in 0..MAX_SETTLE_ROUNDS {
            sleep(quiet).await;
            let next = self.checkpoint().await;
            if next == current {
                return next;
            }
            current = next;
        }
        debug!("{} kept growing, checkpointing at {:?}", self.path.display(), current);
        current
    }

    /// Lines appended since `checkpoint`, newest last
    pub async fn tail_since(&self, checkpoint: &LogCheckpoint) -> String {
        let start = match checkpoint {
            LogCheckpoint::Lines(n) => *n,
            LogCheckpoint::Unavailable(reason) => {
                return format!("(log unavailable: {})", reason);
            }
        };

        let content = match tokio::fs::read(&self.path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                return format!(
                    "(log unavailable: could not read {}: {})",
                    self.path.display(),
                    e
                )
            }
        };

        let lines: Vec<&str> = content.lines().collect();
        if lines.len() < start {
            return format!(
                "(log shrank from {} to {} lines since the test started)",
                start,
                lines.len()
            );
        }

        let delta = lines.len() - start;
        if delta == 0 {
            return "(no log output during this test)".to_string();
        }

        let newest = &lines[lines.len() - delta..];
        if newest.len() > self.max_lines {
            let omitted = newest.len() - self.max_lines;
            let kept = &newest[omitted..];
            format!("... ({} earlier lines omitted)\n{}", omitted, kept.join("\n"))
        } else {
            newest.join("\n")
        }
    }
}

fn count_lines(content: &str) -> usize {
    content.lines().count()
}
