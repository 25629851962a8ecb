//! Error types for the harness

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server exited during startup (exit code: {}, signal: {})",
        or_none(.exit_code), or_none(.signal))]
    Startup {
        exit_code: Option<i32>,
        signal: Option<i32>,
        stderr_tail: String,
    },

    #[error("Server failed to become ready after {attempts} attempts (last error: {last_error})")]
    ReadinessTimeout { attempts: u32, last_error: String },

    #[error("{0}")]
    Assertion(String),

    #[error("Failed to decode response body: {0}")]
    Decode(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl HarnessError {
    /// Whether this error ends the run before any test executes
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarnessError::Spawn { .. }
                | HarnessError::Startup { .. }
                | HarnessError::ReadinessTimeout { .. }
        )
    }

    /// Captured stderr of a server that died during startup
    pub fn stderr_tail(&self) -> Option<&str> {
        match self {
            HarnessError::Startup { stderr_tail, .. } if !stderr_tail.is_empty() => {
                Some(stderr_tail)
            }
            _ => None,
        }
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;

fn or_none(value: &Option<i32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "none".to_string())
}
