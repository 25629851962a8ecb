//! Readiness probing

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::client::HttpClient;
use crate::error::{HarnessError, HarnessResult};

/// Poll `health_path` until it answers 2xx, at most `max_attempts` times, `interval` apart
pub async fn wait_until_ready(
    client: &HttpClient,
    health_path: &str,
    max_attempts: u32,
    interval: Duration,
) -> HarnessResult<()> {
    info!("Waiting for {} to be ready...", client.url(health_path));

    let mut last_error = String::from("no attempt made");
    for attempt in 1..=max_attempts {
        match client.get(health_path).await {
            Ok(response) if response.is_success() => {
                info!("Server is ready (attempt {}/{})", attempt, max_attempts);
                return Ok(());
            }
            Ok(response) => {
                last_error = format!("status {}", response.status);
                warn!(
                    "Health check returned {} (attempt {}/{})",
                    response.status, attempt, max_attempts
                );
            }
            Err(HarnessError::Http(e)) if e.is_connect() => {
                // expected while the server is still binding its port
                last_error = format!("connection failed: {}", e);
                debug!(
                    "Server not accepting connections yet (attempt {}/{})",
                    attempt, max_attempts
                );
            }
            Err(e) => {
                last_error = e.to_string();
                warn!("Health check error: {} (attempt {}/{})", e, attempt, max_attempts);
            }
        }

        if attempt < max_attempts {
            sleep(interval).await;
        }
    }

    Err(HarnessError::ReadinessTimeout {
        attempts: max_attempts,
        last_error,
    })
}
