use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, RetryPolicy};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::YoutubeConfig;
use crate::error::{Result, YoutubeError};

pub(crate) fn policy_for(config: &YoutubeConfig) -> RetryPolicy {
    RetryPolicy {
        max_attempts: config.max_attempts.max(1),
        base_delay: config.retry_base_delay,
        max_delay: Duration::from_secs(30),
        use_exponential_backoff: true,
    }
}

/// Execute `request`, retrying transport failures, 429 and 5xx with backoff.
///
/// The final response is returned whatever its status; only an exhausted
/// transport failure is an error.
pub(crate) async fn execute_with_backoff(
    http_client: &dyn HttpClient,
    request: HttpRequest,
    policy: &RetryPolicy,
) -> Result<HttpResponse> {
    let mut attempt = 0;

    loop {
        attempt += 1;

        match http_client.execute(request.clone()).await {
            Ok(response) if response.is_retryable() && attempt < policy.max_attempts => {
                warn!(
                    status = response.status,
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    "Request failed with retryable status"
                );
            }
            Ok(response) => return Ok(response),
            Err(e) if attempt < policy.max_attempts => {
                warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    "Request failed"
                );
            }
            Err(e) => {
                warn!(error = %e, attempts = attempt, "Request failed after retries");
                return Err(YoutubeError::BridgeError(e));
            }
        }

        let delay = policy.delay_for(attempt);
        debug!(delay_ms = delay.as_millis() as u64, "Retrying after delay");
        sleep(delay).await;
    }
}
