use std::future::Future;
use std::time::Duration;

use crate::error::{AdapterResult, BrokerError, Result};

/// Poll `check` until it reports done, sleeping `interval` between attempts
///
/// A `Conflict` counts as "not yet" so optimistic-lock races are retried
/// inside the loop. Any other error ends the loop. Running out of attempts
/// is a [`BrokerError::PollTimeout`].
pub async fn poll_until<F, Fut>(
    operation: &str,
    interval: Duration,
    max_attempts: u32,
    mut check: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AdapterResult<bool>>,
{
    for attempt in 1..=max_attempts {
        match check().await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) if e.is_conflict() => {
                tracing::debug!(operation = %operation, attempt = attempt, error = %e, "Conflict while polling");
            }
            Err(e) => return Err(e.into()),
        }

        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    tracing::warn!(operation = %operation, attempts = max_attempts, "Polling gave up");
    Err(BrokerError::poll_timeout(operation, max_attempts))
}
