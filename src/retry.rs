//! Bounded retry for transient network flakiness. Intentionally
//! simple: fixed attempt count, fixed backoff schedule, no jitter and
//! no circuit breaking.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

pub const RETRY_ATTEMPTS: usize = 3;

const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
];

/// Runs `action` up to [`RETRY_ATTEMPTS`] times, sleeping through the
/// fixed delay schedule between attempts. The last error is re-raised
/// once the budget is exhausted.
pub async fn with_retries<T, F, Fut>(action_name: &str, mut action: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 1..=RETRY_ATTEMPTS {
        match action().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(attempt, "'{action_name}' failed: {err}");
                if attempt == RETRY_ATTEMPTS {
                    return Err(err);
                }
                let delay = RETRY_DELAYS[(attempt - 1).min(RETRY_DELAYS.len() - 1)];
                tokio::time::sleep(delay).await;
            }
        }
    }
    unreachable!("retry loop always returns")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn returns_first_success() {
        let calls = AtomicUsize::new(0);
        let result = with_retries("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, MonitorError>(42)
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let result = with_retries("test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(MonitorError::Render("flaky".into()))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_budget_and_reraises_last_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = with_retries("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(MonitorError::Render("down".into()))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), RETRY_ATTEMPTS);
        assert!(matches!(result, Err(MonitorError::Render(_))));
    }
}
