//! Per-call timeouts for external handler invocations.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Timeout error carrying the operation name and the exceeded duration.
#[derive(Debug, Clone)]
pub struct TimeoutError {
    pub duration: Duration,
    pub operation: String,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Operation '{}' timed out after {:?}",
            self.operation, self.duration
        )
    }
}

impl std::error::Error for TimeoutError {}

/// Execute an operation with a timeout.
pub async fn with_timeout<F, Fut, T>(
    timeout: Duration,
    operation_name: &str,
    operation: F,
) -> Result<T, TimeoutError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    match tokio::time::timeout(timeout, operation()).await {
        Ok(result) => Ok(result),
        Err(_) => {
            warn!(
                operation = operation_name,
                timeout_ms = timeout.as_millis() as u64,
                "operation timed out"
            );
            Err(TimeoutError {
                duration: timeout,
                operation: operation_name.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_timeout() {
        let result = with_timeout(Duration::from_secs(1), "fast", || async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_timeout_exceeded() {
        let result = with_timeout(Duration::from_millis(10), "slow", || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            42
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.operation, "slow");
        assert_eq!(err.duration, Duration::from_millis(10));
    }
}
