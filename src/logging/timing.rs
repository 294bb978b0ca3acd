// Execution-time instrumentation.

use std::future::Future;
use std::time::Instant;

use crate::error::Result;
use crate::logging::context::current_request_id;

/// Await `fut`, logging start, completion with elapsed seconds, and failures
/// with elapsed seconds and the error.
pub async fn log_execution_time<T, F>(operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let start = Instant::now();
    tracing::debug!(
        operation,
        request_id = ?current_request_id(),
        "operation started"
    );
    match fut.await {
        Ok(value) => {
            tracing::info!(
                operation,
                elapsed_secs = start.elapsed().as_secs_f64(),
                "operation completed"
            );
            Ok(value)
        }
        Err(err) => {
            tracing::error!(
                operation,
                elapsed_secs = start.elapsed().as_secs_f64(),
                error = %err,
                "operation failed"
            );
            Err(err)
        }
    }
}

/// Drop guard for synchronous call sites. Logs elapsed time when dropped.
pub struct ExecutionTimer {
    operation: String,
    start: Instant,
}

impl ExecutionTimer {
    pub fn start(operation: impl Into<String>) -> Self {
        let operation = operation.into();
        tracing::debug!(operation = %operation, "operation started");
        Self {
            operation,
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Drop for ExecutionTimer {
    fn drop(&mut self) {
        tracing::info!(
            operation = %self.operation,
            elapsed_secs = self.start.elapsed().as_secs_f64(),
            "operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[tokio::test]
    async fn test_passes_through_ok() {
        let value = log_execution_time("op", async { Ok::<_, AppError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_passes_through_err() {
        let result: Result<()> =
            log_execution_time("op", async { Err(AppError::Internal("boom".into())) }).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_timer_measures() {
        let timer = ExecutionTimer::start("sync-op");
        assert!(timer.elapsed_secs() >= 0.0);
    }
}
