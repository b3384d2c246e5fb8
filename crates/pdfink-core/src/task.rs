//! Run blocking pipeline work off the async executor with a deadline

use std::time::Duration;

use crate::error::{PdfInkError, Result};

/// Run `work` on tokio's blocking pool and wait at most `timeout_ms`.
///
/// On timeout the eventual result is dropped and `Timeout` is returned, so
/// callers never observe partial output.
pub async fn run_blocking<T, F>(timeout_ms: u64, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        tokio::task::spawn_blocking(work),
    )
    .await;

    match result {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_error)) => Err(PdfInkError::TaskPanicked(join_error.to_string())),
        Err(_elapsed) => {
            tracing::warn!(timeout_ms, "blocking task timed out");
            Err(PdfInkError::Timeout(timeout_ms))
        }
    }
}
