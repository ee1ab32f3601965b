//! Default durations and async timeout wrappers.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Upper bound for a complete handshake exchange.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long an outbound request waits for its response.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `close()` lets an in-flight receive finish before cancelling it.
pub const CLOSE_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Run `fut` for at most `timeout`, building the error with `on_elapsed`.
pub async fn with_timeout_or<F, T, E>(fut: F, timeout: Duration, on_elapsed: E) -> Result<T>
where
    F: Future<Output = Result<T>>,
    E: FnOnce() -> ProtocolError,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_elapsed()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_within_deadline() {
        let value = with_timeout_or(async { Ok(7) }, Duration::from_secs(1), || {
            ProtocolError::Timeout
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_deadline_uses_custom_error() {
        let result: Result<()> = with_timeout_or(
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            },
            Duration::from_millis(50),
            || ProtocolError::HandshakeTimedOut,
        )
        .await;
        assert!(matches!(result, Err(ProtocolError::HandshakeTimedOut)));
    }
}
