//! Small shared helpers.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Run an IO future under a rolling idle deadline.
///
/// A zero duration disables the deadline entirely; the future then runs to
/// completion. Deadline expiry surfaces as a network error, which ends the
/// surrounding relay loop the same way a peer close would.
pub(crate) async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if deadline.is_zero() {
        return fut.await;
    }
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Network("idle deadline exceeded".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_passes_fast_future() {
        let v = with_deadline(Duration::from_secs(5), async { Ok(42u32) })
            .await
            .unwrap();
        assert_eq!(v, 42);
    }

    #[tokio::test]
    async fn test_deadline_expires_slow_future() {
        let result: Result<()> = with_deadline(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn test_zero_deadline_disables_timeout() {
        // With the deadline disabled the future must run to completion even
        // when it suspends.
        let v = with_deadline(Duration::ZERO, async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(7u32)
        })
        .await
        .unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn test_deadline_propagates_inner_error() {
        let result: Result<()> = with_deadline(Duration::from_secs(5), async {
            Err(Error::Protocol("short record"))
        })
        .await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
