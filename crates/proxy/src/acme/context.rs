//! Deadline and cancellation scope for one issuance attempt

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::CertError;

/// Bounded-duration scope derived from the manager's base token
///
/// Every outbound CA call inside an attempt goes through [`IssueContext::run`],
/// so cancelling the base token or passing the deadline unwinds the attempt
/// with a context error.
#[derive(Debug, Clone)]
pub struct IssueContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl IssueContext {
    /// Child scope of `parent` that expires after `timeout`
    pub fn with_timeout(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel: parent.child_token(),
        }
    }

    /// Instant after which every call through [`run`](Self::run) fails
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Drive `fut` until it completes, the deadline passes or the scope is
    /// cancelled, whichever happens first
    pub async fn run<T, F>(&self, fut: F) -> Result<T, CertError>
    where
        F: Future<Output = Result<T, CertError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CertError::Canceled),
            _ = tokio::time::sleep_until(self.deadline) => Err(CertError::DeadlineExceeded),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_call() {
        let ctx = IssueContext::with_timeout(&CancellationToken::new(), Duration::from_millis(10));

        let result: Result<(), CertError> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert_eq!(result, Err(CertError::DeadlineExceeded));
        assert!(Instant::now() >= ctx.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancel_propagates() {
        let base = CancellationToken::new();
        let ctx = IssueContext::with_timeout(&base, Duration::from_secs(60));

        base.cancel();

        let result = ctx.run(std::future::pending::<Result<(), CertError>>()).await;
        assert_eq!(result, Err(CertError::Canceled));
    }

    #[tokio::test]
    async fn test_completed_call_passes_through() {
        let ctx = IssueContext::with_timeout(&CancellationToken::new(), Duration::from_secs(1));

        let value = ctx.run(async { Ok::<_, CertError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
