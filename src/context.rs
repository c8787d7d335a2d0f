//! Per-operation cancellation and deadlines
//!
//! Every store, resolver and strategy call takes an [`OpContext`]. When the
//! token is cancelled or the deadline passes, the in-flight future is
//! dropped and the call fails with [`AuthGrantError::Canceled`]. Dropping a
//! sqlx future or transaction rolls back whatever it had not committed.

use crate::{AuthGrantError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    /// Context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// Context cancelled through `token`
    pub fn with_cancel(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            deadline: None,
        }
    }

    /// Child context that also expires after `timeout`
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            cancel: self.cancel.child_token(),
            deadline: Some(match self.deadline {
                Some(existing) if existing < deadline => existing,
                _ => deadline,
            }),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Check for cancellation without awaiting anything
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(AuthGrantError::Canceled);
        }
        Ok(())
    }

    /// Run `fut` to completion unless the context is cancelled first
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;

        let guarded = async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(AuthGrantError::Canceled),
                result = fut => result,
            }
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                .await
                .unwrap_or(Err(AuthGrantError::Canceled)),
            None => guarded.await,
        }
    }
}

#[cfg(test)]
mod context_test {
    use super::*;

    #[tokio::test]
    async fn test_background_runs_to_completion() {
        let ctx = OpContext::background();
        let value = ctx.run(async { Ok(42) }).await.expect("run should succeed");
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_cancelled_context_fails_fast() {
        let ctx = OpContext::background();
        ctx.cancel();
        let result = ctx.run(async { Ok(()) }).await;
        assert!(matches!(result, Err(AuthGrantError::Canceled)));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_future() {
        let token = CancellationToken::new();
        let ctx = OpContext::with_cancel(token.clone());

        let handle = tokio::spawn(async move {
            ctx.run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        let result = handle.await.expect("task should join");
        assert!(matches!(result, Err(AuthGrantError::Canceled)));
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let ctx = OpContext::background().with_timeout(Duration::from_millis(10));
        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(AuthGrantError::Canceled)));
    }

    #[tokio::test]
    async fn test_inner_errors_pass_through() {
        let ctx = OpContext::background();
        let result: Result<()> = ctx
            .run(async { Err(AuthGrantError::not_found("grant", "sig")) })
            .await;
        assert!(matches!(result, Err(AuthGrantError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_parent_cancel_reaches_child() {
        let parent = OpContext::background();
        let child = parent.with_timeout(Duration::from_secs(60));
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
