//! Deadline-bounded cancellable operations.
//!
//! [`run_with_deadline`] races an operation against a timer. Whichever finishes first
//! decides the outcome. When the timer wins, the operation's cancellation token is
//! fired and its future is dropped, so work it spawned (for example a blocking scan
//! engine call) can observe the token and stop.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{operation} exceeded its deadline of {} ms", deadline.as_millis())]
pub struct DeadlineExceeded {
    pub operation: &'static str,
    pub deadline: Duration,
}

pub async fn run_with_deadline<T, F, Fut>(
    operation: &'static str,
    deadline: Duration,
    op: F,
) -> Result<T, DeadlineExceeded>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = T>,
{
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    let fut = op(token.clone());

    tokio::select! {
        output = fut => {
            guard.disarm();
            Ok(output)
        }
        _ = tokio::time::sleep(deadline) => {
            // the guard is dropped on return, cancelling the token
            tracing::warn!(
                operation = operation,
                deadline_ms = deadline.as_millis() as u64,
                "Operation exceeded deadline, cancelling"
            );
            Err(DeadlineExceeded { operation, deadline })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_fast_operation_wins() {
        let result = run_with_deadline("fast", Duration::from_secs(5), |_token| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            42
        })
        .await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_operation_times_out_and_is_cancelled() {
        let observed = Arc::new(AtomicBool::new(false));
        let watcher_flag = observed.clone();
        let (tx, rx) = tokio::sync::oneshot::channel();

        let result = run_with_deadline("slow", Duration::from_secs(1), |token| {
            // Work detached from the raced future, as a blocking engine call would be
            tokio::spawn(async move {
                token.cancelled().await;
                watcher_flag.store(true, Ordering::SeqCst);
                let _ = tx.send(());
            });
            std::future::pending::<()>()
        })
        .await;

        assert_eq!(
            result,
            Err(DeadlineExceeded {
                operation: "slow",
                deadline: Duration::from_secs(1)
            })
        );
        rx.await.unwrap();
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_not_cancelled_on_success() {
        let mut kept = None;
        let result = run_with_deadline("ok", Duration::from_secs(1), |token| {
            kept = Some(token.clone());
            async { "done" }
        })
        .await;
        assert_eq!(result, Ok("done"));
        assert!(!kept.unwrap().is_cancelled());
    }
}
