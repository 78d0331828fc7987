use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ApiError;

/// Token-paced gate for outbound calls against one external system.
///
/// Callers submit through [`execute`](RateLimiter::execute); a dedicated
/// pacing task grants start permits strictly in submission order, each no
/// earlier than `min_interval` after the previous grant. The operation
/// itself runs on the caller's task, so one slow call does not delay the
/// pacing of the next, and a failed call never blocks the queue.
///
/// A caller that cancels while queued drops its permit receiver; the pacer
/// detects the dead slot and does not charge the interval for it.
#[derive(Clone)]
pub struct RateLimiter {
    tx: mpsc::UnboundedSender<oneshot::Sender<()>>,
}

impl RateLimiter {
    /// `rate_per_sec` must be positive; the minimum inter-call interval is
    /// its inverse.
    pub fn new(rate_per_sec: f64) -> Self {
        assert!(rate_per_sec > 0.0, "rate must be positive");
        let min_interval = Duration::from_secs_f64(1.0 / rate_per_sec);
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(pace(rx, min_interval));
        Self { tx }
    }

    /// Schedule `op` behind the pacing gate. Returns [`ApiError::Cancelled`]
    /// if `cancel` fires before the permit is granted; once granted, the
    /// operation runs to completion on the caller's task.
    pub async fn execute<T, F>(&self, cancel: &CancellationToken, op: F) -> Result<T, ApiError>
    where
        F: std::future::Future<Output = Result<T, ApiError>>,
    {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }

        let (permit_tx, permit_rx) = oneshot::channel();
        if self.tx.send(permit_tx).is_err() {
            // Pacer gone; the process is shutting down.
            return Err(ApiError::Cancelled);
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
            granted = permit_rx => match granted {
                Ok(()) => op.await,
                Err(_) => Err(ApiError::Cancelled),
            },
        }
    }
}

async fn pace(mut rx: mpsc::UnboundedReceiver<oneshot::Sender<()>>, min_interval: Duration) {
    let mut next_allowed = Instant::now();

    while let Some(slot) = rx.recv().await {
        let now = Instant::now();
        if now < next_allowed {
            tokio::time::sleep_until(next_allowed).await;
        }
        // A failed send means the caller cancelled while queued; skip it
        // without consuming the interval.
        if slot.send(()).is_ok() {
            next_allowed = Instant::now() + min_interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn operations_start_in_submission_order() {
        let limiter = RateLimiter::new(1000.0);
        let cancel = CancellationToken::new();
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5u32 {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                limiter
                    .execute(&cancel, async {
                        order.lock().await.push(i);
                        Ok::<_, ApiError>(())
                    })
                    .await
            }));
            // Submission order is only defined once the send happened;
            // yield so each spawned task enqueues before the next.
            tokio::task::yield_now().await;
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn starts_are_spaced_by_min_interval() {
        let limiter = RateLimiter::new(50.0); // 20ms
        let cancel = CancellationToken::new();
        let mut starts = Vec::new();

        for _ in 0..3 {
            limiter
                .execute(&cancel, async {
                    starts.push(Instant::now());
                    Ok::<_, ApiError>(())
                })
                .await
                .unwrap();
        }

        for pair in starts.windows(2) {
            let gap = pair[1].duration_since(pair[0]);
            assert!(gap >= Duration::from_millis(18), "gap too small: {gap:?}");
        }
    }

    #[tokio::test]
    async fn failure_does_not_block_subsequent_calls() {
        let limiter = RateLimiter::new(1000.0);
        let cancel = CancellationToken::new();

        let first: Result<(), ApiError> = limiter
            .execute(&cancel, async {
                Err(ApiError::Status {
                    code: 500,
                    message: "boom".into(),
                })
            })
            .await;
        assert!(first.is_err());

        let second = limiter.execute(&cancel, async { Ok::<_, ApiError>(7) }).await;
        assert_eq!(second.unwrap(), 7);
    }

    #[tokio::test]
    async fn cancelled_caller_never_executes() {
        let limiter = RateLimiter::new(1000.0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        let res = limiter
            .execute(&cancel, async move {
                ran2.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ApiError>(())
            })
            .await;

        assert_eq!(res, Err(ApiError::Cancelled));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
