//! Cancellable "first matching response or deadline" race.
//!
//! A [`ResponseCapture`] subscribes to a broadcast stream, feeds every item through an async matcher
//! and settles on the first match. When the deadline elapses, the stream closes or the capture is
//! cancelled, it settles on [`CaptureOutcome::Fallback`] instead of failing. The subscription is
//! released as soon as the race settles, and dropping the capture aborts it.

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq)]
pub enum CaptureOutcome<T> {
    Captured(T),
    Fallback(FallbackReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FallbackReason {
    Deadline,
    StreamClosed,
    Cancelled,
}

impl<T> CaptureOutcome<T> {
    pub fn captured(self) -> Option<T> {
        match self {
            CaptureOutcome::Captured(value) => Some(value),
            CaptureOutcome::Fallback(_) => None,
        }
    }

    pub fn is_captured(&self) -> bool {
        matches!(self, CaptureOutcome::Captured(_))
    }
}

pub struct ResponseCapture<T> {
    cancel: CancellationToken,
    task: Option<JoinHandle<CaptureOutcome<T>>>,
}

impl<T> ResponseCapture<T>
where
    T: Send + 'static,
{
    /// Starts the race immediately; the deadline runs from this call.
    pub fn spawn<E, F, Fut>(
        mut rx: broadcast::Receiver<E>,
        deadline: Duration,
        mut matcher: F,
    ) -> Self
    where
        E: Clone + Send + 'static,
        F: FnMut(E) -> Fut + Send + 'static,
        Fut: Future<Output = Option<T>> + Send,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let first_match = async {
                loop {
                    match rx.recv().await {
                        Ok(item) => {
                            if let Some(value) = matcher(item).await {
                                return Some(value);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(target: "capture", skipped, "response stream lagged");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            };

            tokio::select! {
                biased;
                _ = token.cancelled() => CaptureOutcome::Fallback(FallbackReason::Cancelled),
                _ = tokio::time::sleep(deadline) => {
                    debug!(target: "capture", ?deadline, "capture deadline elapsed");
                    CaptureOutcome::Fallback(FallbackReason::Deadline)
                }
                found = first_match => match found {
                    Some(value) => CaptureOutcome::Captured(value),
                    None => CaptureOutcome::Fallback(FallbackReason::StreamClosed),
                },
            }
        });

        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Waits for the race to settle.
    pub async fn outcome(mut self) -> CaptureOutcome<T> {
        let Some(task) = self.task.take() else {
            return CaptureOutcome::Fallback(FallbackReason::Cancelled);
        };
        match task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                if !err.is_cancelled() {
                    warn!(target: "capture", ?err, "capture task failed");
                }
                CaptureOutcome::Fallback(FallbackReason::Cancelled)
            }
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl<T> Drop for ResponseCapture<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn settles_on_first_match() {
        let (tx, rx) = broadcast::channel::<u32>(8);
        let capture = ResponseCapture::spawn(rx, Duration::from_secs(5), |value| async move {
            (value % 2 == 0).then_some(value * 10)
        });

        tx.send(3).unwrap();
        tx.send(4).unwrap();
        tx.send(6).unwrap();

        assert_eq!(capture.outcome().await, CaptureOutcome::Captured(40));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_resolves_to_fallback() {
        let (tx, rx) = broadcast::channel::<u32>(8);
        let capture =
            ResponseCapture::spawn(rx, Duration::from_secs(30), |_| async move { None::<u32> });
        tx.send(1).unwrap();

        assert_eq!(
            capture.outcome().await,
            CaptureOutcome::Fallback(FallbackReason::Deadline)
        );
    }

    #[tokio::test]
    async fn unsubscribes_after_match() {
        let (tx, rx) = broadcast::channel::<u32>(8);
        let capture =
            ResponseCapture::spawn(rx, Duration::from_secs(5), |value| async move { Some(value) });
        tx.send(7).unwrap();
        assert!(capture.outcome().await.is_captured());
        assert_eq!(tx.receiver_count(), 0);
    }

    #[tokio::test]
    async fn closed_stream_falls_back() {
        let (tx, rx) = broadcast::channel::<u32>(8);
        let capture =
            ResponseCapture::spawn(rx, Duration::from_secs(5), |_| async move { None::<u32> });
        drop(tx);
        assert_eq!(
            capture.outcome().await,
            CaptureOutcome::Fallback(FallbackReason::StreamClosed)
        );
    }

    #[tokio::test]
    async fn dropping_capture_stops_matching() {
        let (tx, rx) = broadcast::channel::<u32>(8);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let capture = ResponseCapture::spawn(rx, Duration::from_secs(5), move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                None::<u32>
            }
        });
        drop(capture);
        tokio::task::yield_now().await;

        let _ = tx.send(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(tx.receiver_count(), 0);
    }
}
