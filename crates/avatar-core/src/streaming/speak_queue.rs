//! ============================================================================
//! Speak Queue - Strict FIFO delivery of avatar speech
//! ============================================================================
//! `enqueue` pushes immediately and returns a future for that text's outcome.
//! A single consumer task drains the queue; the busy latch is cleared under
//! the same lock that observes the queue empty, so no task is ever stranded.
//! ============================================================================

use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::AvatarError;

/// Where queued speech goes
#[async_trait]
pub trait SpeechSink: Send + Sync {
    async fn deliver(&self, text: &str) -> Result<(), AvatarError>;
}

struct SpeakTask {
    id: Uuid,
    text: String,
    done: oneshot::Sender<Result<(), AvatarError>>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<SpeakTask>,
    busy: bool,
}

struct Shared {
    sink: Arc<dyn SpeechSink>,
    state: Mutex<QueueState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// FIFO speech queue with at most one delivery in flight
#[derive(Clone)]
pub struct SpeakQueue {
    shared: Arc<Shared>,
}

impl SpeakQueue {
    pub fn new(sink: Arc<dyn SpeechSink>) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Queue `text`. The task is queued before this returns; the returned
    /// future resolves once that text has been delivered (or failed).
    pub fn enqueue(
        &self,
        text: impl Into<String>,
    ) -> impl Future<Output = Result<(), AvatarError>> + Send + 'static {
        let (done, outcome) = oneshot::channel();
        let task = SpeakTask {
            id: Uuid::new_v4(),
            text: text.into(),
            done,
        };
        debug!("Queued speak task {}", task.id);

        let start_consumer = {
            let mut state = self.shared.lock();
            state.pending.push_back(task);
            !std::mem::replace(&mut state.busy, true)
        };
        if start_consumer {
            tokio::spawn(drain(Arc::clone(&self.shared)));
        }

        async move {
            outcome
                .await
                .unwrap_or_else(|_| Err(AvatarError::Speak("speak task dropped".to_string())))
        }
    }

    /// Tasks waiting behind the one in flight
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn is_busy(&self) -> bool {
        self.shared.lock().busy
    }
}

/// Releases the busy latch if the consumer is torn down mid-task, and hands
/// leftover tasks to a new consumer.
struct BusyGuard {
    shared: Arc<Shared>,
    released: bool,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut state = self.shared.lock();
        if state.pending.is_empty() {
            state.busy = false;
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Speak consumer stopped with {} tasks queued, restarting", state.pending.len());
                drop(state);
                handle.spawn(drain(Arc::clone(&self.shared)));
            }
            Err(_) => state.busy = false,
        }
    }
}

async fn drain(shared: Arc<Shared>) {
    let mut guard = BusyGuard {
        shared: Arc::clone(&shared),
        released: false,
    };

    loop {
        let task = {
            let mut state = shared.lock();
            match state.pending.pop_front() {
                Some(task) => task,
                None => {
                    state.busy = false;
                    guard.released = true;
                    return;
                }
            }
        };

        debug!("Delivering speak task {}", task.id);
        let result = shared.sink.deliver(&task.text).await;
        if let Err(e) = &result {
            warn!("Speak task {} failed: {}", task.id, e);
        }
        // Receiver may have been dropped; the outcome is then unobserved
        let _ = task.done.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Records deliveries and flags any overlap
    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<String>>,
        in_flight: AtomicBool,
        overlapped: AtomicBool,
    }

    #[async_trait]
    impl SpeechSink for RecordingSink {
        async fn deliver(&self, text: &str) -> Result<(), AvatarError> {
            if self.in_flight.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            // Longer texts take longer, so a racing queue would reorder them
            tokio::time::sleep(Duration::from_millis(10 * text.len() as u64)).await;
            self.in_flight.store(false, Ordering::SeqCst);

            if text == "panic" {
                panic!("sink exploded");
            }
            if text.starts_with("bad") {
                return Err(AvatarError::Speak(format!("400 rejected {}", text)));
            }
            self.delivered.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn queue() -> (SpeakQueue, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (SpeakQueue::new(sink.clone()), sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_without_overlap() {
        let (queue, sink) = queue();

        let a = queue.enqueue("a much longer first sentence");
        let b = queue.enqueue("b");
        let c = queue.enqueue("c medium");
        assert_eq!(queue.pending(), 3);
        assert!(queue.is_busy());

        let (ra, rb, rc) = tokio::join!(a, b, c);
        assert!(ra.is_ok() && rb.is_ok() && rc.is_ok());

        assert_eq!(
            *sink.delivered.lock().unwrap(),
            vec!["a much longer first sentence", "b", "c medium"]
        );
        assert!(!sink.overlapped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_rejects_only_its_own_future() {
        let (queue, sink) = queue();

        let a = queue.enqueue("a");
        let b = queue.enqueue("bad one");
        let c = queue.enqueue("c");

        let (ra, rb, rc) = tokio::join!(a, b, c);
        assert!(ra.is_ok());
        assert_eq!(rb, Err(AvatarError::Speak("400 rejected bad one".into())));
        assert!(rc.is_ok());
        assert_eq!(*sink.delivered.lock().unwrap(), vec!["a", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_start_before_future_is_awaited() {
        let (queue, sink) = queue();

        let pending = queue.enqueue("x");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*sink.delivered.lock().unwrap(), vec!["x"]);
        assert!(pending.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_drains_and_latch_resets() {
        let (queue, _sink) = queue();

        queue.enqueue("one").await.unwrap();
        assert!(!queue.is_busy());
        assert_eq!(queue.pending(), 0);

        // A later enqueue starts a fresh consumer
        queue.enqueue("two").await.unwrap();
        assert!(!queue.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_consumer_panic_does_not_strand_queue() {
        let (queue, sink) = queue();

        let a = queue.enqueue("panic");
        let b = queue.enqueue("after");

        assert_eq!(a.await, Err(AvatarError::Speak("speak task dropped".into())));
        assert!(b.await.is_ok());
        assert_eq!(*sink.delivered.lock().unwrap(), vec!["after"]);
        assert!(!queue.is_busy());
    }
}
