//! Bounded, notifying text buffer.
//!
//! One `NotifyQueue` exists per input source (speech, chat, game state). Producers
//! call [`NotifyQueue::add`] from any task; the turn that builds the next prompt
//! calls [`NotifyQueue::drain`]. A consumer that also owns a timer can wait on
//! [`NotifyQueue::notified`] to wake early when something arrives.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::sync::futures::Notified;

/// Default capacity for the speech queue.
pub const DEFAULT_SPEECH_CAPACITY: usize = 10;
/// Default capacity for the chat queue.
pub const DEFAULT_CHAT_CAPACITY: usize = 30;
/// Default capacity for the game-state queue.
pub const DEFAULT_STATE_CAPACITY: usize = 20;

#[derive(Debug)]
pub struct NotifyQueue {
    capacity: usize,
    messages: Mutex<VecDeque<String>>,
    // Holds at most one permit, so bursts of `add` collapse into one wake-up.
    notify: Notify,
}

impl NotifyQueue {
    /// Creates a queue holding at most `capacity` messages.
    ///
    /// A zero capacity falls back to [`DEFAULT_SPEECH_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_SPEECH_CAPACITY
        } else {
            capacity
        };
        Self {
            capacity,
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `text`, evicting the oldest message when the queue is full.
    ///
    /// Empty text is ignored. Never blocks the producer.
    pub fn add(&self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        {
            let mut messages = self.lock();
            if messages.len() == self.capacity {
                messages.pop_front();
            }
            messages.push_back(text);
        }
        self.notify.notify_one();
    }

    /// Takes every buffered message in arrival order, leaving the queue empty.
    pub fn drain(&self) -> Vec<String> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Resolves once a message has been added since the last consumed
    /// notification.
    ///
    /// One notification may stand for many messages; always drain rather than
    /// counting wake-ups.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    // Every mutation leaves the deque consistent, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    async fn has_pending(queue: &NotifyQueue) -> bool {
        tokio::time::timeout(Duration::from_millis(10), queue.notified())
            .await
            .is_ok()
    }

    #[test]
    fn test_drain_keeps_most_recent_on_overflow() {
        let queue = NotifyQueue::new(3);
        for text in ["a", "b", "c", "d"] {
            queue.add(text);
        }

        assert_eq!(queue.drain(), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_long_sequence_never_exceeds_capacity() {
        let queue = NotifyQueue::new(5);
        for i in 0..42 {
            queue.add(format!("msg {i}"));
            assert!(queue.len() <= 5);
        }

        let expected: Vec<String> = (37..42).map(|i| format!("msg {i}")).collect();
        assert_eq!(queue.drain(), expected);
    }

    #[test]
    fn test_empty_text_is_ignored() {
        let queue = NotifyQueue::new(2);
        queue.add("");
        queue.add("x");
        queue.add("");

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain(), vec!["x"]);
    }

    #[test]
    fn test_second_drain_is_empty() {
        let queue = NotifyQueue::new(4);
        queue.add("one");
        queue.add("two");

        assert_eq!(queue.drain(), vec!["one", "two"]);
        assert!(queue.drain().is_empty());
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), 4);
    }

    #[test]
    fn test_zero_capacity_uses_default() {
        let queue = NotifyQueue::new(0);
        assert_eq!(queue.capacity(), DEFAULT_SPEECH_CAPACITY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_adds_leaves_one_notification() {
        let queue = NotifyQueue::new(10);
        for i in 0..5 {
            queue.add(format!("line {i}"));
        }

        assert!(has_pending(&queue).await, "first wait should see the add");
        assert!(!has_pending(&queue).await, "burst must collapse to one wake-up");

        queue.add("later");
        assert!(has_pending(&queue).await);
        assert_eq!(queue.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_add_does_not_notify() {
        let queue = NotifyQueue::new(10);
        queue.add("");

        assert!(!has_pending(&queue).await);
    }

    #[tokio::test]
    async fn test_concurrent_producers_respect_capacity() {
        let queue = Arc::new(NotifyQueue::new(8));
        let mut producers = Vec::new();
        for p in 0..4 {
            let queue = queue.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..50 {
                    queue.add(format!("{p}-{i}"));
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }

        let drained = queue.drain();
        assert_eq!(drained.len(), 8);
        // Per-producer order survives the interleaving.
        for p in 0..4 {
            let seen: Vec<usize> = drained
                .iter()
                .filter_map(|m| m.strip_prefix(&format!("{p}-")))
                .map(|i| i.parse().unwrap())
                .collect();
            assert!(seen.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
