//! Keyed one-shot timers for the session actor and its transport.
//!
//! Wraps [`DelayQueue`] with a value-to-key index so a timer can be reset or
//! cancelled by identity. Every timer fires at most once; scheduling the same
//! identity again replaces its deadline.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::time::DelayQueue;
use tokio_util::time::delay_queue::Key;

pub(crate) struct TimerWheel<T> {
    queue: DelayQueue<T>,
    keys: HashMap<T, Key>,
}

impl<T> TimerWheel<T>
where
    T: Clone + Eq + Hash,
{
    pub(crate) fn new() -> Self {
        Self {
            queue: DelayQueue::new(),
            keys: HashMap::new(),
        }
    }

    /// Arm `timer` to fire after `after`, replacing any existing deadline.
    pub(crate) fn schedule(&mut self, timer: T, after: Duration) {
        if let Some(key) = self.keys.get(&timer) {
            self.queue.reset(key, after);
        } else {
            let key = self.queue.insert(timer.clone(), after);
            let _ = self.keys.insert(timer, key);
        }
    }

    /// Disarm `timer`. Returns whether it was armed.
    pub(crate) fn cancel(&mut self, timer: &T) -> bool {
        match self.keys.remove(timer) {
            Some(key) => {
                let _ = self.queue.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Disarm `timer`, returning the time it had left.
    pub(crate) fn take_remaining(&mut self, timer: &T) -> Option<Duration> {
        let key = self.keys.remove(timer)?;
        let deadline = self.queue.deadline(&key);
        let _ = self.queue.remove(&key);
        Some(deadline.saturating_duration_since(Instant::now()))
    }

    pub(crate) fn contains(&self, timer: &T) -> bool {
        self.keys.contains_key(timer)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
        self.keys.clear();
    }

    /// Wait for the next timer to fire.
    ///
    /// Resolves to `None` immediately when nothing is armed; callers guard
    /// on [`TimerWheel::is_empty`] inside `select!`. Cancel safe.
    pub(crate) async fn next(&mut self) -> Option<T> {
        let expired = std::future::poll_fn(|cx| self.queue.poll_expired(cx)).await?;
        let timer = expired.into_inner();
        let _ = self.keys.remove(&timer);
        Some(timer)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    enum Tick {
        A,
        B,
    }

    #[tokio::test(start_paused = true)]
    async fn fires_in_deadline_order() {
        let mut wheel = TimerWheel::new();
        wheel.schedule(Tick::B, Duration::from_millis(200));
        wheel.schedule(Tick::A, Duration::from_millis(100));
        assert_eq!(wheel.len(), 2);
        assert_eq!(wheel.next().await, Some(Tick::A));
        assert_eq!(wheel.next().await, Some(Tick::B));
        assert!(wheel.is_empty());
        assert_eq!(wheel.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_replaces_deadline() {
        let mut wheel = TimerWheel::new();
        wheel.schedule(Tick::A, Duration::from_millis(100));
        wheel.schedule(Tick::B, Duration::from_millis(150));
        wheel.schedule(Tick::A, Duration::from_millis(300));
        assert_eq!(wheel.len(), 2);
        assert_eq!(wheel.next().await, Some(Tick::B));
        assert_eq!(wheel.next().await, Some(Tick::A));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_disarms() {
        let mut wheel = TimerWheel::new();
        wheel.schedule(Tick::A, Duration::from_millis(100));
        assert!(wheel.contains(&Tick::A));
        assert!(wheel.cancel(&Tick::A));
        assert!(!wheel.cancel(&Tick::A));
        assert!(wheel.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn take_remaining_reports_time_left() {
        let mut wheel = TimerWheel::new();
        wheel.schedule(Tick::A, Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(40)).await;
        let left = wheel.take_remaining(&Tick::A).unwrap();
        assert_eq!(left, Duration::from_millis(60));
        assert!(!wheel.contains(&Tick::A));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_drops_everything() {
        let mut wheel = TimerWheel::new();
        wheel.schedule(Tick::A, Duration::from_millis(1));
        wheel.schedule(Tick::B, Duration::from_millis(2));
        wheel.clear();
        assert!(wheel.is_empty());
        assert_eq!(wheel.next().await, None);
    }
}
