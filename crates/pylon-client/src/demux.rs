//! Named-stream fan-out to independent consumers.
//!
//! A [`StreamDemux`] routes values written under a stream name to every
//! consumer currently attached to that name. Each consumer owns an unbounded
//! queue, so a slow consumer never blocks the writer or its siblings; the
//! queued-but-unconsumed count is exposed as backpressure.
//!
//! - writes to a name with no consumers are dropped
//! - [`StreamDemux::close`] ends every consumer of a name after it drains
//! - [`StreamDemux::kill`] ends them immediately and discards their backlog

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

type Registry<T> = Mutex<HashMap<String, Vec<Consumer<T>>>>;

struct Consumer<T> {
    id: u64,
    tx: mpsc::UnboundedSender<T>,
    backlog: Arc<AtomicUsize>,
    killed: Arc<AtomicBool>,
}

/// Fan-out of named streams.
pub struct StreamDemux<T> {
    streams: Arc<Registry<T>>,
    next_id: AtomicU64,
}

impl<T: Clone> StreamDemux<T> {
    /// Create an empty demultiplexer.
    pub fn new() -> Self {
        Self {
            streams: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Deliver `value` to every consumer of `name`.
    ///
    /// Returns the number of consumers reached.
    pub fn write(&self, name: &str, value: T) -> usize {
        let mut streams = self.streams.lock();
        let Some(consumers) = streams.get_mut(name) else {
            return 0;
        };
        consumers.retain(|consumer| {
            if consumer.tx.send(value.clone()).is_ok() {
                let _ = consumer.backlog.fetch_add(1, Ordering::AcqRel);
                true
            } else {
                false
            }
        });
        let reached = consumers.len();
        if consumers.is_empty() {
            let _ = streams.remove(name);
        }
        reached
    }

    /// Attach a new consumer to `name`.
    pub fn stream(&self, name: &str) -> DemuxStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let backlog = Arc::new(AtomicUsize::new(0));
        let killed = Arc::new(AtomicBool::new(false));
        self.streams
            .lock()
            .entry(name.to_owned())
            .or_default()
            .push(Consumer {
                id,
                tx,
                backlog: Arc::clone(&backlog),
                killed: Arc::clone(&killed),
            });
        DemuxStream {
            name: name.to_owned(),
            id,
            rx,
            backlog,
            killed,
            registry: Arc::downgrade(&self.streams),
        }
    }

    /// End every consumer of `name` once it has drained its backlog.
    pub fn close(&self, name: &str) {
        let _ = self.streams.lock().remove(name);
    }

    /// End every consumer of `name` immediately, discarding backlog.
    pub fn kill(&self, name: &str) {
        if let Some(consumers) = self.streams.lock().remove(name) {
            for consumer in consumers {
                consumer.killed.store(true, Ordering::Release);
                consumer.backlog.store(0, Ordering::Release);
            }
        }
    }

    /// Close every stream.
    pub fn close_all(&self) {
        self.streams.lock().clear();
    }

    /// Kill every stream.
    pub fn kill_all(&self) {
        let drained: Vec<_> = self.streams.lock().drain().collect();
        for (_, consumers) in drained {
            for consumer in consumers {
                consumer.killed.store(true, Ordering::Release);
                consumer.backlog.store(0, Ordering::Release);
            }
        }
    }

    /// Queued-but-unconsumed items across all consumers of `name`.
    pub fn backpressure(&self, name: &str) -> usize {
        self.streams.lock().get(name).map_or(0, |consumers| {
            consumers
                .iter()
                .map(|c| c.backlog.load(Ordering::Acquire))
                .sum()
        })
    }

    /// Largest single-consumer backlog across all streams.
    pub fn max_backpressure(&self) -> usize {
        self.streams
            .lock()
            .values()
            .flatten()
            .map(|c| c.backlog.load(Ordering::Acquire))
            .max()
            .unwrap_or(0)
    }

    /// Number of consumers attached to `name`.
    pub fn consumer_count(&self, name: &str) -> usize {
        self.streams.lock().get(name).map_or(0, Vec::len)
    }
}

impl<T: Clone> Default for StreamDemux<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One consumer of a named stream.
///
/// Implements [`Stream`]; dropping it detaches it from the demultiplexer.
pub struct DemuxStream<T> {
    name: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<T>,
    backlog: Arc<AtomicUsize>,
    killed: Arc<AtomicBool>,
    registry: Weak<Registry<T>>,
}

impl<T> DemuxStream<T> {
    /// Stream name this consumer is attached to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Items queued for this consumer and not yet received.
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Acquire)
    }

    /// Receive the next item, or `None` once the stream is closed or killed.
    pub async fn recv(&mut self) -> Option<T> {
        std::future::poll_fn(|cx| self.poll_item(cx)).await
    }

    /// Receive an item that is already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        if self.killed.load(Ordering::Acquire) {
            return None;
        }
        let item = self.rx.try_recv().ok()?;
        self.consumed();
        Some(item)
    }

    fn poll_item(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        if self.killed.load(Ordering::Acquire) {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(item)) => {
                self.consumed();
                Poll::Ready(Some(item))
            }
            other => other,
        }
    }

    fn consumed(&self) {
        let _ = self
            .backlog
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

impl<T> Stream for DemuxStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().poll_item(cx)
    }
}

impl<T> Drop for DemuxStream<T> {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut streams = registry.lock();
        if let Some(consumers) = streams.get_mut(&self.name) {
            consumers.retain(|c| c.id != self.id);
            if consumers.is_empty() {
                let _ = streams.remove(&self.name);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn write_without_consumers_is_dropped() {
        let demux = StreamDemux::<u32>::new();
        assert_eq!(demux.write("a", 1), 0);
        let mut stream = demux.stream("a");
        assert_eq!(demux.write("a", 2), 1);
        assert_eq!(stream.recv().await, Some(2));
    }

    #[tokio::test]
    async fn fans_out_to_every_consumer() {
        let demux = StreamDemux::<&'static str>::new();
        let mut first = demux.stream("chat");
        let mut second = demux.stream("chat");
        let mut other = demux.stream("other");

        assert_eq!(demux.write("chat", "hi"), 2);
        assert_eq!(first.recv().await, Some("hi"));
        assert_eq!(second.next().await, Some("hi"));
        assert_eq!(other.try_recv(), None);
    }

    #[tokio::test]
    async fn backpressure_counts_unconsumed_items() {
        let demux = StreamDemux::<u32>::new();
        let mut fast = demux.stream("s");
        let slow = demux.stream("s");
        for i in 0..3 {
            let _ = demux.write("s", i);
        }
        assert_eq!(demux.backpressure("s"), 6);
        assert_eq!(fast.recv().await, Some(0));
        assert_eq!(fast.backlog(), 2);
        assert_eq!(slow.backlog(), 3);
        assert_eq!(demux.backpressure("s"), 5);
        assert_eq!(demux.max_backpressure(), 3);
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let demux = StreamDemux::<u32>::new();
        let mut stream = demux.stream("s");
        let _ = demux.write("s", 1);
        let _ = demux.write("s", 2);
        demux.close("s");
        assert_eq!(stream.recv().await, Some(1));
        assert_eq!(stream.recv().await, Some(2));
        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn kill_ends_immediately() {
        let demux = StreamDemux::<u32>::new();
        let mut stream = demux.stream("s");
        let _ = demux.write("s", 1);
        demux.kill("s");
        assert_eq!(stream.recv().await, None);
        assert_eq!(stream.backlog(), 0);
    }

    #[tokio::test]
    async fn dropping_consumer_detaches_it() {
        let demux = StreamDemux::<u32>::new();
        let stream = demux.stream("s");
        assert_eq!(demux.consumer_count("s"), 1);
        drop(stream);
        assert_eq!(demux.consumer_count("s"), 0);
        assert_eq!(demux.write("s", 1), 0);
    }

    #[tokio::test]
    async fn close_all_and_kill_all() {
        let demux = StreamDemux::<u32>::new();
        let mut a = demux.stream("a");
        let mut b = demux.stream("b");
        let _ = demux.write("a", 1);
        demux.close_all();
        assert_eq!(a.recv().await, Some(1));
        assert_eq!(a.recv().await, None);
        assert_eq!(b.recv().await, None);

        let mut c = demux.stream("c");
        let _ = demux.write("c", 1);
        demux.kill_all();
        assert_eq!(c.recv().await, None);
    }
}
