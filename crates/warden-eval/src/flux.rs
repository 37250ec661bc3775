//! A small reactive core (spec.md §9: "implement with a small reactive core ...
//! rather than pulling in a heavy framework").
//!
//! `tokio::sync::watch` already has exactly the semantics §4.3/§5 ask for: a single
//! slot holding the latest value, multiple subscribers, replay-of-latest to a new
//! subscriber, no backpressure. `Flux<T>` is that channel's receiver half; `FluxSink<T>`
//! is the sender half a source uses to publish. `TracedValue` is kept as a distinct
//! name (rather than just using `Value` everywhere a streaming compiled form appears)
//! because the trace/coverage channel (C10) is a logically separate concern even
//! though, in this implementation, it is populated out-of-band via `trace::TraceCollector`
//! rather than carried inside every emission -- see `trace.rs`.

use tokio::sync::watch;

use crate::value::Value;

/// The value carried by a streaming compiled form (C4). Kept distinct from `Value`
/// for readability at call sites; trace data travels separately (`trace.rs`).
pub type TracedValue = Value;

/// Multicast, replay-last channel. Cloning a `Flux` creates another subscriber that
/// immediately observes the last published value.
pub type Flux<T> = watch::Receiver<T>;

/// The publishing half of a `Flux`.
pub struct FluxSink<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone + PartialEq> FluxSink<T> {
    pub fn new(initial: T) -> (FluxSink<T>, Flux<T>) {
        let (tx, rx) = watch::channel(initial);
        (FluxSink { tx }, rx)
    }

    /// Publish a new value. No-op (channel stays at the old value) if there are no
    /// subscribers left -- `watch` tolerates that, unlike a broadcast channel.
    pub fn emit(&self, value: T) {
        self.tx.send_replace(value);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Wraps a `Flux<T>` so that consecutive structurally-equal emissions are suppressed.
/// Used only at the PDP's top-level output (spec.md §4.9/§5: "distinct-until-changed
/// applies only to the top-level PDP output, never inside").
pub struct DistinctUntilChanged<T> {
    inner: Flux<T>,
    last_delivered: Option<T>,
}

impl<T: Clone + PartialEq> DistinctUntilChanged<T> {
    pub fn new(inner: Flux<T>) -> Self {
        let last_delivered = Some(inner.borrow().clone());
        DistinctUntilChanged { inner, last_delivered }
    }

    /// The first call always returns the current value (there is nothing to be
    /// "distinct" from yet); subsequent calls block until a structurally different
    /// value is published.
    pub async fn next(&mut self) -> Option<T> {
        if let Some(first) = self.last_delivered.take() {
            return Some(first);
        }
        loop {
            if self.inner.changed().await.is_err() {
                return None;
            }
            let candidate = self.inner.borrow().clone();
            if self.last_delivered.as_ref() != Some(&candidate) {
                self.last_delivered = Some(candidate.clone());
                return Some(candidate);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn distinct_until_changed_suppresses_repeats() {
        let (sink, rx) = FluxSink::new(1u32);
        let mut stream = DistinctUntilChanged::new(rx);

        assert_eq!(stream.next().await, Some(1));

        sink.emit(1); // repeat, must not surface
        sink.emit(2);
        assert_eq!(stream.next().await, Some(2));

        sink.emit(2); // repeat again
        sink.emit(3);
        assert_eq!(stream.next().await, Some(3));
    }

    #[tokio::test]
    async fn late_subscriber_replays_last_value() {
        let (sink, rx) = FluxSink::new(0u32);
        sink.emit(42);
        let late_subscriber = rx.clone();
        assert_eq!(*late_subscriber.borrow(), 42);
    }
}
