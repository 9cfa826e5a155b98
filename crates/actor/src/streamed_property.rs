//! `StreamedProperty<T>`: an actor-local value that behaves like a plain
//! field for reads and writes, but that can also be observed as a lazy
//! sequence of every value it takes on.
//!
//! Reads never block on subscribers and subscribers never see a
//! partially-applied write: the value swap and the subscriber fan-out
//! happen under the same lock, but the lock is never held across an
//! `.await` — fan-out hands each subscriber a value into its own
//! buffered channel rather than calling into it directly.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Bound on each subscriber's buffered channel. A slow subscriber that
/// falls this far behind is dropped rather than allowed to backpressure
/// the actor that owns the property.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;

struct Inner<T> {
    value: T,
    subscribers: Vec<mpsc::Sender<T>>,
}

/// A property of an actor whose writes fan out to every active observer.
pub struct StreamedProperty<T: Clone + Send + 'static> {
    inner: Mutex<Inner<T>>,
}

impl<T: Clone + Send + 'static> StreamedProperty<T> {
    /// Create a property initialized to `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Inner {
                value,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Read the current value.
    pub fn get(&self) -> T {
        self.inner.lock().value.clone()
    }

    /// Replace the value and deliver it to every current subscriber.
    ///
    /// Subscribers that can't keep up (channel full) are dropped; a new
    /// [`observe`](Self::observe) call always starts from the then-current
    /// value, so a dropped subscriber only loses values it was already
    /// failing to consume in time.
    pub async fn set(&self, value: T) {
        let mut guard = self.inner.lock();
        guard.value = value.clone();
        guard
            .subscribers
            .retain(|tx| tx.try_send(value.clone()).is_ok());
    }

    /// Subscribe to this property: an independent, non-restartable
    /// sequence that yields the current value immediately, then every
    /// subsequent write.
    pub fn observe(&self) -> ObserveStream<T> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let current = {
            let mut guard = self.inner.lock();
            let current = guard.value.clone();
            guard.subscribers.push(tx);
            current
        };
        ObserveStream::new(current, rx)
    }
}

/// A lazy sequence of a [`StreamedProperty`]'s values, starting with the
/// value current at subscribe time.
pub struct ObserveStream<T> {
    initial: Option<T>,
    rx: ReceiverStream<T>,
}

impl<T> ObserveStream<T> {
    fn new(initial: T, rx: mpsc::Receiver<T>) -> Self {
        Self {
            initial: Some(initial),
            rx: ReceiverStream::new(rx),
        }
    }
}

impl<T: Unpin> futures::Stream for ObserveStream<T> {
    type Item = T;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<T>> {
        if let Some(initial) = self.initial.take() {
            return std::task::Poll::Ready(Some(initial));
        }
        futures::Stream::poll_next(std::pin::Pin::new(&mut self.rx), cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn observe_yields_current_value_first() {
        let prop = StreamedProperty::new(10i64);
        let mut stream = prop.observe();
        assert_eq!(stream.next().await, Some(10));
    }

    #[tokio::test]
    async fn writes_fan_out_to_every_subscriber() {
        let prop = StreamedProperty::new(0i64);
        let mut a = prop.observe();
        let mut b = prop.observe();
        assert_eq!(a.next().await, Some(0));
        assert_eq!(b.next().await, Some(0));

        prop.set(1).await;
        prop.set(2).await;

        assert_eq!(a.next().await, Some(1));
        assert_eq!(a.next().await, Some(2));
        assert_eq!(b.next().await, Some(1));
        assert_eq!(b.next().await, Some(2));
    }

    #[tokio::test]
    async fn new_observer_starts_from_current_value_not_history() {
        let prop = StreamedProperty::new(0i64);
        prop.set(5).await;
        let mut stream = prop.observe();
        assert_eq!(stream.next().await, Some(5));
    }

    #[tokio::test]
    async fn get_does_not_require_an_active_subscriber() {
        let prop = StreamedProperty::new("hello".to_string());
        assert_eq!(prop.get(), "hello");
    }
}
