use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

use postflow_core_types::CoreError;

/// Trait implemented by payload types that can be carried on the bus.
pub trait Event: Clone + Send + Sync + std::fmt::Debug + 'static {}

impl<T> Event for T where T: Clone + Send + Sync + std::fmt::Debug + 'static {}

#[async_trait]
pub trait EventBus<E>: Send + Sync
where
    E: Event,
{
    /// Publish to every current subscriber. Fails when nobody is listening.
    async fn publish(&self, event: E) -> Result<(), CoreError>;

    /// Publish, dropping the event when there are no subscribers.
    fn emit(&self, event: E);

    fn subscribe(&self) -> broadcast::Receiver<E>;
}

/// In-memory broadcast bus.
pub struct InMemoryBus<E>
where
    E: Event,
{
    sender: broadcast::Sender<E>,
}

impl<E> InMemoryBus<E>
where
    E: Event,
{
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { sender })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl<E> EventBus<E> for InMemoryBus<E>
where
    E: Event,
{
    async fn publish(&self, event: E) -> Result<(), CoreError> {
        self.sender
            .send(event)
            .map(|_| ())
            .map_err(|err| CoreError::new(err.to_string()))
    }

    fn emit(&self, event: E) {
        if self.sender.send(event).is_err() {
            trace!("event dropped: no subscribers");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }
}

/// Materialise an mpsc receiver from the bus subscription so callers can await
/// events without handling broadcast lag semantics directly.
pub fn to_mpsc<E>(bus: Arc<InMemoryBus<E>>, capacity: usize) -> mpsc::Receiver<E>
where
    E: Event,
{
    let mut rx = bus.subscribe();
    let (tx, out_rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => {
                    if tx.send(ev).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    out_rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_fails_but_emit_does_not() {
        let bus: Arc<InMemoryBus<u32>> = InMemoryBus::new(4);
        assert!(bus.publish(1).await.is_err());
        bus.emit(2);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn mpsc_bridge_forwards_in_order() {
        let bus: Arc<InMemoryBus<&'static str>> = InMemoryBus::new(8);
        let mut rx = to_mpsc(bus.clone(), 8);
        bus.emit("locating");
        bus.emit("acting");
        assert_eq!(rx.recv().await, Some("locating"));
        assert_eq!(rx.recv().await, Some("acting"));
    }
}
