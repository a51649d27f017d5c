//! Typed broadcast bus used to fan lifecycle signals and telemetry updates out
//! to per-session consumers.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use pagebridge_core_types::{BridgeError, BridgeResult};

/// Trait implemented by payload types that can be carried on the bus.
pub trait Event: Clone + Send + Sync + std::fmt::Debug + 'static {}

impl<T> Event for T where T: Clone + Send + Sync + std::fmt::Debug + 'static {}

#[async_trait]
pub trait EventBus<E>: Send + Sync
where
    E: Event,
{
    async fn publish(&self, event: E) -> BridgeResult<()>;
    fn subscribe(&self) -> broadcast::Receiver<E>;
}

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

    /// Publish without awaiting; a bus with no subscribers drops the event.
    pub fn send(&self, event: E) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn sender(&self) -> broadcast::Sender<E> {
        self.sender.clone()
    }
}

#[async_trait]
impl<E> EventBus<E> for InMemoryBus<E>
where
    E: Event,
{
    async fn publish(&self, event: E) -> BridgeResult<()> {
        self.sender
            .send(event)
            .map(|_| ())
            .map_err(|_| BridgeError::internal("event bus has no subscribers"))
    }

    fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }
}

/// Forward bus events accepted by `filter` into a dedicated mpsc receiver.
///
/// Lagged subscribers skip the overwritten events and keep going; the task
/// ends when either side closes.
pub fn to_mpsc_filtered<E, F>(
    bus: &Arc<InMemoryBus<E>>,
    capacity: usize,
    filter: F,
) -> mpsc::Receiver<E>
where
    E: Event,
    F: Fn(&E) -> bool + Send + 'static,
{
    to_mpsc_filtered_with_lag(bus, capacity, filter, |_| {})
}

/// Like [`to_mpsc_filtered`], but reports every lag to `on_lag` with the
/// number of skipped events before the next event is forwarded, so the
/// consumer can reconcile whatever those events would have told it.
pub fn to_mpsc_filtered_with_lag<E, F, L>(
    bus: &Arc<InMemoryBus<E>>,
    capacity: usize,
    filter: F,
    on_lag: L,
) -> mpsc::Receiver<E>
where
    E: Event,
    F: Fn(&E) -> bool + Send + 'static,
    L: Fn(u64) + Send + 'static,
{
    let mut rx = bus.subscribe();
    let (tx, out_rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => {
                    if !filter(&ev) {
                        continue;
                    }
                    if tx.send(ev).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: "event-bus", skipped, "subscriber lagged; events dropped");
                    on_lag(skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    out_rx
}

/// Unfiltered variant of [`to_mpsc_filtered`].
pub fn to_mpsc<E>(bus: &Arc<InMemoryBus<E>>, capacity: usize) -> mpsc::Receiver<E>
where
    E: Event,
{
    to_mpsc_filtered(bus, capacity, |_| true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagebridge_core_types::{DocumentHandle, LifecycleSignal};
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn publish_without_subscribers_fails() {
        let bus = InMemoryBus::<u32>::new(4);
        assert!(bus.publish(1).await.is_err());
        assert_eq!(bus.send(2), 0);
    }

    #[tokio::test]
    async fn filtered_fanout_only_forwards_matching_documents() {
        let bus = InMemoryBus::<LifecycleSignal>::new(16);
        let mine = DocumentHandle::new();
        let other = DocumentHandle::new();
        let mut rx = to_mpsc_filtered(&bus, 8, move |sig: &LifecycleSignal| sig.handle == mine);

        bus.send(LifecycleSignal::content_loaded(other, "https://other.test/"));
        bus.send(LifecycleSignal::content_loaded(mine, "https://mine.test/"));

        let got = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("forwarded in time")
            .expect("channel open");
        assert_eq!(got.handle, mine);
        assert_eq!(got.url, "https://mine.test/");
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn lag_is_reported_before_the_next_event() {
        use std::sync::atomic::{AtomicU64, Ordering};

        let bus = InMemoryBus::<u32>::new(2);
        let skipped = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&skipped);
        let mut rx = to_mpsc_filtered_with_lag(&bus, 8, |_| true, move |n| {
            seen.fetch_add(n, Ordering::SeqCst);
        });

        for n in 0..5 {
            bus.send(n);
        }
        let first = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("forwarded in time")
            .expect("channel open");
        assert_eq!(first, 3);
        assert_eq!(skipped.load(Ordering::SeqCst), 3);
    }
}
