//! Delta delivery pump with optional batching.
//!
//! Index mutation and delta computation are synchronous; delivery is not.
//! The coordinator emits into a [`ChannelSink`], and a pump task drains
//! the channel. With batching enabled, deltas queue per map and flush on
//! a timer (16 ms, about one frame) as one batched notification;
//! otherwise every delta is forwarded immediately.

use crate::search::{SearchDelta, SearchDeltaSink};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default flush interval.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(16);

/// Batching behavior of the delta pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOptions {
    /// Forward each delta as it is computed.
    Immediate,
    /// Queue per map and flush on this interval.
    Batched(Duration),
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions::Batched(DEFAULT_FLUSH_INTERVAL)
    }
}

/// Receives drained deltas; implementations forward to client sockets or
/// the cluster transport.
#[async_trait]
pub trait DeltaDelivery: Send + Sync {
    /// Deliver a non-empty group of deltas from one map.
    async fn deliver(&self, deltas: Vec<SearchDelta>);
}

/// Synchronous sink side of the pump.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SearchDelta>,
}

/// Receiver half handed to [`spawn_delta_pump`].
pub type DeltaReceiver = mpsc::UnboundedReceiver<SearchDelta>;

impl ChannelSink {
    /// Create the sink and its receiver half.
    ///
    /// Split from [`spawn_delta_pump`] so the sink can be wired into the
    /// coordinator before the delivery side exists.
    pub fn channel() -> (ChannelSink, DeltaReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSink { tx }, rx)
    }
}

impl SearchDeltaSink for ChannelSink {
    fn deliver(&self, delta: SearchDelta) {
        // a dropped pump only means shutdown; nothing to do
        let _ = self.tx.send(delta);
    }
}

/// Spawn the pump task draining `rx` into `delivery`.
pub fn spawn_delta_pump(
    rx: DeltaReceiver,
    delivery: Arc<dyn DeltaDelivery>,
    options: BatchOptions,
) -> JoinHandle<()> {
    match options {
        BatchOptions::Immediate => tokio::spawn(run_immediate(rx, delivery)),
        BatchOptions::Batched(interval) => tokio::spawn(run_batched(rx, delivery, interval)),
    }
}

async fn run_immediate(
    mut rx: mpsc::UnboundedReceiver<SearchDelta>,
    delivery: Arc<dyn DeltaDelivery>,
) {
    while let Some(delta) = rx.recv().await {
        delivery.deliver(vec![delta]).await;
    }
    debug!("delta pump stopped");
}

async fn run_batched(
    mut rx: mpsc::UnboundedReceiver<SearchDelta>,
    delivery: Arc<dyn DeltaDelivery>,
    interval: Duration,
) {
    let mut pending: HashMap<String, Vec<SearchDelta>> = HashMap::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(delta) => {
                        pending.entry(delta.map_name.clone()).or_default().push(delta);
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                flush(&mut pending, delivery.as_ref()).await;
            }
        }
    }
    // drain whatever is left on shutdown
    flush(&mut pending, delivery.as_ref()).await;
    debug!("delta pump stopped");
}

async fn flush(pending: &mut HashMap<String, Vec<SearchDelta>>, delivery: &dyn DeltaDelivery) {
    if pending.is_empty() {
        return;
    }
    let mut maps: Vec<(String, Vec<SearchDelta>)> = pending.drain().collect();
    maps.sort_by(|a, b| a.0.cmp(&b.0));
    for (_, deltas) in maps {
        delivery.deliver(deltas).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::DeltaRoute;
    use livequery_core::{ClientId, DeltaKind, SubscriptionId};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDelivery {
        groups: Mutex<Vec<Vec<SearchDelta>>>,
    }

    #[async_trait]
    impl DeltaDelivery for RecordingDelivery {
        async fn deliver(&self, deltas: Vec<SearchDelta>) {
            self.groups.lock().unwrap().push(deltas);
        }
    }

    fn delta(map: &str, key: &str) -> SearchDelta {
        SearchDelta {
            subscription_id: SubscriptionId::new(),
            map_name: map.to_string(),
            route: DeltaRoute::Local(ClientId::new("c")),
            key: key.to_string(),
            value: None,
            score: 1.0,
            matched_terms: vec![],
            change: DeltaKind::Enter,
        }
    }

    #[tokio::test]
    async fn test_immediate_forwards_one_by_one() {
        let delivery = Arc::new(RecordingDelivery::default());
        let (sink, rx) = ChannelSink::channel();
        let handle = spawn_delta_pump(rx, delivery.clone(), BatchOptions::Immediate);

        sink.deliver(delta("m", "a"));
        sink.deliver(delta("m", "b"));
        drop(sink);
        handle.await.unwrap();

        let groups = delivery.groups.lock().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 1);
    }

    #[tokio::test]
    async fn test_batched_groups_per_map() {
        let delivery = Arc::new(RecordingDelivery::default());
        let (sink, rx) = ChannelSink::channel();
        let handle = spawn_delta_pump(
            rx,
            delivery.clone(),
            BatchOptions::Batched(Duration::from_millis(5)),
        );

        sink.deliver(delta("m1", "a"));
        sink.deliver(delta("m1", "b"));
        sink.deliver(delta("m2", "c"));
        tokio::time::sleep(Duration::from_millis(40)).await;

        {
            let groups = delivery.groups.lock().unwrap();
            assert_eq!(groups.len(), 2);
            let m1 = groups.iter().find(|g| g[0].map_name == "m1").unwrap();
            assert_eq!(m1.len(), 2);
        }

        drop(sink);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_batched_drains_on_shutdown() {
        let delivery = Arc::new(RecordingDelivery::default());
        let (sink, rx) = ChannelSink::channel();
        let handle = spawn_delta_pump(
            rx,
            delivery.clone(),
            BatchOptions::Batched(Duration::from_secs(3600)),
        );

        sink.deliver(delta("m", "a"));
        drop(sink);
        handle.await.unwrap();

        let groups = delivery.groups.lock().unwrap();
        assert_eq!(groups.len(), 1);
    }
}
