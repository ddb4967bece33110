//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Transport` trait. It is intended primarily for testing, local execution,
//! and as a reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! The in-memory transport defines the **reference behavior** for the transport
//! layer. Broker-backed transports are expected to approximate it as closely
//! as their underlying systems allow:
//!
//! - Once `subscribe()` returns, messages published *after* that point on the
//!   channel are delivered to the subscriber's inbox.
//! - Once `unsubscribe()` returns, no further messages for the channel are
//!   queued for that subscriber.
//! - Channels match by exact string equality.
//! - Every transport subscribed to a channel receives its own copy (fanout),
//!   including the publisher itself when it is subscribed.
//!
//! ## Non-Goals
//!
//! This transport does not emulate persistence, broker failure modes or
//! network timing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::{
    // ---
    lock_ignore_poison,
    log_debug,
    Channel,
    Error,
    Inbound,
    InboxSender,
    Result,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
};

/// Identity of one memory transport on its hub.
type OwnerId = u64;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

struct Subscriber {
    owner: OwnerId,
    tx: InboxSender,
}

/// Shared message bus for the in-memory transport.
///
/// Simulates a pub/sub broker within a single process. All memory transports
/// sharing a hub see each other's messages, exactly as clients of one real
/// broker would.
///
/// For integration tests that need isolation between parallel test cases,
/// construct a hub explicitly and pass it to [`create_memory_transport_with_hub`]:
///
/// ```
/// # use packet_rpc::{MemoryHub, TransportConfig};
/// # async fn example() -> packet_rpc::Result<()> {
/// let hub = MemoryHub::new();
///
/// let config = |node: &str| TransportConfig {
///     uri: "memory://".into(),
///     node_id: node.into(),
///     transport_type: None,
/// };
///
/// let a = packet_rpc::create_memory_transport_with_hub(config("a"), hub.clone()).await?;
/// let b = packet_rpc::create_memory_transport_with_hub(config("b"), hub.clone()).await?;
/// # Ok(())
/// # }
/// ```
pub struct MemoryHub {
    // ---
    subscriptions: RwLock<HashMap<Channel, Vec<Subscriber>>>,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of transports currently subscribed to `channel`.
    pub async fn subscriber_count(&self, channel: &Channel) -> usize {
        self.subscriptions
            .read()
            .await
            .get(channel)
            .map_or(0, Vec::len)
    }

    async fn publish(&self, transport_id: &str, channel: &Channel, payload: Bytes) {
        // ---
        // Clone the senders out so no lock is held while delivering.
        let senders: Vec<InboxSender> = {
            let subs = self.subscriptions.read().await;
            subs.get(channel)
                .map(|list| list.iter().map(|s| s.tx.clone()).collect())
                .unwrap_or_default()
        };

        log_debug!(
            "{transport_id}: publish to {channel} ({} subscribers)",
            senders.len()
        );

        for tx in senders {
            let inbound = Inbound {
                channel: channel.clone(),
                payload: payload.clone(),
            };
            // A closed inbox means the receiving connection is gone.
            if tx.send(inbound).is_err() {
                log_debug!("{transport_id}: dropped message for closed inbox on {channel}");
            }
        }
    }

    async fn subscribe(&self, owner: OwnerId, tx: InboxSender, channel: &Channel) {
        // ---
        let mut subs = self.subscriptions.write().await;
        let list = subs.entry(channel.clone()).or_default();
        if !list.iter().any(|s| s.owner == owner) {
            list.push(Subscriber { owner, tx });
        }
    }

    async fn unsubscribe(&self, owner: OwnerId, channel: &Channel) {
        // ---
        let mut subs = self.subscriptions.write().await;
        if let Some(list) = subs.get_mut(channel) {
            list.retain(|s| s.owner != owner);
            if list.is_empty() {
                subs.remove(channel);
            }
        }
    }

    async fn remove_owner(&self, owner: OwnerId) {
        // ---
        let mut subs = self.subscriptions.write().await;
        for list in subs.values_mut() {
            list.retain(|s| s.owner != owner);
        }
        subs.retain(|_, list| !list.is_empty());
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
        }
    }
}

/// Process-global hub used by [`create_memory_transport`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport.
///
/// Routes messages through a shared [`MemoryHub`]. Closing a transport
/// removes only its own subscriptions from the hub and ends its inbox.
struct MemoryTransport {
    // ---
    base: TransportBase,
    hub: Arc<MemoryHub>,
    owner: OwnerId,
    inbox_tx: Mutex<Option<InboxSender>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Transport(format!(
                "{}: memory transport closed",
                self.transport_id()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn publish(&self, channel: &Channel, payload: Bytes) -> Result<()> {
        self.ensure_open()?;
        self.hub.publish(self.transport_id(), channel, payload).await;
        Ok(())
    }

    async fn subscribe(&self, channel: &Channel) -> Result<()> {
        self.ensure_open()?;

        let tx = lock_ignore_poison(&self.inbox_tx).clone();
        let Some(tx) = tx else {
            return Err(Error::Transport(format!(
                "{}: inbox already released",
                self.transport_id()
            )));
        };

        log_debug!("{}: subscribe to {channel}", self.transport_id());
        self.hub.subscribe(self.owner, tx, channel).await;
        Ok(())
    }

    async fn unsubscribe(&self, channel: &Channel) -> Result<()> {
        self.ensure_open()?;

        log_debug!("{}: unsubscribe from {channel}", self.transport_id());
        self.hub.unsubscribe(self.owner, channel).await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // ---
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        log_debug!("{}: closing memory transport", self.transport_id());

        self.hub.remove_owner(self.owner).await;
        lock_ignore_poison(&self.inbox_tx).take();
        Ok(())
    }
}

/// Create a new in-memory transport on the process-global hub.
///
/// All transports created with this function share a single message bus.
/// For isolated parallel testing, use [`create_memory_transport_with_hub`].
///
/// # Errors
///
/// Currently infallible — always returns `Ok`.
pub async fn create_memory_transport(config: TransportConfig) -> Result<TransportPtr> {
    create_memory_transport_with_hub(config, global_hub()).await
}

/// Create a new in-memory transport on the provided hub.
///
/// # Errors
///
/// Currently infallible — always returns `Ok`.
pub async fn create_memory_transport_with_hub(
    config: TransportConfig,
    hub: Arc<MemoryHub>,
) -> Result<TransportPtr> {
    // ---
    log_debug!("{}: create memory transport", config.node_id);

    let (base, inbox_tx) = TransportBase::new(config.node_id);

    Ok(Arc::new(MemoryTransport {
        base,
        hub,
        owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
        inbox_tx: Mutex::new(Some(inbox_tx)),
        closed: AtomicBool::new(false),
    }))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use tokio::time::{timeout, Duration};

    fn config(node: &str) -> TransportConfig {
        TransportConfig {
            uri: "memory://".into(),
            node_id: node.into(),
            transport_type: None,
        }
    }

    #[tokio::test]
    async fn test_subscribe_then_publish_delivers() {
        // ---
        let hub = MemoryHub::new();
        let a = create_memory_transport_with_hub(config("a"), hub.clone())
            .await
            .unwrap();
        let b = create_memory_transport_with_hub(config("b"), hub.clone())
            .await
            .unwrap();

        let mut inbox = b.take_inbox().expect("inbox available");
        assert!(b.take_inbox().is_none());

        let channel = Channel::from("news");
        b.subscribe(&channel).await.unwrap();
        b.subscribe(&channel).await.unwrap(); // idempotent
        assert_eq!(hub.subscriber_count(&channel).await, 1);

        a.publish(&channel, Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let received = timeout(Duration::from_millis(100), inbox.recv())
            .await
            .expect("timed out waiting for message")
            .expect("inbox closed unexpectedly");
        assert_eq!(received.channel, channel);
        assert_eq!(received.payload, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        // ---
        let hub = MemoryHub::new();
        let t = create_memory_transport_with_hub(config("solo"), hub.clone())
            .await
            .unwrap();
        let mut inbox = t.take_inbox().unwrap();

        let channel = Channel::from("c");
        t.subscribe(&channel).await.unwrap();
        t.unsubscribe(&channel).await.unwrap();
        assert_eq!(hub.subscriber_count(&channel).await, 0);

        t.publish(&channel, Bytes::from_static(b"x")).await.unwrap();
        assert!(timeout(Duration::from_millis(50), inbox.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_close_ends_inbox_and_rejects_publish() {
        // ---
        let hub = MemoryHub::new();
        let keep = create_memory_transport_with_hub(config("keep"), hub.clone())
            .await
            .unwrap();
        let gone = create_memory_transport_with_hub(config("gone"), hub.clone())
            .await
            .unwrap();
        let mut inbox = gone.take_inbox().unwrap();

        let channel = Channel::from("shared");
        keep.subscribe(&channel).await.unwrap();
        gone.subscribe(&channel).await.unwrap();

        gone.close().await.unwrap();
        gone.close().await.unwrap();

        assert!(inbox.recv().await.is_none());
        assert_eq!(hub.subscriber_count(&channel).await, 1);
        assert!(matches!(
            gone.publish(&channel, Bytes::new()).await,
            Err(Error::Transport(_))
        ));
    }
}
