// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the seam between the connection engine and a concrete
//! publish/subscribe system. It intentionally avoids any reference to
//! concrete brokers or client libraries.
//!
//! A transport does exactly four things: publish an opaque payload to a
//! channel, start and stop listening on channels, and report every payload it
//! receives on the single inbound stream handed out by
//! [`Transport::take_inbox`]. Correlation, timeouts and handler dispatch live
//! in the connection layer.
//!
//! Concrete implementations of this interface live under `src/transport/`.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{lock_ignore_poison, Result};

/// A pub/sub channel name.
///
/// Channels are immutable, cheap to clone, and safe to share across threads.
/// The domain layer makes no assumptions about channel syntax; the memory
/// transport matches channels by exact string equality and other transports
/// are expected to approximate that.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Channel(pub Arc<str>);

impl Channel {
    /// Borrow the channel name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T> From<T> for Channel
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        Channel(value.into())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One message received by a transport.
///
/// This is the only inbound event the connection layer consumes. Lifecycle
/// notifications of the underlying client (connects, subscription counts,
/// pattern matches) are not surfaced.
#[derive(Clone, Debug)]
pub struct Inbound {
    /// Channel the message was published on.
    pub channel: Channel,
    /// Serialized packet, exactly as published.
    pub payload: Bytes,
}

/// Receiving side of a transport's inbound stream.
pub type Inbox = mpsc::UnboundedReceiver<Inbound>;

/// Sending side of a transport's inbound stream, held by the transport.
pub type InboxSender = mpsc::UnboundedSender<Inbound>;

/// Shared base state for transport implementations.
///
/// Each concrete transport embeds this as a field named `base`:
///
/// ```ignore
/// struct RedisTransport {
///     base: TransportBase,
///     // ... redis specific fields
/// }
///
/// impl Transport for RedisTransport {
///     fn base(&self) -> &TransportBase { &self.base }
/// }
/// ```
pub struct TransportBase {
    /// Identifier of this transport instance, used for logging.
    pub transport_id: String,
    inbox: Mutex<Option<Inbox>>,
}

impl TransportBase {
    /// Create the base state and the sender feeding its inbox.
    pub fn new(transport_id: impl Into<String>) -> (Self, InboxSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let base = Self {
            transport_id: transport_id.into(),
            inbox: Mutex::new(Some(rx)),
        };
        (base, tx)
    }

    /// Hand out the inbound stream. Only the first caller receives it.
    pub fn take_inbox(&self) -> Option<Inbox> {
        lock_ignore_poison(&self.inbox).take()
    }
}

/// Resolved settings passed to transport factory functions.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Broker URI (e.g. `"redis://localhost:6379"`, `"memory://"`).
    pub uri: String,
    /// Node ID of the owning process; becomes the transport id.
    pub node_id: String,
    /// Optional transport type override (`"memory"`, `"redis"`).
    pub transport_type: Option<String>,
}

/// Transport abstraction.
///
/// Implementations must ensure that:
/// - Once `subscribe()` returns successfully, messages published *after* that
///   point on the channel are delivered to the inbox.
/// - Once `unsubscribe()` returns, no further messages for that channel are
///   delivered (messages already queued in the inbox may still arrive; the
///   connection filters those).
/// - The inbox is fed from a single place so that messages reach the
///   consumer serially.
///
/// The in-memory transport serves as the reference implementation of these
/// semantics.
#[async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Returns a reference to the shared base state.
    fn base(&self) -> &TransportBase;

    /// Returns the transport_id of the transport.
    fn transport_id(&self) -> &str {
        &self.base().transport_id
    }

    /// Take the inbound message stream. Returns `None` once claimed.
    fn take_inbox(&self) -> Option<Inbox> {
        self.base().take_inbox()
    }

    /// Publish a payload to the given channel.
    async fn publish(&self, channel: &Channel, payload: Bytes) -> Result<()>;

    /// Start receiving messages published on `channel`.
    async fn subscribe(&self, channel: &Channel) -> Result<()>;

    /// Stop receiving messages published on `channel`.
    async fn unsubscribe(&self, channel: &Channel) -> Result<()>;

    /// Close the transport and release any associated resources.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
///
/// `.clone()` only increments a reference count; the connection that claims
/// the inbox is the logical owner.
pub type TransportPtr = Arc<dyn Transport>;
