//! Request/response engine over a pub/sub transport.
//!
//! A [`Connection`] owns one transport, the table of requests awaiting a
//! reply, the set of channels it listens on and the task that dispatches
//! inbound messages. Instances are created with
//! [`ConnectionBuilder`](crate::ConnectionBuilder).
//!
//! Routing uses a shared inbox: every request is stamped with a fresh
//! correlation id and with the connection's inbox channel as `reply_to`.
//! Responders echo the id and publish the reply to that channel.

mod dispatch;
mod pending;

pub use pending::{Completion, PendingInfo};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::{
    // ---
    lock_ignore_poison,
    log_debug,
    log_warn,
    Channel,
    CorrelationId,
    Error,
    HandlerRegistry,
    Inbox,
    Outcome,
    Packet,
    PacketBody,
    Result,
    SerializerPtr,
    TransportPtr,
};

use pending::PendingTable;

/// Request/response connection over a pub/sub transport.
///
/// Cheap to clone; clones share the same transport, pending table and
/// dispatch task. The dispatch task stops on [`close`](Self::close) or when
/// the last clone is dropped.
pub struct Connection<B: PacketBody> {
    inner: Arc<Inner<B>>,
}

pub(crate) struct Inner<B: PacketBody> {
    transport: TransportPtr,
    serializer: SerializerPtr<B>,
    handlers: Arc<HandlerRegistry<B>>,
    node_id: String,
    inbox: Channel,
    publish_timeout: Duration,

    pending: Arc<PendingTable<B>>,
    subscriptions: Mutex<HashSet<Channel>>,
    closed: AtomicBool,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

/// Resolved settings handed over by the builder.
pub(crate) struct ConnectionParts<B: PacketBody> {
    pub transport: TransportPtr,
    pub inbox_rx: Inbox,
    pub node_id: String,
    pub inbox: Channel,
    pub serializer: SerializerPtr<B>,
    pub handlers: Arc<HandlerRegistry<B>>,
    pub publish_timeout: Duration,
}

impl<B: PacketBody> Connection<B> {
    // ---

    /// Create the connection and start its dispatch task.
    ///
    /// Subscriptions are made by the builder afterwards.
    pub(crate) fn start(parts: ConnectionParts<B>) -> Self {
        // ---
        let inner = Arc::new(Inner {
            transport: parts.transport,
            serializer: parts.serializer,
            handlers: parts.handlers,
            node_id: parts.node_id,
            inbox: parts.inbox,
            publish_timeout: parts.publish_timeout,
            pending: Arc::new(PendingTable::new()),
            subscriptions: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
            dispatch_task: Mutex::new(None),
        });

        let task = tokio::spawn(dispatch::run(Arc::downgrade(&inner), parts.inbox_rx));
        *lock_ignore_poison(&inner.dispatch_task) = Some(task);

        log_debug!("{}: connection started, inbox {}", inner.node_id, inner.inbox);
        Self { inner }
    }

    /// Logical node id of this connection.
    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    /// Channel replies to this connection's requests are published on.
    pub fn inbox(&self) -> &Channel {
        &self.inner.inbox
    }

    /// Registry consulted for inbound requests.
    pub fn handlers(&self) -> &Arc<HandlerRegistry<B>> {
        &self.inner.handlers
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Publish a packet without expecting a reply.
    ///
    /// Any routing data on the packet is stripped. `timeout` bounds the
    /// transport call; expiry is reported as a `Timeout` violation.
    pub async fn publish(&self, packet: impl Into<Packet<B>>, timeout: Duration) -> Outcome<()> {
        // ---
        if self.inner.is_closed() {
            return Outcome::violation(Error::Closed);
        }

        let packet = packet.into().into_unrouted();
        let channel = Channel::from(packet.channel_name());

        self.inner.transmit(&channel, &packet, timeout).await.into()
    }

    /// Publish a request and invoke `on_complete` exactly once when the
    /// exchange finishes.
    ///
    /// `timeout` bounds the wait for the reply; the transmission itself is
    /// bounded by the connection's publish timeout. The returned outcome
    /// reflects only the transmission. When transmission fails the request
    /// is forgotten and `on_complete` is never invoked. See [`Completion`]
    /// for the values `on_complete` receives.
    pub async fn publish_awaiting_response<F>(
        &self,
        packet: impl Into<Packet<B>>,
        timeout: Duration,
        on_complete: F,
    ) -> Outcome<()>
    where
        F: FnOnce(Outcome<Option<Packet<B>>>) + Send + 'static,
    {
        // ---
        let packet = packet.into();
        let channel = Channel::from(packet.channel_name());

        // Registering before transmitting means a fast reply always finds
        // its entry.
        let (id, deadline) = match self
            .inner
            .pending
            .register(channel.clone(), timeout, Box::new(on_complete))
        {
            Ok(registered) => registered,
            Err(err) => return Outcome::violation(err),
        };

        let packet = packet.into_request(id.clone(), self.inner.inbox.clone());

        if let Err(err) = self
            .inner
            .transmit(&channel, &packet, self.inner.publish_timeout)
            .await
        {
            log_debug!("{}: request {id} not sent: {err}", self.inner.node_id);
            self.inner.pending.discard(&id);
            return Outcome::violation(err);
        }

        log_debug!("{}: request {id} sent on {channel}", self.inner.node_id);
        self.arm_timeout(id, deadline);
        Outcome::success(())
    }

    fn arm_timeout(&self, id: CorrelationId, deadline: Instant) {
        // ---
        let pending = Arc::clone(&self.inner.pending);
        let timer_id = id.clone();

        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            pending.expire(&timer_id);
        });

        if !self.inner.pending.arm(&id, timer.abort_handle()) {
            timer.abort();
        }
    }

    /// Publish a request and wait for its reply.
    ///
    /// Returns `Ok(None)` when no reply arrived within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns the transmission error, or [`Error::Cancelled`] when the
    /// connection closed while the request was pending.
    pub async fn request(
        &self,
        packet: impl Into<Packet<B>>,
        timeout: Duration,
    ) -> Result<Option<Packet<B>>> {
        // ---
        let (tx, rx) = oneshot::channel();

        self.publish_awaiting_response(packet, timeout, move |outcome| {
            let _ = tx.send(outcome);
        })
        .await
        .into_result()?;

        rx.await.map_err(|_| Error::Cancelled)?.into_result()
    }

    /// Reply to a previously received request.
    ///
    /// For handlers that hand work off instead of answering from the
    /// dispatch task. The reply goes to the request's `reply_to`, or to the
    /// body's own channel when the request had none.
    pub async fn respond(&self, request: &Packet<B>, body: B) -> Outcome<()> {
        // ---
        if self.inner.is_closed() {
            return Outcome::violation(Error::Closed);
        }

        let (channel, reply) = request.reply_with(body);
        self.inner
            .transmit(&channel, &reply, self.inner.publish_timeout)
            .await
            .into()
    }

    /// Register the handler for one packet kind, replacing any previous one.
    ///
    /// Affects every connection sharing this connection's registry.
    pub fn register_handler<F>(&self, kind: B::Kind, handler: F)
    where
        F: Fn(&Packet<B>) -> Option<B> + Send + Sync + 'static,
    {
        if self.inner.handlers.register(kind, handler).is_some() {
            log_debug!("{}: replaced handler for {kind:?}", self.inner.node_id);
        }
    }

    /// Start listening on `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after close, or the transport error; the
    /// channel is then not part of the subscription set.
    pub async fn subscribe(&self, channel: impl Into<Channel>) -> Result<()> {
        // ---
        self.inner.ensure_open()?;
        let channel = channel.into();

        let inserted = lock_ignore_poison(&self.inner.subscriptions).insert(channel.clone());

        if let Err(err) = self.inner.transport.subscribe(&channel).await {
            if inserted {
                lock_ignore_poison(&self.inner.subscriptions).remove(&channel);
            }
            return Err(err);
        }

        log_debug!("{}: subscribed to {channel}", self.inner.node_id);
        Ok(())
    }

    /// Stop listening on `channel`. Messages from it are dropped from this
    /// point on, even before the transport confirms.
    pub async fn unsubscribe(&self, channel: impl Into<Channel>) -> Result<()> {
        // ---
        self.inner.ensure_open()?;
        let channel = channel.into();

        lock_ignore_poison(&self.inner.subscriptions).remove(&channel);
        self.inner.transport.unsubscribe(&channel).await?;

        log_debug!("{}: unsubscribed from {channel}", self.inner.node_id);
        Ok(())
    }

    /// Channels currently listened on, sorted.
    pub fn subscriptions(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = lock_ignore_poison(&self.inner.subscriptions)
            .iter()
            .cloned()
            .collect();
        channels.sort();
        channels
    }

    /// Copy of the requests currently awaiting a reply.
    pub fn pending_requests_snapshot(&self) -> HashMap<CorrelationId, PendingInfo> {
        self.inner.pending.snapshot()
    }

    /// Tear the connection down.
    ///
    /// Unsubscribes every channel, cancels pending requests, closes the
    /// transport and stops the dispatch task. Every step runs; the first
    /// failure is returned. Closing twice is a no-op.
    pub async fn close(&self) -> Outcome<()> {
        // ---
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Outcome::success(());
        }

        log_debug!("{}: closing connection", self.inner.node_id);
        let mut first_failure: Option<Error> = None;

        let channels: Vec<Channel> = lock_ignore_poison(&self.inner.subscriptions)
            .drain()
            .collect();
        for channel in channels {
            if let Err(err) = self.inner.transport.unsubscribe(&channel).await {
                log_warn!("{}: unsubscribe {channel} on close failed: {err}", self.inner.node_id);
                if first_failure.is_none() {
                    first_failure = Some(err);
                }
            }
        }

        let cancelled = self.inner.pending.cancel_all().await;
        log_debug!(
            "{}: cancelled {cancelled} pending requests",
            self.inner.node_id
        );

        if let Err(err) = self.inner.transport.close().await {
            log_warn!("{}: transport close failed: {err}", self.inner.node_id);
            if first_failure.is_none() {
                first_failure = Some(err);
            }
        }

        if let Some(task) = lock_ignore_poison(&self.inner.dispatch_task).take() {
            task.abort();
        }

        match first_failure {
            Some(err) => Outcome::violation(err),
            None => Outcome::success(()),
        }
    }
}

impl<B: PacketBody> Clone for Connection<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: PacketBody> Inner<B> {
    // ---

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn is_subscribed(&self, channel: &Channel) -> bool {
        lock_ignore_poison(&self.subscriptions).contains(channel)
    }

    /// Serialize and publish one packet, bounded by `timeout`.
    async fn transmit(&self, channel: &Channel, packet: &Packet<B>, timeout: Duration) -> Result<()> {
        // ---
        let text = self.serializer.serialize(packet)?;
        let payload = Bytes::from(text);

        match tokio::time::timeout(timeout, self.transport.publish(channel, payload)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }
}

impl<B: PacketBody> Drop for Inner<B> {
    fn drop(&mut self) {
        if let Some(task) = lock_ignore_poison(&self.dispatch_task).take() {
            task.abort();
        }
    }
}
