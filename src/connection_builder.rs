//! Connection builder.
//!
//! Provides a fluent builder API for configuring [`Connection`] instances
//! on top of an already created transport.

use crate::connection::ConnectionParts;
use crate::{
    // ---
    log_debug,
    log_warn,
    Channel,
    Connection,
    Error,
    HandlerRegistry,
    JsonSerializer,
    Packet,
    PacketBody,
    PacketHandler,
    PacketSerializer,
    Result,
    SerializerPtr,
    TransportPtr,
};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating connections.
///
/// # Examples
///
/// ```no_run
/// use packet_rpc::{ConnectionBuilder, Packet, PacketBody, TransportBuilder};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// enum Ping {
///     Ping,
///     Pong,
/// }
///
/// impl PacketBody for Ping {
///     type Kind = bool;
///     fn kind(&self) -> bool {
///         matches!(self, Ping::Ping)
///     }
///     fn channel_name(&self) -> &str {
///         "ping"
///     }
/// }
///
/// # async fn example() -> packet_rpc::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("redis://localhost:6379")
///     .node_id("ponger")
///     .build()
///     .await?;
///
/// let connection = ConnectionBuilder::<Ping>::new(transport)
///     .handler(true, |_: &Packet<Ping>| Some(Ping::Pong))
///     .subscribe("ping")
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionBuilder<B: PacketBody> {
    // ---
    transport: TransportPtr,
    node_id: Option<String>,
    inbox_channel: Option<String>,
    serializer: Option<SerializerPtr<B>>,
    handlers: Option<Arc<HandlerRegistry<B>>>,
    seeded: Vec<(B::Kind, PacketHandler<B>)>,
    channels: Vec<Channel>,

    // Bound for request and reply publishes (default: 5s)
    publish_timeout: Option<Duration>,
}

impl<B: PacketBody> ConnectionBuilder<B> {
    /// Create a new connection builder.
    ///
    /// The connection's `node_id` defaults to `transport.transport_id()`.
    pub fn new(transport: TransportPtr) -> Self {
        // ---
        Self {
            transport,
            node_id: None,
            inbox_channel: None,
            serializer: None,
            handlers: None,
            seeded: Vec::new(),
            channels: Vec::new(),
            publish_timeout: None,
        }
    }

    /// Override the connection's logical node ID.
    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    /// Set the channel replies are received on.
    ///
    /// Default: `responses/{node_id}`.
    pub fn inbox_channel(mut self, channel: impl Into<String>) -> Self {
        self.inbox_channel = Some(channel.into());
        self
    }

    /// Set the packet serializer.
    ///
    /// Default: [`JsonSerializer`].
    pub fn serializer(mut self, serializer: impl PacketSerializer<B> + 'static) -> Self {
        self.serializer = Some(Arc::new(serializer));
        self
    }

    /// Use an existing handler registry, possibly shared with other
    /// connections.
    pub fn handlers(mut self, handlers: Arc<HandlerRegistry<B>>) -> Self {
        self.handlers = Some(handlers);
        self
    }

    /// Register a handler at build time.
    pub fn handler<F>(mut self, kind: B::Kind, handler: F) -> Self
    where
        F: Fn(&Packet<B>) -> Option<B> + Send + Sync + 'static,
    {
        self.seeded.push((kind, Arc::new(handler)));
        self
    }

    /// Subscribe to `channel` at build time.
    pub fn subscribe(mut self, channel: impl Into<Channel>) -> Self {
        self.channels.push(channel.into());
        self
    }

    /// Set the bound for publishing requests and handler replies.
    ///
    /// Default: 5s.
    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = Some(timeout);
        self
    }

    /// Build the connection (consumes self).
    ///
    /// Claims the transport inbox, starts the dispatch task and subscribes
    /// the inbox and every requested channel.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `node_id` resolves to an empty string
    /// - The transport inbox was already claimed by another connection
    /// - A subscription fails; the connection is closed again before returning
    pub async fn build(self) -> Result<Connection<B>> {
        // ---
        let node_id = self
            .node_id
            .unwrap_or_else(|| self.transport.transport_id().to_string());
        if node_id.is_empty() {
            return Err(Error::MissingConfig("node_id".into()));
        }

        let inbox = Channel::from(
            self.inbox_channel
                .unwrap_or_else(|| format!("responses/{node_id}")),
        );

        let inbox_rx = self.transport.take_inbox().ok_or_else(|| {
            Error::ConfigConflict(format!(
                "transport {} is already bound to a connection",
                self.transport.transport_id()
            ))
        })?;

        let handlers = self.handlers.unwrap_or_default();
        for (kind, handler) in self.seeded {
            handlers.register(kind, move |packet| handler(packet));
        }

        let serializer = self
            .serializer
            .unwrap_or_else(|| Arc::new(JsonSerializer::<B>::new()));

        let connection = Connection::start(ConnectionParts {
            transport: self.transport,
            inbox_rx,
            node_id,
            inbox: inbox.clone(),
            serializer,
            handlers,
            publish_timeout: self.publish_timeout.unwrap_or(Duration::from_secs(5)),
        });

        let channels = std::iter::once(inbox).chain(self.channels);
        for channel in channels {
            if let Err(err) = connection.subscribe(channel).await {
                log_debug!("{}: build failed: {err}", connection.node_id());
                if let Err(_cleanup) = connection.close().await.into_result() {
                    log_warn!(
                        "{}: close after failed build also failed: {_cleanup}",
                        connection.node_id()
                    );
                }
                return Err(err);
            }
        }

        Ok(connection)
    }
}
