//! Redis Pub/Sub transport implementation using `redis`.
//!
//! ## Concurrency model
//!
//! - A single background **actor task** owns both Redis connections.
//! - The actor is responsible for:
//!   - publishing outbound payloads via `publish_conn`,
//!   - registering and dropping broker subscriptions via `pubsub_sink`,
//!   - polling `pubsub_stream` for incoming messages and forwarding them to
//!     the transport inbox,
//!   - clean shutdown of both connections.
//! - All interaction with the Redis client is serialized through this actor;
//!   no other task ever touches the connections directly.
//!
//! ## Two connections required
//!
//! Redis mandates a dedicated connection for Pub/Sub — a connection in
//! Pub/Sub mode cannot issue regular commands like `PUBLISH`:
//!
//! - `publish_conn` — `MultiplexedConnection`, used only for `PUBLISH`
//! - `pubsub_sink` / `pubsub_stream` — split from `aio::PubSub`, used for
//!   `SUBSCRIBE`/`UNSUBSCRIBE` and receiving messages respectively
//!
//! `PubSubSink::subscribe()` resolves only after the broker confirms the
//! subscription, so `Transport::subscribe` returning means the channel is
//! live. Because the actor handles one command at a time, a subscribe in
//! flight simply delays the next command.
//!
//! ## Message delivery semantics
//!
//! Every data message is forwarded, with its channel name, to the single
//! inbox. Delivery is best-effort and non-durable; there is no replay.

use futures_util::StreamExt;

use redis::aio::{MultiplexedConnection, PubSubSink, PubSubStream};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::{
    //
    log_debug,
    log_error,
    log_info,
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

use std::sync::Arc;

//
// Actor commands
//

enum Cmd {
    //
    Publish {
        channel: Channel,
        payload: Bytes,
        resp: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        channel: Channel,
        resp: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        channel: Channel,
        resp: oneshot::Sender<Result<()>>,
    },
    Close {
        resp: oneshot::Sender<Result<()>>,
    },
}

enum ActorStep {
    //
    Continue,
    Stop,
}

impl Cmd {
    // ---

    /// Dispatches an actor command to the correct handler on the actor.
    async fn handle(self, actor: &mut RedisActor) -> ActorStep {
        // ---

        match self {
            Cmd::Publish {
                channel,
                payload,
                resp,
            } => {
                let _ = resp.send(actor.handle_publish(&channel, &payload).await);
                ActorStep::Continue
            }
            Cmd::Subscribe { channel, resp } => {
                let _ = resp.send(actor.handle_subscribe(&channel).await);
                ActorStep::Continue
            }
            Cmd::Unsubscribe { channel, resp } => {
                let _ = resp.send(actor.handle_unsubscribe(&channel).await);
                ActorStep::Continue
            }
            Cmd::Close { resp } => {
                log_debug!("{}: disconnecting redis client", actor.transport_id);
                let _ = resp.send(Ok(()));
                ActorStep::Stop
            }
        }
    }
}

/// Redis Pub/Sub implementation of the `Transport` trait.
struct RedisTransport {
    // ---
    base: TransportBase,
    cmd_tx: mpsc::Sender<Cmd>,
}

struct RedisActor {
    // ---
    transport_id: String, // for logging only
    publish_conn: MultiplexedConnection,
    pubsub_sink: PubSubSink,
    pubsub_stream: PubSubStream,
    cmd_rx: mpsc::Receiver<Cmd>,
    inbox_tx: InboxSender,
}

impl RedisActor {
    // ---

    async fn run(mut self) {
        // ---
        let mut stream_open = true;

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if matches!(cmd.handle(&mut self).await, ActorStep::Stop) {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                maybe_msg = self.pubsub_stream.next(), if stream_open => {
                    match maybe_msg {
                        Some(msg) => self.handle_incoming(msg),
                        None => {
                            // Connection lost; keep serving commands so callers
                            // see transport errors instead of hanging.
                            log_error!("{}: pubsub stream ended", self.transport_id);
                            stream_open = false;
                        }
                    }
                }
            }
        }

        log_debug!("{}: redis actor stopped", self.transport_id);
    }

    /// Issues a Redis PUBLISH on the dedicated multiplexed connection.
    async fn handle_publish(&mut self, channel: &Channel, payload: &Bytes) -> Result<()> {
        // ---
        redis::cmd("PUBLISH")
            .arg(channel.as_str())
            .arg(payload.as_ref())
            .query_async::<i64>(&mut self.publish_conn)
            .await
            .map(|_| ())
            .map_err(|err| {
                let msg = format!(
                    "{}: publish failed for channel {channel}: {err}",
                    self.transport_id
                );
                log_error!("{msg}");
                Error::Transport(msg)
            })
    }

    /// Registers a broker subscription; returns once the broker confirmed it.
    async fn handle_subscribe(&mut self, channel: &Channel) -> Result<()> {
        // ---
        match self.pubsub_sink.subscribe(channel.as_str()).await {
            Ok(()) => {
                log_info!("{}: subscribed to channel {channel}", self.transport_id);
                Ok(())
            }
            Err(err) => {
                let msg = format!(
                    "{}: failed to subscribe to channel {channel}: {err}",
                    self.transport_id
                );
                log_error!("{msg}");
                Err(Error::Transport(msg))
            }
        }
    }

    async fn handle_unsubscribe(&mut self, channel: &Channel) -> Result<()> {
        // ---
        self.pubsub_sink
            .unsubscribe(channel.as_str())
            .await
            .map_err(|err| {
                let msg = format!(
                    "{}: failed to unsubscribe from channel {channel}: {err}",
                    self.transport_id
                );
                log_error!("{msg}");
                Error::Transport(msg)
            })
    }

    /// Forwards one Redis Pub/Sub message to the inbox.
    fn handle_incoming(&self, msg: redis::Msg) {
        // ---
        let channel = Channel::from(msg.get_channel_name());

        let payload: Vec<u8> = match msg.get_payload() {
            Ok(p) => p,
            Err(_err) => {
                log_debug!(
                    "{}: failed to read payload on channel {channel}: {_err}",
                    self.transport_id
                );
                return;
            }
        };

        let inbound = Inbound {
            channel,
            payload: Bytes::from(payload),
        };

        if self.inbox_tx.send(inbound).is_err() {
            log_debug!("{}: inbox closed, dropping message", self.transport_id);
        }
    }
} // RedisActor

impl RedisTransport {
    // ---

    /// Sends a command to the actor and waits for its answer.
    async fn call(&self, make: impl FnOnce(oneshot::Sender<Result<()>>) -> Cmd) -> Result<()> {
        // ---
        let (tx, rx) = oneshot::channel();

        self.cmd_tx.send(make(tx)).await.map_err(|e| {
            Error::Transport(format!("actor command channel closed:{e}"))
        })?;

        rx.await.map_err(|e| {
            Error::Transport(format!("actor responder channel read failed:{e}"))
        })?
    }
}

#[async_trait::async_trait]
impl Transport for RedisTransport {
    // ---

    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn publish(&self, channel: &Channel, payload: Bytes) -> Result<()> {
        let channel = channel.clone();
        self.call(|resp| Cmd::Publish {
            channel,
            payload,
            resp,
        })
        .await
    }

    async fn subscribe(&self, channel: &Channel) -> Result<()> {
        let channel = channel.clone();
        self.call(|resp| Cmd::Subscribe { channel, resp }).await
    }

    async fn unsubscribe(&self, channel: &Channel) -> Result<()> {
        let channel = channel.clone();
        self.call(|resp| Cmd::Unsubscribe { channel, resp }).await
    }

    async fn close(&self) -> Result<()> {
        // ---
        // A stopped actor means the transport is already closed.
        match self.call(|resp| Cmd::Close { resp }).await {
            Ok(()) | Err(Error::Transport(_)) => Ok(()),
            Err(other) => Err(other),
        }
    }
}

/// Creates a Redis Pub/Sub transport from the given configuration.
///
/// # Errors
///
/// Returns an error if:
/// - The broker URI is missing or cannot be parsed
/// - Connection to the Redis broker fails (both connections are eager)
pub async fn create_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    if config.uri.is_empty() {
        return Err(Error::MissingConfig("redis transport requires a uri".into()));
    }
    let uri = config.uri.as_str();

    let client = redis::Client::open(uri).map_err(|err| {
        let msg = format!("redis: failed to open client for URI {uri}: {err}");
        log_error!("{msg}");
        Error::Transport(msg)
    })?;

    let publish_conn = client
        .get_multiplexed_async_connection()
        .await
        .map_err(|err| {
            let msg = format!("redis: failed to connect publish connection to {uri}: {err}");
            log_error!("{msg}");
            Error::Transport(msg)
        })?;

    let (pubsub_sink, pubsub_stream) = client
        .get_async_pubsub()
        .await
        .map_err(|err| {
            let msg = format!("redis: failed to connect pubsub connection to {uri}: {err}");
            log_error!("{msg}");
            Error::Transport(msg)
        })?
        .split();

    log_info!("{}: connected to Redis broker at {uri}", config.node_id);

    let (base, inbox_tx) = TransportBase::new(config.node_id);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);

    let actor = RedisActor {
        transport_id: base.transport_id.clone(),
        publish_conn,
        pubsub_sink,
        pubsub_stream,
        cmd_rx,
        inbox_tx,
    };
    tokio::spawn(actor.run());

    Ok(Arc::new(RedisTransport { base, cmd_tx }))
}
