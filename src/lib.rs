//! Request/response semantics over broadcast pub/sub transports
//!
//! This library turns a fire-and-forget publish/subscribe transport into an
//! addressable request/response protocol. It handles correlation ID
//! generation, reply matching, timeouts, server-side dispatch of inbound
//! requests to registered handlers, and orderly connection teardown.
//!
//! ```
//! use packet_rpc::{ConnectionBuilder, MemoryHub, Packet, PacketBody, TransportBuilder};
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! enum Greeting {
//!     Hello(String),
//! }
//!
//! impl PacketBody for Greeting {
//!     type Kind = ();
//!     fn kind(&self) {}
//!     fn channel_name(&self) -> &str {
//!         "greetings"
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> packet_rpc::Result<()> {
//! let hub = MemoryHub::new();
//! let transport = |node: &str| {
//!     TransportBuilder::new()
//!         .uri("memory://")
//!         .node_id(node)
//!         .memory_hub(hub.clone())
//!         .build()
//! };
//!
//! let _server = ConnectionBuilder::<Greeting>::new(transport("server").await?)
//!     .handler((), |request: &Packet<Greeting>| {
//!         let Greeting::Hello(name) = request.body();
//!         Some(Greeting::Hello(format!("hello, {name}")))
//!     })
//!     .subscribe("greetings")
//!     .build()
//!     .await?;
//!
//! let client = ConnectionBuilder::<Greeting>::new(transport("client").await?)
//!     .build()
//!     .await?;
//!
//! let reply = client
//!     .request(Greeting::Hello("world".into()), Duration::from_secs(1))
//!     .await?
//!     .expect("server replied");
//! let Greeting::Hello(text) = reply.into_body();
//! assert_eq!(text, "hello, world");
//! # Ok(())
//! # }
//! ```

// Import all sub modules once...
mod connection;
mod connection_builder;
mod domain;
mod transport;
mod transport_builder;

mod correlation;
mod error;
mod handlers;
mod macros;
mod outcome;
mod packet;
mod serializer;
mod sync;

// Crate-internal helpers
#[allow(unused_imports)]
pub(crate) use macros::{log_debug, log_error, log_info, log_warn};
pub(crate) use sync::{lock_ignore_poison, read_ignore_poison, write_ignore_poison};

// Re-export main types
pub use connection::{Completion, Connection, PendingInfo};
pub use connection_builder::ConnectionBuilder;
pub use transport_builder::TransportBuilder;

pub use correlation::CorrelationId;
pub use error::{Error, Result};
pub use handlers::{HandlerRegistry, PacketHandler};
pub use packet::{Packet, PacketBody};
pub use serializer::{JsonSerializer, PacketSerializer, SerializerPtr};

pub use outcome::{
    //
    HandlerKey,
    Outcome,
    OutcomeBuilder,
    UnresolvedPolicy,
    Violation,
    ViolationHandler,
    ViolationKind,
    ViolationRegistry,
};

pub use transport::{
    //
    create_memory_transport,
    create_memory_transport_with_hub,
    create_redis_transport,
    MemoryHub,
};

// --- public re-exports
pub use domain::{
    //
    Channel,
    Inbound,
    Inbox,
    InboxSender,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
};
