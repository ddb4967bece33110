//! Packet model.
//!
//! Applications describe their messages as one body type (usually an enum)
//! implementing [`PacketBody`]. The body decides which channel each variant
//! travels on and exposes an explicit kind discriminant used for handler
//! dispatch. [`Packet`] wraps a body with the routing data owned by the
//! connection: the correlation id and the reply inbox.
//!
//! # Example
//!
//! ```
//! use packet_rpc::{Packet, PacketBody};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! #[serde(tag = "type")]
//! enum Chat {
//!     Ping,
//!     Say { text: String },
//! }
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum ChatKind {
//!     Ping,
//!     Say,
//! }
//!
//! impl PacketBody for Chat {
//!     type Kind = ChatKind;
//!
//!     fn kind(&self) -> ChatKind {
//!         match self {
//!             Chat::Ping => ChatKind::Ping,
//!             Chat::Say { .. } => ChatKind::Say,
//!         }
//!     }
//!
//!     fn channel_name(&self) -> &str {
//!         match self {
//!             Chat::Ping => "chat/ping",
//!             Chat::Say { .. } => "chat/say",
//!         }
//!     }
//! }
//!
//! let packet = Packet::new(Chat::Ping);
//! assert_eq!(packet.channel_name(), "chat/ping");
//! assert!(packet.correlation_id().is_none());
//! ```

use std::fmt::Debug;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Channel, CorrelationId};

/// Application-defined packet payload.
pub trait PacketBody: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Discriminant used to select a handler for inbound packets.
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    /// Kind of this packet.
    fn kind(&self) -> Self::Kind;

    /// Channel this packet is published on. Fixed per variant.
    fn channel_name(&self) -> &str;
}

/// Envelope around a [`PacketBody`] carrying connection-owned routing data.
///
/// Packets built by application code never carry a correlation id or reply
/// channel; both are stamped by the connection when a request is sent and
/// copied onto the reply by the responding side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet<B> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<CorrelationId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply_to: Option<Channel>,

    body: B,
}

impl<B: PacketBody> Packet<B> {
    /// Wrap a body for publishing.
    pub fn new(body: B) -> Self {
        Self {
            correlation_id: None,
            reply_to: None,
            body,
        }
    }

    /// The application payload.
    pub fn body(&self) -> &B {
        &self.body
    }

    /// Consume the packet, returning its payload.
    pub fn into_body(self) -> B {
        self.body
    }

    /// Kind of the wrapped body.
    pub fn kind(&self) -> B::Kind {
        self.body.kind()
    }

    /// Channel the wrapped body is published on.
    pub fn channel_name(&self) -> &str {
        self.body.channel_name()
    }

    /// Correlation id, present on requests and their replies.
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }

    /// Inbox the requester listens on, present only on requests.
    pub fn reply_to(&self) -> Option<&Channel> {
        self.reply_to.as_ref()
    }

    /// A packet carrying a correlation id but no reply channel answers an
    /// earlier request.
    pub fn is_reply(&self) -> bool {
        self.correlation_id.is_some() && self.reply_to.is_none()
    }

    /// Stamp routing data for request/response mode.
    pub(crate) fn into_request(self, correlation_id: CorrelationId, reply_to: Channel) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            reply_to: Some(reply_to),
            body: self.body,
        }
    }

    /// Drop any routing data so the packet travels as fire-and-forget.
    pub(crate) fn into_unrouted(self) -> Self {
        Self::new(self.body)
    }

    /// Build the reply to this packet and the channel it must be sent to.
    ///
    /// The reply echoes this packet's correlation id. It goes to this
    /// packet's reply inbox, or to the reply body's own channel when the
    /// request named none.
    pub(crate) fn reply_with(&self, body: B) -> (Channel, Packet<B>) {
        let channel = match &self.reply_to {
            Some(inbox) => inbox.clone(),
            None => Channel::from(body.channel_name()),
        };
        let reply = Packet {
            correlation_id: self.correlation_id.clone(),
            reply_to: None,
            body,
        };
        (channel, reply)
    }
}

impl<B: PacketBody> From<B> for Packet<B> {
    fn from(body: B) -> Self {
        Packet::new(body)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    // ---
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub(crate) enum Sample {
        Ping,
        Echo { payload: String },
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub(crate) enum SampleKind {
        Ping,
        Echo,
    }

    impl PacketBody for Sample {
        type Kind = SampleKind;

        fn kind(&self) -> SampleKind {
            match self {
                Sample::Ping => SampleKind::Ping,
                Sample::Echo { .. } => SampleKind::Echo,
            }
        }

        fn channel_name(&self) -> &str {
            match self {
                Sample::Ping => "ping",
                Sample::Echo { .. } => "echo",
            }
        }
    }

    #[test]
    fn test_new_packet_carries_no_routing() {
        // ---
        let packet = Packet::new(Sample::Ping);
        assert!(packet.correlation_id().is_none());
        assert!(packet.reply_to().is_none());
        assert!(!packet.is_reply());
        assert_eq!(packet.kind(), SampleKind::Ping);
        assert_eq!(packet.channel_name(), "ping");
    }

    #[test]
    fn test_reply_goes_to_inbox_with_same_id() {
        // ---
        let id = CorrelationId::generate();
        let request = Packet::new(Sample::Echo {
            payload: "x".into(),
        })
        .into_request(id.clone(), Channel::from("responses/a"));
        assert!(!request.is_reply());

        let (channel, reply) = request.reply_with(Sample::Echo {
            payload: "y".into(),
        });

        assert_eq!(channel.as_str(), "responses/a");
        assert_eq!(reply.correlation_id(), Some(&id));
        assert!(reply.reply_to().is_none());
        assert!(reply.is_reply());
    }

    #[test]
    fn test_reply_without_inbox_uses_body_channel() {
        // ---
        let request = Packet::new(Sample::Ping);
        let (channel, reply) = request.reply_with(Sample::Echo {
            payload: "pong".into(),
        });

        assert_eq!(channel.as_str(), "echo");
        assert!(reply.correlation_id().is_none());
    }

    #[test]
    fn test_unrouted_strips_routing() {
        // ---
        let packet = Packet::new(Sample::Ping)
            .into_request(CorrelationId::generate(), Channel::from("responses/a"))
            .into_unrouted();
        assert!(packet.correlation_id().is_none());
        assert!(packet.reply_to().is_none());
    }
}
