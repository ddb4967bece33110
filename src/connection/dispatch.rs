//! Inbound message dispatch.
//!
//! One task per connection drains the transport inbox serially. Each message
//! is filtered by channel, decoded, and then either completes a pending
//! request (replies) or is handed to the registered handler (everything
//! else).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Weak;

use super::Inner;
use crate::{log_debug, log_error, Error, Inbound, Inbox, Packet, PacketBody, Result};

/// Drain `inbox` until it ends or the connection is gone.
pub(super) async fn run<B: PacketBody>(inner: Weak<Inner<B>>, mut inbox: Inbox) {
    // ---
    while let Some(inbound) = inbox.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.dispatch(inbound).await;
    }

    log_debug!("dispatch loop stopped");
}

impl<B: PacketBody> Inner<B> {
    // ---

    async fn dispatch(&self, inbound: Inbound) {
        // ---
        if self.is_closed() {
            log_debug!("{}: closed, dropping message on {}", self.node_id, inbound.channel);
            return;
        }

        if !self.is_subscribed(&inbound.channel) {
            log_debug!(
                "{}: not subscribed to {}, dropping message",
                self.node_id,
                inbound.channel
            );
            return;
        }

        let packet = match self.decode(&inbound.payload) {
            Ok(packet) => packet,
            Err(_err) => {
                log_debug!(
                    "{}: undecodable message on {}: {_err}",
                    self.node_id,
                    inbound.channel
                );
                return;
            }
        };

        if packet.is_reply() {
            self.complete(packet);
        } else {
            self.serve(packet).await;
        }
    }

    fn decode(&self, payload: &[u8]) -> Result<Packet<B>> {
        let text =
            std::str::from_utf8(payload).map_err(|err| Error::InvalidPayload(err.to_string()))?;
        self.serializer.deserialize(text)
    }

    /// Hand a reply to the request waiting for it, if any.
    fn complete(&self, reply: Packet<B>) {
        // ---
        let Some(id) = reply.correlation_id().cloned() else {
            return;
        };

        if self.pending.complete(&id, reply) {
            log_debug!("{}: reply for {id}", self.node_id);
        } else {
            log_debug!("{}: no pending request for {id}, dropping reply", self.node_id);
        }
    }

    /// Run the handler for a request and publish its answer.
    async fn serve(&self, request: Packet<B>) {
        // ---
        let kind = request.kind();

        let Some(handler) = self.handlers.lookup(kind) else {
            log_debug!("{}: no handler for {kind:?}", self.node_id);
            return;
        };

        let body = match catch_unwind(AssertUnwindSafe(|| handler(&request))) {
            Ok(Some(body)) => body,
            Ok(None) => return,
            Err(_) => {
                log_error!("{}: handler for {kind:?} panicked", self.node_id);
                return;
            }
        };

        let (channel, reply) = request.reply_with(body);

        if let Err(_err) = self.transmit(&channel, &reply, self.publish_timeout).await {
            log_error!(
                "{}: failed to publish reply for {kind:?} to {channel}: {_err}",
                self.node_id
            );
        }
    }
}
