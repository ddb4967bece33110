//! Handler registry.
//!
//! Maps a packet kind to the function answering inbound packets of that
//! kind. A registry is an explicit value: build one at startup, seed it, and
//! pass it (as `Arc<HandlerRegistry<B>>`) to every connection that should
//! serve it.
//!
//! Registering a second handler for a kind replaces the first.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::{read_ignore_poison, write_ignore_poison, Packet, PacketBody};

/// Handler invoked on the connection's dispatch task.
///
/// Returns the body of the reply, or `None` when the packet needs no answer.
/// Handlers run inline with inbound dispatch and must return quickly; long
/// work should be handed off and answered later with
/// [`Connection::respond`](crate::Connection::respond).
pub type PacketHandler<B> = Arc<dyn Fn(&Packet<B>) -> Option<B> + Send + Sync>;

/// Registry of packet handlers keyed by packet kind.
pub struct HandlerRegistry<B: PacketBody> {
    handlers: RwLock<HashMap<B::Kind, PacketHandler<B>>>,
}

impl<B: PacketBody> HandlerRegistry<B> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Seed a handler at construction time.
    pub fn with_handler<F>(self, kind: B::Kind, handler: F) -> Self
    where
        F: Fn(&Packet<B>) -> Option<B> + Send + Sync + 'static,
    {
        self.register(kind, handler);
        self
    }

    /// Register `handler` for `kind`, returning the handler it replaced.
    pub fn register<F>(&self, kind: B::Kind, handler: F) -> Option<PacketHandler<B>>
    where
        F: Fn(&Packet<B>) -> Option<B> + Send + Sync + 'static,
    {
        write_ignore_poison(&self.handlers).insert(kind, Arc::new(handler))
    }

    /// Remove the handler for `kind`.
    pub fn unregister(&self, kind: B::Kind) -> Option<PacketHandler<B>> {
        write_ignore_poison(&self.handlers).remove(&kind)
    }

    /// Look up the handler for `kind`.
    ///
    /// The returned handle is detached from the registry lock, so it may be
    /// invoked while other threads register or unregister.
    pub fn lookup(&self, kind: B::Kind) -> Option<PacketHandler<B>> {
        read_ignore_poison(&self.handlers).get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        read_ignore_poison(&self.handlers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<B: PacketBody> Default for HandlerRegistry<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::packet::tests::{Sample, SampleKind};

    #[test]
    fn test_register_and_lookup() {
        // ---
        let registry = HandlerRegistry::<Sample>::new();
        assert!(registry.is_empty());
        assert!(registry.lookup(SampleKind::Ping).is_none());

        registry.register(SampleKind::Ping, |_| Some(Sample::Ping));
        assert_eq!(registry.len(), 1);

        let handler = registry.lookup(SampleKind::Ping).unwrap();
        assert_eq!(handler(&Packet::new(Sample::Ping)), Some(Sample::Ping));
        assert!(registry.lookup(SampleKind::Echo).is_none());
    }

    #[test]
    fn test_last_registration_wins() {
        // ---
        let registry = HandlerRegistry::<Sample>::new().with_handler(SampleKind::Echo, |_| None);

        let replaced = registry.register(SampleKind::Echo, |p| Some(p.body().clone()));
        assert!(replaced.is_some());
        assert_eq!(registry.len(), 1);

        let handler = registry.lookup(SampleKind::Echo).unwrap();
        let body = Sample::Echo {
            payload: "x".into(),
        };
        assert_eq!(handler(&Packet::new(body.clone())), Some(body));
    }

    #[test]
    fn test_unregister() {
        // ---
        let registry = HandlerRegistry::<Sample>::new().with_handler(SampleKind::Ping, |_| None);
        assert!(registry.unregister(SampleKind::Ping).is_some());
        assert!(registry.unregister(SampleKind::Ping).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_register_and_lookup() {
        // ---
        let registry = Arc::new(HandlerRegistry::<Sample>::new());

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if i % 2 == 0 {
                            registry.register(SampleKind::Ping, |_| Some(Sample::Ping));
                        } else if let Some(h) = registry.lookup(SampleKind::Ping) {
                            assert_eq!(h(&Packet::new(Sample::Ping)), Some(Sample::Ping));
                        }
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(registry.len(), 1);
    }
}
