//! Transport implementations.
//!
//! This module provides concrete implementations of the domain-level
//! `Transport` trait, exposed only through constructor functions. Broker
//! transports are hidden behind feature flags; the memory transport is
//! always available.
//!
//! Domain code must not depend on transport-specific types.

mod memory;
mod redis;

pub use memory::{create_memory_transport, create_memory_transport_with_hub, MemoryHub};
pub use self::redis::create_redis_transport;
