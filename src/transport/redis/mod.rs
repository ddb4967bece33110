//! Redis protocol transports.
//!
//! - redis - Redis Pub/Sub via the `redis` crate (redis.rs)

#[cfg(feature = "transport_redis")]
#[allow(clippy::module_inception)]
mod redis;

#[cfg(feature = "transport_redis")]
pub use self::redis::create_transport as create_redis_transport;

#[cfg(not(feature = "transport_redis"))]
pub async fn create_redis_transport(
    _config: crate::TransportConfig,
) -> crate::Result<crate::TransportPtr> {
    Err(crate::Error::Transport(
        "transport_redis feature is not enabled".into(),
    ))
}
