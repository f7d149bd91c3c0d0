//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ConnectionPool`: one upstream connection per symbol key, shared by
//!   every subscriber of that key
//! - `ReconnectPolicy`: bounded exponential backoff after unexpected drops

mod connection;
pub mod pool;
pub mod reconnect;

pub use pool::{
    ConnectionPool, ConnectionStats, PoolConfig, PoolStats, PriceStream, SubscribeError,
    Subscription, Unsubscribe,
};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
