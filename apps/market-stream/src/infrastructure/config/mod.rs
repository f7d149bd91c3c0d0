//! Configuration Module
//!
//! Configuration loading for the market stream service.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_BASE_URL, PoolSettings, ServerSettings, StreamConfig, UpstreamSettings,
};
