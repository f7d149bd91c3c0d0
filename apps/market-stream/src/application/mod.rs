//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the connection pool service and the port
//! interfaces that connect it to consumers and upstream transports.

/// Port interfaces for consumers, upstream transports and lifecycle sinks.
pub mod ports;

/// The connection pool service.
pub mod services;
