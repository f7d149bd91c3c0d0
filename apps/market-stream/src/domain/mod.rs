//! Domain Layer - Core streaming types and business logic.
//!
//! This layer contains the core domain types for per-symbol price
//! streaming. Nothing here performs I/O.

/// Price cache holding the last known price per symbol.
pub mod pricing;

/// Consumer events and connection lifecycle states.
pub mod streaming;

/// Per-connection subscriber registry.
pub mod subscription;

/// Symbol key normalization.
pub mod symbol;
