//! Rust SDK for realtime live-session interactions.
//!
//! The crate is organized by concern:
//! - `live`: session client multiplexing comment, like and counter streams
//!   over one lazily opened, authenticated connection.
//! - `token`: storage for the session credential used by the handshake.
//! - `services`: base URLs of the backend services.

/// Live-session client, routing, and transport seam.
pub mod live;
/// Backend service catalog.
pub mod services;
/// Session credential storage.
pub mod token;
