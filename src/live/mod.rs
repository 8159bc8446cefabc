//! Realtime live-session modules.
//!
//! - `client`: session facade with the typed comment, like and counter calls.
//! - `connection`: lazy single-flight ownership of the shared channel.
//! - `dispatch`: routed request/response and request/stream calls.
//! - `routing`: routing keys and composite metadata encoding.
//! - `transport`: traits implemented by the multiplexed transport.
//! - `model`: payload records exchanged with the service.

/// Session facade and options.
pub mod client;
/// Connection manager and handle.
pub mod connection;
/// Call dispatcher and subscriptions.
pub mod dispatch;
/// Client error taxonomy.
pub mod error;
/// Payload records.
pub mod model;
/// Routing keys and call metadata.
pub mod routing;
/// Transport seam.
pub mod transport;
