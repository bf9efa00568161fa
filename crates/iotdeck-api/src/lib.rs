//! Outbound HTTP transport for `iotdeck`.
//!
//! - **[`DeviceClient`]**: sends commands to a device's base address and
//!   posts rule webhooks, classifying each outcome into an [`Error`] variant
//!   the dispatcher can act on.
//! - **[`RequestSigner`]**: base64 HMAC-SHA256 over
//!   `method + endpoint + body + timestamp`, sent as `X-Signature` alongside
//!   `X-Timestamp`.
//! - **[`TransportConfig`]**: TLS and timeout settings shared by all clients.

pub mod client;
pub mod error;
pub mod signing;
pub mod transport;

pub use client::{DeviceClient, DeviceRequest, DeviceResponse, HttpMethod};
pub use error::Error;
pub use signing::{RequestSigner, SIGNATURE_HEADER, TIMESTAMP_HEADER, canonical_message};
pub use transport::{TlsMode, TransportConfig};
