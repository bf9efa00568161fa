use thiserror::Error;

/// Top-level error type for the `iotdeck-api` crate.
///
/// Covers every failure mode of an outbound call to a device or webhook:
/// transport, signature rejection, device-side errors and timeouts.
/// `iotdeck-core` maps these into dispatch outcomes.
#[derive(Debug, Error)]
pub enum Error {
    // ── Device responses ────────────────────────────────────────────
    /// The device refused the request signature (HTTP 401 / 403).
    #[error("Signature rejected by device (HTTP {status})")]
    AuthRejected { status: u16 },

    /// The device answered with a non-success status.
    #[error("Device returned HTTP {status}: {message}")]
    Device { status: u16, message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// The device could not be reached (connection refused, DNS failure, ...).
    #[error("Device unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    /// HTTP transport error that is neither a connect failure nor a timeout.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// TLS configuration or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Request construction ────────────────────────────────────────
    /// A caller-supplied header name or value is not valid HTTP.
    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    /// Unsupported HTTP method string.
    #[error("Unsupported HTTP method: {0}")]
    InvalidMethod(String),

    /// Payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if this error indicates the signature was refused.
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, Self::AuthRejected { .. })
    }

    /// Returns `true` if the request never reached the device.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::Unreachable { .. } => true,
            Self::Transport(e) => e.is_connect(),
            _ => false,
        }
    }

    /// Returns `true` if the device did not answer before the deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Transport(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    ///
    /// Request-construction errors will fail identically on every attempt.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Self::InvalidUrl(_)
                | Self::InvalidHeader { .. }
                | Self::InvalidMethod(_)
                | Self::Serialization(_)
                | Self::Tls(_)
        )
    }

    /// HTTP status code returned by the device, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::AuthRejected { status } | Self::Device { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
