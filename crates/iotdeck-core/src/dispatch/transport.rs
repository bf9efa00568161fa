// ── Device transport seam ──
//
// The dispatcher and the rule evaluator only talk to devices through
// `DeviceTransport`. `HttpTransport` is the production implementation
// over `iotdeck_api::DeviceClient`; tests plug in their own.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use iotdeck_api::{DeviceClient, DeviceRequest};

use crate::model::{AttemptError, AttemptErrorKind, Command, Device};

/// A successful delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub status: u16,
    pub latency: Duration,
    pub body: Option<serde_json::Value>,
}

#[async_trait]
pub trait DeviceTransport: Send + Sync + 'static {
    /// Deliver one attempt of `command` to `device`.
    async fn deliver(
        &self,
        device: &Device,
        command: &Command,
        timeout: Duration,
    ) -> Result<Delivery, AttemptError>;

    /// POST a JSON document to a rule webhook, returning the HTTP status.
    async fn post_webhook(
        &self,
        url: &Url,
        document: &serde_json::Value,
        timeout: Duration,
    ) -> Result<u16, AttemptError>;
}

/// Signed HTTP delivery to the device's base address.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: DeviceClient,
}

impl HttpTransport {
    pub fn new(client: DeviceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeviceTransport for HttpTransport {
    async fn deliver(
        &self,
        device: &Device,
        command: &Command,
        timeout: Duration,
    ) -> Result<Delivery, AttemptError> {
        let Some(base) = device.address.as_ref() else {
            return Err(AttemptError::new(
                AttemptErrorKind::DeviceUnreachable,
                format!("device {} has no address", device.id),
            ));
        };

        let request = DeviceRequest {
            method: command.method,
            endpoint: &command.endpoint,
            payload: command.payload.as_ref(),
            headers: &command.headers,
            timeout,
        };
        debug!(command_id = %command.id, device_id = %device.id, %base, "delivering command");

        let response = self
            .client
            .send(base, &request)
            .await
            .map_err(|e| classify(&e))?;
        Ok(Delivery {
            status: response.status,
            latency: response.latency,
            body: response.body,
        })
    }

    async fn post_webhook(
        &self,
        url: &Url,
        document: &serde_json::Value,
        timeout: Duration,
    ) -> Result<u16, AttemptError> {
        self.client
            .post_webhook(url, document, timeout)
            .await
            .map_err(|e| classify(&e))
    }
}

/// Map a transport error onto the attempt taxonomy.
pub(crate) fn classify(err: &iotdeck_api::Error) -> AttemptError {
    let kind = if err.is_auth_rejected() {
        AttemptErrorKind::AuthRejected
    } else if err.is_timeout() {
        AttemptErrorKind::Timeout
    } else if err.is_unreachable() {
        AttemptErrorKind::DeviceUnreachable
    } else if err.status().is_some() {
        AttemptErrorKind::DeviceError
    } else if !err.is_transient() {
        AttemptErrorKind::InvalidRequest
    } else {
        AttemptErrorKind::Transport
    };
    AttemptError::new(kind, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_api_errors() {
        let cases = [
            (
                iotdeck_api::Error::AuthRejected { status: 401 },
                AttemptErrorKind::AuthRejected,
            ),
            (
                iotdeck_api::Error::Timeout { timeout_ms: 10 },
                AttemptErrorKind::Timeout,
            ),
            (
                iotdeck_api::Error::Unreachable {
                    url: "http://x".into(),
                    reason: "refused".into(),
                },
                AttemptErrorKind::DeviceUnreachable,
            ),
            (
                iotdeck_api::Error::Device {
                    status: 500,
                    message: "jam".into(),
                },
                AttemptErrorKind::DeviceError,
            ),
            (
                iotdeck_api::Error::InvalidMethod("BREW".into()),
                AttemptErrorKind::InvalidRequest,
            ),
            (
                iotdeck_api::Error::InvalidHeader {
                    name: "X Bad".into(),
                    reason: "space in name".into(),
                },
                AttemptErrorKind::InvalidRequest,
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(classify(&err).kind, kind, "{err}");
        }
    }
}
