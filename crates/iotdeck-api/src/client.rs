// Device HTTP client
//
// Wraps `reqwest::Client` with device URL construction, request signing,
// and status-code classification. The core dispatcher only ever sees a
// `DeviceResponse` or a classified `Error`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::signing::{RequestSigner, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::transport::TransportConfig;

/// Longest device error body kept in an [`Error::Device`] message.
const MAX_ERROR_BODY: usize = 512;

/// HTTP verbs a command may use.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One outbound call to a device.
#[derive(Debug, Clone)]
pub struct DeviceRequest<'a> {
    pub method: HttpMethod,
    /// Path relative to the device base address, starting with `/`.
    pub endpoint: &'a str,
    pub payload: Option<&'a serde_json::Value>,
    pub headers: &'a BTreeMap<String, String>,
    /// Deadline for this attempt.
    pub timeout: Duration,
}

/// Successful device answer.
#[derive(Debug, Clone)]
pub struct DeviceResponse {
    pub status: u16,
    /// Parsed JSON body, if the device returned one.
    pub body: Option<serde_json::Value>,
    pub latency: Duration,
}

/// Signed HTTP client for device commands and rule webhooks.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
    signer: RequestSigner,
}

impl DeviceClient {
    /// Create a client from a `TransportConfig`.
    pub fn new(transport: &TransportConfig, signer: RequestSigner) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            signer,
        })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, signer: RequestSigner) -> Self {
        Self { http, signer }
    }

    /// The signer used for outbound requests.
    pub fn signer(&self) -> &RequestSigner {
        &self.signer
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Join a device base address and a command endpoint.
    ///
    /// Unlike `Url::join`, a path prefix on the base (`http://gw/dev-7/`)
    /// is preserved.
    pub fn endpoint_url(base: &Url, endpoint: &str) -> Result<Url, Error> {
        let base = base.as_str().trim_end_matches('/');
        let endpoint = endpoint.trim_start_matches('/');
        Ok(Url::parse(&format!("{base}/{endpoint}"))?)
    }

    // ── Requests ─────────────────────────────────────────────────────

    /// Send a signed command to a device.
    ///
    /// 2xx is success; 401/403 become [`Error::AuthRejected`]; any other
    /// status becomes [`Error::Device`].
    pub async fn send(&self, base: &Url, request: &DeviceRequest<'_>) -> Result<DeviceResponse, Error> {
        let url = Self::endpoint_url(base, request.endpoint)?;
        let body = match request.payload {
            Some(payload) => serde_json::to_string(payload)?,
            None => String::new(),
        };

        let headers = self.signed_headers(
            &request.method.to_string(),
            request.endpoint,
            &body,
            request.headers,
        )?;

        debug!(method = %request.method, %url, "sending device command");

        let mut builder = self
            .http
            .request(request.method.as_reqwest(), url.clone())
            .headers(headers)
            .timeout(request.timeout);
        if request.payload.is_some() {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body);
        }

        let started = Instant::now();
        let resp = builder
            .send()
            .await
            .map_err(|e| classify_send_error(e, &url, request.timeout))?;
        let latency = started.elapsed();

        let status = resp.status().as_u16();
        trace!(status, latency_ms = latency.as_millis(), "device responded");

        if status == 401 || status == 403 {
            return Err(Error::AuthRejected { status });
        }

        let text = resp
            .text()
            .await
            .map_err(|e| classify_send_error(e, &url, request.timeout))?;

        if !(200..300).contains(&status) {
            return Err(Error::Device {
                status,
                message: truncate(&text, MAX_ERROR_BODY),
            });
        }

        let body = if text.trim().is_empty() {
            None
        } else {
            serde_json::from_str(&text).ok()
        };

        Ok(DeviceResponse {
            status,
            body,
            latency,
        })
    }

    /// POST a signed JSON document to an arbitrary URL (rule webhooks).
    pub async fn post_webhook(
        &self,
        url: &Url,
        document: &serde_json::Value,
        timeout: Duration,
    ) -> Result<u16, Error> {
        let body = serde_json::to_string(document)?;
        let headers = self.signed_headers("POST", url.path(), &body, &BTreeMap::new())?;

        debug!(%url, "posting webhook");

        let resp = self
            .http
            .post(url.clone())
            .headers(headers)
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| classify_send_error(e, url, timeout))?;

        let status = resp.status().as_u16();
        if (200..300).contains(&status) {
            Ok(status)
        } else {
            let text = resp.text().await.unwrap_or_default();
            Err(Error::Device {
                status,
                message: truncate(&text, MAX_ERROR_BODY),
            })
        }
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Caller headers plus `X-Timestamp` / `X-Signature`.
    ///
    /// Signature headers are inserted last so a caller cannot override them.
    fn signed_headers(
        &self,
        method: &str,
        endpoint: &str,
        body: &str,
        extra: &BTreeMap<String, String>,
    ) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        for (name, value) in extra {
            let name_h = HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            let value_h = HeaderValue::from_str(value).map_err(|e| Error::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            headers.insert(name_h, value_h);
        }

        let timestamp = Utc::now().timestamp();
        let signature = self.signer.sign(method, endpoint, body, timestamp);

        headers.insert(TIMESTAMP_HEADER, HeaderValue::from(timestamp));
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&signature).map_err(|e| Error::InvalidHeader {
                name: SIGNATURE_HEADER.into(),
                reason: e.to_string(),
            })?,
        );
        Ok(headers)
    }
}

fn classify_send_error(err: reqwest::Error, url: &Url, timeout: Duration) -> Error {
    if err.is_timeout() {
        Error::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else if err.is_connect() {
        Error::Unreachable {
            url: url.to_string(),
            reason: err.to_string(),
        }
    } else {
        Error::Transport(err)
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_owned();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
