// ── Runtime hub configuration ──
//
// These types describe how the hub behaves: buffer sizes, liveness,
// command timeouts and retry backoff. They never touch disk; the CLI
// builds a `HubConfig` (usually via iotdeck-config) and hands it in.

use std::time::Duration;

use secrecy::SecretString;

pub use iotdeck_api::{TlsMode, TransportConfig};

/// Telemetry buffering limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Maximum samples kept per (device, key) series.
    pub capacity: usize,
    /// Maximum sample age. `None` falls back to the organization's
    /// `retention_days`.
    pub max_age: Option<Duration>,
    /// Maximum out-of-order samples retained per organization.
    pub dead_letter_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            max_age: None,
            dead_letter_capacity: 256,
        }
    }
}

/// Device liveness tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Silence after which a device is considered offline.
    pub window: Duration,
    /// How often the background sweep runs. Zero disables it.
    pub sweep_interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Exponential retry backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            multiplier: 2.0,
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffConfig {
    /// Delay before attempt `attempt + 1`, given `attempt` failures so far
    /// (1-based). Saturates at `max`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = self.initial.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Command delivery settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandConfig {
    /// Deadline for a single attempt.
    pub timeout: Duration,
    /// Used when a command request does not carry its own bound.
    pub default_max_retries: u32,
    pub backoff: BackoffConfig,
    /// Depth of the dispatcher's submission queue.
    pub queue_depth: usize,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            default_max_retries: 3,
            backoff: BackoffConfig::default(),
            queue_depth: 64,
        }
    }
}

/// Everything a `Hub` needs to run.
///
/// Built by the CLI, passed to `Hub` -- core never reads config files.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub telemetry: TelemetryConfig,
    pub liveness: LivenessConfig,
    pub commands: CommandConfig,
    /// Shared secret used to sign outbound commands and webhooks.
    pub signing_secret: SecretString,
    pub transport: TransportConfig,
    /// Capacity of the hub event broadcast channel.
    pub event_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            telemetry: TelemetryConfig::default(),
            liveness: LivenessConfig::default(),
            commands: CommandConfig::default(),
            signing_secret: SecretString::from(String::new()),
            transport: TransportConfig::default(),
            event_buffer: 256,
        }
    }
}
