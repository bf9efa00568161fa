// ── Command domain types ──
//
// The command record carries its own state machine. Every mutation goes
// through `Command::transition`, which rejects anything the lifecycle
// `pending → sent → {acknowledged, failed, timeout}` does not allow.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub use iotdeck_api::HttpMethod;

use super::entity_id::EntityId;

/// Delivery status of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Sent,
    Acknowledged,
    Failed,
    Timeout,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Acknowledged | Self::Failed | Self::Timeout)
    }

    /// Edges of the delivery state machine, ignoring attempt bounds.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Sent | Self::Failed)
                | (
                    Self::Sent,
                    Self::Pending | Self::Acknowledged | Self::Failed | Self::Timeout
                )
        )
    }
}

/// Wire the command travels over.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Http,
    Mqtt,
}

/// Who asked for the command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandOrigin {
    #[default]
    Manual,
    Rule { rule_id: EntityId },
}

impl fmt::Display for CommandOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => f.write_str("manual"),
            Self::Rule { rule_id } => write!(f, "rule:{rule_id}"),
        }
    }
}

/// Why a single delivery attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttemptErrorKind {
    DeviceUnreachable,
    AuthRejected,
    DeviceError,
    Timeout,
    Transport,
    /// The request itself is malformed; every attempt would fail the same way.
    InvalidRequest,
}

impl AttemptErrorKind {
    pub fn is_retryable(self) -> bool {
        self != Self::InvalidRequest
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptError {
    pub kind: AttemptErrorKind,
    pub message: String,
}

impl AttemptError {
    pub fn new(kind: AttemptErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Why a command ended in `failed` or `timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureReason {
    RetriesExhausted,
    /// The last attempt failed in a way no retry can fix.
    NotRetryable,
    Cancelled,
}

/// One entry of the command's audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTransition {
    pub from: CommandStatus,
    pub to: CommandStatus,
    pub at: DateTime<Utc>,
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid command transition {from} -> {to} (attempt {attempts}/{max_retries})")]
pub struct InvalidTransition {
    pub from: CommandStatus,
    pub to: CommandStatus,
    pub attempts: u32,
    pub max_retries: u32,
}

/// What a failed attempt turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptVerdict {
    /// Back to `pending`; another attempt will follow.
    Retry,
    /// Terminal `failed` or `timeout`.
    Exhausted(CommandStatus),
}

/// The canonical Command type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: EntityId,
    pub organization_id: EntityId,
    pub device_id: EntityId,
    pub transport: TransportKind,
    pub method: HttpMethod,
    pub endpoint: String,
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub status: CommandStatus,
    pub attempts: u32,
    pub max_retries: u32,
    pub origin: CommandOrigin,
    pub retry_of: Option<EntityId>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    pub response_status: Option<u16>,
    pub failure: Option<FailureReason>,
    pub last_error: Option<AttemptError>,
    #[serde(default)]
    pub transitions: Vec<CommandTransition>,
}

impl Command {
    /// Build a fresh `pending` record from a validated request.
    pub fn from_request(
        id: EntityId,
        organization_id: EntityId,
        request: NewCommand,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            organization_id,
            device_id: request.device_id,
            transport: request.transport,
            method: request.method,
            endpoint: request.endpoint,
            payload: request.payload,
            headers: request.headers,
            status: CommandStatus::Pending,
            attempts: 0,
            max_retries,
            origin: request.origin,
            retry_of: request.retry_of,
            created_at: now,
            executed_at: None,
            acknowledged_at: None,
            completed_at: None,
            latency_ms: None,
            response_status: None,
            failure: None,
            last_error: None,
            transitions: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `to`, enforcing the state machine and the attempt bound.
    pub fn transition(&mut self, to: CommandStatus, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        let allowed = self.status.can_transition_to(to)
            && match (self.status, to) {
                (CommandStatus::Pending, CommandStatus::Sent)
                | (CommandStatus::Sent, CommandStatus::Pending) => self.attempts < self.max_retries,
                _ => true,
            };
        if !allowed {
            return Err(InvalidTransition {
                from: self.status,
                to,
                attempts: self.attempts,
                max_retries: self.max_retries,
            });
        }

        if to == CommandStatus::Sent {
            self.attempts += 1;
            self.executed_at = Some(at);
        }
        if to.is_terminal() {
            self.completed_at = Some(at);
        }
        self.transitions.push(CommandTransition {
            from: self.status,
            to,
            at,
            attempt: self.attempts,
        });
        self.status = to;
        Ok(())
    }

    /// `pending → sent`, counting the attempt.
    pub fn mark_sent(&mut self, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(CommandStatus::Sent, at)
    }

    /// `sent → acknowledged`.
    pub fn mark_acknowledged(
        &mut self,
        at: DateTime<Utc>,
        response_status: u16,
        latency: Duration,
    ) -> Result<(), InvalidTransition> {
        self.transition(CommandStatus::Acknowledged, at)?;
        self.acknowledged_at = Some(at);
        self.response_status = Some(response_status);
        self.latency_ms = Some(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX));
        self.last_error = None;
        Ok(())
    }

    /// Record a failed attempt from `sent`.
    ///
    /// Re-queues while attempts remain; otherwise ends in `timeout` (if the
    /// last attempt timed out) or `failed`.
    pub fn mark_attempt_failed(
        &mut self,
        error: AttemptError,
        at: DateTime<Utc>,
    ) -> Result<AttemptVerdict, InvalidTransition> {
        let verdict = if self.attempts < self.max_retries && error.kind.is_retryable() {
            self.transition(CommandStatus::Pending, at)?;
            AttemptVerdict::Retry
        } else {
            let terminal = if error.kind == AttemptErrorKind::Timeout {
                CommandStatus::Timeout
            } else {
                CommandStatus::Failed
            };
            self.transition(terminal, at)?;
            self.failure = Some(if error.kind.is_retryable() {
                FailureReason::RetriesExhausted
            } else {
                FailureReason::NotRetryable
            });
            AttemptVerdict::Exhausted(terminal)
        };
        self.last_error = Some(error);
        Ok(verdict)
    }

    /// `pending | sent → failed` with reason `cancelled`.
    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(CommandStatus::Failed, at)?;
        self.failure = Some(FailureReason::Cancelled);
        Ok(())
    }

    /// A request re-issuing this command as a new record.
    pub fn reissue(&self) -> NewCommand {
        NewCommand {
            device_id: self.device_id.clone(),
            transport: self.transport,
            method: self.method,
            endpoint: self.endpoint.clone(),
            payload: self.payload.clone(),
            headers: self.headers.clone(),
            max_retries: Some(self.max_retries),
            origin: CommandOrigin::Manual,
            retry_of: Some(self.id.clone()),
        }
    }
}

/// Submission request for a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCommand {
    pub device_id: EntityId,
    #[serde(default)]
    pub transport: TransportKind,
    pub method: HttpMethod,
    pub endpoint: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Falls back to the hub's configured default.
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub origin: CommandOrigin,
    #[serde(default)]
    pub retry_of: Option<EntityId>,
}

impl NewCommand {
    pub fn http(device_id: impl Into<EntityId>, method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            transport: TransportKind::Http,
            method,
            endpoint: endpoint.into(),
            payload: None,
            headers: BTreeMap::new(),
            max_retries: None,
            origin: CommandOrigin::Manual,
            retry_of: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Shape checks that need no store access. Returns the effective
    /// retry bound.
    pub fn validate(&self, default_max_retries: u32) -> Result<u32, String> {
        if !self.endpoint.starts_with('/') {
            return Err(format!("endpoint must start with '/': {:?}", self.endpoint));
        }
        if self.transport == TransportKind::Mqtt {
            return Err("mqtt transport is not available".into());
        }
        let max_retries = self.max_retries.unwrap_or(default_max_retries);
        if max_retries == 0 {
            return Err("max_retries must be at least 1".into());
        }
        Ok(max_retries)
    }
}

/// Aggregate delivery figures for one organization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CommandStats {
    pub total: usize,
    pub pending: usize,
    pub sent: usize,
    pub acknowledged: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Pending commands that have already made at least one attempt.
    pub active_retries: usize,
    /// Acknowledged share of terminal commands, 0.0 to 1.0.
    pub success_rate: Option<f64>,
    pub avg_latency_ms: Option<f64>,
}

impl CommandStats {
    pub fn from_commands<'a>(commands: impl IntoIterator<Item = &'a Command>) -> Self {
        let mut stats = Self::default();
        let mut latency_sum = 0u64;
        let mut latency_count = 0u64;

        for cmd in commands {
            stats.total += 1;
            match cmd.status {
                CommandStatus::Pending => {
                    stats.pending += 1;
                    if cmd.attempts > 0 {
                        stats.active_retries += 1;
                    }
                }
                CommandStatus::Sent => stats.sent += 1,
                CommandStatus::Acknowledged => {
                    stats.acknowledged += 1;
                    if let Some(ms) = cmd.latency_ms {
                        latency_sum += ms;
                        latency_count += 1;
                    }
                }
                CommandStatus::Failed => stats.failed += 1,
                CommandStatus::Timeout => stats.timed_out += 1,
            }
        }

        let terminal = stats.acknowledged + stats.failed + stats.timed_out;
        #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
        {
            if terminal > 0 {
                stats.success_rate = Some(stats.acknowledged as f64 / terminal as f64);
            }
            if latency_count > 0 {
                stats.avg_latency_ms = Some(latency_sum as f64 / latency_count as f64);
            }
        }
        stats
    }
}
