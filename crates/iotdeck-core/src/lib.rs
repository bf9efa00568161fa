//! Device-management core between `iotdeck-api` and its consumers (CLI,
//! dashboards, services).
//!
//! - **[`Hub`]**: central facade. Owns every component below, exposes the
//!   action verbs (register, ingest, send/retry/cancel, acknowledge/dismiss)
//!   and runs the background tasks started by [`Hub::start`].
//!
//! - **[`DataStore`]**: lock-free reactive storage built on
//!   `EntityCollection<T>` (`DashMap` + `tokio::sync::watch` channels), keyed
//!   by `(organization, id)`. Every read takes an organization and treats
//!   foreign entities as missing.
//!
//! - **[`EntityStream<T>`]**: one organization's live snapshots, with
//!   `seen()` / `latest()` / `changed()` / `wait_for()`.
//!
//! - **[`CommandDispatcher`]**: drives each command through
//!   `pending → sent → {acknowledged, failed, timeout}` with bounded retries
//!   and exponential backoff over a pluggable [`DeviceTransport`].
//!
//! - **[`TelemetryIngest`]**: bounded per-series ring buffers with a
//!   dead-letter queue for out-of-order samples.
//!
//! - **[`RuleEvaluator`]** and **[`AlertLifecycle`]**: condition matching,
//!   action execution and idempotent alerts.

pub mod alerts;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod hub;
pub mod model;
pub mod rules;
pub mod store;
pub mod stream;
pub mod telemetry;

// ── Primary re-exports ──────────────────────────────────────────────
pub use alerts::AlertLifecycle;
pub use config::{
    BackoffConfig, CommandConfig, HubConfig, LivenessConfig, TelemetryConfig, TlsMode,
    TransportConfig,
};
pub use dispatch::{CommandDispatcher, Delivery, DeviceTransport, HttpTransport};
pub use error::CoreError;
pub use event::HubEvent;
pub use hub::{Hub, HubState, StatusUpdate, TelemetryReport};
pub use rules::{ActionFailure, EvaluationReport, RuleEvaluator, RuleEvent, StatusChange};
pub use store::{DataStore, Snapshot};
pub use stream::{AlertFilter, DeviceFilter, EntityStream};
pub use telemetry::{DeadLetter, IngestReport, TelemetryIngest};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    // Alerts
    Alert,
    AlertKey,
    // Commands
    AttemptError,
    AttemptErrorKind,
    Command,
    CommandOrigin,
    CommandStats,
    CommandStatus,
    CommandTransition,
    // Devices
    Device,
    DeviceStatus,
    DeviceSummary,
    DeviceType,
    EntityId,
    FailureReason,
    HttpMethod,
    // Telemetry
    IngestOutcome,
    NewCommand,
    // Rules
    NewRule,
    // Organizations
    Organization,
    OrganizationSettings,
    Plan,
    RegisterDevice,
    Rule,
    RuleAction,
    RuleCondition,
    RuleTrigger,
    Severity,
    TelemetrySample,
    TelemetryValue,
    TransportKind,
    TriggerConfig,
    TriggerType,
};
pub use model::rule::{ActionType, ConditionOperator};
