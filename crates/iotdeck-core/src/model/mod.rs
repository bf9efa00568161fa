//! Canonical domain types.
//!
//! Everything the store holds lives here; the rest of the crate only moves
//! these types around.

pub mod alert;
pub mod command;
pub mod device;
pub mod entity_id;
pub mod organization;
pub mod rule;
pub mod telemetry;

pub use alert::{Alert, AlertKey, Severity};
pub use command::{
    AttemptError, AttemptErrorKind, AttemptVerdict, Command, CommandOrigin, CommandStats,
    CommandStatus, CommandTransition, FailureReason, HttpMethod, InvalidTransition, NewCommand,
    TransportKind,
};
pub use device::{Device, DeviceStatus, DeviceSummary, DeviceType, RegisterDevice};
pub use entity_id::EntityId;
pub use organization::{Organization, OrganizationSettings, Plan};
pub use rule::{
    ActionType, ConditionOperator, NewRule, Rule, RuleAction, RuleCondition, RuleTrigger,
    TriggerConfig, TriggerType,
};
pub use telemetry::{IngestOutcome, TelemetrySample, TelemetryValue};
