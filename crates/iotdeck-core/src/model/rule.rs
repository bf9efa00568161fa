// ── Rule domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::entity_id::EntityId;

/// Event class a rule listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TriggerType {
    Telemetry,
    Schedule,
    Webhook,
    DeviceStatus,
}

/// Narrowing applied before conditions are looked at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Only events from this device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<EntityId>,
    /// Telemetry only: only samples with this key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Schedule / webhook only: only ticks or payloads with this name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTrigger {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub config: TriggerConfig,
}

impl RuleTrigger {
    pub fn new(trigger_type: TriggerType) -> Self {
        Self {
            trigger_type,
            config: TriggerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

/// `field <operator> value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: serde_json::Value,
}

impl RuleCondition {
    pub fn new(
        field: impl Into<String>,
        operator: ConditionOperator,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionType {
    Alert,
    HttpCommand,
    Webhook,
    MqttPublish,
    Email,
}

/// One side effect of a firing rule. `config` is interpreted per type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl RuleAction {
    pub fn new(action_type: ActionType, config: serde_json::Value) -> Self {
        let config = match config {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            action_type,
            config,
        }
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(serde_json::Value::as_str)
    }
}

/// The canonical Rule type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: EntityId,
    pub organization_id: EntityId,
    pub name: String,
    pub description: Option<String>,
    pub trigger: RuleTrigger,
    /// All must hold.
    pub conditions: Vec<RuleCondition>,
    /// Executed in order.
    pub actions: Vec<RuleAction>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rule definition as submitted by a caller or a scenario file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    #[serde(default)]
    pub id: Option<EntityId>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub trigger: RuleTrigger,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    #[serde(default)]
    pub actions: Vec<RuleAction>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl NewRule {
    pub fn new(name: impl Into<String>, trigger: RuleTrigger) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: None,
            trigger,
            conditions: Vec::new(),
            actions: Vec::new(),
            enabled: true,
        }
    }

    pub fn when(mut self, condition: RuleCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn then(mut self, action: RuleAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Structural checks. Action targets are resolved at fire time.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("rule name must not be empty".into());
        }
        if let Some(cond) = self.conditions.iter().find(|c| c.field.trim().is_empty()) {
            return Err(format!("condition with empty field (operator {})", cond.operator));
        }
        for action in &self.actions {
            match action.action_type {
                ActionType::HttpCommand => {
                    let endpoint = action.config_str("endpoint").unwrap_or_default();
                    if !endpoint.starts_with('/') {
                        return Err(format!(
                            "http_command action needs an endpoint starting with '/', got {endpoint:?}"
                        ));
                    }
                }
                ActionType::Webhook => {
                    let url = action.config_str("url").unwrap_or_default();
                    url::Url::parse(url)
                        .map_err(|e| format!("webhook action url {url:?}: {e}"))?;
                }
                ActionType::Alert | ActionType::MqttPublish | ActionType::Email => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rule_deserializes_from_dashboard_shape() {
        let rule: NewRule = serde_json::from_value(json!({
            "name": "Overheat",
            "trigger": { "type": "telemetry", "config": { "key": "temperature" } },
            "conditions": [{ "field": "temperature", "operator": "gt", "value": 35 }],
            "actions": [{ "type": "alert", "config": { "severity": "critical", "message": "hot" } }]
        }))
        .unwrap();

        assert!(rule.enabled);
        assert_eq!(rule.trigger.trigger_type, TriggerType::Telemetry);
        assert_eq!(rule.trigger.config.key.as_deref(), Some("temperature"));
        assert_eq!(rule.conditions[0].operator, ConditionOperator::Gt);
        assert_eq!(rule.actions[0].config_str("severity"), Some("critical"));
        rule.validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_actions() {
        let base = NewRule::new("r", RuleTrigger::new(TriggerType::Telemetry));
        let bad_endpoint = base
            .clone()
            .then(RuleAction::new(ActionType::HttpCommand, json!({ "endpoint": "relay" })));
        assert!(bad_endpoint.validate().is_err());

        let bad_url = base
            .clone()
            .then(RuleAction::new(ActionType::Webhook, json!({ "url": "not a url" })));
        assert!(bad_url.validate().is_err());

        let empty_field = base.when(RuleCondition::new("", ConditionOperator::Eq, 1));
        assert!(empty_field.validate().is_err());
    }
}
