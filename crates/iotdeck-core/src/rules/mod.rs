// ── Rule evaluator ──
//
// For each event, every enabled rule of the event's organization whose
// trigger matches is checked concurrently. A rule fires when all of its
// conditions hold; its actions then run in order, and a failing action is
// reported without stopping the ones after it.

mod condition;
mod event;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use crate::alerts::{AlertLifecycle, RaiseAlert};
use crate::dispatch::CommandDispatcher;
use crate::error::CoreError;
use crate::event::HubEvent;
use crate::model::{
    ActionType, AlertKey, CommandOrigin, EntityId, HttpMethod, NewCommand, Rule, RuleAction,
    Severity,
};
use crate::store::DataStore;

pub use condition::{holds, lookup_path};
pub use event::{RuleEvent, StatusChange};

/// One action that did not complete.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionFailure {
    pub rule_id: EntityId,
    pub action: ActionType,
    pub message: String,
}

/// What one evaluation pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationReport {
    /// Rules whose trigger matched.
    pub evaluated: usize,
    /// Rules whose conditions all held.
    pub fired: Vec<EntityId>,
    /// Alerts newly created by this pass.
    pub alerts: Vec<EntityId>,
    pub commands: Vec<EntityId>,
    pub webhooks: usize,
    pub failures: Vec<ActionFailure>,
}

impl EvaluationReport {
    pub(crate) fn absorb(&mut self, other: Self) {
        self.evaluated += other.evaluated;
        self.fired.extend(other.fired);
        self.alerts.extend(other.alerts);
        self.commands.extend(other.commands);
        self.webhooks += other.webhooks;
        self.failures.extend(other.failures);
    }
}

/// Effect of one successful action.
enum ActionEffect {
    Alert(Option<EntityId>),
    Command(EntityId),
    Webhook,
}

pub struct RuleEvaluator {
    store: Arc<DataStore>,
    alerts: Arc<AlertLifecycle>,
    dispatcher: CommandDispatcher,
    events: broadcast::Sender<HubEvent>,
    webhook_timeout: Duration,
}

impl RuleEvaluator {
    pub(crate) fn new(
        store: Arc<DataStore>,
        alerts: Arc<AlertLifecycle>,
        dispatcher: CommandDispatcher,
        events: broadcast::Sender<HubEvent>,
        webhook_timeout: Duration,
    ) -> Self {
        Self {
            store,
            alerts,
            dispatcher,
            events,
            webhook_timeout,
        }
    }

    /// Run every matching rule of `org` against `event`.
    pub async fn evaluate(&self, org: &EntityId, event: &RuleEvent) -> EvaluationReport {
        let rules: Vec<Arc<Rule>> = self
            .store
            .rules_for(org, event.trigger_type())
            .into_iter()
            .filter(|rule| event.matches_trigger(&rule.trigger.config))
            .collect();

        let passes = join_all(rules.iter().map(|rule| self.run_rule(org, rule, event))).await;

        let mut report = EvaluationReport::default();
        for pass in passes {
            report.absorb(pass);
        }
        debug!(
            event_id = event.event_id(),
            trigger = %event.trigger_type(),
            evaluated = report.evaluated,
            fired = report.fired.len(),
            "rules evaluated"
        );
        report
    }

    async fn run_rule(&self, org: &EntityId, rule: &Rule, event: &RuleEvent) -> EvaluationReport {
        let mut report = EvaluationReport {
            evaluated: 1,
            ..EvaluationReport::default()
        };

        let all_hold = rule.conditions.iter().all(|cond| {
            event
                .lookup(&cond.field)
                .is_some_and(|actual| holds(cond.operator, &actual, &cond.value))
        });
        if !all_hold {
            return report;
        }

        info!(rule_id = %rule.id, rule = %rule.name, event_id = event.event_id(), "rule fired");
        report.fired.push(rule.id.clone());

        for action in &rule.actions {
            match self.execute(org, rule, action, event).await {
                Ok(ActionEffect::Alert(Some(id))) => report.alerts.push(id),
                Ok(ActionEffect::Alert(None)) => {}
                Ok(ActionEffect::Command(id)) => report.commands.push(id),
                Ok(ActionEffect::Webhook) => report.webhooks += 1,
                Err(e) => {
                    warn!(
                        rule_id = %rule.id,
                        action = %action.action_type,
                        error = %e,
                        "rule action failed"
                    );
                    let message = match e {
                        CoreError::ActionExecution { message, .. } => message,
                        other => other.to_string(),
                    };
                    let _ = self.events.send(HubEvent::ActionFailed {
                        organization_id: org.clone(),
                        rule_id: rule.id.clone(),
                        action: action.action_type.to_string(),
                        message: message.clone(),
                    });
                    report.failures.push(ActionFailure {
                        rule_id: rule.id.clone(),
                        action: action.action_type,
                        message,
                    });
                }
            }
        }
        report
    }

    async fn execute(
        &self,
        org: &EntityId,
        rule: &Rule,
        action: &RuleAction,
        event: &RuleEvent,
    ) -> Result<ActionEffect, CoreError> {
        let fail = |message: String| CoreError::ActionExecution {
            rule_id: rule.id.clone(),
            action: action.action_type.to_string(),
            message,
        };

        match action.action_type {
            ActionType::Alert => {
                let severity = match action.config_str("severity") {
                    Some(s) => s
                        .parse::<Severity>()
                        .map_err(|_| fail(format!("unknown severity {s:?}")))?,
                    None => Severity::default(),
                };
                let template = action
                    .config_str("message")
                    .map_or_else(|| format!("Rule \"{}\" triggered", rule.name), str::to_owned);
                let message = render(&template, event);

                let (alert, created) = self.alerts.raise(
                    org,
                    RaiseAlert {
                        key: AlertKey {
                            rule_id: rule.id.clone(),
                            device_id: event.device_id().cloned(),
                            event_id: event.event_id().to_owned(),
                        },
                        severity,
                        message,
                    },
                )?;
                Ok(ActionEffect::Alert(created.then(|| alert.id.clone())))
            }

            ActionType::HttpCommand => {
                let request = command_request(rule, action, event).map_err(fail)?;
                let command = self
                    .dispatcher
                    .submit(org, request)
                    .await
                    .map_err(|e| fail(e.to_string()))?;
                Ok(ActionEffect::Command(command.id.clone()))
            }

            ActionType::Webhook => {
                let raw = action
                    .config_str("url")
                    .ok_or_else(|| fail("webhook action has no url".into()))?;
                let url = Url::parse(raw).map_err(|e| fail(format!("invalid url {raw:?}: {e}")))?;
                let document = json!({
                    "organization_id": org,
                    "rule_id": rule.id,
                    "rule_name": rule.name,
                    "event": event.to_json(),
                });
                let status = self
                    .dispatcher
                    .transport()
                    .post_webhook(&url, &document, self.webhook_timeout)
                    .await
                    .map_err(|e| fail(e.to_string()))?;
                debug!(rule_id = %rule.id, %url, status, "webhook delivered");
                Ok(ActionEffect::Webhook)
            }

            ActionType::MqttPublish => Err(fail("no MQTT transport is configured".into())),
            ActionType::Email => Err(fail("no email transport is configured".into())),
        }
    }
}

/// Substitute `{device_id}`, `{key}` and `{value}`.
fn render(template: &str, event: &RuleEvent) -> String {
    event
        .placeholders()
        .iter()
        .fold(template.to_owned(), |acc, (token, value)| acc.replace(token, value))
}

/// Build the command an `http_command` action asks for.
fn command_request(rule: &Rule, action: &RuleAction, event: &RuleEvent) -> Result<NewCommand, String> {
    let device_id = action
        .config_str("device_id")
        .map(EntityId::from)
        .or_else(|| event.device_id().cloned())
        .ok_or("no target device: set config.device_id or use a device event")?;

    let method = match action.config_str("method") {
        Some(m) => m
            .parse::<HttpMethod>()
            .map_err(|_| format!("unsupported method {m:?}"))?,
        None => HttpMethod::Post,
    };
    let endpoint = action
        .config_str("endpoint")
        .ok_or("http_command action has no endpoint")?
        .to_owned();

    let headers = match action.config.get("headers") {
        Some(serde_json::Value::Object(map)) => map
            .iter()
            .map(|(k, v)| {
                v.as_str()
                    .map(|s| (k.clone(), s.to_owned()))
                    .ok_or_else(|| format!("header {k} must be a string"))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?,
        Some(_) => return Err("headers must be an object".into()),
        None => BTreeMap::new(),
    };

    let max_retries = match action.config.get("max_retries") {
        Some(v) => Some(
            v.as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or("max_retries must be a non-negative integer")?,
        ),
        None => None,
    };

    Ok(NewCommand {
        device_id,
        transport: crate::model::TransportKind::Http,
        method,
        endpoint,
        payload: action.config.get("payload").cloned(),
        headers,
        max_retries,
        origin: CommandOrigin::Rule {
            rule_id: rule.id.clone(),
        },
        retry_of: None,
    })
}
