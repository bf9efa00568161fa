#![allow(clippy::unwrap_used)]
// Integration tests for `Hub`: dispatch, telemetry, rules and alerts end
// to end, over a scripted transport with paused time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::Mutex;
use url::Url;

use iotdeck_core::{
    ActionType, AttemptError, AttemptErrorKind, Command, CommandOrigin, CommandStatus,
    ConditionOperator, CoreError, Delivery, Device, DeviceStatus, DeviceTransport, DeviceType,
    EntityId, FailureReason, HttpMethod, Hub, HubConfig, HubEvent, HubState, NewCommand, NewRule,
    Organization, RegisterDevice, RuleAction, RuleCondition, RuleTrigger, Severity,
    TelemetrySample, TriggerType,
};

// ── Scripted transport ──────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Script {
    Ack,
    Unreachable,
    Hang,
}

struct ScriptedTransport {
    script: Script,
    deliveries: AtomicU32,
    webhooks: Mutex<Vec<(Url, serde_json::Value)>>,
}

impl ScriptedTransport {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            deliveries: AtomicU32::new(0),
            webhooks: Mutex::new(Vec::new()),
        })
    }

    fn deliveries(&self) -> u32 {
        self.deliveries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceTransport for ScriptedTransport {
    async fn deliver(
        &self,
        _device: &Device,
        _command: &Command,
        _timeout: Duration,
    ) -> Result<Delivery, AttemptError> {
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Ack => Ok(Delivery {
                status: 200,
                latency: Duration::from_millis(12),
                body: Some(json!({ "ok": true })),
            }),
            Script::Unreachable => Err(AttemptError::new(
                AttemptErrorKind::DeviceUnreachable,
                "connection refused",
            )),
            Script::Hang => std::future::pending().await,
        }
    }

    async fn post_webhook(
        &self,
        url: &Url,
        document: &serde_json::Value,
        _timeout: Duration,
    ) -> Result<u16, AttemptError> {
        self.webhooks
            .lock()
            .await
            .push((url.clone(), document.clone()));
        Ok(204)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn org() -> EntityId {
    EntityId::from("org-1")
}

fn config() -> HubConfig {
    let mut config = HubConfig::default();
    config.liveness.sweep_interval = Duration::ZERO;
    config.commands.timeout = Duration::from_secs(2);
    config
}

async fn hub_with(script: Script) -> (Hub, Arc<ScriptedTransport>) {
    let transport = ScriptedTransport::new(script);
    let hub = Hub::with_transport(config(), transport.clone());
    hub.register_organization(Organization::new(org(), "Acme Farms"))
        .unwrap();
    hub.register_device(
        &org(),
        RegisterDevice::new("Greenhouse sensor", DeviceType::Esp32).with_id("dev-001"),
    )
    .unwrap();
    hub.start().await.unwrap();
    (hub, transport)
}

fn dev() -> EntityId {
    EntityId::from("dev-001")
}

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn temperature(value: f64, at: i64) -> TelemetrySample {
    TelemetrySample::new(dev(), "temperature", value, ts(at))
}

fn overheat_rule() -> NewRule {
    let mut trigger = RuleTrigger::new(TriggerType::Telemetry);
    trigger.config.key = Some("temperature".into());
    NewRule::new("Overheat", trigger)
        .when(RuleCondition::new("temperature", ConditionOperator::Gt, 35))
        .then(RuleAction::new(
            ActionType::Alert,
            json!({ "severity": "critical", "message": "{device_id} reads {value}" }),
        ))
}

async fn wait_until_sent(hub: &Hub, id: &EntityId) {
    for _ in 0..100 {
        if hub.store().command(&org(), id).unwrap().status == CommandStatus::Sent {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("command {id} never reached sent");
}

// ── Command dispatch ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_unreachable_device_fails_after_three_attempts() {
    let (hub, transport) = hub_with(Script::Unreachable).await;
    hub.heartbeat(&org(), &dev()).await.unwrap();

    let cmd = hub
        .send_command(
            &org(),
            NewCommand::http(dev(), HttpMethod::Post, "/relay")
                .with_payload(json!({ "on": true }))
                .with_max_retries(3),
        )
        .await
        .unwrap();
    let done = hub.wait_for_command(&org(), &cmd.id).await.unwrap();

    assert_eq!(done.status, CommandStatus::Failed);
    assert_eq!(done.attempts, 3);
    assert_eq!(done.failure, Some(FailureReason::RetriesExhausted));
    assert_eq!(
        done.last_error.as_ref().map(|e| e.kind),
        Some(AttemptErrorKind::DeviceUnreachable)
    );
    assert_eq!(transport.deliveries(), 3);

    let path: Vec<(CommandStatus, CommandStatus)> =
        done.transitions.iter().map(|t| (t.from, t.to)).collect();
    assert_eq!(
        path,
        vec![
            (CommandStatus::Pending, CommandStatus::Sent),
            (CommandStatus::Sent, CommandStatus::Pending),
            (CommandStatus::Pending, CommandStatus::Sent),
            (CommandStatus::Sent, CommandStatus::Pending),
            (CommandStatus::Pending, CommandStatus::Sent),
            (CommandStatus::Sent, CommandStatus::Failed),
        ]
    );
    assert!(done.transitions.iter().all(|t| t.attempt <= done.max_retries));
}

#[tokio::test(start_paused = true)]
async fn test_offline_device_counts_as_unreachable() {
    let (hub, transport) = hub_with(Script::Ack).await;

    let cmd = hub
        .send_command(
            &org(),
            NewCommand::http(dev(), HttpMethod::Post, "/relay").with_max_retries(2),
        )
        .await
        .unwrap();
    let done = hub.wait_for_command(&org(), &cmd.id).await.unwrap();

    assert_eq!(done.status, CommandStatus::Failed);
    assert_eq!(done.attempts, 2);
    assert_eq!(transport.deliveries(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_acknowledged_command_records_latency() {
    let (hub, transport) = hub_with(Script::Ack).await;
    hub.heartbeat(&org(), &dev()).await.unwrap();

    let cmd = hub
        .send_command(&org(), NewCommand::http(dev(), HttpMethod::Put, "/config"))
        .await
        .unwrap();
    let done = hub.wait_for_command(&org(), &cmd.id).await.unwrap();

    assert_eq!(done.status, CommandStatus::Acknowledged);
    assert_eq!(done.attempts, 1);
    assert_eq!(done.response_status, Some(200));
    assert_eq!(done.latency_ms, Some(12));
    assert!(done.acknowledged_at.is_some());
    assert_eq!(transport.deliveries(), 1);

    let stats = hub.command_stats(&org());
    assert_eq!(stats.total, 1);
    assert_eq!(stats.acknowledged, 1);
    assert_eq!(stats.success_rate, Some(100.0));
}

#[tokio::test(start_paused = true)]
async fn test_silent_device_ends_in_timeout() {
    let (hub, transport) = hub_with(Script::Hang).await;
    hub.heartbeat(&org(), &dev()).await.unwrap();

    let cmd = hub
        .send_command(
            &org(),
            NewCommand::http(dev(), HttpMethod::Get, "/status").with_max_retries(2),
        )
        .await
        .unwrap();
    let done = hub.wait_for_command(&org(), &cmd.id).await.unwrap();

    assert_eq!(done.status, CommandStatus::Timeout);
    assert_eq!(done.attempts, 2);
    assert_eq!(transport.deliveries(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_creates_new_record() {
    let (hub, _) = hub_with(Script::Unreachable).await;
    hub.heartbeat(&org(), &dev()).await.unwrap();

    let original = hub
        .send_command(
            &org(),
            NewCommand::http(dev(), HttpMethod::Post, "/relay").with_max_retries(1),
        )
        .await
        .unwrap();
    let original = hub.wait_for_command(&org(), &original.id).await.unwrap();
    assert_eq!(original.status, CommandStatus::Failed);

    let retried = hub.retry_command(&org(), &original.id).await.unwrap();
    assert_ne!(retried.id, original.id);
    assert_eq!(retried.retry_of.as_ref(), Some(&original.id));
    assert_eq!(retried.attempts, 0);
    assert_eq!(retried.endpoint, "/relay");

    let unchanged = hub.store().command(&org(), &original.id).unwrap();
    assert_eq!(*unchanged, *original);
    assert_eq!(hub.store().commands(&org()).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_rejects_non_terminal_command() {
    let (hub, _) = hub_with(Script::Hang).await;
    hub.heartbeat(&org(), &dev()).await.unwrap();

    let cmd = hub
        .send_command(&org(), NewCommand::http(dev(), HttpMethod::Post, "/relay"))
        .await
        .unwrap();
    let err = hub.retry_command(&org(), &cmd.id).await.unwrap_err();
    assert!(err.is_validation());
    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_invalid_submissions_store_nothing() {
    let (hub, _) = hub_with(Script::Ack).await;

    let bad_endpoint = hub
        .send_command(&org(), NewCommand::http(dev(), HttpMethod::Post, "relay"))
        .await
        .unwrap_err();
    assert!(bad_endpoint.is_validation());

    let zero_retries = hub
        .send_command(
            &org(),
            NewCommand::http(dev(), HttpMethod::Post, "/relay").with_max_retries(0),
        )
        .await
        .unwrap_err();
    assert!(zero_retries.is_validation());

    let unknown_device = hub
        .send_command(
            &org(),
            NewCommand::http("dev-404", HttpMethod::Post, "/relay"),
        )
        .await
        .unwrap_err();
    assert!(unknown_device.is_validation());

    assert!(hub.store().commands(&org()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_sent_command() {
    let (hub, _) = hub_with(Script::Hang).await;
    hub.heartbeat(&org(), &dev()).await.unwrap();

    let cmd = hub
        .send_command(&org(), NewCommand::http(dev(), HttpMethod::Post, "/relay"))
        .await
        .unwrap();
    wait_until_sent(&hub, &cmd.id).await;

    let cancelled = hub.cancel_command(&org(), &cmd.id).unwrap();
    assert_eq!(cancelled.status, CommandStatus::Failed);
    assert_eq!(cancelled.failure, Some(FailureReason::Cancelled));

    // Terminal commands cannot be cancelled again.
    assert!(hub.cancel_command(&org(), &cmd.id).is_err());
}

// ── Telemetry ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_telemetry_brings_device_online() {
    let (hub, _) = hub_with(Script::Ack).await;
    let mut events = hub.subscribe_events();
    assert_eq!(
        hub.store().device(&org(), &dev()).unwrap().status,
        DeviceStatus::Offline
    );
    let before = Utc::now();

    let report = hub
        .ingest_telemetry(&org(), temperature(21.5, 0), None)
        .await
        .unwrap();
    assert!(report.ingest.outcome.is_recorded());
    assert_eq!(
        report.ingest.status_change,
        Some((DeviceStatus::Offline, DeviceStatus::Online))
    );

    let device = hub.store().device(&org(), &dev()).unwrap();
    assert_eq!(device.status, DeviceStatus::Online);
    assert!(device.last_seen.unwrap() >= before);

    match events.recv().await.unwrap() {
        HubEvent::DeviceStatusChanged { device_id, from, to, .. } => {
            assert_eq!(device_id, dev());
            assert_eq!(from, DeviceStatus::Offline);
            assert_eq!(to, DeviceStatus::Online);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_out_of_order_sample_is_dead_lettered() {
    let (hub, _) = hub_with(Script::Ack).await;
    hub.add_rule(&org(), overheat_rule()).unwrap();

    hub.ingest_telemetry(&org(), temperature(20.0, 10), None)
        .await
        .unwrap();
    let late = hub
        .ingest_telemetry(&org(), temperature(40.0, 5), Some("late-1".into()))
        .await
        .unwrap();

    assert!(!late.ingest.outcome.is_recorded());
    assert!(late.rules.fired.is_empty());
    assert_eq!(hub.telemetry().series_len(&org(), &dev(), "temperature"), 1);
    let dead = hub.telemetry().dead_letters(&org());
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].event_id, "late-1");
    assert!(hub.telemetry().dead_letters(&EntityId::from("org-2")).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_future_timestamp_does_not_defeat_liveness() {
    let (hub, _) = hub_with(Script::Ack).await;
    let now = Utc::now();
    let sample = TelemetrySample::new(dev(), "temperature", 21.0, now + chrono::Duration::days(365));
    hub.ingest_telemetry(&org(), sample, None).await.unwrap();

    let device = hub.store().device(&org(), &dev()).unwrap();
    assert_eq!(device.status, DeviceStatus::Online);
    assert!(device.last_seen.unwrap() < now + chrono::Duration::minutes(1));

    let flipped = hub.sweep_liveness(now + chrono::Duration::hours(1)).await;
    assert_eq!(flipped, vec![dev()]);
    assert_eq!(
        hub.store().device(&org(), &dev()).unwrap().status,
        DeviceStatus::Offline
    );
}

#[tokio::test(start_paused = true)]
async fn test_backdated_sample_keeps_device_online() {
    let (hub, _) = hub_with(Script::Ack).await;
    let sample = TelemetrySample::new(
        dev(),
        "temperature",
        21.0,
        Utc::now() - chrono::Duration::minutes(10),
    );
    hub.ingest_telemetry(&org(), sample, None).await.unwrap();

    assert!(hub.sweep_liveness(Utc::now()).await.is_empty());
    assert_eq!(
        hub.store().device(&org(), &dev()).unwrap().status,
        DeviceStatus::Online
    );
}

#[tokio::test(start_paused = true)]
async fn test_series_capacity_evicts_oldest() {
    let mut config = config();
    config.telemetry.capacity = 3;
    let hub = Hub::with_transport(config, ScriptedTransport::new(Script::Ack));
    hub.register_organization(Organization::new(org(), "Acme")).unwrap();
    hub.register_device(&org(), RegisterDevice::new("probe", DeviceType::Stm32).with_id("dev-001"))
        .unwrap();

    for i in 0..5 {
        hub.ingest_telemetry(&org(), temperature(f64::from(i), i64::from(i)), None)
            .await
            .unwrap();
    }
    let series = hub.telemetry().series(&org(), &dev(), "temperature");
    let stamps: Vec<_> = series.iter().map(|s| s.timestamp).collect();
    assert_eq!(stamps, vec![ts(2), ts(3), ts(4)]);
}

#[tokio::test(start_paused = true)]
async fn test_telemetry_for_deleted_device_is_rejected() {
    let (hub, _) = hub_with(Script::Ack).await;
    hub.delete_device(&org(), &dev()).unwrap();

    let err = hub
        .ingest_telemetry(&org(), temperature(20.0, 0), None)
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(hub.store().devices(&org()).is_empty());
}

// ── Rules & alerts ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_threshold_rule_fires_once_per_qualifying_event() {
    let (hub, _) = hub_with(Script::Ack).await;
    let rule = hub.add_rule(&org(), overheat_rule()).unwrap();

    let hot = hub
        .ingest_telemetry(&org(), temperature(36.0, 0), Some("evt-1".into()))
        .await
        .unwrap();
    assert_eq!(hot.rules.fired, vec![rule.id.clone()]);
    assert_eq!(hot.rules.alerts.len(), 1);

    let boundary = hub
        .ingest_telemetry(&org(), temperature(35.0, 1), Some("evt-2".into()))
        .await
        .unwrap();
    assert!(boundary.rules.fired.is_empty());

    let cool = hub
        .ingest_telemetry(&org(), temperature(20.0, 2), Some("evt-3".into()))
        .await
        .unwrap();
    assert!(cool.rules.fired.is_empty());

    let alerts = hub.store().alerts(&org());
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::Critical);
    assert_eq!(alerts[0].message, "dev-001 reads 36");
    assert_eq!(alerts[0].rule_id, rule.id);
}

#[tokio::test(start_paused = true)]
async fn test_replayed_event_raises_no_duplicate_alert() {
    let (hub, _) = hub_with(Script::Ack).await;
    hub.add_rule(&org(), overheat_rule()).unwrap();

    hub.ingest_telemetry(&org(), temperature(40.0, 0), Some("evt-1".into()))
        .await
        .unwrap();
    let replay = hub
        .ingest_telemetry(&org(), temperature(40.0, 1), Some("evt-1".into()))
        .await
        .unwrap();

    assert_eq!(replay.rules.fired.len(), 1);
    assert!(replay.rules.alerts.is_empty());
    assert_eq!(hub.store().alerts(&org()).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_rule_does_not_fire() {
    let (hub, _) = hub_with(Script::Ack).await;
    let rule = hub.add_rule(&org(), overheat_rule()).unwrap();
    hub.set_rule_enabled(&org(), &rule.id, false).unwrap();

    let report = hub
        .ingest_telemetry(&org(), temperature(50.0, 0), None)
        .await
        .unwrap();
    assert_eq!(report.rules.evaluated, 0);
    assert!(hub.store().alerts(&org()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_action_does_not_block_siblings() {
    let (hub, transport) = hub_with(Script::Ack).await;
    let mut events = hub.subscribe_events();
    let rule = hub
        .add_rule(
            &org(),
            NewRule::new("Fan-out", RuleTrigger::new(TriggerType::Telemetry))
                .then(RuleAction::new(ActionType::MqttPublish, json!({ "topic": "alerts" })))
                .then(RuleAction::new(ActionType::Alert, json!({})))
                .then(RuleAction::new(
                    ActionType::Webhook,
                    json!({ "url": "https://hooks.example.com/iot" }),
                )),
        )
        .unwrap();

    let report = hub
        .ingest_telemetry(&org(), temperature(21.0, 0), Some("evt-9".into()))
        .await
        .unwrap();

    assert_eq!(report.rules.fired, vec![rule.id.clone()]);
    assert_eq!(report.rules.failures.len(), 1);
    assert_eq!(report.rules.failures[0].action, ActionType::MqttPublish);
    assert_eq!(report.rules.alerts.len(), 1);
    assert_eq!(report.rules.webhooks, 1);

    let alert = hub.store().alert(&org(), &report.rules.alerts[0]).unwrap();
    assert_eq!(alert.severity, Severity::Info);
    assert_eq!(alert.message, "Rule \"Fan-out\" triggered");

    let hooks = transport.webhooks.lock().await;
    assert_eq!(hooks.len(), 1);
    assert_eq!(hooks[0].0.as_str(), "https://hooks.example.com/iot");
    assert_eq!(hooks[0].1["rule_name"], json!("Fan-out"));
    assert_eq!(hooks[0].1["event"]["event_id"], json!("evt-9"));
    drop(hooks);

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if let HubEvent::ActionFailed { action, .. } = event {
            assert_eq!(action, "mqtt_publish");
            saw_failure = true;
        }
    }
    assert!(saw_failure);
}

#[tokio::test(start_paused = true)]
async fn test_rule_command_action_dispatches() {
    let (hub, transport) = hub_with(Script::Ack).await;
    let rule = hub
        .add_rule(
            &org(),
            overheat_rule().then(RuleAction::new(
                ActionType::HttpCommand,
                json!({ "endpoint": "/fan", "payload": { "speed": 3 }, "max_retries": 2 }),
            )),
        )
        .unwrap();

    let report = hub
        .ingest_telemetry(&org(), temperature(39.0, 0), None)
        .await
        .unwrap();
    assert_eq!(report.rules.commands.len(), 1);

    let done = hub
        .wait_for_command(&org(), &report.rules.commands[0])
        .await
        .unwrap();
    assert_eq!(done.status, CommandStatus::Acknowledged);
    assert_eq!(done.max_retries, 2);
    assert_eq!(
        done.origin,
        CommandOrigin::Rule {
            rule_id: rule.id.clone()
        }
    );
    assert_eq!(transport.deliveries(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabling_rule_cancels_its_commands() {
    let (hub, _) = hub_with(Script::Hang).await;
    let rule = hub
        .add_rule(
            &org(),
            NewRule::new("Vent", RuleTrigger::new(TriggerType::Telemetry)).then(RuleAction::new(
                ActionType::HttpCommand,
                json!({ "endpoint": "/vent" }),
            )),
        )
        .unwrap();
    hub.heartbeat(&org(), &dev()).await.unwrap();
    let manual = hub
        .send_command(&org(), NewCommand::http(dev(), HttpMethod::Post, "/relay"))
        .await
        .unwrap();

    let report = hub
        .ingest_telemetry(&org(), temperature(30.0, 0), None)
        .await
        .unwrap();
    let issued = report.rules.commands[0].clone();
    wait_until_sent(&hub, &issued).await;

    hub.set_rule_enabled(&org(), &rule.id, false).unwrap();

    let cancelled = hub.store().command(&org(), &issued).unwrap();
    assert_eq!(cancelled.status, CommandStatus::Failed);
    assert_eq!(cancelled.failure, Some(FailureReason::Cancelled));
    assert!(!hub.store().command(&org(), &manual.id).unwrap().is_terminal());
    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_device_status_rule_and_liveness_sweep() {
    let (hub, _) = hub_with(Script::Ack).await;
    let mut events = hub.subscribe_events();
    hub.add_rule(
        &org(),
        NewRule::new("Went dark", RuleTrigger::new(TriggerType::DeviceStatus))
            .when(RuleCondition::new("status", ConditionOperator::Eq, "offline"))
            .then(RuleAction::new(
                ActionType::Alert,
                json!({ "severity": "warning", "message": "{device_id} is {value}" }),
            )),
    )
    .unwrap();

    hub.heartbeat(&org(), &dev()).await.unwrap();
    assert!(hub.store().alerts(&org()).is_empty());

    let later = Utc::now() + chrono::Duration::seconds(301);
    let flipped = hub.sweep_liveness(later).await;
    assert_eq!(flipped, vec![dev()]);
    assert_eq!(
        hub.store().device(&org(), &dev()).unwrap().status,
        DeviceStatus::Offline
    );

    let alerts = hub.store().alerts(&org());
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].message, "dev-001 is offline");

    // Nothing left to flip.
    assert!(hub.sweep_liveness(later).await.is_empty());

    let offline_events = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| {
            matches!(
                e,
                HubEvent::DeviceStatusChanged {
                    to: DeviceStatus::Offline,
                    ..
                }
            )
        })
        .count();
    assert_eq!(offline_events, 1);
}

#[tokio::test(start_paused = true)]
async fn test_webhook_and_schedule_events() {
    let (hub, _) = hub_with(Script::Ack).await;
    let mut door = RuleTrigger::new(TriggerType::Webhook);
    door.config.name = Some("door".into());
    hub.add_rule(
        &org(),
        NewRule::new("Door open", door)
            .when(RuleCondition::new("door.state", ConditionOperator::Eq, "open"))
            .then(RuleAction::new(ActionType::Alert, json!({ "severity": "warning" }))),
    )
    .unwrap();
    let mut nightly = RuleTrigger::new(TriggerType::Schedule);
    nightly.config.name = Some("nightly".into());
    hub.add_rule(
        &org(),
        NewRule::new("Nightly report", nightly).then(RuleAction::new(ActionType::Alert, json!({}))),
    )
    .unwrap();

    let closed = hub
        .push_webhook(&org(), "door", json!({ "door": { "state": "closed" } }), None, None)
        .await
        .unwrap();
    assert!(closed.fired.is_empty());

    let open = hub
        .push_webhook(&org(), "door", json!({ "door": { "state": "open" } }), Some(dev()), None)
        .await
        .unwrap();
    assert_eq!(open.alerts.len(), 1);

    let other = hub
        .tick_schedule(&org(), "hourly", ts(0))
        .await
        .unwrap();
    assert_eq!(other.evaluated, 0);

    let first = hub.tick_schedule(&org(), "nightly", ts(0)).await.unwrap();
    let again = hub.tick_schedule(&org(), "nightly", ts(0)).await.unwrap();
    assert_eq!(first.alerts.len(), 1);
    assert!(again.alerts.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_acknowledge_and_dismiss_are_idempotent() {
    let (hub, _) = hub_with(Script::Ack).await;
    hub.add_rule(&org(), overheat_rule()).unwrap();
    let report = hub
        .ingest_telemetry(&org(), temperature(41.0, 0), None)
        .await
        .unwrap();
    let alert_id = report.rules.alerts[0].clone();

    let first = hub.acknowledge_alert(&org(), &alert_id).unwrap();
    let second = hub.acknowledge_alert(&org(), &alert_id).unwrap();
    assert_eq!(*first, *second);
    assert!(second.acknowledged);

    hub.dismiss_alert(&org(), &alert_id).unwrap();
    let dismissed = hub.dismiss_alert(&org(), &alert_id).unwrap();
    assert!(dismissed.dismissed);
    assert!(dismissed.acknowledged);
    assert!(hub.store().active_alerts(&org()).is_empty());
}

// ── Tenancy & lifecycle ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_cross_tenant_access_looks_like_not_found() {
    let (hub, _) = hub_with(Script::Ack).await;
    let other = EntityId::from("org-2");
    hub.register_organization(Organization::new(other.clone(), "Rival Farms"))
        .unwrap();
    hub.add_rule(&org(), overheat_rule()).unwrap();
    let report = hub
        .ingest_telemetry(&org(), temperature(45.0, 0), None)
        .await
        .unwrap();
    let alert_id = report.rules.alerts[0].clone();

    assert!(hub.store().device(&other, &dev()).is_none());
    assert!(hub.store().alert(&other, &alert_id).is_none());
    assert!(hub.store().alerts(&other).is_empty());
    assert!(hub.acknowledge_alert(&other, &alert_id).unwrap_err().is_not_found());

    let err = hub
        .send_command(&other, NewCommand::http(dev(), HttpMethod::Post, "/relay"))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = hub
        .ingest_telemetry(&other, temperature(20.0, 1), None)
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(hub.delete_device(&other, &dev()).unwrap_err().is_not_found());
}

#[tokio::test(start_paused = true)]
async fn test_deleting_device_cancels_pending_commands() {
    let (hub, _) = hub_with(Script::Hang).await;
    hub.heartbeat(&org(), &dev()).await.unwrap();

    let first = hub
        .send_command(&org(), NewCommand::http(dev(), HttpMethod::Post, "/relay"))
        .await
        .unwrap();
    let second = hub
        .send_command(&org(), NewCommand::http(dev(), HttpMethod::Post, "/relay"))
        .await
        .unwrap();
    wait_until_sent(&hub, &first.id).await;

    assert_eq!(hub.delete_device(&org(), &dev()).unwrap(), 2);
    for id in [&first.id, &second.id] {
        let cmd = hub.store().command(&org(), id).unwrap();
        assert_eq!(cmd.status, CommandStatus::Failed);
        assert_eq!(cmd.failure, Some(FailureReason::Cancelled));
    }
    assert!(hub.delete_device(&org(), &dev()).unwrap_err().is_not_found());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_leaves_no_unfinished_commands() {
    let (hub, _) = hub_with(Script::Hang).await;
    hub.heartbeat(&org(), &dev()).await.unwrap();

    for _ in 0..3 {
        hub.send_command(&org(), NewCommand::http(dev(), HttpMethod::Post, "/relay"))
            .await
            .unwrap();
    }
    hub.shutdown().await;

    let commands = hub.store().commands(&org());
    assert_eq!(commands.len(), 3);
    assert!(commands.iter().all(|c| c.status == CommandStatus::Failed
        && c.failure == Some(FailureReason::Cancelled)));
    assert_eq!(*hub.state().borrow(), HubState::Stopped);

    let err = hub
        .send_command(&org(), NewCommand::http(dev(), HttpMethod::Post, "/relay"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ShuttingDown));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_registration_is_rejected() {
    let (hub, _) = hub_with(Script::Ack).await;
    let err = hub
        .register_device(&org(), RegisterDevice::new("again", DeviceType::Custom).with_id("dev-001"))
        .unwrap_err();
    assert!(matches!(err, CoreError::Duplicate { entity_type: "device", .. }));
    assert!(hub
        .register_organization(Organization::new(org(), "Acme"))
        .is_err());
}

#[tokio::test(start_paused = true)]
async fn test_organizations_share_entity_ids_independently() {
    let (hub, _) = hub_with(Script::Ack).await;
    let other = EntityId::from("org-2");
    hub.register_organization(Organization::new(other.clone(), "Rival Farms"))
        .unwrap();

    let theirs = hub
        .register_device(&other, RegisterDevice::new("Their sensor", DeviceType::Custom).with_id("dev-001"))
        .unwrap();
    assert_eq!(theirs.organization_id, other);
    assert_eq!(hub.store().device(&org(), &dev()).unwrap().name, "Greenhouse sensor");
    assert_eq!(hub.store().device(&other, &dev()).unwrap().name, "Their sensor");

    let mut rule = overheat_rule();
    rule.id = Some(EntityId::from("overheat"));
    hub.add_rule(&org(), rule.clone()).unwrap();
    hub.add_rule(&other, rule).unwrap();

    // Same rule id, device id and event id in both tenants: one alert each.
    for tenant in [org(), other.clone()] {
        let sample = TelemetrySample::new(dev(), "temperature", 40.0, ts(0));
        let report = hub
            .ingest_telemetry(&tenant, sample, Some("evt-1".into()))
            .await
            .unwrap();
        assert_eq!(report.rules.alerts.len(), 1);
        assert_eq!(hub.store().alerts(&tenant).len(), 1);
    }

    // Tombstoning one tenant's device leaves the other's alone.
    hub.delete_device(&other, &dev()).unwrap();
    assert!(hub.store().live_device(&org(), &dev()).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_subscriptions_are_scoped_to_one_organization() {
    let (hub, _) = hub_with(Script::Ack).await;
    let other = EntityId::from("org-2");
    hub.register_organization(Organization::new(other.clone(), "Rival Farms"))
        .unwrap();

    let mut theirs = hub.store().subscribe_devices(&other);
    assert!(theirs.seen().is_empty());

    hub.heartbeat(&org(), &dev()).await.unwrap();
    assert!(theirs.latest().is_empty());

    hub.register_device(&other, RegisterDevice::new("Their sensor", DeviceType::Custom))
        .unwrap();
    let snapshot = theirs.changed().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].organization_id, other);
    assert_eq!(hub.store().subscribe_devices(&org()).latest().len(), 1);
}
