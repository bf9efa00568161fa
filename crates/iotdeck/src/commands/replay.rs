//! `iotdeck replay`: run a scenario file through an in-process hub.
//!
//! A scenario declares organizations, devices and rules, then a list of
//! events applied in order. Rejected events are logged and counted; they do
//! not abort the run.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use iotdeck_core::{
    CoreError, DeviceFilter, DeviceStatus, EntityId, Hub, NewCommand, NewRule, Organization, Plan,
    RegisterDevice, TelemetrySample, TelemetryValue,
};

use crate::cli::{GlobalOpts, ReplayArgs, ReplayView};
use crate::config;
use crate::error::CliError;
use crate::output;

use super::views;

// ── Scenario file ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    organizations: Vec<ScenarioOrganization>,
    #[serde(default)]
    devices: Vec<ScenarioDevice>,
    #[serde(default)]
    rules: Vec<ScenarioRule>,
    #[serde(default)]
    events: Vec<ScenarioEvent>,
}

#[derive(Debug, Deserialize)]
struct ScenarioOrganization {
    id: EntityId,
    name: String,
    #[serde(default)]
    plan: Plan,
}

#[derive(Debug, Deserialize)]
struct ScenarioDevice {
    organization: EntityId,
    #[serde(flatten)]
    device: RegisterDevice,
}

#[derive(Debug, Deserialize)]
struct ScenarioRule {
    organization: EntityId,
    #[serde(flatten)]
    rule: NewRule,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ScenarioEvent {
    Heartbeat {
        organization: EntityId,
        device: EntityId,
    },
    Telemetry {
        organization: EntityId,
        device: EntityId,
        key: String,
        value: TelemetryValue,
        timestamp: DateTime<Utc>,
        #[serde(default)]
        unit: Option<String>,
        #[serde(default)]
        event_id: Option<String>,
    },
    Status {
        organization: EntityId,
        device: EntityId,
        status: DeviceStatus,
    },
    Webhook {
        organization: EntityId,
        name: String,
        #[serde(default)]
        payload: serde_json::Value,
        #[serde(default)]
        device: Option<EntityId>,
        #[serde(default)]
        event_id: Option<String>,
    },
    Schedule {
        organization: EntityId,
        name: String,
        at: DateTime<Utc>,
    },
    Command {
        organization: EntityId,
        request: NewCommand,
    },
    DeleteDevice {
        organization: EntityId,
        device: EntityId,
    },
    /// Run the liveness sweep as if `after_secs` had passed since now.
    /// Liveness follows receipt time, so scenario timestamps do not move it.
    Sweep {
        after_secs: u32,
    },
}

fn load_scenario(path: &Path) -> Result<Scenario, CliError> {
    let text = std::fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        Ok(toml::from_str(&text)?)
    } else {
        Ok(serde_json::from_str(&text)?)
    }
}

// ── Running ─────────────────────────────────────────────────────────

/// Per-run counters not kept by the hub itself.
#[derive(Debug, Default)]
struct RunStats {
    applied: usize,
    rejected: Vec<(usize, String)>,
    actions_failed: usize,
}

async fn setup(hub: &Hub, scenario: &Scenario) -> Result<(), CliError> {
    for entry in &scenario.organizations {
        let mut org = Organization::new(entry.id.clone(), entry.name.clone());
        org.plan = entry.plan;
        hub.register_organization(org)?;
    }
    for entry in &scenario.devices {
        hub.register_device(&entry.organization, entry.device.clone())?;
    }
    for entry in &scenario.rules {
        hub.add_rule(&entry.organization, entry.rule.clone())?;
    }
    hub.start().await?;
    Ok(())
}

/// Apply one event. Returns the number of failed rule actions.
async fn apply(hub: &Hub, event: ScenarioEvent) -> Result<usize, CoreError> {
    let failures = match event {
        ScenarioEvent::Heartbeat {
            organization,
            device,
        } => hub.heartbeat(&organization, &device).await?.rules.failures.len(),
        ScenarioEvent::Telemetry {
            organization,
            device,
            key,
            value,
            timestamp,
            unit,
            event_id,
        } => {
            let mut sample = TelemetrySample::new(device, key, value, timestamp);
            sample.unit = unit;
            let report = hub.ingest_telemetry(&organization, sample, event_id).await?;
            report.rules.failures.len()
        }
        ScenarioEvent::Status {
            organization,
            device,
            status,
        } => hub
            .report_device_status(&organization, &device, status)
            .await?
            .rules
            .failures
            .len(),
        ScenarioEvent::Webhook {
            organization,
            name,
            payload,
            device,
            event_id,
        } => hub
            .push_webhook(&organization, name, payload, device, event_id)
            .await?
            .failures
            .len(),
        ScenarioEvent::Schedule {
            organization,
            name,
            at,
        } => hub.tick_schedule(&organization, name, at).await?.failures.len(),
        ScenarioEvent::Command {
            organization,
            request,
        } => {
            hub.send_command(&organization, request).await?;
            0
        }
        ScenarioEvent::DeleteDevice {
            organization,
            device,
        } => {
            hub.delete_device(&organization, &device)?;
            0
        }
        ScenarioEvent::Sweep { after_secs } => {
            let at = Utc::now() + chrono::Duration::seconds(i64::from(after_secs));
            let flipped = hub.sweep_liveness(at).await;
            tracing::debug!(count = flipped.len(), "liveness sweep");
            0
        }
    };
    Ok(failures)
}

async fn run(hub: &Hub, scenario: Scenario) -> Result<RunStats, CliError> {
    setup(hub, &scenario).await?;
    let orgs: Vec<EntityId> = scenario.organizations.iter().map(|o| o.id.clone()).collect();

    let mut stats = RunStats::default();
    for (index, event) in scenario.events.into_iter().enumerate() {
        match apply(hub, event).await {
            Ok(failures) => {
                stats.applied += 1;
                stats.actions_failed += failures;
            }
            Err(err) => {
                tracing::warn!(event = index, error = %err, "event rejected");
                stats.rejected.push((index, err.to_string()));
            }
        }
    }

    // Let every dispatched command settle before reporting.
    for org in &orgs {
        for cmd in hub.store().commands(org) {
            hub.wait_for_command(org, &cmd.id).await?;
        }
    }
    Ok(stats)
}

// ── Summary view ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct OrgSummary {
    organization: EntityId,
    devices: iotdeck_core::DeviceSummary,
    active_alerts: usize,
    commands: iotdeck_core::CommandStats,
    dead_letters: usize,
}

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Organization")]
    organization: String,
    #[tabled(rename = "Devices")]
    devices: String,
    #[tabled(rename = "Alerts")]
    alerts: usize,
    #[tabled(rename = "Commands")]
    commands: String,
    #[tabled(rename = "Avg Latency")]
    latency: String,
    #[tabled(rename = "Dead Letters")]
    dead_letters: usize,
}

fn summary_row(s: &OrgSummary) -> SummaryRow {
    SummaryRow {
        organization: s.organization.to_string(),
        devices: format!(
            "{} ({} online, {} offline, {} degraded)",
            s.devices.total, s.devices.online, s.devices.offline, s.devices.degraded
        ),
        alerts: s.active_alerts,
        commands: format!(
            "{} ({} ack, {} failed, {} timeout)",
            s.commands.total, s.commands.acknowledged, s.commands.failed, s.commands.timed_out
        ),
        latency: s
            .commands
            .avg_latency_ms
            .map_or_else(|| "-".into(), |ms| format!("{ms:.1}ms")),
        dead_letters: s.dead_letters,
    }
}

fn summarize(hub: &Hub, orgs: &[EntityId]) -> Vec<OrgSummary> {
    let store = hub.store();
    orgs.iter()
        .map(|org| OrgSummary {
            organization: org.clone(),
            devices: store.device_summary(org),
            active_alerts: store.active_alerts(org).len(),
            commands: store.command_stats(org),
            dead_letters: hub.telemetry().dead_letters(org).len(),
        })
        .collect()
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: ReplayArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let scenario = load_scenario(&args.scenario)?;
    let mut orgs: Vec<EntityId> = scenario.organizations.iter().map(|o| o.id.clone()).collect();
    orgs.sort();
    if let Some(ref only) = args.org {
        if !orgs.contains(only) {
            return Err(CliError::NotFound {
                resource_type: "organization".into(),
                identifier: only.to_string(),
            });
        }
        orgs.retain(|o| o == only);
    }

    let mut hub_config = config::hub_config(global, false)?;
    // Scenarios drive liveness through explicit `sweep` events.
    hub_config.liveness.sweep_interval = std::time::Duration::ZERO;
    let hub = Hub::new(hub_config)?;

    let outcome = run(&hub, scenario).await;
    hub.shutdown().await;
    let stats = outcome?;

    if !stats.rejected.is_empty() || stats.actions_failed > 0 {
        tracing::warn!(
            rejected = stats.rejected.len(),
            failed_actions = stats.actions_failed,
            "replay finished with errors"
        );
    }
    for (index, reason) in &stats.rejected {
        if !global.quiet {
            eprintln!("event {index} rejected: {reason}");
        }
    }
    tracing::info!(applied = stats.applied, "replay finished");

    let out = render_view(&hub, &orgs, &args, global)?;
    output::print_output(&out, global.quiet);
    Ok(())
}

fn device_filters(args: &ReplayArgs) -> Vec<DeviceFilter> {
    let mut filters = Vec::new();
    if let Some(status) = args.status {
        filters.push(DeviceFilter::ByStatus(status));
    }
    if let Some(ref needle) = args.search {
        filters.push(DeviceFilter::Search(needle.clone()));
    }
    filters
}

fn render_view(
    hub: &Hub,
    orgs: &[EntityId],
    args: &ReplayArgs,
    global: &GlobalOpts,
) -> Result<String, CliError> {
    let color = output::should_color(&global.color);
    let store = hub.store();
    match args.show {
        ReplayView::Summary => {
            let summaries = summarize(hub, orgs);
            output::render_list(&global.output, &summaries, summary_row, |s| {
                s.organization.to_string()
            })
        }
        ReplayView::Devices => {
            let filters = device_filters(args);
            let devices: Vec<_> = orgs
                .iter()
                .flat_map(|org| {
                    let mut devices = store.devices_matching(org, &filters);
                    devices.sort_by(|a, b| a.id.cmp(&b.id));
                    devices
                })
                .collect();
            output::render_list(
                &global.output,
                &devices,
                |d| views::device_row(d, color),
                |d| d.id.to_string(),
            )
        }
        ReplayView::Alerts => {
            let mut alerts: Vec<_> = orgs.iter().flat_map(|org| store.alerts(org)).collect();
            alerts.sort_by_key(|a| a.created_at);
            output::render_list(
                &global.output,
                &alerts,
                |a| views::alert_row(a, color),
                |a| a.id.to_string(),
            )
        }
        ReplayView::Commands => {
            let mut commands: Vec<_> = orgs.iter().flat_map(|org| store.commands(org)).collect();
            commands.sort_by_key(|c| c.created_at);
            output::render_list(
                &global.output,
                &commands,
                |c| views::command_row(c, color),
                |c| c.id.to_string(),
            )
        }
        ReplayView::DeadLetters => {
            let letters: Vec<_> = orgs
                .iter()
                .flat_map(|org| hub.telemetry().dead_letters(org))
                .collect();
            output::render_list(&global.output, &letters, views::dead_letter_row, |d| {
                d.event_id.clone()
            })
        }
    }
}
