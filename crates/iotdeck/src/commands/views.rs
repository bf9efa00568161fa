//! Table rows and detail views shared by the command handlers.

use std::sync::Arc;

use tabled::Tabled;

use iotdeck_core::{Alert, Command, CommandStatus, DeadLetter, Device, DeviceStatus, Severity};

use crate::output::{Tone, paint};

fn dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".into(), |v| v.to_string())
}

// ── Devices ─────────────────────────────────────────────────────────

#[derive(Tabled)]
pub struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    dtype: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Last Seen")]
    last_seen: String,
}

pub fn device_row(d: &Arc<Device>, color: bool) -> DeviceRow {
    let tone = match d.status {
        DeviceStatus::Online => Tone::Good,
        DeviceStatus::Warning => Tone::Warn,
        DeviceStatus::Error => Tone::Bad,
        DeviceStatus::Offline => Tone::Muted,
    };
    let status = if d.is_deleted() {
        paint("deleted", Tone::Muted, color)
    } else {
        paint(&d.status.to_string(), tone, color)
    };
    DeviceRow {
        id: d.id.to_string(),
        name: d.name.clone(),
        dtype: d.device_type.to_string(),
        status,
        last_seen: dash(d.last_seen.map(|t| t.format("%Y-%m-%d %H:%M:%S"))),
    }
}

// ── Commands ────────────────────────────────────────────────────────

#[derive(Tabled)]
pub struct CommandRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Request")]
    request: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Attempts")]
    attempts: String,
    #[tabled(rename = "Origin")]
    origin: String,
}

fn status_tone(status: CommandStatus) -> Tone {
    match status {
        CommandStatus::Acknowledged => Tone::Good,
        CommandStatus::Pending | CommandStatus::Sent => Tone::Warn,
        CommandStatus::Failed | CommandStatus::Timeout => Tone::Bad,
    }
}

pub fn command_row(c: &Arc<Command>, color: bool) -> CommandRow {
    CommandRow {
        id: c.id.to_string(),
        device: c.device_id.to_string(),
        request: format!("{} {}", c.method, c.endpoint),
        status: paint(&c.status.to_string(), status_tone(c.status), color),
        attempts: format!("{}/{}", c.attempts, c.max_retries),
        origin: c.origin.to_string(),
    }
}

pub fn command_detail(c: &Arc<Command>, color: bool) -> String {
    let mut lines = vec![
        format!("ID:        {}", c.id),
        format!("Device:    {}", c.device_id),
        format!("Request:   {} {}", c.method, c.endpoint),
        format!("Status:    {}", paint(&c.status.to_string(), status_tone(c.status), color)),
        format!("Attempts:  {}/{}", c.attempts, c.max_retries),
        format!("HTTP:      {}", dash(c.response_status)),
        format!("Latency:   {}", dash(c.latency_ms.map(|ms| format!("{ms}ms")))),
    ];
    if let Some(ref failure) = c.failure {
        lines.push(format!("Failure:   {failure}"));
    }
    if let Some(ref err) = c.last_error {
        lines.push(format!("Error:     {err}"));
    }
    lines.join("\n")
}

// ── Alerts ──────────────────────────────────────────────────────────

#[derive(Tabled)]
pub struct AlertRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "State")]
    state: String,
}

pub fn alert_row(a: &Arc<Alert>, color: bool) -> AlertRow {
    let tone = match a.severity {
        Severity::Critical => Tone::Bad,
        Severity::Warning => Tone::Warn,
        Severity::Info => Tone::Muted,
    };
    let state = if a.dismissed {
        "dismissed"
    } else if a.acknowledged {
        "acknowledged"
    } else {
        "open"
    };
    AlertRow {
        id: a.id.to_string(),
        severity: paint(&a.severity.to_string(), tone, color),
        device: dash(a.device_id.as_ref()),
        message: a.message.clone(),
        state: state.into(),
    }
}

// ── Dead letters ────────────────────────────────────────────────────

#[derive(Tabled)]
pub struct DeadLetterRow {
    #[tabled(rename = "Event")]
    event: String,
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Sample At")]
    at: String,
    #[tabled(rename = "Series Tail")]
    tail: String,
}

pub fn dead_letter_row(d: &DeadLetter) -> DeadLetterRow {
    DeadLetterRow {
        event: d.event_id.clone(),
        device: d.sample.device_id.to_string(),
        key: d.sample.key.clone(),
        at: d.sample.timestamp.to_rfc3339(),
        tail: d.tail.to_rfc3339(),
    }
}
