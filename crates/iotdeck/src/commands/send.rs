//! `iotdeck send`: dispatch one signed command through a throwaway hub.

use std::sync::Arc;

use url::Url;

use iotdeck_core::{
    AttemptErrorKind, Command, CommandStatus, DeviceType, EntityId, Hub, NewCommand, Organization,
    RegisterDevice,
};

use crate::cli::{GlobalOpts, SendArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

use super::views;

const CLI_ORG: &str = "cli";
const CLI_DEVICE: &str = "target";

/// Parse `--data`: inline JSON, or `@path` to read it from a file.
fn parse_payload(raw: &str) -> Result<serde_json::Value, CliError> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)?,
        None => raw.to_owned(),
    };
    Ok(serde_json::from_str(&text)?)
}

fn parse_header(raw: &str) -> Result<(String, String), CliError> {
    let (name, value) = raw.split_once(':').ok_or_else(|| CliError::Validation {
        field: "header".into(),
        reason: format!("expected NAME:VALUE, got '{raw}'"),
    })?;
    Ok((name.trim().to_owned(), value.trim().to_owned()))
}

fn request_from_args(args: &SendArgs) -> Result<NewCommand, CliError> {
    let mut request = NewCommand::http(CLI_DEVICE, args.method, args.endpoint.clone());
    if let Some(ref data) = args.data {
        request = request.with_payload(parse_payload(data)?);
    }
    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        request = request.with_header(name, value);
    }
    if let Some(retries) = args.max_retries {
        request = request.with_max_retries(retries);
    }
    Ok(request)
}

/// Turn a non-acknowledged outcome into the matching CLI error.
fn outcome_error(cmd: &Command, timeout_ms: u64) -> CliError {
    match cmd.last_error.as_ref().map(|e| e.kind) {
        Some(AttemptErrorKind::AuthRejected) => CliError::AuthRejected,
        Some(AttemptErrorKind::DeviceUnreachable) => CliError::Unreachable {
            device: cmd.device_id.to_string(),
            reason: cmd
                .last_error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default(),
        },
        Some(AttemptErrorKind::Timeout) => CliError::Timeout { millis: timeout_ms },
        _ => CliError::CommandFailed {
            command: cmd.id.to_string(),
            status: cmd.status.to_string(),
            detail: cmd
                .last_error
                .as_ref()
                .map_or_else(|| "no attempt error recorded".into(), ToString::to_string),
        },
    }
}

pub async fn handle(args: SendArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let address: Url = args.url.parse().map_err(|_| CliError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {}", args.url),
    })?;
    let request = request_from_args(&args)?;

    let mut hub_config = config::hub_config(global, true)?;
    // One-shot delivery; nothing to sweep.
    hub_config.liveness.sweep_interval = std::time::Duration::ZERO;
    let timeout_ms = u64::try_from(hub_config.commands.timeout.as_millis()).unwrap_or(u64::MAX);
    let hub = Hub::new(hub_config)?;

    let org = EntityId::from(CLI_ORG);
    hub.register_organization(Organization::new(org.clone(), "iotdeck cli"))?;
    hub.register_device(
        &org,
        RegisterDevice::new(address.to_string(), DeviceType::Custom)
            .with_id(CLI_DEVICE)
            .with_address(address),
    )?;
    hub.start().await?;
    hub.heartbeat(&org, &EntityId::from(CLI_DEVICE)).await?;

    let outcome = send_and_wait(&hub, &org, request).await;
    hub.shutdown().await;
    let cmd = outcome?;

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &cmd,
        |c| views::command_detail(c, color),
        |c| c.status.to_string(),
    )?;
    output::print_output(&out, global.quiet);

    if cmd.status == CommandStatus::Acknowledged {
        Ok(())
    } else {
        Err(outcome_error(&cmd, timeout_ms))
    }
}

async fn send_and_wait(hub: &Hub, org: &EntityId, request: NewCommand) -> Result<Arc<Command>, CliError> {
    let cmd = hub.send_command(org, request).await?;
    tracing::info!(command = %cmd.id, "command queued");
    Ok(hub.wait_for_command(org, &cmd.id).await?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn header_splits_on_first_colon() {
        let (name, value) = parse_header("X-Trace: a:b").unwrap();
        assert_eq!(name, "X-Trace");
        assert_eq!(value, "a:b");
        assert!(parse_header("no-colon").is_err());
    }

    #[test]
    fn inline_payload_is_parsed() {
        let payload = parse_payload(r#"{"on": true}"#).unwrap();
        assert_eq!(payload["on"], serde_json::json!(true));
        assert!(parse_payload("{not json").is_err());
    }
}
