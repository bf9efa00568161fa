#![allow(clippy::unwrap_used)]
// End-to-end dispatch over the signed HTTP transport, against wiremock.

use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use iotdeck_api::{RequestSigner, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use iotdeck_core::{
    AttemptErrorKind, CommandStatus, DeviceType, EntityId, HttpMethod, Hub, HubConfig, NewCommand,
    Organization, RegisterDevice,
};

const SECRET: &str = "hub-shared-secret";

async fn setup() -> (MockServer, Hub, EntityId, EntityId) {
    let server = MockServer::start().await;

    let mut config = HubConfig::default();
    config.signing_secret = SecretString::from(SECRET.to_owned());
    config.liveness.sweep_interval = Duration::ZERO;
    config.commands.backoff.initial = Duration::from_millis(5);
    config.commands.timeout = Duration::from_secs(2);

    let hub = Hub::new(config).unwrap();
    let org = EntityId::from("org-http");
    hub.register_organization(Organization::new(org.clone(), "Http Org"))
        .unwrap();
    let device = hub
        .register_device(
            &org,
            RegisterDevice::new("relay board", DeviceType::Esp8266)
                .with_address(Url::parse(&server.uri()).unwrap()),
        )
        .unwrap();
    hub.start().await.unwrap();
    hub.heartbeat(&org, &device.id).await.unwrap();

    (server, hub, org, device.id.clone())
}

#[tokio::test]
async fn test_signed_command_is_acknowledged() {
    let (server, hub, org, device) = setup().await;

    Mock::given(method("POST"))
        .and(path("/relay"))
        .and(header_exists(SIGNATURE_HEADER))
        .and(header_exists(TIMESTAMP_HEADER))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "on" })))
        .expect(1)
        .mount(&server)
        .await;

    let cmd = hub
        .send_command(
            &org,
            NewCommand::http(device, HttpMethod::Post, "/relay").with_payload(json!({ "on": true })),
        )
        .await
        .unwrap();
    let done = hub.wait_for_command(&org, &cmd.id).await.unwrap();
    assert_eq!(done.status, CommandStatus::Acknowledged);
    assert_eq!(done.response_status, Some(200));

    let received = server.received_requests().await.unwrap();
    let request = &received[0];
    let signature = request.headers.get(SIGNATURE_HEADER).unwrap().to_str().unwrap();
    let timestamp: i64 = request
        .headers
        .get(TIMESTAMP_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let body = String::from_utf8(request.body.clone()).unwrap();

    let signer = RequestSigner::new(SecretString::from(SECRET.to_owned()));
    assert!(signer.verify("POST", "/relay", &body, timestamp, signature));
    let impostor = RequestSigner::new(SecretString::from("wrong".to_owned()));
    assert!(!impostor.verify("POST", "/relay", &body, timestamp, signature));

    hub.shutdown().await;
}

#[tokio::test]
async fn test_rejected_signature_is_retried_then_failed() {
    let (server, hub, org, device) = setup().await;

    Mock::given(method("POST"))
        .and(path("/relay"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let cmd = hub
        .send_command(
            &org,
            NewCommand::http(device, HttpMethod::Post, "/relay").with_max_retries(2),
        )
        .await
        .unwrap();
    let done = hub.wait_for_command(&org, &cmd.id).await.unwrap();

    assert_eq!(done.status, CommandStatus::Failed);
    assert_eq!(done.attempts, 2);
    assert_eq!(
        done.last_error.as_ref().map(|e| e.kind),
        Some(AttemptErrorKind::AuthRejected)
    );

    hub.shutdown().await;
}

#[tokio::test]
async fn test_device_error_status_is_classified() {
    let (server, hub, org, device) = setup().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(500).set_body_string("relay stuck"))
        .mount(&server)
        .await;

    let cmd = hub
        .send_command(
            &org,
            NewCommand::http(device, HttpMethod::Get, "/status").with_max_retries(1),
        )
        .await
        .unwrap();
    let done = hub.wait_for_command(&org, &cmd.id).await.unwrap();

    assert_eq!(done.status, CommandStatus::Failed);
    assert_eq!(
        done.last_error.as_ref().map(|e| e.kind),
        Some(AttemptErrorKind::DeviceError)
    );

    hub.shutdown().await;
}
