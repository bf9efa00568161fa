//! `iotdeck sign`: compute the signature headers a device expects.

use serde::Serialize;

use iotdeck_api::{RequestSigner, SIGNATURE_HEADER, TIMESTAMP_HEADER};

use crate::cli::{GlobalOpts, SignArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct SignedRequest {
    method: String,
    endpoint: String,
    timestamp: i64,
    signature: String,
}

fn detail(s: &SignedRequest) -> String {
    format!(
        "{SIGNATURE_HEADER}: {}\n{TIMESTAMP_HEADER}: {}",
        s.signature, s.timestamp
    )
}

pub fn handle(args: &SignArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load(global)?;
    let (name, profile) = config::active_profile(global, &cfg)?;
    let signer = RequestSigner::new(config::signing_secret(global, &profile, &name)?);

    let timestamp = args.timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());
    let method = args.method.to_ascii_uppercase();
    let signed = SignedRequest {
        signature: signer.sign(&method, &args.endpoint, &args.body, timestamp),
        method,
        endpoint: args.endpoint.clone(),
        timestamp,
    };

    let out = output::render_single(&global.output, &signed, detail, |s| s.signature.clone())?;
    output::print_output(&out, global.quiet);
    Ok(())
}
