//! Startup status query.
//!
//! `GET {api_base}/api/status` answers `{ "has_patient": bool }` and only
//! decides the initial mode. Anything other than a boolean `true`,
//! including network failures, is read as `false`.

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Read;
use std::time::Duration;

const MAX_STATUS_BYTES: u64 = 64 * 1024;
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub has_patient: bool,
}

/// Interpret a status body. Never fails.
pub fn parse_status(body: &[u8]) -> ServiceStatus {
    let has_patient = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("has_patient").and_then(serde_json::Value::as_bool))
        .unwrap_or(false);
    ServiceStatus { has_patient }
}

/// Query the status endpoint. Errors only for transport problems.
pub fn try_fetch_status(api_base: &str) -> Result<ServiceStatus> {
    let url = format!("{}/api/status", api_base.trim_end_matches('/'));
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(STATUS_TIMEOUT)
        .timeout_read(STATUS_TIMEOUT)
        .build();
    let response = agent
        .get(&url)
        .call()
        .with_context(|| format!("GET {}", url))?;

    let mut body = Vec::new();
    response
        .into_reader()
        .take(MAX_STATUS_BYTES)
        .read_to_end(&mut body)
        .with_context(|| format!("read body of {}", url))?;
    Ok(parse_status(&body))
}

/// Query the status endpoint, logging and defaulting on failure.
pub fn fetch_status(api_base: &str) -> ServiceStatus {
    match try_fetch_status(api_base) {
        Ok(status) => {
            log::info!("status: has_patient={}", status.has_patient);
            status
        }
        Err(e) => {
            log::warn!("status: query failed ({:#}); assuming no patient", e);
            ServiceStatus::default()
        }
    }
}
