//! Activity probe: live session counts from BigBlueButton servers.
//!
//! BigBlueButton authenticates API calls with a checksum appended to the
//! query string: `sha256(call_name + query_string + shared_secret)`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use vscale_core::config::Secret;
use vscale_core::{ScaleError, ScaleResult, ScaledObject};

/// Reports a workload activity figure for one object.
#[async_trait]
pub trait ActivityProbe: Send + Sync {
    async fn activity(&self, object: &ScaledObject) -> ScaleResult<u64>;
}

/// Sums `participantCount` across all meetings on a server.
pub struct BbbActivityProbe {
    client: reqwest::Client,
    api_token: Secret,
}

impl BbbActivityProbe {
    pub fn new(api_token: Secret, timeout: Duration) -> ScaleResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScaleError::Config(format!("cannot build activity client: {e}")))?;
        Ok(Self { client, api_token })
    }

    async fn participants(&self, host: &str) -> Result<u64, String> {
        let url = signed_url(host, "getMeetings", "", self.api_token.expose());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("unexpected HTTP status {status}"));
        }
        let body = response
            .text()
            .await
            .map_err(|e| format!("cannot read response: {e}"))?;
        parse_meetings(&body)
    }
}

#[async_trait]
impl ActivityProbe for BbbActivityProbe {
    async fn activity(&self, object: &ScaledObject) -> ScaleResult<u64> {
        let participants =
            self.participants(object.name())
                .await
                .map_err(|message| ScaleError::Activity {
                    object: object.name().to_string(),
                    message,
                })?;
        debug!(object = %object.name(), participants, "activity measured");
        Ok(participants)
    }
}

/// Build an API URL with its checksum for the server at `host`.
pub fn signed_url(host: &str, call: &str, query: &str, secret: &str) -> String {
    let checksum = hex::encode(Sha256::digest(format!("{call}{query}{secret}").as_bytes()));
    if query.is_empty() {
        format!("https://{host}/bigbluebutton/api/{call}?checksum={checksum}")
    } else {
        format!("https://{host}/bigbluebutton/api/{call}?{query}&checksum={checksum}")
    }
}

#[derive(Debug, Deserialize)]
struct MeetingsResponse {
    returncode: String,
    #[serde(rename = "messageKey", default)]
    message_key: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    meetings: Meetings,
}

#[derive(Debug, Default, Deserialize)]
struct Meetings {
    #[serde(rename = "meeting", default)]
    meetings: Vec<Meeting>,
}

#[derive(Debug, Deserialize)]
struct Meeting {
    #[serde(rename = "participantCount")]
    participant_count: u64,
}

fn parse_meetings(body: &str) -> Result<u64, String> {
    let response: MeetingsResponse =
        serde_xml_rs::from_str(body).map_err(|e| format!("malformed response: {e}"))?;
    if response.returncode != "SUCCESS" {
        return Err(format!(
            "{}: {}",
            response.message_key.as_deref().unwrap_or(&response.returncode),
            response.message.as_deref().unwrap_or("no message")
        ));
    }
    Ok(response
        .meetings
        .meetings
        .iter()
        .map(|m| m.participant_count)
        .sum())
}
