//! Client for the external browser-provisioning collaborator.
//!
//! The collaborator creates remote, recordable browser sessions and exposes
//! a live-view URL immediately and a recording URL some time after the
//! session ends. It is an opaque HTTP service; only its documented
//! request/response shapes are modeled here. Entirely optional — the relay
//! works without it, sessions just carry no browser metadata.

use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::config::BrowserServiceConfig;
use crate::error::BrowserError;

const API_KEY_HEADER: &str = "anchor-api-key";

/// A remote browser session created by the collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionedBrowser {
    pub id: String,
    #[serde(default)]
    pub live_view_url: Option<String>,
    #[serde(default)]
    pub cdp_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct RecordingData {
    #[serde(default)]
    videos: Vec<String>,
}

/// Typed client of the provisioning service.
#[derive(Debug, Clone)]
pub struct BrowserProvisioner {
    http: reqwest::Client,
    config: BrowserServiceConfig,
}

impl BrowserProvisioner {
    pub fn new(mut config: BrowserServiceConfig) -> Result<Self, BrowserError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        // Joining relative paths replaces the last segment unless the base
        // path ends with a slash.
        if !config.base_url.path().ends_with('/') {
            let path = format!("{}/", config.base_url.path());
            config.base_url.set_path(&path);
        }
        Ok(Self { http, config })
    }

    fn endpoint(&self, path: &str) -> Result<url::Url, BrowserError> {
        self.config
            .base_url
            .join(path)
            .map_err(|e| BrowserError::InvalidResponse(format!("bad endpoint {path}: {e}")))
    }

    /// Create a remote browser session with recording enabled.
    pub async fn create(&self) -> Result<ProvisionedBrowser, BrowserError> {
        let url = self.endpoint("api/sessions")?;
        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, self.config.api_key.expose_secret())
            .json(&serde_json::json!({
                "headless": false,
                "recording": { "active": true },
                "idle_timeout": 1,
                "timeout": 10,
            }))
            .send()
            .await?;
        let response = check(response).await?;
        let envelope: Envelope<ProvisionedBrowser> = response.json().await?;
        tracing::info!(browser_session_id = %envelope.data.id, "provisioned remote browser");
        Ok(envelope.data)
    }

    /// Fetch the recording URL once the collaborator has one. Returns `None`
    /// while the recording is still being produced; callers poll.
    pub async fn recording(&self, browser_session_id: &str) -> Result<Option<String>, BrowserError> {
        let url = self.endpoint(&format!("api/sessions/{browser_session_id}/recording"))?;
        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, self.config.api_key.expose_secret())
            .send()
            .await?;
        if !response.status().is_success() {
            // Not ready yet; the collaborator 404s until the video exists.
            return Ok(None);
        }
        let envelope: Envelope<RecordingData> = response.json().await?;
        Ok(envelope.data.videos.into_iter().next())
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, BrowserError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BrowserError::UnexpectedStatus {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parses_the_session_envelope() {
        let envelope: Envelope<ProvisionedBrowser> = serde_json::from_value(json!({
            "data": {
                "id": "b-123",
                "live_view_url": "https://live.example.org/b-123",
                "cdp_url": "wss://cdp.example.org/b-123"
            }
        }))
        .unwrap();
        assert_eq!(envelope.data.id, "b-123");
        assert_eq!(
            envelope.data.live_view_url.as_deref(),
            Some("https://live.example.org/b-123")
        );
    }

    #[test]
    fn parses_recording_videos_first_wins() {
        let envelope: Envelope<RecordingData> = serde_json::from_value(json!({
            "data": { "videos": ["https://v.example.org/1.mp4", "https://v.example.org/2.mp4"] }
        }))
        .unwrap();
        assert_eq!(
            envelope.data.videos.first().map(String::as_str),
            Some("https://v.example.org/1.mp4")
        );
    }
}
