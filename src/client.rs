//! Typed HTTP client of the relay wire protocol.
//!
//! Used by the wallet-side poller, the `poll` CLI command, and the
//! integration tests. Signing calls can legitimately block for tens of
//! seconds while a human reviews the wallet prompt, so the client's own
//! timeout is set well above the relay's response window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::error::ClientError;
use crate::rpc::{JsonRpcRequest, JsonRpcResponse};
use crate::server::types::{
    CreateSessionRequest, CreateSessionResponse, LogsResponse, PostResponseRequest,
};
use crate::session::{Account, LogEntry, SessionInfo};

const CLIENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Client of one relay instance.
#[derive(Debug, Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    base_url: Url,
    next_id: std::sync::Arc<AtomicU64>,
}

impl RelayClient {
    pub fn new(base_url: Url) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()?;
        Self::with_client(http, base_url)
    }

    pub fn with_client(http: reqwest::Client, mut base_url: Url) -> Result<Self, ClientError> {
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }
        // Joining relative paths replaces the last segment unless the base
        // path ends with a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http,
            base_url,
            next_id: std::sync::Arc::new(AtomicU64::new(1)),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))
    }

    /// `POST /session` — create a session for the given wallet identity.
    pub async fn create_session(
        &self,
        account: Account,
        task: Option<String>,
    ) -> Result<Uuid, ClientError> {
        let url = self.endpoint("session")?;
        let body = CreateSessionRequest {
            address: account.address,
            chain_id: account.chain_id,
            task,
        };
        let response = self.http.post(url).json(&body).send().await?;
        let created: CreateSessionResponse = decode(response).await?;
        Ok(created.session_id)
    }

    /// `POST /session/{id}` — send a raw JSON-RPC request.
    pub async fn rpc(
        &self,
        session_id: Uuid,
        request: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse, ClientError> {
        let url = self.endpoint(&format!("session/{session_id}"))?;
        let response = self.http.post(url).json(request).send().await?;
        decode(response).await
    }

    /// Convenience wrapper over [`rpc`](Self::rpc): builds the envelope,
    /// unwraps the result, and turns envelope errors into [`ClientError::Rpc`].
    pub async fn call(
        &self,
        session_id: Uuid,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(Value::from(id), method, params);
        let response = self.rpc(session_id, &request).await?;
        if let Some(error) = response.error {
            return Err(ClientError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// `GET /session/{id}/request` — drain the pending request, if any.
    /// Delete-on-read: a drained request will not be served again.
    pub async fn peek_request(
        &self,
        session_id: Uuid,
    ) -> Result<Option<JsonRpcRequest>, ClientError> {
        let url = self.endpoint(&format!("session/{session_id}/request"))?;
        let response = self.http.get(url).send().await?;
        let value: Value = decode(response).await?;
        if value.get("method").is_some() {
            let request = serde_json::from_value(value).map_err(|e| ClientError::Decode {
                url: format!("session/{session_id}/request"),
                message: e.to_string(),
            })?;
            Ok(Some(request))
        } else {
            Ok(None)
        }
    }

    /// `POST /session/{id}/response` — deposit the wallet's result.
    pub async fn post_response(&self, session_id: Uuid, result: Value) -> Result<(), ClientError> {
        let url = self.endpoint(&format!("session/{session_id}/response"))?;
        let response = self
            .http
            .post(url)
            .json(&PostResponseRequest { result })
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    /// `POST /session/{id}/log` — append an agent step record.
    pub async fn append_log(&self, session_id: Uuid, entry: &LogEntry) -> Result<(), ClientError> {
        let url = self.endpoint(&format!("session/{session_id}/log"))?;
        let response = self.http.post(url).json(entry).send().await?;
        check(response).await?;
        Ok(())
    }

    /// `GET /session/{id}/log` — the agent log in insertion order.
    pub async fn get_log(&self, session_id: Uuid) -> Result<Vec<LogEntry>, ClientError> {
        let url = self.endpoint(&format!("session/{session_id}/log"))?;
        let response = self.http.get(url).send().await?;
        let logs: LogsResponse = decode(response).await?;
        Ok(logs.logs)
    }

    /// `GET /session/{id}` — current session info.
    pub async fn session_info(&self, session_id: Uuid) -> Result<SessionInfo, ClientError> {
        let url = self.endpoint(&format!("session/{session_id}"))?;
        let response = self.http.get(url).send().await?;
        decode(response).await
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::UnexpectedStatus {
        status: status.as_u16(),
        url,
        body,
    })
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let response = check(response).await?;
    let url = response.url().to_string();
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ClientError::Decode {
        url,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_urls_are_normalized_for_joining() {
        let client = RelayClient::new(Url::parse("http://localhost:3000").unwrap()).unwrap();
        assert_eq!(
            client.endpoint("session/abc").unwrap().as_str(),
            "http://localhost:3000/session/abc"
        );

        let client = RelayClient::new(Url::parse("http://localhost:3000/relay").unwrap()).unwrap();
        assert_eq!(
            client.endpoint("session/abc").unwrap().as_str(),
            "http://localhost:3000/relay/session/abc"
        );
    }

    #[test]
    fn rejects_non_base_urls() {
        let err = RelayClient::new(Url::parse("mailto:ops@example.org").unwrap()).unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl(_)));
    }
}
