//! The session relay: turns a human wallet session into a JSON-RPC provider
//! callable by an unrelated, asynchronous automation process.
//!
//! Identity methods answer synchronously from the stored account record.
//! Signing methods park the request in the session's single slot and poll
//! the response slot — bounded by `response_timeout` — while the wallet side
//! drains the request, prompts the human, and posts the result. At most one
//! signing call may be in flight per session; a second one is rejected with
//! a `Conflict` error envelope rather than queued.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::rpc::{JsonRpcRequest, JsonRpcResponse, RpcCall, not_implemented};
use crate::session::{Account, BrowserInfo, LogEntry, SessionInfo, SessionStatus};
use crate::store::SessionStore;

/// The relay protocol handler.
pub struct RelayService {
    store: Arc<dyn SessionStore>,
    config: RelayConfig,
}

impl RelayService {
    pub fn new(store: Arc<dyn SessionStore>, config: RelayConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Create a session bound to the given wallet identity.
    pub async fn create_session(
        &self,
        account: Account,
        task: Option<String>,
        browser: Option<BrowserInfo>,
    ) -> Result<Uuid, RelayError> {
        let id = self.store.create_session(account, task, browser).await?;
        tracing::info!(session_id = %id, address = %account.address, chain_id = account.chain_id, "session created");
        Ok(id)
    }

    pub async fn session_info(&self, id: Uuid) -> Result<SessionInfo, RelayError> {
        Ok(self.store.get_session(id).await?)
    }

    /// Handle one JSON-RPC call on behalf of the automation agent.
    ///
    /// Returns `Err` only for transport-level failures (unknown session,
    /// store unavailable). Protocol failures — conflict, timeout, malformed
    /// params — ride in the JSON-RPC error envelope so the agent can parse
    /// them and adapt.
    pub async fn handle_rpc(
        &self,
        id: Uuid,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, RelayError> {
        let info = self.store.get_session(id).await?;
        tracing::debug!(session_id = %id, method = %request.method, "rpc received");

        let call = match RpcCall::classify(&request) {
            Ok(call) => call,
            Err(error) => {
                return Ok(JsonRpcResponse::error(
                    request.id,
                    error.rpc_code(),
                    error.to_string(),
                ));
            }
        };

        let result = match call {
            RpcCall::Account => Value::String(info.address.to_string()),
            RpcCall::Accounts | RpcCall::RequestAccounts => {
                Value::Array(vec![Value::String(info.address.to_string())])
            }
            // Echoed exactly as given at creation; the provider relays it
            // verbatim to the dApp.
            RpcCall::ChainId => Value::from(info.chain_id),
            RpcCall::Unsupported(method) => not_implemented(&method),
            RpcCall::PersonalSign(_) | RpcCall::SendTransaction(_) => {
                return self.relay_to_wallet(id, info.status, request).await;
            }
        };

        Ok(JsonRpcResponse::result(request.id, result))
    }

    /// Park a signing request in the session slot and wait for the wallet
    /// side to post a response.
    async fn relay_to_wallet(
        &self,
        id: Uuid,
        status: SessionStatus,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, RelayError> {
        // A call is outstanding while the slot holds its request AND after
        // the wallet drained the slot but has not answered yet (status still
        // awaiting). Both reject.
        if status == SessionStatus::AwaitingSignature || self.store.has_request(id).await? {
            let error = RelayError::RequestPending(id);
            tracing::warn!(session_id = %id, method = %request.method, "rejecting concurrent signing call");
            return Ok(JsonRpcResponse::error(
                request.id,
                error.rpc_code(),
                error.to_string(),
            ));
        }

        // A response left over from an earlier timed-out call must never be
        // delivered to this one.
        self.store.delete_response(id).await?;

        let rpc_id = request.id.clone();
        let method = request.method.clone();
        self.store.set_request(id, request).await?;
        self.store
            .set_status(id, SessionStatus::AwaitingSignature, None)
            .await?;
        tracing::info!(session_id = %id, %method, "signing request queued for wallet");

        match self.wait_for_response(id).await? {
            Some(result) => {
                self.store
                    .set_status(id, SessionStatus::Active, None)
                    .await?;
                tracing::info!(session_id = %id, %method, "wallet response relayed");
                Ok(JsonRpcResponse::result(rpc_id, result))
            }
            None => {
                // The poller may have drained the request already; clearing
                // both slots is idempotent and leaves the session usable.
                self.store.delete_request(id).await?;
                self.store.delete_response(id).await?;
                self.store
                    .set_status(id, SessionStatus::Active, None)
                    .await?;
                let error = RelayError::ResponseTimeout {
                    session_id: id,
                    timeout_secs: self.config.response_timeout.as_secs(),
                };
                tracing::warn!(session_id = %id, %method, "timed out waiting for wallet response");
                Ok(JsonRpcResponse::error(
                    rpc_id,
                    error.rpc_code(),
                    error.to_string(),
                ))
            }
        }
    }

    /// Poll the response slot until a response arrives or the window closes.
    async fn wait_for_response(&self, id: Uuid) -> Result<Option<Value>, RelayError> {
        let deadline = tokio::time::Instant::now() + self.config.response_timeout;
        loop {
            if let Some(response) = self.store.take_response(id).await? {
                return Ok(Some(response));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wait = self.config.response_poll_interval.min(deadline - now);
            tokio::time::sleep(wait).await;
        }
    }

    /// Drain the pending request, if any. Delete-on-read: the single
    /// accessor for the request slot, so a drained request is never
    /// observed twice.
    pub async fn peek_request(&self, id: Uuid) -> Result<Option<JsonRpcRequest>, RelayError> {
        Ok(self.store.take_request(id).await?)
    }

    /// Deposit the wallet's result for the pending request. A second write
    /// before consumption overwrites.
    pub async fn post_response(&self, id: Uuid, result: Value) -> Result<(), RelayError> {
        self.store.set_response(id, result).await?;
        Ok(())
    }

    /// Append an agent step record; a terminal `done` action flips the
    /// session to `Done` so pollers can stop.
    pub async fn append_log(&self, id: Uuid, entry: LogEntry) -> Result<(), RelayError> {
        let done = entry.done_marker();
        self.store.append_log(id, entry).await?;
        if let Some(success) = done {
            self.store
                .set_status(id, SessionStatus::Done, Some(success))
                .await?;
            tracing::info!(session_id = %id, success, "session reported done");
        }
        Ok(())
    }

    /// Read the agent log in insertion order, seeding the bootstrap entry
    /// for sessions that have not logged anything yet.
    pub async fn get_log(&self, id: Uuid) -> Result<Vec<LogEntry>, RelayError> {
        let log = self.store.get_log(id).await?;
        if log.is_empty() {
            let seed = LogEntry::bootstrap();
            self.store.append_log(id, seed.clone()).await?;
            return Ok(vec![seed]);
        }
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::rpc_code;
    use crate::store::MemoryStore;
    use alloy_primitives::Address;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    const ADDRESS: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

    fn account() -> Account {
        Account {
            address: ADDRESS.parse().unwrap(),
            chain_id: 8453,
        }
    }

    fn fast_config() -> RelayConfig {
        RelayConfig {
            response_timeout: Duration::from_millis(200),
            response_poll_interval: Duration::from_millis(10),
            ..RelayConfig::default()
        }
    }

    fn service(config: RelayConfig) -> (Arc<MemoryStore>, Arc<RelayService>) {
        let store = Arc::new(MemoryStore::new());
        let relay = Arc::new(RelayService::new(store.clone(), config));
        (store, relay)
    }

    fn sign_request(id: u64) -> JsonRpcRequest {
        JsonRpcRequest::new(json!(id), "personal_sign", vec![json!("0x68656c6c6f")])
    }

    async fn new_session(relay: &RelayService) -> Uuid {
        relay.create_session(account(), None, None).await.unwrap()
    }

    #[tokio::test]
    async fn identity_methods_answer_synchronously() {
        let (_, relay) = service(fast_config());
        let id = new_session(&relay).await;

        let resp = relay
            .handle_rpc(id, JsonRpcRequest::new(json!(1), "eth_chainId", vec![]))
            .await
            .unwrap();
        assert_eq!(resp.result, Some(json!(8453)));

        let resp = relay
            .handle_rpc(id, JsonRpcRequest::new(json!(2), "eth_accounts", vec![]))
            .await
            .unwrap();
        let accounts = resp.result.unwrap();
        let listed: Address = accounts[0].as_str().unwrap().parse().unwrap();
        assert_eq!(listed, account().address);

        let resp = relay
            .handle_rpc(id, JsonRpcRequest::new(json!(3), "eth_account", vec![]))
            .await
            .unwrap();
        let single: Address = resp.result.unwrap().as_str().unwrap().parse().unwrap();
        assert_eq!(single, account().address);
    }

    #[tokio::test]
    async fn unknown_methods_get_the_sentinel_result() {
        let (_, relay) = service(fast_config());
        let id = new_session(&relay).await;

        let resp = relay
            .handle_rpc(id, JsonRpcRequest::new(json!(1), "eth_blockNumber", vec![]))
            .await
            .unwrap();
        assert_eq!(
            resp.result,
            Some(json!("NOT IMPLEMENTED: eth_blockNumber"))
        );
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn unknown_session_is_a_transport_error() {
        let (_, relay) = service(fast_config());
        let err = relay
            .handle_rpc(
                Uuid::new_v4(),
                JsonRpcRequest::new(json!(1), "eth_chainId", vec![]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn signing_round_trip_leaves_both_slots_empty() {
        let (store, relay) = service(fast_config());
        let id = new_session(&relay).await;

        let call = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.handle_rpc(id, sign_request(9)).await })
        };

        // Wallet side: drain the request, post the signature.
        let drained = loop {
            if let Some(request) = relay.peek_request(id).await.unwrap() {
                break request;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert_eq!(drained.method, "personal_sign");
        relay.post_response(id, json!("0xsignature")).await.unwrap();

        let resp = call.await.unwrap().unwrap();
        assert_eq!(resp.id, json!(9));
        assert_eq!(resp.result, Some(json!("0xsignature")));

        assert_eq!(relay.peek_request(id).await.unwrap(), None);
        assert_eq!(store.take_response(id).await.unwrap(), None);
        assert_eq!(
            relay.session_info(id).await.unwrap().status,
            SessionStatus::Active
        );
    }

    #[tokio::test]
    async fn second_signing_call_conflicts_while_first_is_pending() {
        let config = RelayConfig {
            response_timeout: Duration::from_secs(5),
            response_poll_interval: Duration::from_millis(10),
            ..RelayConfig::default()
        };
        let (store, relay) = service(config);
        let id = new_session(&relay).await;

        let first = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.handle_rpc(id, sign_request(1)).await })
        };
        while !store.has_request(id).await.unwrap() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let resp = relay.handle_rpc(id, sign_request(2)).await.unwrap();
        let error = resp.error.expect("conflict error");
        assert_eq!(error.code, rpc_code::REQUEST_PENDING);

        // Unblock the first call.
        relay.post_response(id, json!("0xsignature")).await.unwrap();
        let resp = first.await.unwrap().unwrap();
        assert_eq!(resp.result, Some(json!("0xsignature")));
    }

    #[tokio::test]
    async fn timeout_clears_the_slot_for_subsequent_calls() {
        let (store, relay) = service(fast_config());
        let id = new_session(&relay).await;

        let resp = relay.handle_rpc(id, sign_request(1)).await.unwrap();
        assert_eq!(resp.error.unwrap().code, rpc_code::RESPONSE_TIMEOUT);
        assert!(!store.has_request(id).await.unwrap());
        assert_eq!(
            relay.session_info(id).await.unwrap().status,
            SessionStatus::Active
        );

        // A fresh signing call proceeds (and times out again, rather than
        // being rejected as a conflict).
        let resp = relay.handle_rpc(id, sign_request(2)).await.unwrap();
        assert_eq!(resp.error.unwrap().code, rpc_code::RESPONSE_TIMEOUT);
    }

    #[tokio::test]
    async fn stale_response_is_not_delivered_to_a_new_call() {
        let (store, relay) = service(fast_config());
        let id = new_session(&relay).await;

        // A late wallet write lands after its call already timed out.
        store.set_response(id, json!("0xstale")).await.unwrap();

        let call = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.handle_rpc(id, sign_request(3)).await })
        };
        let _ = loop {
            if let Some(request) = relay.peek_request(id).await.unwrap() {
                break request;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        relay.post_response(id, json!("0xfresh")).await.unwrap();

        let resp = call.await.unwrap().unwrap();
        assert_eq!(resp.result, Some(json!("0xfresh")));
    }

    #[tokio::test]
    async fn drained_request_is_not_redelivered() {
        let config = RelayConfig {
            response_timeout: Duration::from_secs(5),
            response_poll_interval: Duration::from_millis(10),
            ..RelayConfig::default()
        };
        let (_, relay) = service(config);
        let id = new_session(&relay).await;

        let call = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.handle_rpc(id, sign_request(1)).await })
        };
        let first = loop {
            if let Some(request) = relay.peek_request(id).await.unwrap() {
                break request;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert_eq!(first.method, "personal_sign");
        assert_eq!(relay.peek_request(id).await.unwrap(), None);

        // The call is still outstanding even though the slot is drained; a
        // concurrent signing call is rejected, not interleaved.
        let resp = relay.handle_rpc(id, sign_request(2)).await.unwrap();
        assert_eq!(resp.error.unwrap().code, rpc_code::REQUEST_PENDING);

        relay.post_response(id, json!("0xsignature")).await.unwrap();
        call.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn done_log_entry_flips_session_status() {
        let (_, relay) = service(fast_config());
        let id = new_session(&relay).await;

        let entry: LogEntry = serde_json::from_value(json!({
            "current_state": { "next_goal": "wrap up" },
            "action": [ { "done": { "success": true } } ]
        }))
        .unwrap();
        relay.append_log(id, entry).await.unwrap();

        let info = relay.session_info(id).await.unwrap();
        assert_eq!(info.status, SessionStatus::Done);
        assert_eq!(info.success, Some(true));
    }

    #[tokio::test]
    async fn empty_log_reads_seed_the_bootstrap_entry() {
        let (_, relay) = service(fast_config());
        let id = new_session(&relay).await;

        let log = relay.get_log(id).await.unwrap();
        assert_eq!(log, vec![LogEntry::bootstrap()]);

        // The seed is persisted, not synthesized per read.
        let log = relay.get_log(id).await.unwrap();
        assert_eq!(log.len(), 1);
    }
}
