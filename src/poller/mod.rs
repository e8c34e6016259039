//! Wallet-side poller: the loop that runs next to the actual signing
//! capability.
//!
//! Each cycle fetches the agent log (stopping on a terminal `done` entry),
//! drains the pending request if one exists, executes it against the
//! [`WalletSigner`], and posts the result back. Cycles never overlap — the
//! next poll is scheduled only after the current one fully completes — and
//! [`PollerSet`] guarantees at most one live poller per session.
//!
//! Every signature prompt is a human-in-the-loop consent moment, so the
//! poller emits [`PollerEvent`]s on a broadcast channel for embedding UIs to
//! render pending/success/failure notifications.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::client::RelayClient;
use crate::config::PollerConfig;
use crate::error::{PollerError, SignerError};
use crate::rpc::{JsonRpcRequest, RpcCall};
use crate::wallet::WalletSigner;

/// Human-facing poller notifications.
#[derive(Debug, Clone)]
pub enum PollerEvent {
    /// A signing request was drained and is about to prompt the wallet.
    RequestReceived { method: String },
    /// The wallet produced a result.
    Signed { method: String },
    /// The wallet failed or the user rejected; the error string was
    /// forwarded to the agent as the call's result.
    SignFailed { method: String, error: String },
    /// The agent reported done; polling stopped.
    SessionDone { success: bool },
}

/// Why and how a poll loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    /// The agent's reported success flag, if the session reached `done`.
    pub success: Option<bool>,
    /// Completed poll cycles.
    pub cycles: u64,
}

/// Polls one session on behalf of a wallet.
pub struct WalletPoller<S> {
    client: RelayClient,
    signer: S,
    config: PollerConfig,
    events: broadcast::Sender<PollerEvent>,
}

impl<S: WalletSigner> WalletPoller<S> {
    pub fn new(client: RelayClient, signer: S, config: PollerConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            client,
            signer,
            config,
            events,
        }
    }

    /// Subscribe to human-facing notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PollerEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: PollerEvent) {
        // Nobody listening is fine; events are advisory.
        let _ = self.events.send(event);
    }

    /// Poll until the session reports done or `max_cycles` is reached.
    pub async fn run(&self, session_id: Uuid) -> Result<PollOutcome, PollerError> {
        let mut cycles = 0u64;
        loop {
            let log = self.client.get_log(session_id).await?;
            if let Some(success) = log.iter().rev().find_map(|entry| entry.done_marker()) {
                tracing::info!(session_id = %session_id, success, "session done, stopping poller");
                self.emit(PollerEvent::SessionDone { success });
                return Ok(PollOutcome {
                    success: Some(success),
                    cycles,
                });
            }

            if let Some(request) = self.client.peek_request(session_id).await? {
                tracing::info!(session_id = %session_id, method = %request.method, "signing request drained");
                self.emit(PollerEvent::RequestReceived {
                    method: request.method.clone(),
                });
                let result = self.execute(&request).await;
                self.client.post_response(session_id, result).await?;
            }

            cycles += 1;
            if let Some(max) = self.config.max_cycles
                && cycles >= max
            {
                return Ok(PollOutcome {
                    success: None,
                    cycles,
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Acquire the session's single-flight slot in `set`, then poll.
    pub async fn run_guarded(
        &self,
        set: &Arc<PollerSet>,
        session_id: Uuid,
    ) -> Result<PollOutcome, PollerError> {
        let _guard = set.try_acquire(session_id)?;
        self.run(session_id).await
    }

    /// Execute one drained request. Wallet failures become result strings
    /// the agent can parse, never transport errors.
    async fn execute(&self, request: &JsonRpcRequest) -> Value {
        let method = request.method.clone();
        match self.dispatch(request).await {
            Ok(value) => {
                self.emit(PollerEvent::Signed { method });
                value
            }
            Err(error) => {
                tracing::warn!(method = %request.method, %error, "wallet dispatch failed");
                self.emit(PollerEvent::SignFailed {
                    method,
                    error: error.to_string(),
                });
                Value::String(format!("Error: {error}"))
            }
        }
    }

    async fn dispatch(&self, request: &JsonRpcRequest) -> Result<Value, SignerError> {
        let call = RpcCall::classify(request)
            .map_err(|error| SignerError::InvalidParams(error.to_string()))?;
        match call {
            RpcCall::PersonalSign(params) => {
                let message = params
                    .message_bytes()
                    .map_err(|error| SignerError::InvalidParams(error.to_string()))?;
                let signature = self.signer.personal_sign(&message).await?;
                Ok(Value::String(signature))
            }
            RpcCall::SendTransaction(tx) => {
                let hash = self.signer.send_transaction(&tx).await?;
                Ok(Value::String(hash))
            }
            _ => Err(SignerError::Unsupported(request.method.clone())),
        }
    }
}

/// Single-flight registry: at most one live poller per session.
#[derive(Debug, Default)]
pub struct PollerSet {
    active: Mutex<HashSet<Uuid>>,
}

impl PollerSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the session's poll slot, failing if another poller holds it.
    /// The slot frees when the returned guard drops.
    pub fn try_acquire(self: &Arc<Self>, session_id: Uuid) -> Result<PollerGuard, PollerError> {
        let mut active = lock(&self.active);
        if !active.insert(session_id) {
            return Err(PollerError::AlreadyPolling(session_id));
        }
        Ok(PollerGuard {
            set: Arc::clone(self),
            session_id,
        })
    }
}

/// Holds a session's poll slot; releases it on drop.
#[derive(Debug)]
pub struct PollerGuard {
    set: Arc<PollerSet>,
    session_id: Uuid,
}

impl Drop for PollerGuard {
    fn drop(&mut self) {
        lock(&self.set.active).remove(&self.session_id);
    }
}

fn lock(active: &Mutex<HashSet<Uuid>>) -> std::sync::MutexGuard<'_, HashSet<Uuid>> {
    match active.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use url::Url;

    struct MockSigner;

    #[async_trait]
    impl WalletSigner for MockSigner {
        fn address(&self) -> Address {
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
                .parse()
                .unwrap()
        }

        async fn personal_sign(&self, message: &[u8]) -> Result<String, SignerError> {
            Ok(format!("0xsigned:{}", String::from_utf8_lossy(message)))
        }

        async fn send_transaction(
            &self,
            _tx: &crate::rpc::TransactionRequest,
        ) -> Result<String, SignerError> {
            Err(SignerError::Rejected)
        }
    }

    fn poller() -> WalletPoller<MockSigner> {
        let client = RelayClient::new(Url::parse("http://127.0.0.1:9").unwrap()).unwrap();
        WalletPoller::new(client, MockSigner, PollerConfig::default())
    }

    #[tokio::test]
    async fn personal_sign_dispatches_decoded_message_bytes() {
        let poller = poller();
        let request =
            JsonRpcRequest::new(json!(1), "personal_sign", vec![json!("0x68656c6c6f")]);
        let result = poller.execute(&request).await;
        assert_eq!(result, json!("0xsigned:hello"));
    }

    #[tokio::test]
    async fn wallet_failures_become_result_strings() {
        let poller = poller();
        let request = JsonRpcRequest::new(
            json!(2),
            "eth_sendTransaction",
            vec![json!({ "to": "0x70997970C51812dc3A010C7d01b50e0d17dc79C8" })],
        );
        let result = poller.execute(&request).await;
        assert_eq!(result, json!("Error: User rejected the request"));
    }

    #[tokio::test]
    async fn non_signing_methods_reaching_the_wallet_are_unsupported() {
        let poller = poller();
        let request = JsonRpcRequest::new(json!(3), "eth_accounts", vec![]);
        let result = poller.execute(&request).await;
        assert_eq!(
            result,
            json!("Error: Unsupported operation: eth_accounts")
        );
    }

    #[tokio::test]
    async fn poller_events_surface_prompt_and_failure() {
        let poller = poller();
        let mut events = poller.subscribe();

        let request = JsonRpcRequest::new(json!(4), "personal_sign", vec![json!("0x00")]);
        poller.emit(PollerEvent::RequestReceived {
            method: request.method.clone(),
        });
        poller.execute(&request).await;

        assert!(matches!(
            events.recv().await.unwrap(),
            PollerEvent::RequestReceived { .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            PollerEvent::Signed { .. }
        ));
    }

    #[test]
    fn poller_set_is_single_flight_per_session() {
        let set = PollerSet::new();
        let session = Uuid::new_v4();
        let other = Uuid::new_v4();

        let guard = set.try_acquire(session).unwrap();
        assert!(matches!(
            set.try_acquire(session),
            Err(PollerError::AlreadyPolling(id)) if id == session
        ));
        // Other sessions are unaffected.
        let _other_guard = set.try_acquire(other).unwrap();

        drop(guard);
        let _reacquired = set.try_acquire(session).unwrap();
    }
}
