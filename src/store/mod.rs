//! Session store: account records, the single-slot request/response handoff,
//! and the append-only agent log.
//!
//! The store is the only shared mutable resource in the system. Operations on
//! one session are serialized through the store lock, so a slot can never be
//! observed half-written and a late response write cannot interleave with the
//! relay's timeout cleanup. Sessions are independent of each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::rpc::JsonRpcRequest;
use crate::session::{Account, BrowserInfo, LogEntry, SessionInfo, SessionStatus};

/// Key-addressable persistence for sessions.
///
/// `take_*` is the sole draining accessor for each slot: it reads and deletes
/// under a single lock acquisition, so a drained request can never be
/// observed twice. Deleting an absent slot is a no-op; operating on an
/// unknown session fails with `SessionNotFound`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(
        &self,
        account: Account,
        task: Option<String>,
        browser: Option<BrowserInfo>,
    ) -> Result<Uuid, StoreError>;

    async fn get_session(&self, id: Uuid) -> Result<SessionInfo, StoreError>;

    async fn set_request(&self, id: Uuid, request: JsonRpcRequest) -> Result<(), StoreError>;
    async fn take_request(&self, id: Uuid) -> Result<Option<JsonRpcRequest>, StoreError>;
    async fn has_request(&self, id: Uuid) -> Result<bool, StoreError>;
    async fn delete_request(&self, id: Uuid) -> Result<(), StoreError>;

    async fn set_response(&self, id: Uuid, response: Value) -> Result<(), StoreError>;
    async fn take_response(&self, id: Uuid) -> Result<Option<Value>, StoreError>;
    async fn delete_response(&self, id: Uuid) -> Result<(), StoreError>;

    async fn append_log(&self, id: Uuid, entry: LogEntry) -> Result<(), StoreError>;
    async fn get_log(&self, id: Uuid) -> Result<Vec<LogEntry>, StoreError>;

    async fn set_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        success: Option<bool>,
    ) -> Result<(), StoreError>;

    /// Delete sessions idle longer than `ttl`; returns how many were removed.
    async fn sweep_idle(&self, ttl: Duration) -> Result<usize, StoreError>;
}

#[derive(Debug)]
struct SessionRecord {
    account: Account,
    task: Option<String>,
    browser: Option<BrowserInfo>,
    request: Option<JsonRpcRequest>,
    response: Option<Value>,
    log: Vec<LogEntry>,
    status: SessionStatus,
    success: Option<bool>,
    created_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
}

impl SessionRecord {
    fn info(&self) -> SessionInfo {
        SessionInfo {
            address: self.account.address,
            chain_id: self.account.chain_id,
            task: self.task.clone(),
            status: self.status,
            success: self.success,
            browser_session_id: self
                .browser
                .as_ref()
                .map(|b| b.browser_session_id.clone()),
            live_view_url: self.browser.as_ref().and_then(|b| b.live_view_url.clone()),
            created_at: self.created_at,
            last_active_at: self.last_active_at,
        }
    }
}

/// In-memory store backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<Uuid, SessionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `sweep_idle` on a fixed interval until the handle is aborted.
    pub fn spawn_sweeper(
        store: Arc<Self>,
        interval: Duration,
        ttl: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.sweep_idle(ttl).await {
                    Ok(0) => {}
                    Ok(swept) => tracing::debug!(swept, "garbage-collected idle sessions"),
                    Err(error) => tracing::warn!(%error, "session sweep failed"),
                }
            }
        })
    }

    /// Run `op` against the session's record under the write lock, refreshing
    /// `last_active_at`.
    async fn with_session<T>(
        &self,
        id: Uuid,
        op: impl FnOnce(&mut SessionRecord) -> T,
    ) -> Result<T, StoreError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .get_mut(&id)
            .ok_or(StoreError::SessionNotFound(id))?;
        record.last_active_at = Utc::now();
        Ok(op(record))
    }

    #[cfg(test)]
    async fn backdate(&self, id: Uuid, age: Duration) {
        let mut sessions = self.sessions.write().await;
        if let Some(record) = sessions.get_mut(&id) {
            record.last_active_at =
                Utc::now() - chrono::Duration::from_std(age).expect("age fits");
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(
        &self,
        account: Account,
        task: Option<String>,
        browser: Option<BrowserInfo>,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let record = SessionRecord {
            account,
            task,
            browser,
            request: None,
            response: None,
            log: Vec::new(),
            status: SessionStatus::Active,
            success: None,
            created_at: now,
            last_active_at: now,
        };
        self.sessions.write().await.insert(id, record);
        Ok(id)
    }

    async fn get_session(&self, id: Uuid) -> Result<SessionInfo, StoreError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&id)
            .map(SessionRecord::info)
            .ok_or(StoreError::SessionNotFound(id))
    }

    async fn set_request(&self, id: Uuid, request: JsonRpcRequest) -> Result<(), StoreError> {
        self.with_session(id, |record| record.request = Some(request))
            .await
    }

    async fn take_request(&self, id: Uuid) -> Result<Option<JsonRpcRequest>, StoreError> {
        self.with_session(id, |record| record.request.take()).await
    }

    async fn has_request(&self, id: Uuid) -> Result<bool, StoreError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&id)
            .map(|record| record.request.is_some())
            .ok_or(StoreError::SessionNotFound(id))
    }

    async fn delete_request(&self, id: Uuid) -> Result<(), StoreError> {
        self.with_session(id, |record| {
            record.request = None;
        })
        .await
    }

    async fn set_response(&self, id: Uuid, response: Value) -> Result<(), StoreError> {
        self.with_session(id, |record| record.response = Some(response))
            .await
    }

    async fn take_response(&self, id: Uuid) -> Result<Option<Value>, StoreError> {
        self.with_session(id, |record| record.response.take()).await
    }

    async fn delete_response(&self, id: Uuid) -> Result<(), StoreError> {
        self.with_session(id, |record| {
            record.response = None;
        })
        .await
    }

    async fn append_log(&self, id: Uuid, entry: LogEntry) -> Result<(), StoreError> {
        self.with_session(id, |record| record.log.push(entry)).await
    }

    async fn get_log(&self, id: Uuid) -> Result<Vec<LogEntry>, StoreError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&id)
            .map(|record| record.log.clone())
            .ok_or(StoreError::SessionNotFound(id))
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        success: Option<bool>,
    ) -> Result<(), StoreError> {
        self.with_session(id, |record| {
            record.status = status;
            if success.is_some() {
                record.success = success;
            }
        })
        .await
    }

    async fn sweep_idle(&self, ttl: Duration) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, record| {
            now.signed_duration_since(record.last_active_at)
                .to_std()
                .map(|idle| idle <= ttl)
                .unwrap_or(true)
        });
        Ok(before - sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn account() -> Account {
        Account {
            address: "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
                .parse()
                .unwrap(),
            chain_id: 8453,
        }
    }

    fn request() -> JsonRpcRequest {
        JsonRpcRequest::new(json!(1), "personal_sign", vec![json!("0x68656c6c6f")])
    }

    #[tokio::test]
    async fn account_record_is_immutable_across_slot_traffic() {
        let store = MemoryStore::new();
        let id = store.create_session(account(), None, None).await.unwrap();

        store.set_request(id, request()).await.unwrap();
        store.set_response(id, json!("0xsig")).await.unwrap();
        store.take_request(id).await.unwrap();
        store.take_response(id).await.unwrap();

        let info = store.get_session(id).await.unwrap();
        assert_eq!(info.account(), account());
    }

    #[tokio::test]
    async fn take_request_drains_the_slot() {
        let store = MemoryStore::new();
        let id = store.create_session(account(), None, None).await.unwrap();
        store.set_request(id, request()).await.unwrap();

        assert!(store.has_request(id).await.unwrap());
        assert_eq!(store.take_request(id).await.unwrap(), Some(request()));
        assert_eq!(store.take_request(id).await.unwrap(), None);
        assert!(!store.has_request(id).await.unwrap());
    }

    #[tokio::test]
    async fn deletes_on_empty_slots_are_noops() {
        let store = MemoryStore::new();
        let id = store.create_session(account(), None, None).await.unwrap();

        store.delete_request(id).await.unwrap();
        store.delete_response(id).await.unwrap();

        // The session is still fully usable afterwards.
        store.set_request(id, request()).await.unwrap();
        assert!(store.has_request(id).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_sessions_fail_with_not_found() {
        let store = MemoryStore::new();
        let missing = Uuid::new_v4();
        assert!(matches!(
            store.get_session(missing).await,
            Err(StoreError::SessionNotFound(id)) if id == missing
        ));
        assert!(store.take_request(missing).await.is_err());
    }

    #[tokio::test]
    async fn log_preserves_insertion_order() {
        let store = MemoryStore::new();
        let id = store.create_session(account(), None, None).await.unwrap();

        for goal in ["open dapp", "connect wallet", "sign"] {
            let entry: LogEntry = serde_json::from_value(json!({
                "current_state": { "next_goal": goal },
                "action": []
            }))
            .unwrap();
            store.append_log(id, entry).await.unwrap();
        }

        let log = store.get_log(id).await.unwrap();
        let goals: Vec<_> = log
            .iter()
            .map(|entry| entry.current_state.next_goal.clone().unwrap())
            .collect();
        assert_eq!(goals, vec!["open dapp", "connect wallet", "sign"]);
    }

    #[tokio::test]
    async fn sweeper_removes_idle_sessions_only() {
        let store = MemoryStore::new();
        let idle = store.create_session(account(), None, None).await.unwrap();
        let active = store.create_session(account(), None, None).await.unwrap();
        store.backdate(idle, Duration::from_secs(7200)).await;

        let swept = store.sweep_idle(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(swept, 1);
        assert!(store.get_session(idle).await.is_err());
        assert!(store.get_session(active).await.is_ok());
    }
}
