//! Session domain model: account identity, lifecycle status, and the agent
//! log schema.
//!
//! Agent log entries are parsed with serde at the HTTP boundary. The `done`
//! marker the automation agent emits when it finishes a task is a typed
//! optional field; every other action kind is preserved in a flattened map
//! so dashboards can render steps the relay does not interpret.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wallet identity a session answers for. Set once at creation, immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub address: Address,
    pub chain_id: u64,
}

/// Relay-observed session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No signing request in flight.
    Active,
    /// A signing request is pending a wallet response.
    AwaitingSignature,
    /// The agent reported a terminal `done` action.
    Done,
}

/// Provisioned-browser metadata recorded at session creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserInfo {
    pub browser_session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_view_url: Option<String>,
}

/// Public view of a session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub address: Address,
    pub chain_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_view_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn account(&self) -> Account {
        Account {
            address: self.address,
            chain_id: self.chain_id,
        }
    }
}

/// One agent-reported step record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub current_state: CurrentState,
    #[serde(default)]
    pub action: Vec<AgentAction>,
}

/// The agent's self-assessment attached to each step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_previous_goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_goal: Option<String>,
}

/// One action inside a step. `done` is the only kind the relay interprets;
/// everything else rides in `other`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<DoneMarker>,
    #[serde(flatten)]
    pub other: serde_json::Map<String, Value>,
}

/// Terminal marker: the agent finished, successfully or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneMarker {
    pub success: bool,
}

impl LogEntry {
    /// The `done` flag if this entry carries a terminal action.
    pub fn done_marker(&self) -> Option<bool> {
        self.action
            .iter()
            .find_map(|action| action.done.map(|done| done.success))
    }

    /// The seed entry returned for sessions whose log is still empty, so a
    /// first dashboard poll always has a row to show.
    pub fn bootstrap() -> Self {
        let mut connect = serde_json::Map::new();
        connect.insert(
            "connect".to_string(),
            serde_json::json!({ "type": "chromium" }),
        );
        Self {
            current_state: CurrentState {
                evaluation_previous_goal: Some("Start wallet injected browser".to_string()),
                memory: None,
                next_goal: Some("Connect browser".to_string()),
            },
            action: vec![AgentAction {
                done: None,
                other: connect,
            }],
        }
    }
}
