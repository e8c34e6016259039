//! Error types for walletbridge.

use uuid::Uuid;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Poller error: {0}")]
    Poller(#[from] PollerError),

    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),

    #[error("Browser provisioning error: {0}")]
    Browser(#[from] BrowserError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Session {0} not found")]
    SessionNotFound(Uuid),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Relay protocol errors.
///
/// `RequestPending` and `ResponseTimeout` are surfaced to the automation
/// agent as JSON-RPC error objects, not transport failures, so the agent can
/// retry or abort its plan.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Session {0} not found")]
    SessionNotFound(Uuid),

    #[error("A signing request is already pending for session {0}")]
    RequestPending(Uuid),

    #[error("Timed out after {timeout_secs}s waiting for a wallet response on session {session_id}")]
    ResponseTimeout { session_id: Uuid, timeout_secs: u64 },

    #[error("Invalid params for {method}: {message}")]
    InvalidParams { method: String, message: String },

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SessionNotFound(id) => Self::SessionNotFound(id),
            other => Self::Store(other),
        }
    }
}

/// HTTP server lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Server failed to start: {reason}")]
    StartupFailed { reason: String },
}

/// Relay HTTP client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}: {body}")]
    UnexpectedStatus {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Relay returned JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid relay URL: {0}")]
    InvalidUrl(String),
}

/// Wallet-side poller errors.
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("A poller is already running for session {0}")]
    AlreadyPolling(Uuid),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),
}

/// Wallet signer errors.
///
/// These are captured by the poller and forwarded to the automation agent as
/// the *result* of the relay call (an error string), never as a transport
/// failure.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("User rejected the request")]
    Rejected,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Browser-provisioning collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provisioning service returned status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Invalid response from provisioning service: {0}")]
    InvalidResponse(String),
}

/// JSON-RPC error codes used on the wire (server-error range).
pub mod rpc_code {
    /// Unknown session id.
    pub const SESSION_NOT_FOUND: i64 = -32001;
    /// A signing request is already pending for the session.
    pub const REQUEST_PENDING: i64 = -32002;
    /// No wallet response arrived within the wait window.
    pub const RESPONSE_TIMEOUT: i64 = -32003;
    /// Malformed params for a supported method.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal relay failure.
    pub const INTERNAL: i64 = -32603;
}

impl RelayError {
    /// JSON-RPC error code for errors that ride in the response envelope.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::SessionNotFound(_) => rpc_code::SESSION_NOT_FOUND,
            Self::RequestPending(_) => rpc_code::REQUEST_PENDING,
            Self::ResponseTimeout { .. } => rpc_code::RESPONSE_TIMEOUT,
            Self::InvalidParams { .. } => rpc_code::INVALID_PARAMS,
            Self::Store(_) => rpc_code::INTERNAL,
        }
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
