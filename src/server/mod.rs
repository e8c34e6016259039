//! Axum HTTP server exposing the relay wire protocol.
//!
//! Handles the automation-facing JSON-RPC endpoint, the wallet-facing
//! control plane (request/response/log), the per-session provider script,
//! and the recording proxy.

pub mod handlers;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::browser::BrowserProvisioner;
use crate::error::ServerError;
use crate::relay::RelayService;

/// Simple sliding-window rate limiter.
///
/// Tracks the number of requests in the current window and resets when the
/// window expires. Not per-IP; it bounds session-creation flooding as a
/// whole, since every created session allocates store state.
pub struct RateLimiter {
    /// Requests remaining in the current window.
    remaining: AtomicU64,
    /// Epoch second when the current window started.
    window_start: AtomicU64,
    /// Maximum requests per window.
    max_requests: u64,
    /// Window duration in seconds.
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(max_requests: u64, window_secs: u64) -> Self {
        Self {
            remaining: AtomicU64::new(max_requests),
            window_start: AtomicU64::new(epoch_secs()),
            max_requests,
            window_secs,
        }
    }

    /// Try to consume one request. Returns `true` if allowed.
    pub fn check(&self) -> bool {
        let now = epoch_secs();

        let window = self.window_start.load(Ordering::Relaxed);
        if now.saturating_sub(window) >= self.window_secs {
            self.window_start.store(now, Ordering::Relaxed);
            self.remaining
                .store(self.max_requests - 1, Ordering::Relaxed);
            return true;
        }

        loop {
            let current = self.remaining.load(Ordering::Relaxed);
            if current == 0 {
                return false;
            }
            if self
                .remaining
                .compare_exchange_weak(current, current - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Shared state for all relay handlers.
pub struct RelayState {
    pub relay: Arc<RelayService>,
    /// Browser-provisioning collaborator, when configured.
    pub browser: Option<Arc<BrowserProvisioner>>,
    /// Externally reachable base URL, used when rendering the provider shim.
    pub public_url: String,
    /// Rate limiter for session creation (60 per 60 seconds by default).
    pub create_rate_limiter: RateLimiter,
    /// Shutdown signal sender.
    pub shutdown_tx: tokio::sync::RwLock<Option<oneshot::Sender<()>>>,
}

impl RelayState {
    /// Trigger graceful shutdown of a running server, if any.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }
    }
}

/// Start the relay HTTP server.
///
/// Returns the actual bound `SocketAddr` (useful when binding to port 0).
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<RelayState>,
) -> Result<SocketAddr, ServerError> {
    let listener =
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::StartupFailed {
                reason: format!("Failed to bind to {addr}: {e}"),
            })?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| ServerError::StartupFailed {
            reason: format!("Failed to get local addr: {e}"),
        })?;

    let app = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/session", post(handlers::create_session_handler))
        .route(
            "/session/{id}",
            get(handlers::session_info_handler).post(handlers::rpc_handler),
        )
        .route("/session/{id}/info", get(handlers::session_info_handler))
        .route("/session/{id}/request", get(handlers::peek_request_handler))
        .route(
            "/session/{id}/response",
            post(handlers::post_response_handler),
        )
        .route(
            "/session/{id}/log",
            get(handlers::get_log_handler).post(handlers::append_log_handler),
        )
        .route(
            "/session/{id}/provider.js",
            get(handlers::provider_script_handler),
        )
        .route("/session/{id}/recording", get(handlers::recording_handler))
        // The shim calls the relay from arbitrary dApp origins inside the
        // automation browser, so CORS must stay open.
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(256 * 1024))
        .with_state(state.clone());

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    *state.shutdown_tx.write().await = Some(shutdown_tx);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Relay server shutting down");
            })
            .await
        {
            tracing::error!("Relay server error: {}", e);
        }
    });

    Ok(bound_addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_exhausts_and_resets() {
        let limiter = RateLimiter::new(2, 60);
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(!limiter.check());

        // Force the window into the past; the next check resets it.
        limiter.window_start.store(0, Ordering::Relaxed);
        assert!(limiter.check());
    }
}
