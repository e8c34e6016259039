//! The injected provider shim.
//!
//! A standalone script the automation harness injects into its browser
//! context. It replaces `window.ethereum` with an EIP-1193 provider that
//! forwards every call to the relay, and announces itself via the EIP-6963
//! handshake so dApps discover it like any installed wallet.
//!
//! The script is embedded at compile time and rendered per session; the
//! server exposes it at `GET /session/{id}/provider.js` so harnesses can
//! inject it by URL.

use uuid::Uuid;

const PROVIDER_TEMPLATE: &str = include_str!("provider.js");

/// Render the provider script for one session.
///
/// `relay_url` is the externally reachable base URL of this relay; a
/// trailing slash is tolerated.
pub fn render_provider_script(relay_url: &str, session_id: Uuid) -> String {
    PROVIDER_TEMPLATE
        .replace("__RELAY_URL__", relay_url.trim_end_matches('/'))
        .replace("__SESSION_ID__", &session_id.to_string())
}
