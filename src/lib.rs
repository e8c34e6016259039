//! walletbridge — a session relay that lets a human-held browser wallet act
//! as the signing backend for a remote, AI-driven browser-automation agent.
//!
//! The agent's browser has no private key. Its injected provider forwards
//! every EIP-1193 call to the relay ([`server`]/[`relay`]); identity reads
//! answer immediately from the session's account record, while signing
//! calls park in a single per-session slot until the wallet-side poller
//! ([`poller`]) drains them, obtains the human's signature, and posts the
//! result back.

pub mod browser;
pub mod client;
pub mod config;
pub mod error;
pub mod poller;
pub mod relay;
pub mod rpc;
pub mod server;
pub mod session;
pub mod shim;
pub mod store;
pub mod wallet;

pub use error::{Error, Result};
