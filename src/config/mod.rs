//! Configuration for walletbridge.
//!
//! Everything is resolved from environment variables (a `.env` file is
//! loaded via dotenvy early in startup) with defaults suitable for local
//! development. The browser-provisioning collaborator is optional: it is
//! configured only when `BROWSER_SERVICE_URL` is present.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::error::ConfigError;

/// Main configuration for the relay binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    pub poller: PollerConfig,
    pub browser: Option<BrowserServiceConfig>,
}

/// HTTP server bind settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL, used when rendering the injected
    /// provider script. Falls back to `http://{host}:{port}`.
    pub public_url: Option<Url>,
}

impl ServerConfig {
    pub fn public_base_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.as_str().trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }
}

/// Relay wait-loop and garbage-collection settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How long a signing call waits for a wallet response.
    pub response_timeout: Duration,
    /// Interval between response-slot polls inside the wait loop.
    pub response_poll_interval: Duration,
    /// Idle TTL after which a session is garbage-collected.
    pub session_ttl: Duration,
    /// Interval between store sweeps.
    pub sweep_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(60),
            response_poll_interval: Duration::from_secs(1),
            session_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Wallet-side poller settings.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Interval between poll cycles.
    pub poll_interval: Duration,
    /// Optional bound on poll cycles; `None` polls until the session is done.
    pub max_cycles: Option<u64>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_cycles: None,
        }
    }
}

/// Browser-provisioning collaborator settings.
#[derive(Debug, Clone)]
pub struct BrowserServiceConfig {
    pub base_url: Url,
    pub api_key: SecretString,
}

impl Config {
    /// Resolve configuration from the environment.
    pub fn resolve() -> Result<Self, ConfigError> {
        let server = ServerConfig {
            host: optional_env("WALLETBRIDGE_HOST")?.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_optional("WALLETBRIDGE_PORT")?.unwrap_or(3000),
            public_url: optional_env("WALLETBRIDGE_PUBLIC_URL")?
                .map(|raw| parse_url("WALLETBRIDGE_PUBLIC_URL", &raw))
                .transpose()?,
        };

        let defaults = RelayConfig::default();
        let relay = RelayConfig {
            response_timeout: duration_secs_env(
                "WALLETBRIDGE_RESPONSE_TIMEOUT_SECS",
                defaults.response_timeout,
            )?,
            response_poll_interval: duration_millis_env(
                "WALLETBRIDGE_RESPONSE_POLL_MS",
                defaults.response_poll_interval,
            )?,
            session_ttl: duration_secs_env("WALLETBRIDGE_SESSION_TTL_SECS", defaults.session_ttl)?,
            sweep_interval: duration_secs_env(
                "WALLETBRIDGE_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval,
            )?,
        };

        let poller = PollerConfig {
            poll_interval: duration_secs_env(
                "WALLETBRIDGE_POLL_INTERVAL_SECS",
                PollerConfig::default().poll_interval,
            )?,
            max_cycles: parse_optional("WALLETBRIDGE_POLL_MAX_CYCLES")?,
        };

        let browser = match optional_env("BROWSER_SERVICE_URL")? {
            Some(raw) => {
                let base_url = parse_url("BROWSER_SERVICE_URL", &raw)?;
                let api_key = optional_env("BROWSER_SERVICE_API_KEY")?.ok_or_else(|| {
                    ConfigError::MissingEnvVar("BROWSER_SERVICE_API_KEY".to_string())
                })?;
                Some(BrowserServiceConfig {
                    base_url,
                    api_key: SecretString::from(api_key),
                })
            }
            None => None,
        };

        Ok(Self {
            server,
            relay,
            poller,
            browser,
        })
    }
}

/// Read an env var, treating empty values as unset.
fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value is not valid unicode".to_string(),
        }),
    }
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|raw| {
            raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            })
        })
        .transpose()
}

fn duration_secs_env(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(parse_optional::<u64>(key)?
        .map(Duration::from_secs)
        .unwrap_or(default))
}

fn duration_millis_env(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(parse_optional::<u64>(key)?
        .map(Duration::from_millis)
        .unwrap_or(default))
}

fn parse_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_defaults_are_bounded_polling() {
        let relay = RelayConfig::default();
        assert_eq!(relay.response_timeout, Duration::from_secs(60));
        assert_eq!(relay.response_poll_interval, Duration::from_secs(1));
        assert!(relay.session_ttl >= relay.response_timeout);
    }

    #[test]
    fn public_base_url_falls_back_to_bind_address() {
        let server = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
            public_url: None,
        };
        assert_eq!(server.public_base_url(), "http://127.0.0.1:3000");

        let server = ServerConfig {
            public_url: Some(Url::parse("https://relay.example.org/").unwrap()),
            ..server
        };
        assert_eq!(server.public_base_url(), "https://relay.example.org");
    }
}
