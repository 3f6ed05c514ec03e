//! Environment-driven configuration for the gateway.
//!
//! Everything is read from process environment variables at startup; the
//! binary loads a `.env` file beforehand when one exists. No hot reload.

mod credentials;

use std::time::Duration;

use anyhow::{Context, bail};
use secrecy::SecretString;

pub use credentials::{CredentialSpec, ProviderKind};

/// Complete runtime configuration, parsed once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    /// Upstream refresh credentials, deduplicated, in configuration order.
    pub credentials: Vec<CredentialSpec>,
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen port (`PORT`).
    pub port: u16,
    /// Shared secret clients must present (`AUTH_TOKEN`).
    pub auth_token: SecretString,
    /// Optional client write deadline (`SERVER_WRITE_TIMEOUT_MINUTES`).
    pub write_timeout: Option<Duration>,
}

/// Request-processing settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Force non-streaming responses regardless of the request (`DISABLE_STREAM`).
    pub disable_stream: bool,
    /// Overall deadline for heavy requests (`REQUEST_TIMEOUT_MINUTES`).
    pub request_timeout: Duration,
    /// Overall deadline for simple requests (`SIMPLE_REQUEST_TIMEOUT_MINUTES`).
    pub simple_request_timeout: Duration,
    /// Abort the upstream read after this long without bytes
    /// (`SERVER_READ_TIMEOUT_MINUTES`).
    pub stream_idle_timeout: Duration,
    /// Fail loudly on decoder or event-ordering violations (`STRICT_DECODE`).
    pub strict: bool,
    /// Credential selection strategy (`CREDENTIAL_STRATEGY`).
    pub strategy: CredentialStrategy,
}

/// How the pool picks among acquirable credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialStrategy {
    /// Healthiest entry first.
    #[default]
    Optimal,
    /// Configuration-order round robin.
    Sequential,
}

impl Config {
    /// Read the whole configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Config> {
        let Some(auth_token) = read("AUTH_TOKEN") else {
            bail!(
                "AUTH_TOKEN is not set. Clients authenticate with this shared secret:\n\
                 \n  AUTH_TOKEN=some-long-random-string\n\n\
                 Set it in the environment or in the .env file."
            );
        };

        let port = match read("PORT") {
            Some(raw) => raw.parse().with_context(|| format!("PORT must be a port number, got '{raw}'"))?,
            None => 8080,
        };

        let server = ServerConfig {
            port,
            auth_token: SecretString::from(auth_token),
            write_timeout: read_minutes("SERVER_WRITE_TIMEOUT_MINUTES")?,
        };

        let strategy = match read("CREDENTIAL_STRATEGY").as_deref() {
            None => CredentialStrategy::default(),
            Some("optimal") => CredentialStrategy::Optimal,
            Some("sequential") => CredentialStrategy::Sequential,
            Some(other) => bail!("CREDENTIAL_STRATEGY must be 'optimal' or 'sequential', got '{other}'"),
        };

        let gateway = GatewayConfig {
            disable_stream: read_flag("DISABLE_STREAM"),
            request_timeout: read_minutes("REQUEST_TIMEOUT_MINUTES")?.unwrap_or(Duration::from_secs(15 * 60)),
            simple_request_timeout: read_minutes("SIMPLE_REQUEST_TIMEOUT_MINUTES")?
                .unwrap_or(Duration::from_secs(2 * 60)),
            stream_idle_timeout: read_minutes("SERVER_READ_TIMEOUT_MINUTES")?.unwrap_or(Duration::from_secs(30)),
            strict: read_flag("STRICT_DECODE"),
            strategy,
        };

        let credentials = credentials::from_env()?;

        Ok(Config {
            server,
            gateway,
            credentials,
        })
    }
}

fn read(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn read_flag(name: &str) -> bool {
    read(name).is_some_and(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn read_minutes(name: &str) -> anyhow::Result<Option<Duration>> {
    let Some(raw) = read(name) else {
        return Ok(None);
    };

    let minutes: f64 = raw
        .parse()
        .with_context(|| format!("{name} must be a number of minutes, got '{raw}'"))?;

    if !minutes.is_finite() || minutes <= 0.0 {
        bail!("{name} must be a positive number of minutes, got '{raw}'");
    }

    Ok(Some(Duration::from_secs_f64(minutes * 60.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_all() -> Vec<(&'static str, Option<&'static str>)> {
        [
            "PORT",
            "AUTH_TOKEN",
            "DISABLE_STREAM",
            "REQUEST_TIMEOUT_MINUTES",
            "SIMPLE_REQUEST_TIMEOUT_MINUTES",
            "SERVER_READ_TIMEOUT_MINUTES",
            "SERVER_WRITE_TIMEOUT_MINUTES",
            "AUTH_METHOD",
            "CREDENTIAL_STRATEGY",
            "STRICT_DECODE",
            "KIRO_AUTH_TOKEN",
            "AWS_REFRESHTOKEN",
            "IDC_REFRESH_TOKEN",
            "IDC_CLIENT_ID",
            "IDC_CLIENT_SECRET",
        ]
        .into_iter()
        .map(|name| (name, None))
        .collect()
    }

    fn with_vars<R>(vars: &[(&'static str, &'static str)], run: impl FnOnce() -> R) -> R {
        let mut env = clear_all();
        for (name, value) in vars {
            if let Some(slot) = env.iter_mut().find(|(n, _)| n == name) {
                slot.1 = Some(value);
            }
        }
        temp_env::with_vars(env, run)
    }

    #[test]
    fn defaults_apply_when_only_required_vars_are_set() {
        let config = with_vars(
            &[("AUTH_TOKEN", "secret"), ("AWS_REFRESHTOKEN", "rt-1")],
            Config::from_env,
        )
        .expect("valid config");

        assert_eq!(config.server.port, 8080);
        assert!(!config.gateway.disable_stream);
        assert!(!config.gateway.strict);
        assert_eq!(config.gateway.request_timeout, Duration::from_secs(900));
        assert_eq!(config.gateway.simple_request_timeout, Duration::from_secs(120));
        assert_eq!(config.gateway.stream_idle_timeout, Duration::from_secs(30));
        assert_eq!(config.gateway.strategy, CredentialStrategy::Optimal);
        assert_eq!(config.credentials.len(), 1);
    }

    #[test]
    fn missing_auth_token_is_a_startup_error() {
        let err = with_vars(&[("AWS_REFRESHTOKEN", "rt-1")], Config::from_env).expect_err("no AUTH_TOKEN");
        assert!(err.to_string().contains("AUTH_TOKEN"));
    }

    #[test]
    fn fractional_minutes_are_accepted() {
        let config = with_vars(
            &[
                ("AUTH_TOKEN", "secret"),
                ("AWS_REFRESHTOKEN", "rt-1"),
                ("SERVER_READ_TIMEOUT_MINUTES", "0.5"),
            ],
            Config::from_env,
        )
        .expect("valid config");

        assert_eq!(config.gateway.stream_idle_timeout, Duration::from_secs(30));
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let err = with_vars(
            &[
                ("AUTH_TOKEN", "secret"),
                ("AWS_REFRESHTOKEN", "rt-1"),
                ("CREDENTIAL_STRATEGY", "roulette"),
            ],
            Config::from_env,
        )
        .expect_err("bad strategy");
        assert!(err.to_string().contains("CREDENTIAL_STRATEGY"));
    }
}
