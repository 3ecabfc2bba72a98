use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use contracts::EnvReport;
use secrecy::SecretString;
use thiserror::Error;

pub const ENV_DATABASE_PATH: &str = "BIDBOARD_DATABASE_PATH";
pub const ENV_BIND_ADDR: &str = "BIDBOARD_BIND_ADDR";
pub const ENV_BASE_URL: &str = "BIDBOARD_BASE_URL";
pub const ENV_STORE_TIMEOUT_MS: &str = "BIDBOARD_STORE_TIMEOUT_MS";
pub const ENV_WEBHOOK_TOLERANCE_SECS: &str = "BIDBOARD_WEBHOOK_TOLERANCE_SECS";
pub const ENV_ANONYMOUS_DOMAIN: &str = "BIDBOARD_ANONYMOUS_DOMAIN";
pub const ENV_WEBHOOK_SECRET: &str = "STRIPE_WEBHOOK_SECRET";
pub const ENV_SECRET_KEY: &str = "STRIPE_SECRET_KEY";
pub const ENV_API_BASE: &str = "STRIPE_API_BASE";

pub const DEFAULT_DATABASE_PATH: &str = "bidboard.sqlite";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;

/// Variables reported by the env-check surface, in display order.
const REPORTED_VARIABLES: [&str; 4] = [
    ENV_SECRET_KEY,
    ENV_WEBHOOK_SECRET,
    ENV_BASE_URL,
    ENV_DATABASE_PATH,
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} is required")]
    Missing { key: &'static str },
    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug)]
pub struct ServiceConfig {
    pub database_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub base_url: String,
    pub webhook_secret: Option<SecretString>,
    pub stripe_secret_key: Option<SecretString>,
    pub stripe_api_base: String,
    pub store_timeout: Duration,
    pub webhook_tolerance_secs: u64,
    pub anonymous_domain: Option<String>,
    present: BTreeMap<String, bool>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let present = REPORTED_VARIABLES
            .iter()
            .map(|key| (key.to_string(), get(*key).is_some()))
            .collect();

        let bind_raw = get(ENV_BIND_ADDR).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw.parse().map_err(|err: std::net::AddrParseError| {
            ConfigError::Invalid {
                key: ENV_BIND_ADDR,
                value: bind_raw.clone(),
                reason: err.to_string(),
            }
        })?;

        let store_timeout = match get(ENV_STORE_TIMEOUT_MS) {
            Some(raw) => Duration::from_millis(parse_positive(ENV_STORE_TIMEOUT_MS, &raw)?),
            None => DEFAULT_STORE_TIMEOUT,
        };
        let webhook_tolerance_secs = match get(ENV_WEBHOOK_TOLERANCE_SECS) {
            Some(raw) => parse_positive(ENV_WEBHOOK_TOLERANCE_SECS, &raw)?,
            None => DEFAULT_WEBHOOK_TOLERANCE_SECS,
        };

        Ok(Self {
            database_path: get(ENV_DATABASE_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
            bind_addr,
            base_url: get(ENV_BASE_URL).unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            webhook_secret: get(ENV_WEBHOOK_SECRET).map(SecretString::from),
            stripe_secret_key: get(ENV_SECRET_KEY).map(SecretString::from),
            stripe_api_base: get(ENV_API_BASE).unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            store_timeout,
            webhook_tolerance_secs,
            anonymous_domain: get(ENV_ANONYMOUS_DOMAIN),
            present,
        })
    }

    /// Lock wait for SQLite writers. See [`busy_timeout_for`].
    pub fn busy_timeout(&self) -> Duration {
        busy_timeout_for(self.store_timeout)
    }

    /// Presence flags only; values are never reported.
    pub fn env_report(&self) -> EnvReport {
        EnvReport {
            all_set: self.present.values().all(|set| *set),
            variables: self.present.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

/// A third of the store timeout, so a lock wait, the retry backoff and a second lock wait
/// all end before the store call is abandoned.
pub fn busy_timeout_for(store_timeout: Duration) -> Duration {
    store_timeout / 3
}

fn parse_positive(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        Ok(_) => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        Err(err) => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        ServiceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config(&[]).expect("defaults");
        assert_eq!(config.database_path, PathBuf::from(DEFAULT_DATABASE_PATH));
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.store_timeout, DEFAULT_STORE_TIMEOUT);
        assert!(config.webhook_secret.is_none());

        let report = config.env_report();
        assert!(!report.all_set);
        assert_eq!(report.variables.get(ENV_WEBHOOK_SECRET), Some(&false));
        assert_eq!(report.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn reads_secrets_and_reports_presence_only() {
        let config = config(&[
            (ENV_SECRET_KEY, "sk_test_123"),
            (ENV_WEBHOOK_SECRET, "whsec_abc"),
            (ENV_BASE_URL, "https://bidboard.example"),
            (ENV_DATABASE_PATH, "/tmp/board.sqlite"),
            (ENV_ANONYMOUS_DOMAIN, "  "),
        ])
        .expect("config");

        assert_eq!(
            config.webhook_secret.as_ref().map(|s| s.expose_secret()),
            Some("whsec_abc")
        );
        assert!(config.anonymous_domain.is_none());

        let report = config.env_report();
        assert!(report.all_set);
        let json = serde_json::to_string(&report).expect("serialize");
        assert!(!json.contains("sk_test_123"));
        assert!(!json.contains("whsec_abc"));
        assert!(!format!("{config:?}").contains("whsec_abc"));
    }

    #[test]
    fn lock_wait_and_retry_fit_inside_store_timeout() {
        let backoff = ledger_core::RetryPolicy::default().backoff;
        for raw in ["300", "900", "5000", "30000"] {
            let config = config(&[(ENV_STORE_TIMEOUT_MS, raw)]).expect("config");
            let busy = config.busy_timeout();
            assert!(busy > Duration::ZERO);
            assert!(
                busy * 2 + backoff < config.store_timeout,
                "busy {busy:?} with timeout {:?}",
                config.store_timeout
            );
        }
        assert!(crate::DEFAULT_BUSY_TIMEOUT * 2 + backoff < DEFAULT_STORE_TIMEOUT);
    }

    #[test]
    fn rejects_invalid_numbers_and_addresses() {
        assert!(matches!(
            config(&[(ENV_STORE_TIMEOUT_MS, "0")]),
            Err(ConfigError::Invalid { key: ENV_STORE_TIMEOUT_MS, .. })
        ));
        assert!(matches!(
            config(&[(ENV_BIND_ADDR, "not-an-addr")]),
            Err(ConfigError::Invalid { key: ENV_BIND_ADDR, .. })
        ));
    }
}
