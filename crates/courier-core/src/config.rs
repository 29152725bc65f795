//! Configuration loaded from environment variables.
//!
//! `.env` is read first when present (development). Everything except the
//! source partition and the queue URL has a default matching the production
//! cadence.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;
use thiserror::Error;

use crate::app::scheduler::{OverlapPolicy, Schedule};
use crate::domain::{KeyScheme, MAX_BODY_BYTES};
use crate::ports::TransportConfig;

pub const DEFAULT_INGESTION_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(300);
pub const DEFAULT_BATCH_LIMIT: usize = 100;
pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourierConfig {
    /// Partition every loop works on (e.g. the chain name).
    pub source: String,
    pub ingestion: Schedule,
    pub ingestion_limit: usize,
    pub refresh: Schedule,
    pub refresh_limit: usize,
    pub resync: Schedule,
    pub reaper: Schedule,
    /// Age after which an uncommitted ingestion lease is reclaimed.
    pub lease_timeout: Duration,
    pub key_scheme: KeyScheme,
    /// Messages with a larger body are failed individually instead of sent.
    pub max_body_bytes: usize,
    pub transport: TransportConfig,
}

impl CourierConfig {
    /// Defaults for everything but the source partition and queue.
    pub fn new(source: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            source: source.into(),
            ingestion: Schedule::every(DEFAULT_INGESTION_INTERVAL),
            ingestion_limit: DEFAULT_BATCH_LIMIT,
            refresh: Schedule::every(DEFAULT_REFRESH_INTERVAL),
            refresh_limit: DEFAULT_BATCH_LIMIT,
            resync: Schedule::every(DEFAULT_RESYNC_INTERVAL),
            reaper: Schedule::every(DEFAULT_REAPER_INTERVAL),
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
            key_scheme: KeyScheme::default(),
            max_body_bytes: MAX_BODY_BYTES,
            transport,
        }
    }

    /// Load configuration from environment variables (and `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let source = vars.required("COURIER_SOURCE")?;
        let mut transport = TransportConfig::new(
            vars.required("AWS_QUEUE_URL")?,
            vars.get("AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
        )
        .with_dedup_window(vars.secs("COURIER_DEDUP_WINDOW_SECS", DEFAULT_DEDUP_WINDOW)?);
        match (vars.get("AWS_ACCESS_KEY_ID"), vars.get("AWS_SECRET_ACCESS_KEY")) {
            (Some(id), Some(secret)) => transport = transport.with_credentials(id, secret),
            (None, None) => {}
            (Some(_), None) => return Err(ConfigError::Missing("AWS_SECRET_ACCESS_KEY")),
            (None, Some(_)) => return Err(ConfigError::Missing("AWS_ACCESS_KEY_ID")),
        }

        let jitter = Duration::from_millis(vars.parse("COURIER_JITTER_MS", 0u64)?);
        let overlap: OverlapPolicy = vars.parse("COURIER_OVERLAP_POLICY", OverlapPolicy::Skip)?;
        let schedule = |interval: Duration| {
            Schedule::every(interval)
                .with_jitter(jitter)
                .with_overlap(overlap)
        };

        let config = Self {
            source,
            ingestion: schedule(vars.secs("COURIER_INGESTION_INTERVAL_SECS", DEFAULT_INGESTION_INTERVAL)?),
            ingestion_limit: vars.parse("COURIER_INGESTION_LIMIT", DEFAULT_BATCH_LIMIT)?,
            refresh: schedule(vars.secs("COURIER_REFRESH_INTERVAL_SECS", DEFAULT_REFRESH_INTERVAL)?),
            refresh_limit: vars.parse("COURIER_REFRESH_LIMIT", DEFAULT_BATCH_LIMIT)?,
            resync: schedule(vars.secs("COURIER_RESYNC_INTERVAL_SECS", DEFAULT_RESYNC_INTERVAL)?),
            reaper: schedule(vars.secs("COURIER_REAPER_INTERVAL_SECS", DEFAULT_REAPER_INTERVAL)?),
            lease_timeout: vars.secs("COURIER_LEASE_TIMEOUT_SECS", DEFAULT_LEASE_TIMEOUT)?,
            key_scheme: vars.parse("COURIER_KEY_SCHEME", KeyScheme::default())?,
            max_body_bytes: vars.parse("COURIER_MAX_BODY_BYTES", MAX_BODY_BYTES)?,
            transport,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a loop spin or never select anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.trim().is_empty() {
            return Err(invalid("COURIER_SOURCE", &self.source, "must not be empty"));
        }
        if self.transport.queue_url.trim().is_empty() {
            return Err(invalid("AWS_QUEUE_URL", &self.transport.queue_url, "must not be empty"));
        }
        for (key, schedule) in [
            ("COURIER_INGESTION_INTERVAL_SECS", &self.ingestion),
            ("COURIER_REFRESH_INTERVAL_SECS", &self.refresh),
            ("COURIER_RESYNC_INTERVAL_SECS", &self.resync),
            ("COURIER_REAPER_INTERVAL_SECS", &self.reaper),
        ] {
            if schedule.interval.is_zero() {
                return Err(invalid(key, "0", "interval must be positive"));
            }
        }
        if self.ingestion_limit == 0 {
            return Err(invalid("COURIER_INGESTION_LIMIT", "0", "limit must be positive"));
        }
        if self.refresh_limit == 0 {
            return Err(invalid("COURIER_REFRESH_LIMIT", "0", "limit must be positive"));
        }
        if self.lease_timeout.is_zero() {
            return Err(invalid("COURIER_LEASE_TIMEOUT_SECS", "0", "timeout must be positive"));
        }
        if self.max_body_bytes == 0 || self.max_body_bytes > MAX_BODY_BYTES {
            return Err(invalid(
                "COURIER_MAX_BODY_BYTES",
                &self.max_body_bytes.to_string(),
                "must be between 1 and 262144",
            ));
        }
        Ok(())
    }

    pub fn lease_timeout_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lease_timeout).unwrap_or(chrono::Duration::MAX)
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    /// Unset and blank are the same thing.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: ToString,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
        }
    }

    fn secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    const BASE: [(&str, &str); 2] = [
        ("COURIER_SOURCE", "eth"),
        ("AWS_QUEUE_URL", "https://sqs.example/tokens.fifo"),
    ];

    #[test]
    fn defaults_follow_production_cadence() {
        let config = CourierConfig::from_lookup(lookup(&BASE)).unwrap();

        assert_eq!(config.source, "eth");
        assert_eq!(config.ingestion.interval, Duration::from_secs(3));
        assert_eq!(config.refresh.interval, Duration::from_secs(60));
        assert_eq!(config.resync.interval, Duration::from_secs(86_400));
        assert_eq!(config.reaper.interval, Duration::from_secs(60));
        assert_eq!(config.lease_timeout, Duration::from_secs(300));
        assert_eq!(config.ingestion_limit, 100);
        assert_eq!(config.refresh_limit, 100);
        assert_eq!(config.ingestion.overlap, OverlapPolicy::Skip);
        assert_eq!(config.ingestion.jitter, Duration::ZERO);
        assert_eq!(config.key_scheme, KeyScheme::Concatenated);
        assert_eq!(config.max_body_bytes, 256 * 1024);
        assert_eq!(config.transport.region, "us-east-1");
        assert_eq!(config.transport.dedup_window, Duration::from_secs(300));
        assert!(config.transport.access_key_id.is_none());
    }

    #[test]
    fn overrides_are_applied_to_every_schedule() {
        let mut pairs = BASE.to_vec();
        pairs.extend([
            ("COURIER_INGESTION_INTERVAL_SECS", "5"),
            ("COURIER_JITTER_MS", "250"),
            ("COURIER_OVERLAP_POLICY", "allow"),
            ("COURIER_KEY_SCHEME", "delimited"),
            ("COURIER_MAX_BODY_BYTES", "4096"),
            ("AWS_REGION", "ap-northeast-1"),
            ("AWS_ACCESS_KEY_ID", "AKIA"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
        ]);

        let config = CourierConfig::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(config.ingestion.interval, Duration::from_secs(5));
        assert_eq!(config.resync.jitter, Duration::from_millis(250));
        assert_eq!(config.reaper.overlap, OverlapPolicy::Allow);
        assert_eq!(config.key_scheme, KeyScheme::Delimited);
        assert_eq!(config.max_body_bytes, 4096);
        assert_eq!(config.transport.region, "ap-northeast-1");
        assert_eq!(config.transport.secret_access_key.as_deref(), Some("secret"));
    }

    #[rstest]
    #[case("COURIER_SOURCE")]
    #[case("AWS_QUEUE_URL")]
    fn required_variables(#[case] missing: &'static str) {
        let pairs: Vec<_> = BASE.iter().copied().filter(|(k, _)| *k != missing).collect();
        assert_eq!(
            CourierConfig::from_lookup(lookup(&pairs)),
            Err(ConfigError::Missing(missing))
        );
    }

    #[rstest]
    #[case("COURIER_INGESTION_INTERVAL_SECS", "0")]
    #[case("COURIER_REAPER_INTERVAL_SECS", "0")]
    #[case("COURIER_INGESTION_LIMIT", "0")]
    #[case("COURIER_REFRESH_LIMIT", "-1")]
    #[case("COURIER_LEASE_TIMEOUT_SECS", "0")]
    #[case("COURIER_RESYNC_INTERVAL_SECS", "daily")]
    #[case("COURIER_KEY_SCHEME", "hashed")]
    #[case("COURIER_OVERLAP_POLICY", "queue")]
    #[case("COURIER_MAX_BODY_BYTES", "0")]
    #[case("COURIER_MAX_BODY_BYTES", "300000")]
    fn invalid_values_are_rejected(#[case] key: &'static str, #[case] value: &str) {
        let mut pairs = BASE.to_vec();
        pairs.push((key, value));

        let err = CourierConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: k, .. } if k == key), "{err}");
    }

    #[test]
    fn half_credentials_are_rejected() {
        let mut pairs = BASE.to_vec();
        pairs.push(("AWS_ACCESS_KEY_ID", "AKIA"));

        assert_eq!(
            CourierConfig::from_lookup(lookup(&pairs)),
            Err(ConfigError::Missing("AWS_SECRET_ACCESS_KEY"))
        );
    }

    #[test]
    fn blank_source_counts_as_missing() {
        let pairs = [("COURIER_SOURCE", "  "), BASE[1]];
        assert_eq!(
            CourierConfig::from_lookup(lookup(&pairs)),
            Err(ConfigError::Missing("COURIER_SOURCE"))
        );
    }
}
