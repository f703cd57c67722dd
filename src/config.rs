use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::lottery::LotteryConfig;
use crate::support::retry::RetryPolicy;

#[derive(Clone, Debug)]
pub struct Config {
    /// Unset selects the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub sweep_secs: u64,
    pub days_ahead: u32,
    pub seed: bool,
    pub lottery: LotteryConfig,
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {}: '{}'", key, raw)),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = LotteryConfig::default();

        let draw_hour = parse(&lookup, "DRAWKEEPER_DRAW_HOUR", defaults.draw_hour)?;
        if draw_hour > 23 {
            bail!("invalid value for DRAWKEEPER_DRAW_HOUR: {} is not an hour of the day", draw_hour);
        }

        let max_purchase = parse(&lookup, "DRAWKEEPER_MAX_PURCHASE", defaults.max_purchase)?;
        if max_purchase == 0 {
            bail!("invalid value for DRAWKEEPER_MAX_PURCHASE: must be at least 1");
        }

        let attempts = parse(&lookup, "DRAWKEEPER_STORE_ATTEMPTS", defaults.retry.attempts)?;
        if attempts == 0 {
            bail!("invalid value for DRAWKEEPER_STORE_ATTEMPTS: must be at least 1");
        }

        let backoff_ms = parse(&lookup, "DRAWKEEPER_RETRY_BACKOFF_MS", defaults.retry.backoff.as_millis() as u64)?;

        Ok(Self {
            database_url: lookup("DRAWKEEPER_DATABASE_URL").filter(|v| !v.trim().is_empty()),
            db_max_connections: parse(&lookup, "DRAWKEEPER_DB_MAX_CONNECTIONS", 5)?,
            sweep_secs: parse(&lookup, "DRAWKEEPER_SWEEP_SECS", 60)?,
            days_ahead: parse(&lookup, "DRAWKEEPER_DAYS_AHEAD", 7)?,
            seed: parse(&lookup, "DRAWKEEPER_SEED", false)?,
            lottery: LotteryConfig {
                max_purchase,
                draw_hour,
                retry: RetryPolicy {
                    attempts,
                    backoff: Duration::from_millis(backoff_ms),
                },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars = vars.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();

        Config::from_lookup(move |key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let c = config(&[]).unwrap();
        assert!(c.database_url.is_none());
        assert_eq!(c.db_max_connections, 5);
        assert_eq!(c.sweep_secs, 60);
        assert_eq!(c.days_ahead, 7);
        assert!(!c.seed);
        assert_eq!(c.lottery.max_purchase, 100);
        assert_eq!(c.lottery.draw_hour, 20);
        assert_eq!(c.lottery.retry.attempts, 3);
        assert_eq!(c.lottery.retry.backoff, Duration::from_millis(100));
    }

    #[test]
    fn values_are_read_from_the_environment() {
        let c = config(&[
            ("DRAWKEEPER_DATABASE_URL", "postgres://lottery@localhost/lottery"),
            ("DRAWKEEPER_MAX_PURCHASE", "25"),
            ("DRAWKEEPER_DRAW_HOUR", " 18 "),
            ("DRAWKEEPER_SEED", "true"),
        ]).unwrap();

        assert_eq!(c.database_url.as_deref(), Some("postgres://lottery@localhost/lottery"));
        assert_eq!(c.lottery.max_purchase, 25);
        assert_eq!(c.lottery.draw_hour, 18);
        assert!(c.seed);
    }

    #[test]
    fn malformed_values_name_the_variable() {
        let e = config(&[("DRAWKEEPER_SWEEP_SECS", "soon")]).unwrap_err();
        assert!(e.to_string().contains("DRAWKEEPER_SWEEP_SECS"));

        let e = config(&[("DRAWKEEPER_DRAW_HOUR", "24")]).unwrap_err();
        assert!(e.to_string().contains("DRAWKEEPER_DRAW_HOUR"));

        assert!(config(&[("DRAWKEEPER_MAX_PURCHASE", "0")]).is_err());
        assert!(config(&[("DRAWKEEPER_STORE_ATTEMPTS", "0")]).is_err());
    }

    #[test]
    fn blank_database_url_means_memory_store() {
        let c = config(&[("DRAWKEEPER_DATABASE_URL", "  ")]).unwrap();
        assert!(c.database_url.is_none());
    }
}
