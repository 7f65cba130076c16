//! Runtime configuration
//!
//! Read from the environment (optionally a `.env` file). The packing profile lives in its own
//! TOML file pointed to by `PACKING_CONFIG`.

use std::str::FromStr;
use crate::services::packer::PackingConfig;
use crate::{FulfillmentError, Result};

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub currency: String,
    pub default_location: String,
    pub sell_in_transit: bool,
    /// Allowed gap between a declared shipment weight and the catalog weight of its items.
    pub weight_epsilon_grams: f64,
    pub debit_retries: u32,
    /// Window for pairing an orphan order with a shipment by creation time.
    pub match_window_hours: i64,
    /// Journals younger than this are assumed to still be running.
    pub stale_journal_secs: i64,
    pub packing: PackingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: "USD".into(),
            default_location: "main".into(),
            sell_in_transit: false,
            weight_epsilon_grams: 5.0,
            debit_retries: 3,
            match_window_hours: 24,
            stale_journal_secs: 300,
            packing: PackingConfig::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    pub port: u16,
    /// Seconds between background reconciliation runs, 0 disables the loop.
    pub reconcile_interval_secs: u64,
    pub engine: EngineConfig,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let defaults = EngineConfig::default();
        let packing = match optional("PACKING_CONFIG") {
            Some(path) => PackingConfig::from_file(path)?,
            None => PackingConfig::default(),
        };
        let engine = EngineConfig {
            currency: optional("CURRENCY").unwrap_or(defaults.currency),
            default_location: optional("DEFAULT_LOCATION").unwrap_or(defaults.default_location),
            sell_in_transit: parsed("SELL_IN_TRANSIT", defaults.sell_in_transit)?,
            weight_epsilon_grams: parsed("WEIGHT_EPSILON_GRAMS", defaults.weight_epsilon_grams)?,
            debit_retries: parsed("DEBIT_RETRIES", defaults.debit_retries)?,
            match_window_hours: parsed("MATCH_WINDOW_HOURS", defaults.match_window_hours)?,
            stale_journal_secs: parsed("STALE_JOURNAL_SECS", defaults.stale_journal_secs)?,
            packing,
        };
        Ok(Self {
            database_url: optional("DATABASE_URL"),
            nats_url: optional("NATS_URL"),
            port: parsed("PORT", 8083)?,
            reconcile_interval_secs: parsed("RECONCILE_INTERVAL_SECS", 0)?,
            engine,
        })
    }
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parsed<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match optional(key) {
        Some(raw) => raw.parse().map_err(|e| FulfillmentError::Validation(format!("{key}={raw}: {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_reports_bad_values() {
        std::env::set_var("FULFILLMENT_TEST_RETRIES", "many");
        assert!(parsed::<u32>("FULFILLMENT_TEST_RETRIES", 3).is_err());
        std::env::set_var("FULFILLMENT_TEST_RETRIES", " 7 ");
        assert_eq!(parsed::<u32>("FULFILLMENT_TEST_RETRIES", 3).unwrap(), 7);
        std::env::remove_var("FULFILLMENT_TEST_RETRIES");
        assert_eq!(parsed::<u32>("FULFILLMENT_TEST_RETRIES", 3).unwrap(), 3);
    }
}
