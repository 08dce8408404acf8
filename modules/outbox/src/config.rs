use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::models::{DEFAULT_MAX_RETRIES, DEFAULT_SOURCE};
use crate::producer::ProducerDefaults;
use crate::publisher::PublisherConfig;
use crate::sweeper::SweeperConfig;
use crate::wire::DEFAULT_TOPIC_PREFIX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    Nats,
    InMemory,
}

impl FromStr for BusType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nats" => Ok(BusType::Nats),
            "inmemory" => Ok(BusType::InMemory),
            other => Err(format!("Invalid BUS_TYPE: {}. Must be 'inmemory' or 'nats'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    Postgres,
    InMemory,
}

impl FromStr for StoreType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(StoreType::Postgres),
            "inmemory" => Ok(StoreType::InMemory),
            other => Err(format!(
                "Invalid STORE_TYPE: {}. Must be 'postgres' or 'inmemory'",
                other
            )),
        }
    }
}

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub store_type: StoreType,
    pub database_url: Option<String>,
    pub bus_type: BusType,
    pub nats_url: String,
    pub host: String,
    pub port: u16,
    pub publisher: PublisherConfig,
    pub sweeper: SweeperConfig,
    pub producer: ProducerDefaults,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let store_type: StoreType = lookup("STORE_TYPE")
            .unwrap_or_else(|| "postgres".to_string())
            .parse()?;

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        if store_type == StoreType::Postgres && database_url.is_none() {
            return Err("DATABASE_URL must be set when STORE_TYPE=postgres".to_string());
        }

        let bus_type: BusType = lookup("BUS_TYPE")
            .unwrap_or_else(|| "inmemory".to_string())
            .parse()?;

        let nats_url = lookup("NATS_URL").unwrap_or_else(|| "nats://localhost:4222".to_string());

        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port: u16 = parse_or(&lookup, "PORT", 8095)?;

        let poll_interval_ms: u64 = parse_or(&lookup, "OUTBOX_POLL_INTERVAL_MS", 1000)?;
        let batch_size: i64 = parse_or(&lookup, "OUTBOX_BATCH_SIZE", 100)?;
        let concurrency: usize = parse_or(&lookup, "OUTBOX_PUBLISH_CONCURRENCY", 10)?;
        let publish_timeout_ms: u64 = parse_or(&lookup, "OUTBOX_PUBLISH_TIMEOUT_MS", 5000)?;
        let max_retries: i32 = parse_or(&lookup, "OUTBOX_DEFAULT_MAX_RETRIES", DEFAULT_MAX_RETRIES)?;
        let retention_days: i64 = parse_or(&lookup, "OUTBOX_RETENTION_DAYS", 30)?;
        let sweep_interval_secs: u64 = parse_or(&lookup, "OUTBOX_SWEEP_INTERVAL_SECS", 3600)?;
        let sweep_batch_size: i64 = parse_or(&lookup, "OUTBOX_SWEEP_BATCH_SIZE", 1000)?;
        let sweep_max_batches: u32 = parse_or(&lookup, "OUTBOX_SWEEP_MAX_BATCHES", 10)?;
        let sweeper_enabled: bool = parse_or(&lookup, "OUTBOX_SWEEPER_ENABLED", true)?;
        let dead_letter_malformed: bool = parse_or(&lookup, "OUTBOX_DEAD_LETTER_MALFORMED", true)?;

        let topic_prefix = lookup("OUTBOX_TOPIC_PREFIX").unwrap_or_else(|| DEFAULT_TOPIC_PREFIX.to_string());
        let source = lookup("OUTBOX_SOURCE").unwrap_or_else(|| DEFAULT_SOURCE.to_string());

        at_least("OUTBOX_POLL_INTERVAL_MS", poll_interval_ms, 1)?;
        at_least("OUTBOX_BATCH_SIZE", batch_size, 1)?;
        at_least("OUTBOX_PUBLISH_CONCURRENCY", concurrency, 1)?;
        at_least("OUTBOX_PUBLISH_TIMEOUT_MS", publish_timeout_ms, 1)?;
        at_least("OUTBOX_DEFAULT_MAX_RETRIES", max_retries, 1)?;
        at_least("OUTBOX_RETENTION_DAYS", retention_days, 0)?;
        at_least("OUTBOX_SWEEP_INTERVAL_SECS", sweep_interval_secs, 1)?;
        at_least("OUTBOX_SWEEP_BATCH_SIZE", sweep_batch_size, 1)?;
        at_least("OUTBOX_SWEEP_MAX_BATCHES", sweep_max_batches, 1)?;

        if topic_prefix.is_empty() || topic_prefix.starts_with('.') || topic_prefix.ends_with('.') {
            return Err(format!("OUTBOX_TOPIC_PREFIX is not a valid subject prefix: '{}'", topic_prefix));
        }
        if source.trim().is_empty() {
            return Err("OUTBOX_SOURCE must not be empty".to_string());
        }

        let publisher = PublisherConfig::new()
            .with_poll_interval(Duration::from_millis(poll_interval_ms))
            .with_batch_size(batch_size)
            .with_concurrency(concurrency)
            .with_publish_timeout(Duration::from_millis(publish_timeout_ms))
            .with_topic_prefix(topic_prefix)
            .with_dead_letter_malformed(dead_letter_malformed);

        let mut sweeper = SweeperConfig::new()
            .with_interval(Duration::from_secs(sweep_interval_secs))
            .with_retention_days(retention_days)
            .with_batch_size(sweep_batch_size)
            .with_max_batches_per_cycle(sweep_max_batches);
        if !sweeper_enabled {
            sweeper = sweeper.disabled();
        }

        Ok(Config {
            store_type,
            database_url,
            bus_type,
            nats_url,
            host,
            port,
            publisher,
            sweeper,
            producer: ProducerDefaults { source, max_retries },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, String>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{} has an invalid value: '{}'", key, raw)),
        None => Ok(default),
    }
}

fn at_least<T: PartialOrd + std::fmt::Display>(key: &str, value: T, min: T) -> Result<(), String> {
    if value < min {
        return Err(format!("{} must be at least {}, got {}", key, min, value));
    }
    Ok(())
}
