use std::env;

use bitvoice_engine::{DispatcherConfig, PaymentPolicy, ReorgPolicy};
use bvg_common::parse_seconds;
use chrono::Duration;
use log::*;

const DEFAULT_BVG_HOST: &str = "127.0.0.1";
const DEFAULT_BVG_PORT: u16 = 8480;
const DEFAULT_DATABASE_PATH: &str = "bitvoice.redb";
const DEFAULT_WALLET_URL: &str = "http://127.0.0.1:18554";
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path of the redb file backing the invoice store.
    pub database_path: String,
    /// Base URL of the wallet daemon's REST interface.
    pub wallet_url: String,
    /// Lifecycle guard tunables handed to the state machine.
    pub policy: PaymentPolicy,
    /// Webhook retry tunables handed to the notification dispatcher.
    pub dispatcher: DispatcherConfig,
    /// Timeout on each outbound webhook POST.
    pub webhook_timeout: std::time::Duration,
    /// How often the expiry/settlement sweep runs.
    pub sweep_interval: std::time::Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BVG_HOST.to_string(),
            port: DEFAULT_BVG_PORT,
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            wallet_url: DEFAULT_WALLET_URL.to_string(),
            policy: PaymentPolicy::default(),
            dispatcher: DispatcherConfig::default(),
            webhook_timeout: std::time::Duration::from_secs(DEFAULT_WEBHOOK_TIMEOUT_SECS),
            sweep_interval: std::time::Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

impl ServerConfig {
    pub fn from_env_or_default() -> Self {
        let host = env::var("BVG_HOST").ok().unwrap_or_else(|| DEFAULT_BVG_HOST.into());
        let port = env::var("BVG_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for BVG_PORT. {e} Using the default, {DEFAULT_BVG_PORT}, instead."
                    );
                    DEFAULT_BVG_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_BVG_PORT);
        let database_path = env::var("BVG_DATABASE_PATH").ok().unwrap_or_else(|| {
            warn!("🪛️ BVG_DATABASE_PATH is not set. Using {DEFAULT_DATABASE_PATH} in the working directory.");
            DEFAULT_DATABASE_PATH.into()
        });
        let wallet_url = env::var("BVG_WALLET_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ BVG_WALLET_URL is not set. Using {DEFAULT_WALLET_URL}.");
            DEFAULT_WALLET_URL.into()
        });
        let policy = configure_policy();
        let dispatcher = configure_dispatcher();
        let webhook_timeout = std::time::Duration::from_secs(
            env_seconds("BVG_WEBHOOK_TIMEOUT_SECS", DEFAULT_WEBHOOK_TIMEOUT_SECS as i64) as u64,
        );
        let sweep_interval = std::time::Duration::from_secs(
            env_seconds("BVG_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS as i64) as u64,
        );
        Self { host, port, database_path, wallet_url, policy, dispatcher, webhook_timeout, sweep_interval }
    }
}

fn env_seconds(name: &str, default: i64) -> i64 {
    match parse_seconds(env::var(name).ok()) {
        Some(secs) => secs,
        None => {
            info!("🪛️ {name} is not set or invalid. Using the default of {default}s.");
            default
        },
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    match env::var(name).ok().and_then(|s| s.trim().parse::<u32>().ok()) {
        Some(value) => value,
        None => {
            info!("🪛️ {name} is not set or invalid. Using the default of {default}.");
            default
        },
    }
}

fn configure_policy() -> PaymentPolicy {
    let defaults = PaymentPolicy::default();
    let tolerance_bps = env_u32("BVG_TOLERANCE_BPS", defaults.tolerance_bps);
    let required_confirmations = env_u32("BVG_REQUIRED_CONFIRMATIONS", defaults.required_confirmations);
    let invoice_ttl = Duration::seconds(env_seconds("BVG_INVOICE_TTL_SECS", defaults.invoice_ttl.num_seconds()));
    let settlement_window =
        Duration::seconds(env_seconds("BVG_SETTLEMENT_WINDOW_SECS", defaults.settlement_window.num_seconds()));
    let reorg_policy = match env::var("BVG_REORG_POLICY") {
        Ok(s) => s.parse::<ReorgPolicy>().unwrap_or_else(|e| {
            warn!("🪛️ Invalid BVG_REORG_POLICY: {e}. Using the default.");
            defaults.reorg_policy
        }),
        Err(_) => defaults.reorg_policy,
    };
    PaymentPolicy { tolerance_bps, required_confirmations, settlement_window, invoice_ttl, reorg_policy }
}

fn configure_dispatcher() -> DispatcherConfig {
    let defaults = DispatcherConfig::default();
    let max_attempts = env_u32("BVG_WEBHOOK_MAX_ATTEMPTS", defaults.max_attempts);
    let backoff_base =
        Duration::seconds(env_seconds("BVG_WEBHOOK_BACKOFF_SECS", defaults.backoff_base.num_seconds()));
    DispatcherConfig { max_attempts, backoff_base, ..defaults }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.port, DEFAULT_BVG_PORT);
        assert_eq!(config.policy.required_confirmations, 6);
        assert_eq!(config.policy.tolerance_bps, 0);
        assert_eq!(config.dispatcher.max_attempts, 10);
        assert_eq!(config.sweep_interval.as_secs(), 60);
    }
}
