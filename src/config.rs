//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub universe: UniverseConfig,
    #[serde(default)]
    pub signals: SignalConfig,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// Use the Bybit testnet hosts
    #[serde(default = "default_testnet")]
    pub testnet: bool,
    /// REST request timeout in milliseconds
    #[serde(default = "default_rest_timeout_ms")]
    pub rest_timeout_ms: u64,
    /// Delay before stream reconnect attempts (milliseconds)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Protocol-level ping interval (seconds)
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UniverseConfig {
    /// Minimum 24h turnover in USDT
    #[serde(default = "default_min_volume_24h")]
    pub min_volume_24h_usdt: f64,
    /// Minimum open-interest value in USDT
    #[serde(default = "default_min_open_interest")]
    pub min_open_interest_usdt: f64,
    /// Lowest acceptable last price
    #[serde(default = "default_min_price")]
    pub min_price_usdt: f64,
    /// Highest acceptable last price
    #[serde(default = "default_max_price")]
    pub max_price_usdt: f64,
    /// Symbols to exclude regardless of quality (uppercased on load)
    #[serde(default = "default_blacklist")]
    pub blacklist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalConfig {
    /// Minimum weighted score required for dispatch
    #[serde(default = "default_min_score")]
    pub min_score_threshold: f64,
    /// Attach BTCUSDT price/funding context to evaluations
    #[serde(default = "default_true")]
    pub enable_btc_context: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GovernorConfig {
    /// Per-symbol cooldown window (seconds)
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_seconds: u64,
    /// Global delivery cap per wall-clock hour
    #[serde(default = "default_max_alerts")]
    pub max_alerts_per_hour: u32,
    /// Optional Redis URL backing cooldown/rate state
    #[serde(default = "default_redis_url")]
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Webhook URL for alert delivery; required unless running dry
    #[serde(default = "default_webhook_url")]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_pg_host")]
    pub host: Option<String>,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    #[serde(default = "default_pg_db")]
    pub dbname: String,
    #[serde(default = "default_pg_user")]
    pub user: String,
    #[serde(default = "default_pg_password")]
    pub password: String,
}

impl PersistenceConfig {
    /// Persistence is opt-in via POSTGRES_HOST
    pub fn enabled(&self) -> bool {
        self.host.is_some()
    }
}

// Default value functions. Environment variables are the primary source;
// the TOML file and DYNASTY__ overrides refine them.

fn default_testnet() -> bool {
    env_bool("BYBIT_TESTNET", false)
}

fn default_rest_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_ping_interval_secs() -> u64 {
    20
}

fn default_min_volume_24h() -> f64 {
    env_f64("MIN_VOLUME_24H_USDT", 1_000_000.0)
}

fn default_min_open_interest() -> f64 {
    env_f64("MIN_OPEN_INTEREST_USDT", 500_000.0)
}

fn default_min_price() -> f64 {
    env_f64("MIN_PRICE_USDT", 0.0001)
}

fn default_max_price() -> f64 {
    env_f64("MAX_PRICE_USDT", 100_000.0)
}

fn default_blacklist() -> Vec<String> {
    std::env::var("BLACKLIST_SYMBOLS")
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn default_min_score() -> f64 {
    env_f64("MIN_SCORE_THRESHOLD", 75.0)
}

fn default_cooldown_secs() -> u64 {
    env_u64("COOLDOWN_SECONDS", 300)
}

fn default_max_alerts() -> u32 {
    env_u64("MAX_ALERTS_PER_HOUR", 20) as u32
}

fn default_redis_url() -> Option<String> {
    std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty())
}

fn default_webhook_url() -> Option<String> {
    std::env::var("DISCORD_WEBHOOK_URL")
        .ok()
        .filter(|s| !s.is_empty())
}

fn default_pg_host() -> Option<String> {
    std::env::var("POSTGRES_HOST").ok().filter(|s| !s.is_empty())
}

fn default_pg_port() -> u16 {
    env_u64("POSTGRES_PORT", 5432) as u16
}

fn default_pg_db() -> String {
    std::env::var("POSTGRES_DB").unwrap_or_else(|_| "dynasty".into())
}

fn default_pg_user() -> String {
    std::env::var("POSTGRES_USER").unwrap_or_else(|_| "postgres".into())
}

fn default_pg_password() -> String {
    std::env::var("POSTGRES_PASSWORD").unwrap_or_default()
}

fn default_true() -> bool {
    env_bool("ENABLE_BTC_CONTEXT", true)
}

fn env_f64(key: &str, fallback: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

fn env_u64(key: &str, fallback: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

fn env_bool(key: &str, fallback: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True" | "yes"))
        .unwrap_or(fallback)
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            testnet: default_testnet(),
            rest_timeout_ms: default_rest_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            min_volume_24h_usdt: default_min_volume_24h(),
            min_open_interest_usdt: default_min_open_interest(),
            min_price_usdt: default_min_price(),
            max_price_usdt: default_max_price(),
            blacklist: default_blacklist(),
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            min_score_threshold: default_min_score(),
            enable_btc_context: default_true(),
        }
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: default_cooldown_secs(),
            max_alerts_per_hour: default_max_alerts(),
            redis_url: default_redis_url(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: default_webhook_url(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            host: default_pg_host(),
            port: default_pg_port(),
            dbname: default_pg_db(),
            user: default_pg_user(),
            password: default_pg_password(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig::default(),
            universe: UniverseConfig::default(),
            signals: SignalConfig::default(),
            governor: GovernorConfig::default(),
            notify: NotifyConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix DYNASTY__)
            .add_source(
                config::Environment::with_prefix("DYNASTY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let mut config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Blacklist comparisons are case-insensitive
        for entry in &mut config.universe.blacklist {
            *entry = entry.to_uppercase();
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.universe.min_volume_24h_usdt < 0.0 {
            anyhow::bail!("min_volume_24h_usdt must be non-negative");
        }

        if self.universe.min_price_usdt <= 0.0 {
            anyhow::bail!("min_price_usdt must be positive");
        }

        if self.universe.max_price_usdt <= self.universe.min_price_usdt {
            anyhow::bail!(
                "max_price_usdt ({}) must exceed min_price_usdt ({})",
                self.universe.max_price_usdt,
                self.universe.min_price_usdt
            );
        }

        if !(0.0..=100.0).contains(&self.signals.min_score_threshold) {
            anyhow::bail!("min_score_threshold must be between 0 and 100");
        }

        if self.governor.cooldown_seconds == 0 {
            anyhow::bail!("cooldown_seconds must be positive");
        }

        if self.governor.max_alerts_per_hour == 0 {
            anyhow::bail!("max_alerts_per_hour must be positive");
        }

        Ok(())
    }

    /// Webhook URL is mandatory for live dispatch; checked at start, not at
    /// load, so diagnostic subcommands work without one.
    pub fn require_webhook(&self) -> crate::Result<&str> {
        self.notify
            .webhook_url
            .as_deref()
            .ok_or_else(|| crate::Error::Config("DISCORD_WEBHOOK_URL is not set".into()))
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Exchange:
    testnet: {}
    rest_timeout: {}ms
  Universe:
    min_volume_24h: {} USDT
    min_open_interest: {} USDT
    price_band: [{}, {}]
    blacklist: {:?}
  Signals:
    min_score_threshold: {}
    btc_context: {}
  Governor:
    cooldown: {}s
    max_alerts_per_hour: {}
    redis: {}
  Notify:
    webhook_url: {}
  Persistence:
    postgres: {}
"#,
            self.exchange.testnet,
            self.exchange.rest_timeout_ms,
            self.universe.min_volume_24h_usdt,
            self.universe.min_open_interest_usdt,
            self.universe.min_price_usdt,
            self.universe.max_price_usdt,
            self.universe.blacklist,
            self.signals.min_score_threshold,
            self.signals.enable_btc_context,
            self.governor.cooldown_seconds,
            self.governor.max_alerts_per_hour,
            if self.governor.redis_url.is_some() {
                "configured"
            } else {
                "(in-process)"
            },
            if self.notify.webhook_url.is_some() {
                "***"
            } else {
                "(not set)"
            },
            if self.persistence.enabled() {
                "configured"
            } else {
                "(disabled)"
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.universe.min_volume_24h_usdt, 1_000_000.0);
        assert_eq!(config.governor.cooldown_seconds, 300);
        assert_eq!(config.governor.max_alerts_per_hour, 20);
        assert_eq!(config.signals.min_score_threshold, 75.0);
        assert!(config.signals.enable_btc_context);
    }

    #[test]
    fn test_validate_rejects_inverted_price_band() {
        let mut config = Config::default();
        config.universe.min_price_usdt = 10.0;
        config.universe.max_price_usdt = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let mut config = Config::default();
        config.governor.max_alerts_per_hour = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_require_webhook() {
        let mut config = Config::default();
        config.notify.webhook_url = None;
        assert!(config.require_webhook().is_err());
        config.notify.webhook_url = Some("https://example.com/hook".into());
        assert_eq!(config.require_webhook().unwrap(), "https://example.com/hook");
    }

    #[test]
    fn test_masked_display_hides_webhook() {
        let mut config = Config::default();
        config.notify.webhook_url = Some("https://discord.com/api/webhooks/secret".into());
        let display = config.masked_display();
        assert!(!display.contains("secret"));
        assert!(display.contains("***"));
    }
}
