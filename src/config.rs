use config::{Config, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::AgentDescriptor;
use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub staking: StakingConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub autopilot: AutopilotConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentsConfig {
    /// Registered agent fleet
    #[serde(default)]
    pub registry: Vec<AgentDescriptor>,
    /// Per-call timeout in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_call_timeout_ms() -> u64 {
    10_000
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            registry: Vec::new(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long an open circuit short-circuits calls (milliseconds)
    pub open_duration_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_duration_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StakingConfig {
    /// Maximum amount a single agent can put at risk per hunt
    pub max_stake: Decimal,
    /// Bonus rate applied to agreeing stakes, scaled by confidence
    pub bonus_rate: Decimal,
    /// Fraction of a disagreeing stake that is slashed
    pub slash_rate: Decimal,
    /// Reputation step for an immediate stake outcome
    pub stake_step: f64,
    /// Reputation step for a delayed ground-truth outcome
    pub truth_step: f64,
    /// Entries kept in each agent's score-change ring
    pub history_len: usize,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            max_stake: dec!(10),
            bonus_rate: dec!(0.5),
            slash_rate: dec!(0.3),
            stake_step: 0.02,
            truth_step: 0.05,
            history_len: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    /// Delay before a hunt's consensus is checked against reality (seconds)
    pub delay_secs: u64,
    /// How often the pending set is scanned (seconds)
    pub sweep_interval_secs: u64,
    /// Deferral applied when a price fetch fails (seconds)
    pub retry_interval_secs: u64,
    /// Dead zone: absolute % moves at or below this are neutral
    pub min_move_pct: Decimal,
    /// Maximum pending entries before oldest-first eviction
    pub pending_cap: usize,
    /// Maximum settled results kept in history
    pub history_cap: usize,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            delay_secs: 900,
            sweep_interval_secs: 30,
            retry_interval_secs: 60,
            min_move_pct: dec!(0.3),
            pending_cap: 200,
            history_cap: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutopilotConfig {
    /// Start the loop automatically under `serve`
    pub enabled: bool,
    /// Topic rotation; cursor wraps around
    pub topics: Vec<String>,
    /// Baseline interval the loop drifts back toward (milliseconds)
    pub base_interval_ms: u64,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    /// Confidence at or above this slows the loop down
    pub high_confidence: f64,
    /// Confidence at or below this speeds the loop up
    pub low_confidence: f64,
    /// Interval multiplier on strong signals (> 1)
    pub slowdown_factor: f64,
    /// Interval multiplier on weak signals (< 1)
    pub speedup_factor: f64,
    /// Per-cycle drift toward baseline in the middle band
    pub drift_rate: f64,
    /// Adaptations kept in history
    pub history_cap: usize,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            topics: vec!["bitcoin".into(), "ethereum".into(), "solana".into()],
            base_interval_ms: 300_000,
            min_interval_ms: 60_000,
            max_interval_ms: 1_800_000,
            high_confidence: 75.0,
            low_confidence: 25.0,
            slowdown_factor: 1.5,
            speedup_factor: 0.5,
            drift_rate: 0.3,
            history_cap: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum cached reports before LRU eviction
    pub capacity: usize,
    /// Report time-to-live (seconds)
    pub ttl_secs: u64,
    /// How often the TTL sweep runs (seconds)
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            ttl_secs: 3600,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding the per-module JSON documents
    pub data_dir: Option<PathBuf>,
    /// Debounce window between background flushes (seconds)
    pub flush_interval_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            flush_interval_secs: 5,
        }
    }
}

impl PersistenceConfig {
    /// Resolved data directory: explicit config, then the platform data
    /// dir, then `./data`.
    pub fn resolved_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        dirs::data_local_dir()
            .map(|d| d.join("quarry"))
            .unwrap_or_else(|| PathBuf::from("data"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// Simple-price endpoint, CoinGecko-compatible
    pub price_endpoint: String,
    /// Proxy asset used when no keyword matches a topic
    pub baseline_asset: String,
    /// Keyword → asset-id overrides, checked case-insensitively
    #[serde(default)]
    pub proxy_keywords: HashMap<String, String>,
    /// Price request timeout in milliseconds
    #[serde(default = "default_price_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_price_timeout_ms() -> u64 {
    5_000
}

impl Default for OracleConfig {
    fn default() -> Self {
        let mut proxy_keywords = HashMap::new();
        for (kw, asset) in [
            ("btc", "bitcoin"),
            ("bitcoin", "bitcoin"),
            ("eth", "ethereum"),
            ("ethereum", "ethereum"),
            ("sol", "solana"),
            ("solana", "solana"),
            ("doge", "dogecoin"),
        ] {
            proxy_keywords.insert(kw.to_string(), asset.to_string());
        }
        Self {
            price_endpoint: "https://api.coingecko.com/api/v3/simple/price".into(),
            baseline_asset: "bitcoin".into(),
            proxy_keywords,
            timeout_ms: default_price_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is unset
    pub level: String,
    /// Optional directory for daily-rolling file output
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load layered configuration: `config/default`, optional
    /// `config/local`, optional explicit file, then `QUARRY_*` environment
    /// overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path));
        }

        let cfg = builder
            .add_source(Environment::with_prefix("QUARRY").separator("__"))
            .build()?;

        Ok(cfg.try_deserialize()?)
    }
}
