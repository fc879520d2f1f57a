//! Configuration module for WalletGuard

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{SettingsError, StateError};
use crate::types::Category;

/// Upper bound on waiting for a shared-state lock before treating it as fatal
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Solana RPC (read-only, no wallet keys needed)
    pub rpc_url: String,
    pub ws_url: String,
    pub wallet_address: String,
    pub poll_interval_secs: u64,
    pub signature_fetch_limit: usize,
    pub lookup_timeout_ms: u64,

    // Price lookups
    pub moralis_api_key: Option<String>,

    // Persistent state
    pub data_dir: PathBuf,

    // Telegram / Discord Alerts
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub telegram_api_url: String,
    pub telegram_daily_cap: u32,
    pub discord_webhook_url: Option<String>,
    pub alert_delivery_timeout_secs: u64,

    // Dashboard
    pub dashboard_port: u16,

    // Initial classifier settings (overridable at runtime)
    pub settings: ClassifierSettings,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut settings = ClassifierSettings::default();
        for key in ClassifierSettings::KEYS {
            let var = key.to_uppercase();
            if let Some(value) = env::var(&var).ok().and_then(|v| v.parse::<f64>().ok()) {
                if let Err(e) = settings.set(key, value) {
                    tracing::warn!(target: "CONFIG", "Ignoring {}: {}", var, e);
                }
            }
        }

        Self {
            rpc_url: env::var("SOLANA_RPC_URL")
                .unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".to_string()),
            ws_url: env::var("SOLANA_WS_URL")
                .unwrap_or_else(|_| "wss://api.mainnet-beta.solana.com".to_string()),
            wallet_address: env::var("WALLET_ADDRESS").unwrap_or_default(),
            poll_interval_secs: env::var("POLL_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            signature_fetch_limit: env::var("SIGNATURE_FETCH_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            lookup_timeout_ms: env::var("LOOKUP_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),

            moralis_api_key: env::var("MORALIS_API_KEY").ok().filter(|k| !k.is_empty()),

            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),

            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_chat_id: env::var("TELEGRAM_CHAT_ID").ok(),
            telegram_api_url: env::var("TELEGRAM_API_URL")
                .unwrap_or_else(|_| "https://api.telegram.org".to_string()),
            telegram_daily_cap: env::var("TELEGRAM_DAILY_CAP")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            discord_webhook_url: env::var("DISCORD_WEBHOOK_URL").ok().filter(|u| !u.is_empty()),
            alert_delivery_timeout_secs: env::var("ALERT_DELIVERY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),

            dashboard_port: env::var("DASHBOARD_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),

            settings,
        }
    }

    /// Configuration for tests and offline tooling: no Telegram, local data dir
    pub fn offline(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8899".to_string(),
            ws_url: "ws://127.0.0.1:8900".to_string(),
            wallet_address: String::new(),
            poll_interval_secs: 30,
            signature_fetch_limit: 10,
            lookup_timeout_ms: 5000,
            moralis_api_key: None,
            data_dir: data_dir.into(),
            telegram_bot_token: None,
            telegram_chat_id: None,
            telegram_api_url: "https://api.telegram.org".to_string(),
            telegram_daily_cap: 100,
            discord_webhook_url: None,
            alert_delivery_timeout_secs: 10,
            dashboard_port: 5000,
            settings: ClassifierSettings::default(),
        }
    }

    pub fn honeypot_file(&self) -> PathBuf {
        self.data_dir.join("honeypots.json")
    }

    pub fn whitelist_file(&self) -> PathBuf {
        self.data_dir.join("whitelist.json")
    }

    pub fn suspicious_file(&self) -> PathBuf {
        self.data_dir.join("suspicious_addresses.json")
    }

    pub fn phishing_file(&self) -> PathBuf {
        self.data_dir.join("phishing_addresses.json")
    }

    pub fn database_file(&self) -> PathBuf {
        self.data_dir.join("walletguard.db")
    }
}

/// Thresholds and windows consumed by the classifiers.
///
/// All durations are in seconds. Every field can be overridden at runtime by
/// key through [`SharedSettings::apply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSettings {
    // Honeypot
    pub honeypot_confidence_threshold: f64,
    pub honeypot_holders_threshold: f64,
    pub honeypot_velocity_count: f64,
    pub honeypot_velocity_window: i64,

    // Suspicious activity aggregates
    pub suspicious_horizon: i64,
    pub rapid_window: i64,
    pub rapid_transactions: f64,
    pub large_sol_volume: f64,
    pub high_value_usd: f64,
    pub unusual_program_count: f64,

    // Sub-detectors
    pub flash_launch_window: i64,
    pub flash_min_liquidity_events: f64,
    pub flash_min_buys: f64,
    pub flash_buy_sell_ratio: f64,
    pub unsellable_failed_sells: f64,
    pub sybil_min_group_size: f64,
    pub sybil_window: i64,
    pub bridge_window: i64,
    pub bridge_min_interactions: f64,
    pub obfuscation_min_counterparts: f64,

    // Phishing
    pub phishing_confidence_threshold: f64,
    pub phishing_promotion_threshold: f64,
    pub phishing_dust_threshold: f64,
    pub phishing_pattern_retention: i64,
    pub collection_name_similarity: f64,
    pub collection_symbol_similarity: f64,

    // Transfer notices
    pub large_transfer_sol: f64,
    pub large_transfer_tokens: f64,

    // Alert cooldowns
    pub honeypot_alert_cooldown: i64,
    pub suspicious_alert_cooldown: i64,
    pub phishing_alert_cooldown: i64,
    pub transfer_alert_cooldown: i64,
    pub worthless_alert_cooldown: i64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            honeypot_confidence_threshold: 0.5,
            honeypot_holders_threshold: 10.0,
            honeypot_velocity_count: 3.0,
            honeypot_velocity_window: 300,

            suspicious_horizon: 300,
            rapid_window: 60,
            rapid_transactions: 5.0,
            large_sol_volume: 25.0,
            high_value_usd: 1000.0,
            unusual_program_count: 3.0,

            flash_launch_window: 3600,
            flash_min_liquidity_events: 2.0,
            flash_min_buys: 5.0,
            flash_buy_sell_ratio: 3.0,
            unsellable_failed_sells: 3.0,
            sybil_min_group_size: 10.0,
            sybil_window: 300,
            bridge_window: 600,
            bridge_min_interactions: 2.0,
            obfuscation_min_counterparts: 3.0,

            phishing_confidence_threshold: 0.7,
            phishing_promotion_threshold: 0.85,
            phishing_dust_threshold: 0.01,
            phishing_pattern_retention: 24 * 60 * 60,
            collection_name_similarity: 0.8,
            collection_symbol_similarity: 0.9,

            large_transfer_sol: 1.0,
            large_transfer_tokens: 100.0,

            honeypot_alert_cooldown: 3600,
            suspicious_alert_cooldown: 300,
            phishing_alert_cooldown: 300,
            transfer_alert_cooldown: 300,
            worthless_alert_cooldown: 24 * 60 * 60,
        }
    }
}

impl ClassifierSettings {
    /// Keys accepted by [`ClassifierSettings::set`]
    pub const KEYS: [&'static str; 33] = [
        "honeypot_confidence_threshold",
        "honeypot_holders_threshold",
        "honeypot_velocity_count",
        "honeypot_velocity_window",
        "suspicious_horizon",
        "rapid_window",
        "rapid_transactions",
        "large_sol_volume",
        "high_value_usd",
        "unusual_program_count",
        "flash_launch_window",
        "flash_min_liquidity_events",
        "flash_min_buys",
        "flash_buy_sell_ratio",
        "unsellable_failed_sells",
        "sybil_min_group_size",
        "sybil_window",
        "bridge_window",
        "bridge_min_interactions",
        "obfuscation_min_counterparts",
        "phishing_confidence_threshold",
        "phishing_promotion_threshold",
        "phishing_dust_threshold",
        "phishing_pattern_retention",
        "collection_name_similarity",
        "collection_symbol_similarity",
        "large_transfer_sol",
        "large_transfer_tokens",
        "honeypot_alert_cooldown",
        "suspicious_alert_cooldown",
        "phishing_alert_cooldown",
        "transfer_alert_cooldown",
        "worthless_alert_cooldown",
    ];

    /// Override one setting by key
    pub fn set(&mut self, key: &str, value: f64) -> Result<(), SettingsError> {
        let invalid = |reason| SettingsError::InvalidValue {
            key: key.to_string(),
            value,
            reason,
        };

        if !value.is_finite() || value < 0.0 {
            return Err(invalid("must be a non-negative number"));
        }

        let seconds = value.round() as i64;

        match key {
            "honeypot_confidence_threshold" => self.honeypot_confidence_threshold = value,
            "honeypot_holders_threshold" => self.honeypot_holders_threshold = value,
            "honeypot_velocity_count" => self.honeypot_velocity_count = value,
            "honeypot_velocity_window" => {
                if seconds > HONEYPOT_RETENTION {
                    return Err(invalid("exceeds velocity retention"));
                }
                self.honeypot_velocity_window = seconds
            }
            "suspicious_horizon" => {
                if seconds > SUSPICIOUS_RETENTION_CEILING {
                    return Err(invalid("exceeds activity retention"));
                }
                self.suspicious_horizon = seconds
            }
            "rapid_window" => {
                if seconds > SUSPICIOUS_RETENTION_CEILING {
                    return Err(invalid("exceeds activity retention"));
                }
                self.rapid_window = seconds
            }
            "rapid_transactions" => self.rapid_transactions = value,
            "large_sol_volume" => self.large_sol_volume = value,
            "high_value_usd" => self.high_value_usd = value,
            "unusual_program_count" => self.unusual_program_count = value,
            "flash_launch_window" => self.flash_launch_window = seconds,
            "flash_min_liquidity_events" => self.flash_min_liquidity_events = value,
            "flash_min_buys" => self.flash_min_buys = value,
            "flash_buy_sell_ratio" => self.flash_buy_sell_ratio = value,
            "unsellable_failed_sells" => self.unsellable_failed_sells = value,
            "sybil_min_group_size" => self.sybil_min_group_size = value,
            "sybil_window" => self.sybil_window = seconds,
            "bridge_window" => self.bridge_window = seconds,
            "bridge_min_interactions" => self.bridge_min_interactions = value,
            "obfuscation_min_counterparts" => self.obfuscation_min_counterparts = value,
            "phishing_confidence_threshold" => self.phishing_confidence_threshold = value,
            "phishing_promotion_threshold" => self.phishing_promotion_threshold = value,
            "phishing_dust_threshold" => self.phishing_dust_threshold = value,
            "phishing_pattern_retention" => self.phishing_pattern_retention = seconds,
            "collection_name_similarity" => self.collection_name_similarity = value,
            "collection_symbol_similarity" => self.collection_symbol_similarity = value,
            "large_transfer_sol" => self.large_transfer_sol = value,
            "large_transfer_tokens" => self.large_transfer_tokens = value,
            "honeypot_alert_cooldown" => self.honeypot_alert_cooldown = seconds,
            "suspicious_alert_cooldown" => self.suspicious_alert_cooldown = seconds,
            "phishing_alert_cooldown" => self.phishing_alert_cooldown = seconds,
            "transfer_alert_cooldown" => self.transfer_alert_cooldown = seconds,
            "worthless_alert_cooldown" => self.worthless_alert_cooldown = seconds,
            _ => return Err(SettingsError::UnknownKey(key.to_string())),
        }

        Ok(())
    }

    /// Alert cooldown for a verdict category
    pub fn cooldown_for(&self, category: Category) -> i64 {
        match category {
            Category::Honeypot => self.honeypot_alert_cooldown,
            Category::Phishing | Category::FakeCollection => self.phishing_alert_cooldown,
            Category::LargeTransfer | Category::HoneypotTransfer | Category::HoneypotSwap => {
                self.transfer_alert_cooldown
            }
            Category::TokenWorthless => self.worthless_alert_cooldown,
            Category::SuspiciousActivity
            | Category::FlashLaunch
            | Category::UnsellableToken
            | Category::SybilCluster
            | Category::BridgeAbuse
            | Category::FundObfuscation => self.suspicious_alert_cooldown,
        }
    }
}

/// Retention ceiling for per-address activity windows (10 minutes)
pub const SUSPICIOUS_RETENTION_CEILING: i64 = 600;

/// Retention for per-mint velocity observations (1 hour)
pub const HONEYPOT_RETENTION: i64 = 3600;

/// Classifier settings shared between the ingestion loop and the dashboard
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<ClassifierSettings>>,
}

impl SharedSettings {
    pub fn new(settings: ClassifierSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Copy of the current settings
    pub fn snapshot(&self) -> Result<ClassifierSettings, StateError> {
        self.inner
            .try_read_for(LOCK_TIMEOUT)
            .map(|s| s.clone())
            .ok_or_else(|| StateError::read("settings"))
    }

    /// Apply a runtime override
    pub fn apply(&self, key: &str, value: f64) -> Result<(), SettingsError> {
        let mut settings = self
            .inner
            .try_write_for(LOCK_TIMEOUT)
            .ok_or_else(|| StateError::write("settings"))?;
        settings.set(key, value)
    }
}

/// Immutable catalog of program ids and well-known tokens, injected into the
/// classifiers at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramCatalog {
    /// DEX / aggregator programs: a token transfer through one is a buy or sell
    pub swap_programs: Vec<String>,
    /// AMM pool programs whose touches count as liquidity events
    pub liquidity_programs: Vec<String>,
    /// Cross-chain bridge programs
    pub bridge_programs: Vec<String>,
    /// Programs counted by the program-diversity rule. Wallets rarely invoke
    /// these directly
    pub unusual_programs: Vec<String>,
    /// Mints that are never analyzed as honeypots: (mint, name, decimals)
    pub known_tokens: Vec<(String, String, u8)>,
    /// NFT collections that fake mints imitate: (name, symbol)
    pub popular_collections: Vec<(String, String)>,
}

impl ProgramCatalog {
    pub fn is_known_token(&self, mint: &str) -> bool {
        self.known_tokens.iter().any(|(m, _, _)| m == mint)
    }

    pub fn token_name(&self, mint: &str) -> Option<&str> {
        self.known_tokens
            .iter()
            .find(|(m, _, _)| m == mint)
            .map(|(_, name, _)| name.as_str())
    }

    pub fn token_decimals(&self, mint: &str) -> Option<u8> {
        self.known_tokens
            .iter()
            .find(|(m, _, _)| m == mint)
            .map(|(_, _, d)| *d)
    }
}

fn owned(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

impl Default for ProgramCatalog {
    fn default() -> Self {
        Self {
            swap_programs: owned(&[
                "JUP4Fb2cqiRUcaTHdrPC8h2gNsA2ETXiPDD33WcGuJB",  // Jupiter
                "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4",  // Jupiter v6
                "RVKd61ztZW9GdKz6Y8qEJ4zQ2LkWcE6gY6z7mY3bR2U",  // Meteora
                "srmqPvymJeFKQ4zGQed1GFppgkRHL9kaELCbyksJtPX",  // Openbook
                "9W959DqEETiGZocYWCQPaJ6sBmUzgfxXfqGeTEdp3aQP", // Orca
                "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8", // Raydium
            ]),
            liquidity_programs: owned(&[
                "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8", // Raydium AMM v4
                "CPMMoo8L3F4NbTegBCKVNunggL7H1ZpdTHKxQB5qKP1C", // Raydium CPMM
                "whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc",  // Orca Whirlpool
                "Eo7WjKq67rjJQSZxS6z3YkapzY3eMj6Xy8X5EQVn5UaB", // Meteora pools
            ]),
            bridge_programs: owned(&[
                "wormDTUJ6AWPNvk59vGQbDvGJmqbDTdgWgAqcLBCgUb",  // Wormhole core
                "wormhole6RqHC3EVv5zSmHRsjiJUN8cJ6Dnaa2RsfFHpCQrx", // Wormhole token bridge
                "DEbrdGj3HsRsAzx6uH4MKyREKxVAfBydijLUF3ygsFfh", // deBridge
                "BrdgN2RPzEMWF96ZbnnJaUtQDQx7VRXYaHHbYCBvceWB", // Allbridge
            ]),
            unusual_programs: owned(&[
                "BPFLoader1111111111111111111111111111111111",  // BPF loader (deprecated)
                "BPFLoader2111111111111111111111111111111111",  // BPF loader 2
                "BPFLoaderUpgradeab1e11111111111111111111111",  // Upgradeable loader
                "Config1111111111111111111111111111111111111",  // Config
                "Vote111111111111111111111111111111111111111",  // Vote
            ]),
            known_tokens: vec![
                ("So11111111111111111111111111111111111111112".into(), "Wrapped SOL".into(), 9),
                ("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".into(), "USDC".into(), 6),
                ("Es9vMFrzaCERz1aZHBKz9ZwrZcpt1mMT8ffvAJhY7kF".into(), "USDT".into(), 6),
                ("DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263".into(), "Bonk".into(), 5),
                ("mSoLzYCxHdYgdzU16g5QSh3i5K3z3KZK7ytfqcJm7So".into(), "Marinade SOL".into(), 9),
            ],
            popular_collections: [
                ("Mad Lads", "MAD"),
                ("Okay Bears", "OKB"),
                ("DeGods", "DGOD"),
                ("y00ts", "Y00T"),
                ("Claynosaurz", "CLAY"),
                ("Tensorians", "TNSR"),
                ("Solana Monkey Business", "SMB"),
                ("Famous Fox Federation", "FFF"),
            ]
            .iter()
            .map(|(name, symbol)| (name.to_string(), symbol.to_string()))
            .collect(),
        }
    }
}
