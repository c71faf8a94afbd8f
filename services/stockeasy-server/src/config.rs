//! Server Configuration
//!
//! Layered with the `config` crate: an optional file given on the command
//! line, then `config/default` and `config/local`, then `STOCKEASY__*`
//! environment variables (`STOCKEASY__SERVER__PORT=8080`). A `.env` file is
//! loaded first if present.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use stockeasy_agent::OrchestratorConfig;
use stockeasy_restock::{Forecast, TriggerConfig};
use stockeasy_types::{Currency, OwnerId};

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub payments: PaymentSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub restock: RestockSettings,

    /// Sessions delegated at startup
    #[serde(default = "default_sessions")]
    pub sessions: Vec<SessionSeed>,
}

/// Server binding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Grace period for in-flight requests on shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorMode {
    /// Deterministic fake references, no network
    Simulated,
    /// POST to a payment relay
    Http,
}

/// Payment orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSettings {
    #[serde(default = "default_executor_mode")]
    pub executor: ExecutorMode,

    /// Relay endpoint, required in `http` mode
    #[serde(default)]
    pub relay_url: Option<String>,

    #[serde(default = "default_executor_timeout")]
    pub executor_timeout_ms: u64,

    #[serde(default = "default_max_commit_attempts")]
    pub max_commit_attempts: u32,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_journal_size")]
    pub journal_size: usize,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            executor: default_executor_mode(),
            relay_url: None,
            executor_timeout_ms: default_executor_timeout(),
            max_commit_attempts: default_max_commit_attempts(),
            backoff_base_ms: default_backoff_base(),
            journal_size: default_journal_size(),
        }
    }
}

impl PaymentSettings {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            executor_timeout_ms: self.executor_timeout_ms,
            max_commit_attempts: self.max_commit_attempts,
            backoff_base_ms: self.backoff_base_ms,
            journal_size: self.journal_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sled,
}

/// Policy store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,

    /// Database directory for the sled backend
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
        }
    }
}

/// One supplier and its price list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierSettings {
    pub id: String,
    /// Payment address
    pub payee: String,
    /// Unit price per product
    #[serde(default)]
    pub prices: BTreeMap<String, u64>,
    #[serde(default)]
    pub available_stock: Option<u64>,
}

/// Restock agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestockSettings {
    /// Whose session pays for restocks
    #[serde(default = "default_owner")]
    pub owner_id: String,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default = "default_low_stock_threshold")]
    pub low_stock_threshold: u64,

    #[serde(default = "default_critical_stock")]
    pub critical_stock: u64,

    #[serde(default = "default_cooldown")]
    pub cooldown_secs: i64,

    #[serde(default = "default_safety_margin")]
    pub safety_margin_percent: u64,

    /// Run a restock check right after every sale
    #[serde(default = "default_true")]
    pub auto_on_sale: bool,

    /// Run a full cycle on this interval; off when unset
    #[serde(default)]
    pub cycle_interval_secs: Option<u64>,

    #[serde(default = "default_suppliers")]
    pub suppliers: Vec<SupplierSettings>,

    /// Starting shelf quantities
    #[serde(default = "default_inventory")]
    pub inventory: BTreeMap<String, u64>,

    /// Remote forecast oracle; the static table below is used when unset
    #[serde(default)]
    pub oracle_url: Option<String>,

    #[serde(default)]
    pub forecasts: BTreeMap<String, Forecast>,
}

impl Default for RestockSettings {
    fn default() -> Self {
        Self {
            owner_id: default_owner(),
            currency: default_currency(),
            low_stock_threshold: default_low_stock_threshold(),
            critical_stock: default_critical_stock(),
            cooldown_secs: default_cooldown(),
            safety_margin_percent: default_safety_margin(),
            auto_on_sale: true,
            cycle_interval_secs: None,
            suppliers: default_suppliers(),
            inventory: default_inventory(),
            oracle_url: None,
            forecasts: BTreeMap::new(),
        }
    }
}

impl RestockSettings {
    pub fn trigger_config(&self) -> TriggerConfig {
        TriggerConfig {
            owner_id: OwnerId::from(self.owner_id.as_str()),
            currency: Currency::new(&self.currency),
            low_stock_threshold: self.low_stock_threshold,
            critical_stock: self.critical_stock,
            cooldown_secs: self.cooldown_secs,
            safety_margin_percent: self.safety_margin_percent,
        }
    }
}

/// A session delegated at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSeed {
    pub owner_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub agent_key: String,
    pub allowlist: Vec<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub per_transaction_limit: u64,
    pub daily_limit: u64,
    pub monthly_limit: u64,
    #[serde(default = "default_session_hours")]
    pub valid_for_hours: i64,
}

// =============================================================================
// Default Functions
// =============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_shutdown_timeout() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_executor_mode() -> ExecutorMode {
    ExecutorMode::Simulated
}

fn default_executor_timeout() -> u64 {
    10_000
}

fn default_max_commit_attempts() -> u32 {
    8
}

fn default_backoff_base() -> u64 {
    5
}

fn default_journal_size() -> usize {
    1000
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Memory
}

fn default_store_path() -> String {
    "data/policy".to_string()
}

fn default_owner() -> String {
    "shop-1".to_string()
}

fn default_currency() -> String {
    "INR".to_string()
}

fn default_low_stock_threshold() -> u64 {
    3
}

fn default_critical_stock() -> u64 {
    1
}

fn default_cooldown() -> i64 {
    7 * 24 * 60 * 60 // 7 days
}

fn default_safety_margin() -> u64 {
    20
}

fn default_session_hours() -> i64 {
    24 * 30
}

fn default_true() -> bool {
    true
}

const SUP1_ADDRESS: &str = "0x1111111111111111111111111111111111111111";
const SUP2_ADDRESS: &str = "0x2222222222222222222222222222222222222222";

fn default_suppliers() -> Vec<SupplierSettings> {
    vec![
        SupplierSettings {
            id: "SUP1".to_string(),
            payee: SUP1_ADDRESS.to_string(),
            prices: BTreeMap::from([("Milk".to_string(), 30), ("Bread".to_string(), 25)]),
            available_stock: None,
        },
        SupplierSettings {
            id: "SUP2".to_string(),
            payee: SUP2_ADDRESS.to_string(),
            prices: BTreeMap::from([("Milk".to_string(), 28), ("Bread".to_string(), 22)]),
            available_stock: None,
        },
    ]
}

fn default_inventory() -> BTreeMap<String, u64> {
    BTreeMap::from([("Milk".to_string(), 10), ("Bread".to_string(), 5)])
}

fn default_sessions() -> Vec<SessionSeed> {
    vec![SessionSeed {
        owner_id: default_owner(),
        session_id: None,
        agent_key: "agent-demo".to_string(),
        allowlist: vec![SUP1_ADDRESS.to_string(), SUP2_ADDRESS.to_string()],
        currency: default_currency(),
        per_transaction_limit: 2_000,
        daily_limit: 20_000,
        monthly_limit: 500_000,
        valid_for_hours: default_session_hours(),
    }]
}

// =============================================================================
// Configuration Loading
// =============================================================================

impl ServerConfig {
    /// Load configuration from environment and optional config file
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false));

        builder = builder.add_source(
            config::Environment::with_prefix("STOCKEASY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Reject configurations the server cannot start with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.payments.executor == ExecutorMode::Http && self.payments.relay_url.is_none() {
            anyhow::bail!("payments.relay_url must be set when payments.executor = \"http\"");
        }
        if self.payments.max_commit_attempts == 0 {
            anyhow::bail!("payments.max_commit_attempts must be at least 1");
        }
        if self.restock.critical_stock >= self.restock.low_stock_threshold {
            tracing::warn!(
                critical = self.restock.critical_stock,
                threshold = self.restock.low_stock_threshold,
                "critical stock is not below the low-stock threshold; cooldown never applies"
            );
        }
        Ok(())
    }
}
