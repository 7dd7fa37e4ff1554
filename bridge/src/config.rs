//! Configuration for the lottery bridge
//!
//! Loaded once at process start and treated as immutable afterwards; each
//! gateway receives its own section at construction.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// TON API and gas-station wallet configuration
#[derive(Clone, Deserialize)]
pub struct TonApiConfig {
    /// TON HTTP API base URL (message submission)
    #[serde(default = "default_ton_base_url")]
    pub base_url: String,

    /// Getter-method endpoint URL
    #[serde(default = "default_ton_getter_url")]
    pub getter_url: String,

    /// Lottery contract address (raw or user-friendly form)
    pub contract_address: String,

    /// 24-word mnemonic of the wallet paying for state-mutating messages
    pub gas_station_mnemonic: String,

    /// Address of the gas-station wallet
    pub gas_station_address: String,

    /// Optional API key sent as `X-API-Key`
    #[serde(default)]
    pub api_key: Option<String>,

    /// Wallet v4 subwallet id
    #[serde(default = "default_subwallet_id")]
    pub subwallet_id: u32,

    /// Value attached to each contract message, in nanotons
    #[serde(default = "default_message_value")]
    pub message_value_nanotons: u64,

    /// Seconds an external message stays valid
    #[serde(default = "default_message_ttl")]
    pub message_ttl_secs: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Fireblocks API configuration
#[derive(Clone, Deserialize)]
pub struct FireblocksApiConfig {
    #[serde(default = "default_fireblocks_base_url")]
    pub base_url: String,

    pub api_key: String,

    /// PEM-encoded RSA private key used to sign request tokens
    pub private_key: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Retry policy applied beneath the gateways, per HTTP request
#[derive(Debug, Clone, Deserialize)]
pub struct ResiliencePolicyConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Payout polling budget
#[derive(Debug, Clone, Deserialize)]
pub struct PayoutPolicyConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

/// Draw service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub ton: TonApiConfig,

    #[serde(default)]
    pub resilience: ResiliencePolicyConfig,

    /// Seconds between draw cycles
    #[serde(default = "default_draw_check_interval")]
    pub draw_check_interval_secs: u64,

    /// Seconds between state re-fetches while waiting for a new draw
    #[serde(default = "default_draw_confirm_interval")]
    pub draw_confirm_interval_secs: u64,

    /// State re-fetches before a draw is considered unobserved
    #[serde(default = "default_draw_confirm_attempts")]
    pub draw_confirm_attempts: u32,

    /// File recording claimed draw periods
    #[serde(default = "default_draw_ledger_path")]
    pub draw_ledger_path: String,

    /// Health server port
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Circuit breaker failure threshold (consecutive failures)
    #[serde(default = "default_circuit_breaker_failure_threshold")]
    pub circuit_breaker_failure_threshold: u64,

    /// Circuit breaker reset timeout in seconds
    #[serde(default = "default_circuit_breaker_reset_timeout_secs")]
    pub circuit_breaker_reset_timeout_secs: u64,
}

fn default_ton_base_url() -> String {
    "https://toncenter.com/api/v2".to_string()
}

fn default_ton_getter_url() -> String {
    "https://toncenter.com/api/v3/runGetMethod".to_string()
}

fn default_fireblocks_base_url() -> String {
    "https://api.fireblocks.io".to_string()
}

fn default_subwallet_id() -> u32 {
    698_983_191
}

fn default_message_value() -> u64 {
    50_000_000
}

fn default_message_ttl() -> u32 {
    60
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_poll_attempts() -> u32 {
    60
}

fn default_draw_check_interval() -> u64 {
    300
}

fn default_draw_confirm_interval() -> u64 {
    10
}

fn default_draw_confirm_attempts() -> u32 {
    30
}

fn default_draw_ledger_path() -> String {
    "draw-ledger.json".to_string()
}

fn default_health_port() -> u16 {
    9090
}

fn default_circuit_breaker_failure_threshold() -> u64 {
    5
}

fn default_circuit_breaker_reset_timeout_secs() -> u64 {
    60
}

impl Default for ResiliencePolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for PayoutPolicyConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("{} not set", key))
}

fn parsed_or<T: FromStr>(key: &str, default: fn() -> T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(default)
}

impl TonApiConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            base_url: std::env::var("TON_API_BASE_URL").unwrap_or_else(|_| default_ton_base_url()),
            getter_url: std::env::var("TON_API_GETTER_URL")
                .unwrap_or_else(|_| default_ton_getter_url()),
            contract_address: required("TON_CONTRACT_ADDRESS")?,
            gas_station_mnemonic: required("TON_GAS_STATION_MNEMONIC")?,
            gas_station_address: required("TON_GAS_STATION_ADDRESS")?,
            api_key: std::env::var("TON_API_KEY").ok().filter(|k| !k.is_empty()),
            subwallet_id: parsed_or("TON_SUBWALLET_ID", default_subwallet_id),
            message_value_nanotons: parsed_or("TON_MESSAGE_VALUE_NANOTONS", default_message_value),
            message_ttl_secs: parsed_or("TON_MESSAGE_TTL_SECS", default_message_ttl),
            request_timeout_secs: parsed_or("TON_REQUEST_TIMEOUT_SECS", default_request_timeout_secs),
            connect_timeout_secs: parsed_or("TON_CONNECT_TIMEOUT_SECS", default_connect_timeout_secs),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl FireblocksApiConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            base_url: std::env::var("FIREBLOCKS_BASE_URL")
                .unwrap_or_else(|_| default_fireblocks_base_url()),
            api_key: required("FIREBLOCKS_API_KEY")?,
            private_key: required("FIREBLOCKS_PRIVATE_KEY")?,
            request_timeout_secs: parsed_or(
                "FIREBLOCKS_REQUEST_TIMEOUT_SECS",
                default_request_timeout_secs,
            ),
            connect_timeout_secs: parsed_or(
                "FIREBLOCKS_CONNECT_TIMEOUT_SECS",
                default_connect_timeout_secs,
            ),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl ResiliencePolicyConfig {
    pub fn from_env() -> Self {
        Self {
            max_retries: parsed_or("RETRY_MAX_RETRIES", default_max_retries),
            base_delay_ms: parsed_or("RETRY_BASE_DELAY_MS", default_base_delay_ms),
            max_delay_ms: parsed_or("RETRY_MAX_DELAY_MS", default_max_delay_ms),
        }
    }
}

impl PayoutPolicyConfig {
    pub fn from_env() -> Self {
        Self {
            poll_interval_secs: parsed_or("PAYOUT_POLL_INTERVAL_SECS", default_poll_interval_secs),
            max_poll_attempts: parsed_or("PAYOUT_MAX_POLL_ATTEMPTS", default_max_poll_attempts),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            ton: TonApiConfig::from_env()?,
            resilience: ResiliencePolicyConfig::from_env(),
            draw_check_interval_secs: parsed_or(
                "DRAW_CHECK_INTERVAL_SECS",
                default_draw_check_interval,
            ),
            draw_confirm_interval_secs: parsed_or(
                "DRAW_CONFIRM_INTERVAL_SECS",
                default_draw_confirm_interval,
            ),
            draw_confirm_attempts: parsed_or("DRAW_CONFIRM_ATTEMPTS", default_draw_confirm_attempts),
            draw_ledger_path: std::env::var("DRAW_LEDGER_PATH")
                .unwrap_or_else(|_| default_draw_ledger_path()),
            health_port: parsed_or("HEALTH_PORT", default_health_port),
            circuit_breaker_failure_threshold: parsed_or(
                "CIRCUIT_BREAKER_FAILURE_THRESHOLD",
                default_circuit_breaker_failure_threshold,
            ),
            circuit_breaker_reset_timeout_secs: parsed_or(
                "CIRCUIT_BREAKER_RESET_TIMEOUT_SECS",
                default_circuit_breaker_reset_timeout_secs,
            ),
        })
    }

    /// Load configuration from a file, with `LOTTERY__`-prefixed environment overrides
    ///
    /// Nested keys use a double underscore, e.g. `LOTTERY__TON__API_KEY`.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("LOTTERY")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

impl fmt::Debug for TonApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TonApiConfig")
            .field("base_url", &self.base_url)
            .field("getter_url", &self.getter_url)
            .field("contract_address", &self.contract_address)
            .field("gas_station_mnemonic", &redacted(&self.gas_station_mnemonic))
            .field("gas_station_address", &self.gas_station_address)
            .field("api_key", &self.api_key.as_deref().map(redacted))
            .field("subwallet_id", &self.subwallet_id)
            .field("message_value_nanotons", &self.message_value_nanotons)
            .field("message_ttl_secs", &self.message_ttl_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl fmt::Debug for FireblocksApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FireblocksApiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redacted(&self.api_key))
            .field("private_key", &redacted(&self.private_key))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}
