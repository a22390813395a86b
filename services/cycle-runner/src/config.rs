//! Runner Configuration
//!
//! Cycle parameters and credentials come from positional CLI arguments.
//! Runner settings (exchange endpoints, trading mode, paper account) come
//! from an optional settings file overlaid by `CYCLE_RUNNER__*` environment
//! variables.

use std::path::{Path, PathBuf};

use clap::Parser;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_INSTRUMENT: &str = "BTCUSDT:DEMO";
pub const DEFAULT_LEVERAGE: u32 = 100;
pub const DEFAULT_INTERVAL_MS: u64 = 60_000;

/// Environment prefix for runner settings
const ENV_PREFIX: &str = "CYCLE_RUNNER";

/// Fatal startup errors; the process exits before any network activity
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Pass private key as first argument and api key as second argument (missing {0})")]
    MissingCredential(&'static str),

    #[error("Leverage must be a positive integer, got {0}")]
    InvalidLeverage(u32),

    #[error("Interval must be a positive number of milliseconds, got {0}")]
    InvalidInterval(u64),

    #[error("Instrument must not be empty")]
    EmptyInstrument,

    #[error("Failed to load runner settings: {0}")]
    Settings(#[from] ::config::ConfigError),
}

/// Command line interface
#[derive(Debug, Parser)]
#[command(name = "cycle-runner", version, about = "Fixed-interval open/close trading cycle runner")]
pub struct Cli {
    /// Wallet private key
    pub wallet_private_key: Option<String>,

    /// Exchange API key
    pub api_key: Option<String>,

    /// Instrument pair to trade
    #[arg(default_value = DEFAULT_INSTRUMENT)]
    pub instrument: String,

    /// Leverage for every order
    #[arg(default_value_t = DEFAULT_LEVERAGE)]
    pub leverage: u32,

    /// Trading cycle interval in milliseconds
    #[arg(default_value_t = DEFAULT_INTERVAL_MS)]
    pub interval_ms: u64,

    /// Runner settings file (toml, yaml or json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,
}

impl Cli {
    /// Validate arguments and load runner settings
    pub fn into_config(self) -> Result<AppConfig, ConfigurationError> {
        let wallet_private_key = non_empty(self.wallet_private_key)
            .ok_or(ConfigurationError::MissingCredential("wallet private key"))?;
        let api_key =
            non_empty(self.api_key).ok_or(ConfigurationError::MissingCredential("api key"))?;

        let cycle = CycleConfig::new(self.instrument, self.leverage, self.interval_ms)?;
        let settings = RunnerSettings::load(self.config.as_deref())?;

        Ok(AppConfig {
            credentials: Credentials::new(wallet_private_key, api_key),
            cycle,
            settings,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Everything the lifecycle needs to start
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub credentials: Credentials,
    pub cycle: CycleConfig,
    pub settings: RunnerSettings,
}

/// Immutable cycle parameters, set once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleConfig {
    pub instrument: String,
    pub leverage: u32,
    pub interval_ms: u64,
}

impl CycleConfig {
    pub fn new(
        instrument: String,
        leverage: u32,
        interval_ms: u64,
    ) -> Result<Self, ConfigurationError> {
        if instrument.trim().is_empty() {
            return Err(ConfigurationError::EmptyInstrument);
        }
        if leverage == 0 {
            return Err(ConfigurationError::InvalidLeverage(leverage));
        }
        if interval_ms == 0 {
            return Err(ConfigurationError::InvalidInterval(interval_ms));
        }
        Ok(Self {
            instrument,
            leverage,
            interval_ms,
        })
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.interval_ms)
    }
}

/// Wallet and API credentials. Never logged.
#[derive(Clone)]
pub struct Credentials {
    wallet_private_key: String,
    api_key: String,
}

impl Credentials {
    pub fn new(wallet_private_key: String, api_key: String) -> Self {
        Self {
            wallet_private_key,
            api_key,
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Short, non-reversible identifier of the wallet key for logs
    pub fn wallet_fingerprint(&self) -> String {
        let digest = Sha256::digest(self.wallet_private_key.as_bytes());
        hex::encode(&digest[..6])
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("wallet", &self.wallet_fingerprint())
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Which gateway the runner trades through
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    Paper,
    #[default]
    Live,
}

/// Runner settings loaded via the `config` crate
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RunnerSettings {
    #[serde(default)]
    pub trading_mode: TradingMode,
    /// Exchange REST base URL
    #[serde(default = "default_exchange_url")]
    pub exchange_url: String,
    /// Exchange websocket URL for account updates
    #[serde(default = "default_stream_url")]
    pub stream_url: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// How long shutdown waits for an in-flight cycle, in seconds
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default)]
    pub paper: PaperSettings,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::default(),
            exchange_url: default_exchange_url(),
            stream_url: default_stream_url(),
            request_timeout_secs: default_request_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            paper: PaperSettings::default(),
        }
    }
}

impl RunnerSettings {
    /// Load from an optional file, then `CYCLE_RUNNER__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX).separator("__"),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Simulated account used in paper mode
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PaperSettings {
    #[serde(default = "default_paper_starting_balance")]
    pub starting_balance: Decimal,
    #[serde(default = "default_paper_mark_price")]
    pub mark_price: Decimal,
    /// Max mark price move per poll, in percent
    #[serde(default = "default_paper_volatility_pct")]
    pub volatility_pct: f64,
}

impl Default for PaperSettings {
    fn default() -> Self {
        Self {
            starting_balance: default_paper_starting_balance(),
            mark_price: default_paper_mark_price(),
            volatility_pct: default_paper_volatility_pct(),
        }
    }
}

fn default_exchange_url() -> String { "https://demo-exchange-api.evedex.com".to_string() }
fn default_stream_url() -> String { "wss://demo-ws.evedex.com/connection/websocket".to_string() }
fn default_request_timeout_secs() -> u64 { 30 }
fn default_shutdown_grace_secs() -> u64 { 30 }
fn default_paper_starting_balance() -> Decimal { Decimal::from(1000) }
fn default_paper_mark_price() -> Decimal { Decimal::from(60_000) }
fn default_paper_volatility_pct() -> f64 { 0.5 }

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_credentials_rejected() {
        let cli = Cli::try_parse_from(["cycle-runner"]).unwrap();
        let err = cli.into_config().unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::MissingCredential("wallet private key")
        ));

        let cli = Cli::try_parse_from(["cycle-runner", "0xabc"]).unwrap();
        let err = cli.into_config().unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingCredential("api key")));
        assert!(err.to_string().starts_with("Pass private key"));
    }

    #[test]
    fn test_positional_defaults() {
        let cli = Cli::try_parse_from(["cycle-runner", "0xabc", "key"]).unwrap();
        assert_eq!(cli.instrument, DEFAULT_INSTRUMENT);
        assert_eq!(cli.leverage, DEFAULT_LEVERAGE);
        assert_eq!(cli.interval_ms, DEFAULT_INTERVAL_MS);
        assert_eq!(cli.log_level, tracing::Level::INFO);
    }

    #[test]
    fn test_positional_overrides() {
        let cli =
            Cli::try_parse_from(["cycle-runner", "0xabc", "key", "ETHUSDT:DEMO", "20", "5000"])
                .unwrap();
        let config = cli.into_config().unwrap();
        assert_eq!(config.cycle.instrument, "ETHUSDT:DEMO");
        assert_eq!(config.cycle.leverage, 20);
        assert_eq!(config.cycle.interval(), std::time::Duration::from_secs(5));
        assert_eq!(config.credentials.api_key(), "key");
    }

    #[test]
    fn test_non_numeric_leverage_rejected() {
        assert!(Cli::try_parse_from(["cycle-runner", "0xabc", "key", "BTCUSDT", "lots"]).is_err());
    }

    #[test]
    fn test_cycle_config_validation() {
        assert!(matches!(
            CycleConfig::new("BTCUSDT:DEMO".into(), 0, 1000),
            Err(ConfigurationError::InvalidLeverage(0))
        ));
        assert!(matches!(
            CycleConfig::new("BTCUSDT:DEMO".into(), 10, 0),
            Err(ConfigurationError::InvalidInterval(0))
        ));
        assert!(matches!(
            CycleConfig::new("  ".into(), 10, 1000),
            Err(ConfigurationError::EmptyInstrument)
        ));
    }

    #[test]
    fn test_credentials_redacted() {
        let creds = Credentials::new("0xdeadbeef".into(), "secret-api-key".into());
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("deadbeef"));
        assert!(!printed.contains("secret-api-key"));
        assert_eq!(creds.wallet_fingerprint().len(), 12);
    }

    #[test]
    fn test_settings_defaults() {
        let settings = RunnerSettings::default();
        assert_eq!(settings.trading_mode, TradingMode::Live);
        assert_eq!(settings.request_timeout_secs, 30);
        assert_eq!(settings.shutdown_grace_secs, 30);
        assert_eq!(settings.paper.starting_balance, Decimal::from(1000));
    }

    #[test]
    fn test_settings_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
trading_mode = "paper"
exchange_url = "http://localhost:9000"
shutdown_grace_secs = 5

[paper]
starting_balance = 2500
volatility_pct = 0.0
"#
        )
        .unwrap();

        let settings = RunnerSettings::load(Some(file.path())).unwrap();
        assert_eq!(settings.trading_mode, TradingMode::Paper);
        assert_eq!(settings.exchange_url, "http://localhost:9000");
        assert_eq!(settings.shutdown_grace_secs, 5);
        assert_eq!(settings.request_timeout_secs, 30);
        assert_eq!(settings.paper.starting_balance, Decimal::from(2500));
        assert_eq!(settings.paper.mark_price, Decimal::from(60_000));
        assert_eq!(settings.paper.volatility_pct, 0.0);
    }
}
