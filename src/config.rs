use anyhow::{ensure, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

const ENV_PREFIX: &str = "CRYPTODASH";
const DEFAULT_CONFIG_FILE: &str = "cryptodash";

/// Upper bound for `retention.horizon_days` (one century)
pub const MAX_HORIZON_DAYS: i64 = 36_500;

/// Process-wide settings
///
/// Precedence, lowest first: serde defaults, config file, `CRYPTODASH_*`
/// environment variables, legacy dashboard variables (`DB_PATH`, `PORT`, ...).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub server: ServerSettings,
    pub price: PriceSettings,
    pub account: AccountSettings,
    pub poller: PollerSettings,
    pub retention: RetentionSettings,
    pub simulation: SimulationSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://crypto_dashboard.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PriceSettings {
    pub base_url: String,
    pub symbol: String,
    pub requests_per_second: u32,
}

impl Default for PriceSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            symbol: "BTCUSDT".to_string(),
            requests_per_second: 10,
        }
    }
}

/// Brokerage gateway settings; without `base_url` the account is simulated
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AccountSettings {
    pub base_url: Option<String>,
    pub account_id: Option<String>,
    pub token: Option<String>,
    pub simulate_on_failure: bool,
}

impl AccountSettings {
    /// True when every credential needed to reach the gateway is present
    pub fn gateway_configured(&self) -> bool {
        self.base_url.is_some() && self.account_id.is_some() && self.token.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerSettings {
    pub price_interval_ms: u64,
    pub equity_interval_ms: u64,
    pub window_capacity: usize,
    pub adapter_timeout_ms: u64,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            price_interval_ms: 1000,
            equity_interval_ms: 2500,
            window_capacity: 120,
            adapter_timeout_ms: 30_000,
        }
    }
}

impl PollerSettings {
    pub fn price_interval(&self) -> Duration {
        Duration::from_millis(self.price_interval_ms)
    }

    pub fn equity_interval(&self) -> Duration {
        Duration::from_millis(self.equity_interval_ms)
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    pub horizon_days: i64,
    pub purge_interval_secs: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            horizon_days: 7,
            purge_interval_secs: 86_400,
        }
    }
}

impl RetentionSettings {
    /// Saturates instead of overflowing on out-of-range day counts
    pub fn horizon(&self) -> chrono::Duration {
        chrono::Duration::try_days(self.horizon_days).unwrap_or(chrono::Duration::MAX)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub seed: u64,
    pub hold_secs: i64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            seed: 42,
            hold_secs: 300,
        }
    }
}

impl SimulationSettings {
    /// `None` when `hold_secs` does not fit a duration
    pub fn hold(&self) -> Option<chrono::Duration> {
        chrono::Duration::try_seconds(self.hold_secs)
    }
}

impl Settings {
    /// Load settings, optionally from an explicit config file path
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let file = match config_path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let builder = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let builder = apply_legacy_env(builder, |key| std::env::var(key).ok())?;

        let settings: Settings = builder
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would stall the poller or purge everything
    pub fn validate(&self) -> Result<()> {
        ensure!(self.poller.price_interval_ms > 0, "poller.price_interval_ms must be > 0");
        ensure!(self.poller.equity_interval_ms > 0, "poller.equity_interval_ms must be > 0");
        ensure!(self.poller.window_capacity > 0, "poller.window_capacity must be > 0");
        ensure!(self.poller.adapter_timeout_ms > 0, "poller.adapter_timeout_ms must be > 0");
        ensure!(
            (1..=MAX_HORIZON_DAYS).contains(&self.retention.horizon_days),
            "retention.horizon_days must be between 1 and {MAX_HORIZON_DAYS}"
        );
        ensure!(self.retention.purge_interval_secs > 0, "retention.purge_interval_secs must be > 0");
        ensure!(self.price.requests_per_second > 0, "price.requests_per_second must be > 0");
        ensure!(
            self.simulation.hold_secs > 0 && self.simulation.hold().is_some(),
            "simulation.hold_secs must be a positive number of seconds"
        );
        Ok(())
    }
}

type Builder = config::ConfigBuilder<config::builder::DefaultState>;

/// Map the older `DB_PATH` / `PORT` / `META_*` style variables onto settings keys
fn apply_legacy_env(builder: Builder, lookup: impl Fn(&str) -> Option<String>) -> Result<Builder> {
    let mut builder = builder;

    if let Some(path) = lookup("DB_PATH") {
        let url = if path.starts_with("sqlite:") {
            path
        } else {
            format!("sqlite://{path}")
        };
        builder = builder.set_override("database.url", url)?;
    }
    if let Some(port) = lookup("PORT") {
        let port: u16 = port.parse().context("PORT must be a port number")?;
        builder = builder.set_override("server.bind", format!("0.0.0.0:{port}"))?;
    }
    if let Some(url) = lookup("BINANCE_API_URL") {
        builder = builder.set_override("price.base_url", base_url_of(&url))?;
    }
    builder = builder.set_override_option("account.account_id", lookup("META_ACCOUNT_ID"))?;
    builder = builder.set_override_option("account.token", lookup("META_API_KEY"))?;

    if let Some(secs) = lookup("BTC_UPDATE_INTERVAL") {
        builder = builder.set_override("poller.price_interval_ms", seconds_to_ms(&secs)?)?;
    }
    if let Some(secs) = lookup("MT5_UPDATE_INTERVAL") {
        builder = builder.set_override("poller.equity_interval_ms", seconds_to_ms(&secs)?)?;
    }
    if let Some(points) = lookup("MAX_DATA_POINTS") {
        let points: u64 = points.parse().context("MAX_DATA_POINTS must be an integer")?;
        builder = builder.set_override("poller.window_capacity", points)?;
    }

    Ok(builder)
}

/// `https://api.binance.com/api/v3/ticker/price?symbol=X` -> `https://api.binance.com`
fn base_url_of(url: &str) -> String {
    match url.find("/api/") {
        Some(idx) => url[..idx].to_string(),
        None => url.trim_end_matches('/').to_string(),
    }
}

fn seconds_to_ms(secs: &str) -> Result<u64> {
    let secs: f64 = secs
        .parse()
        .with_context(|| format!("invalid interval seconds: {secs}"))?;
    ensure!(secs > 0.0, "interval must be positive, got {secs}");
    Ok((secs * 1000.0).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn build_with(vars: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let builder = apply_legacy_env(Config::builder(), |key| vars.get(key).cloned()).unwrap();
        builder.build().unwrap().try_deserialize().unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = build_with(&[]);
        assert_eq!(settings.database.url, "sqlite://crypto_dashboard.db");
        assert_eq!(settings.server.bind, "0.0.0.0:5000");
        assert_eq!(settings.poller.price_interval(), Duration::from_secs(1));
        assert_eq!(settings.poller.equity_interval(), Duration::from_millis(2500));
        assert_eq!(settings.poller.window_capacity, 120);
        assert_eq!(settings.retention.horizon(), chrono::Duration::days(7));
        assert!(!settings.account.gateway_configured());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_legacy_variables() {
        let settings = build_with(&[
            ("DB_PATH", "/tmp/dash.db"),
            ("PORT", "8080"),
            ("BINANCE_API_URL", "https://api.binance.us/api/v3/ticker/price?symbol=BTCUSDT"),
            ("META_ACCOUNT_ID", "acc-1"),
            ("META_API_KEY", "secret"),
            ("BTC_UPDATE_INTERVAL", "2"),
            ("MT5_UPDATE_INTERVAL", "5.5"),
            ("MAX_DATA_POINTS", "300"),
        ]);

        assert_eq!(settings.database.url, "sqlite:///tmp/dash.db");
        assert_eq!(settings.server.bind, "0.0.0.0:8080");
        assert_eq!(settings.price.base_url, "https://api.binance.us");
        assert_eq!(settings.account.account_id.as_deref(), Some("acc-1"));
        assert_eq!(settings.account.token.as_deref(), Some("secret"));
        assert_eq!(settings.poller.price_interval_ms, 2000);
        assert_eq!(settings.poller.equity_interval_ms, 5500);
        assert_eq!(settings.poller.window_capacity, 300);
    }

    #[test]
    fn test_invalid_port_is_an_error() {
        let result = apply_legacy_env(Config::builder(), |key| {
            (key == "PORT").then(|| "not-a-port".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut settings = Settings::default();
        settings.poller.window_capacity = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_huge_horizon_is_rejected_without_panicking() {
        let mut settings = Settings::default();
        settings.retention.horizon_days = 100_000_000_000_000;
        assert_eq!(settings.retention.horizon(), chrono::Duration::MAX);
        assert!(settings.validate().is_err());

        settings.retention.horizon_days = MAX_HORIZON_DAYS;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_huge_hold_is_rejected() {
        let mut settings = Settings::default();
        settings.simulation.hold_secs = i64::MAX;
        assert!(settings.simulation.hold().is_none());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_gateway_configured_needs_all_credentials() {
        let mut account = AccountSettings {
            base_url: Some("https://gateway.example".to_string()),
            account_id: Some("acc".to_string()),
            ..Default::default()
        };
        assert!(!account.gateway_configured());
        account.token = Some("t".to_string());
        assert!(account.gateway_configured());
    }
}
