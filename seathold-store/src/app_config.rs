use serde::Deserialize;
use std::env;
use uuid::Uuid;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub holds: HoldsConfig,
    pub idempotency: IdempotencyConfig,
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub events: Vec<EventSeed>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

fn default_host() -> String { "0.0.0.0".to_string() }

#[derive(Debug, Deserialize, Clone)]
pub struct HoldsConfig {
    pub ttl_seconds: u64,
    #[serde(default = "default_max_seats")]
    pub max_seats_per_hold: usize,
}

fn default_max_seats() -> usize { 10 }

#[derive(Debug, Deserialize, Clone)]
pub struct IdempotencyConfig {
    pub retention_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReaperConfig {
    pub interval_seconds: u64,
    /// How long expired/released holds stay queryable before pruning
    #[serde(default = "default_hold_retention")]
    pub hold_retention_seconds: u64,
}

fn default_hold_retention() -> u64 { 3600 }

/// Fixed-window request limit per client address
#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

fn default_rate_limit_enabled() -> bool { true }
fn default_requests_per_window() -> u32 { 100 }
fn default_window_seconds() -> u64 { 60 }

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            requests_per_window: default_requests_per_window(),
            window_seconds: default_window_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

/// An event to register at startup.
///
/// Seats are the explicit `seats` list followed by `rows` x `seats_per_row`
/// (row "A" with 3 seats per row gives A1, A2, A3).
#[derive(Debug, Deserialize, Clone)]
pub struct EventSeed {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub seats: Vec<String>,
    #[serde(default)]
    pub rows: Vec<String>,
    #[serde(default)]
    pub seats_per_row: u32,
}

impl EventSeed {
    pub fn seat_labels(&self) -> Vec<String> {
        let mut labels = self.seats.clone();
        for row in &self.rows {
            labels.extend((1..=self.seats_per_row).map(|n| format!("{}{}", row, n)));
        }
        labels
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig { host: default_host(), port: 8080 },
            holds: HoldsConfig { ttl_seconds: 120, max_seats_per_hold: default_max_seats() },
            idempotency: IdempotencyConfig { retention_seconds: 86_400 },
            reaper: ReaperConfig { interval_seconds: 5, hold_retention_seconds: default_hold_retention() },
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
            events: Vec::new(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `SEATHOLD_SERVER__PORT=9000` sets `server.port`
            .add_source(
                config::Environment::with_prefix("SEATHOLD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::from_settings(s)
    }

    pub fn from_settings(settings: config::Config) -> Result<Self, config::ConfigError> {
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that are zero or too large to turn into timestamps.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        check_range("holds.ttl_seconds", self.holds.ttl_seconds, MAX_HOLD_TTL_SECONDS)?;
        check_range(
            "holds.max_seats_per_hold",
            self.holds.max_seats_per_hold as u64,
            MAX_SEATS_PER_HOLD,
        )?;
        check_range(
            "idempotency.retention_seconds",
            self.idempotency.retention_seconds,
            MAX_RETENTION_SECONDS,
        )?;
        check_range("reaper.interval_seconds", self.reaper.interval_seconds, MAX_REAPER_INTERVAL_SECONDS)?;
        check_range(
            "reaper.hold_retention_seconds",
            self.reaper.hold_retention_seconds,
            MAX_RETENTION_SECONDS,
        )?;
        if self.rate_limit.enabled {
            check_range(
                "rate_limit.requests_per_window",
                self.rate_limit.requests_per_window as u64,
                u32::MAX as u64,
            )?;
            check_range("rate_limit.window_seconds", self.rate_limit.window_seconds, MAX_RATE_LIMIT_WINDOW_SECONDS)?;
        }
        Ok(())
    }

    pub fn hold_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.holds.ttl_seconds as i64)
    }

    pub fn idempotency_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.idempotency.retention_seconds as i64)
    }

    pub fn hold_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reaper.hold_retention_seconds as i64)
    }

    pub fn reaper_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reaper.interval_seconds)
    }

    pub fn rate_limit_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.rate_limit.window_seconds as i64)
    }
}

const MAX_HOLD_TTL_SECONDS: u64 = 86_400;
const MAX_SEATS_PER_HOLD: u64 = 1_000;
const MAX_RETENTION_SECONDS: u64 = 30 * 86_400;
const MAX_REAPER_INTERVAL_SECONDS: u64 = 3_600;
const MAX_RATE_LIMIT_WINDOW_SECONDS: u64 = 86_400;

fn check_range(name: &str, value: u64, max: u64) -> Result<(), config::ConfigError> {
    if value == 0 || value > max {
        return Err(config::ConfigError::Message(format!(
            "{} must be between 1 and {}, got {}",
            name, max, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Result<Config, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        Config::from_settings(settings)
    }

    const BASE: &str = r#"
        [server]
        port = 8080

        [holds]
        ttl_seconds = 120

        [idempotency]
        retention_seconds = 86400

        [reaper]
        interval_seconds = 5
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse(BASE).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.holds.max_seats_per_hold, 10);
        assert_eq!(config.reaper.hold_retention_seconds, 3600);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.hold_ttl(), chrono::Duration::minutes(2));
        assert!(config.events.is_empty());
    }

    #[test]
    fn test_event_seeds() {
        let toml = format!(
            r#"{}
            [[events]]
            id = "00000000-0000-0000-0000-000000000000"
            name = "Load Test Arena"
            seats = ["VIP1"]
            rows = ["A", "B"]
            seats_per_row = 2
            "#,
            BASE
        );
        let config = parse(&toml).unwrap();

        assert_eq!(config.events.len(), 1);
        assert_eq!(config.events[0].id, Uuid::nil());
        assert_eq!(config.events[0].seat_labels(), vec!["VIP1", "A1", "A2", "B1", "B2"]);
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let toml = BASE.replace("ttl_seconds = 120", "ttl_seconds = 0");
        let err = parse(&toml).unwrap_err();
        assert!(err.to_string().contains("ttl_seconds"));
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let toml = BASE.replace("ttl_seconds = 120", "ttl_seconds = 1000000000000000");
        let err = parse(&toml).unwrap_err();
        assert!(err.to_string().contains("holds.ttl_seconds"));

        let toml = BASE.replace("retention_seconds = 86400", "retention_seconds = 9999999999");
        let err = parse(&toml).unwrap_err();
        assert!(err.to_string().contains("idempotency.retention_seconds"));

        let toml = format!("{}\nhold_retention_seconds = 9999999999\n", BASE);
        let err = parse(&toml).unwrap_err();
        assert!(err.to_string().contains("reaper.hold_retention_seconds"));

        let toml = BASE.replace("ttl_seconds = 120", "ttl_seconds = 86400");
        assert_eq!(parse(&toml).unwrap().hold_ttl(), chrono::Duration::days(1));
    }

    #[test]
    fn test_rate_limit_section() {
        let config = parse(BASE).unwrap();
        assert!(config.rate_limit.enabled);
        assert_eq!(config.rate_limit.requests_per_window, 100);
        assert_eq!(config.rate_limit_window(), chrono::Duration::minutes(1));

        let disabled = format!("{}\n[rate_limit]\nenabled = false\nwindow_seconds = 0\n", BASE);
        assert!(!parse(&disabled).unwrap().rate_limit.enabled);

        let zero = format!("{}\n[rate_limit]\nrequests_per_window = 0\n", BASE);
        assert!(parse(&zero).unwrap_err().to_string().contains("requests_per_window"));
    }

    #[test]
    fn test_default_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_json_log_format() {
        let toml = format!("{}\n[logging]\nformat = \"json\"\n", BASE);
        assert_eq!(parse(&toml).unwrap().logging.format, LogFormat::Json);
    }
}
