use config::{Config, Environment, File};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use validator::Validate;

/// Default values for configuration
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_ENV: &str = "development";
pub const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Application configuration, layered from hard defaults, `config/` files
/// and `APP__*` environment variables.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[validate(range(min = 1, message = "Port must be non-zero"))]
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_auto_migrate")]
    pub auto_migrate: bool,

    /// Comma-separated list of allowed CORS origins.
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    #[serde(default)]
    pub cors_allow_any_origin: bool,

    #[serde(default)]
    pub cors_allow_credentials: bool,

    #[validate(range(min = 1, message = "Connection pool must hold at least one connection"))]
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    /// Bounded retry budget for idempotent operations hitting transient
    /// database failures.
    #[serde(default = "default_db_retry_attempts")]
    pub db_retry_attempts: u32,

    #[validate(custom = "validate_rate")]
    #[serde(default = "default_tax_rate")]
    pub default_tax_rate: f64,

    #[validate(custom = "validate_rate")]
    #[serde(default = "default_service_fee_rate")]
    pub service_fee_rate: f64,

    /// How long after placement a customer may still cancel an order the
    /// merchant has started preparing.
    #[serde(default = "default_customer_cancel_window_minutes")]
    pub customer_cancel_window_minutes: i64,

    /// When set, couriers may claim orders that are still being prepared.
    #[serde(default)]
    pub allow_claim_before_ready: bool,

    #[serde(default = "default_location_min_interval_secs")]
    pub location_min_interval_secs: u64,

    #[serde(default = "default_location_min_distance_meters")]
    pub location_min_distance_meters: f64,

    #[serde(default = "default_tracking_channel_capacity")]
    pub tracking_channel_capacity: usize,

    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[serde(default = "default_search_radius_km")]
    pub default_search_radius_km: f64,
}

fn default_database_url() -> String {
    "sqlite::memory:".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_auto_migrate() -> bool {
    true
}

fn default_db_max_connections() -> u32 {
    16
}

fn default_db_min_connections() -> u32 {
    2
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_db_idle_timeout_secs() -> u64 {
    600
}

fn default_db_retry_attempts() -> u32 {
    3
}

fn default_tax_rate() -> f64 {
    0.08
}

fn default_service_fee_rate() -> f64 {
    0.10
}

fn default_customer_cancel_window_minutes() -> i64 {
    5
}

fn default_location_min_interval_secs() -> u64 {
    5
}

fn default_location_min_distance_meters() -> f64 {
    25.0
}

fn default_tracking_channel_capacity() -> usize {
    64
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_search_radius_km() -> f64 {
    10.0
}

fn validate_rate(rate: &f64) -> Result<(), validator::ValidationError> {
    if !rate.is_finite() || !(0.0..=1.0).contains(rate) {
        let mut err = validator::ValidationError::new("rate_out_of_range");
        err.message = Some("Rate must be a finite value between 0 and 1".into());
        return Err(err);
    }
    Ok(())
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case(DEFAULT_ENV)
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_deref()
            .map(|origins| !origins.trim().is_empty())
            .unwrap_or(false)
    }

    /// Permissive CORS is a development convenience only.
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.cors_allow_any_origin && !self.is_production()
    }

    /// Cross-field rules the derive cannot express.
    pub fn validate_additional_constraints(&self) -> Result<(), validator::ValidationErrors> {
        let mut errors = validator::ValidationErrors::new();

        if self.is_production() && !self.has_cors_allowed_origins() {
            let mut err = validator::ValidationError::new("missing_cors_configuration");
            err.message =
                Some("Missing CORS configuration: production requires explicit origins".into());
            errors.add("cors_allowed_origins", err);
        }

        if self.cors_allow_any_origin && self.cors_allow_credentials {
            let mut err = validator::ValidationError::new("cors_credentials_with_any_origin");
            err.message =
                Some("cors_allow_credentials cannot be combined with cors_allow_any_origin".into());
            errors.add("cors_allow_credentials", err);
        }

        if self.customer_cancel_window_minutes < 0 {
            let mut err = validator::ValidationError::new("negative_cancel_window");
            err.message = Some("customer_cancel_window_minutes cannot be negative".into());
            errors.add("customer_cancel_window_minutes", err);
        }

        if !self.location_min_distance_meters.is_finite() || self.location_min_distance_meters < 0.0
        {
            let mut err = validator::ValidationError::new("invalid_min_distance");
            err.message =
                Some("location_min_distance_meters must be finite and non-negative".into());
            errors.add("location_min_distance_meters", err);
        }

        if !self.default_search_radius_km.is_finite() || self.default_search_radius_km <= 0.0 {
            let mut err = validator::ValidationError::new("invalid_search_radius");
            err.message = Some("default_search_radius_km must be finite and positive".into());
            errors.add("default_search_radius_km", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Initializes the global tracing subscriber. `RUST_LOG` overrides the
/// configured level.
pub fn init_tracing(level: &str, json: bool) {
    let default_directive = format!("dispatch_api={},tower_http=debug", level);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    if json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}

/// Loads configuration for the current `RUN_ENV` (or `APP_ENV`).
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = std::env::var("RUN_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let config = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config
        .validate()
        .map_err(|e| AppConfigError::Validation(e.to_string()))?;
    app_config
        .validate_additional_constraints()
        .map_err(|e| AppConfigError::Validation(e.to_string()))?;

    Ok(app_config)
}
