use std::future::Future;
use std::time::Duration;

use rand::Rng;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::errors::ServiceError;

pub type DbPool = DatabaseConnection;

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 16,
            min_connections: 2,
            connect_timeout_secs: 30,
            acquire_timeout_secs: 8,
            idle_timeout_secs: 600,
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            url: config.database_url.clone(),
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            connect_timeout_secs: config.db_connect_timeout_secs,
            acquire_timeout_secs: config.db_acquire_timeout_secs,
            idle_timeout_secs: config.db_idle_timeout_secs,
        }
    }
}

pub async fn establish_connection(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let config = DbConfig {
        url: database_url.to_string(),
        ..DbConfig::default()
    };
    establish_connection_with_config(&config).await
}

pub async fn establish_connection_with_config(
    config: &DbConfig,
) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(&config.url);
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .sqlx_logging(true);

    info!("Connecting to database");
    let pool = Database::connect(opt).await?;
    debug!("Database connection established");
    Ok(pool)
}

pub async fn establish_connection_from_app_config(
    config: &AppConfig,
) -> Result<DatabaseConnection, DbErr> {
    establish_connection_with_config(&DbConfig::from(config)).await
}

pub async fn run_migrations(pool: &DatabaseConnection) -> Result<(), DbErr> {
    use sea_orm_migration::MigratorTrait;

    let started = std::time::Instant::now();
    info!("Running database migrations");
    crate::migrator::Migrator::up(pool, None).await?;
    info!("Migrations completed in {:?}", started.elapsed());
    Ok(())
}

pub async fn check_connection(pool: &DatabaseConnection) -> Result<(), DbErr> {
    pool.ping().await
}

pub async fn close_pool(pool: DatabaseConnection) -> Result<(), DbErr> {
    pool.close().await
}

/// Retry budget for idempotent operations hitting transient failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.db_retry_attempts.max(1),
            ..Self::default()
        }
    }
}

/// Decides whether an error is worth another attempt.
pub trait RetryPolicy<E> {
    fn is_retryable(&self, error: &E) -> bool;
}

/// Retries connection-class database failures only; everything else is a
/// real answer.
pub struct DbRetryPolicy;

impl RetryPolicy<DbErr> for DbRetryPolicy {
    fn is_retryable(&self, error: &DbErr) -> bool {
        matches!(error, DbErr::Conn(_) | DbErr::ConnectionAcquire(_))
    }
}

impl RetryPolicy<ServiceError> for DbRetryPolicy {
    fn is_retryable(&self, error: &ServiceError) -> bool {
        match error {
            ServiceError::DatabaseError(inner) => RetryPolicy::<DbErr>::is_retryable(self, inner),
            ServiceError::ServiceUnavailable(_) => true,
            _ => false,
        }
    }
}

/// Runs an operation with bounded exponential backoff and jitter.
///
/// Callers must only wrap idempotent work. Checkout in particular is never
/// routed through here: a duplicate order is worse than a surfaced error.
pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    policy: impl RetryPolicy<E>,
    op_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!("{} succeeded after {} attempts", op_name, attempts);
                }
                return Ok(value);
            }
            Err(error) => {
                if attempts >= config.max_attempts || !policy.is_retryable(&error) {
                    return Err(error);
                }

                let jitter_ceiling = (delay.as_millis() as u64 / 2).max(1);
                let jitter = rand::thread_rng().gen_range(0..jitter_ceiling);
                let backoff = delay + Duration::from_millis(jitter);
                warn!(
                    "{} attempt {} failed: {}. Retrying in {:?}",
                    op_name, attempts, error, backoff
                );

                sleep(backoff).await;
                delay = (delay * 2).min(config.max_delay);
            }
        }
    }
}
