//! Persistence for transactions, webhook logs, ledgers and bonuses.
//!
//! [`repository`] defines the store seams. [`postgres`] backs them with row
//! locks in a real database and [`memory`] with per-row async mutexes.

pub mod error;
pub mod memory;
pub mod models;
#[cfg(feature = "database")]
pub mod postgres;
pub mod repository;

#[cfg(feature = "database")]
pub use pool::connect;

#[cfg(feature = "database")]
mod pool {
    use sqlx::postgres::PgPoolOptions;
    use sqlx::PgPool;
    use std::time::Duration;
    use tracing::{error, info};

    use super::error::DatabaseError;
    use crate::config::DatabaseConfig;

    const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
    // Units of work hold their connection for the whole lock; recycle well after that.
    const MAX_LIFETIME: Duration = Duration::from_secs(1800);

    fn options(config: &DatabaseConfig) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections.min(config.max_connections))
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .idle_timeout(Duration::from_secs(
                config.idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
            ))
            .max_lifetime(MAX_LIFETIME)
    }

    /// Opens the pool and proves it can hand out a connection.
    pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to postgres"
        );

        let pool = options(config).connect(&config.url).await.map_err(|e| {
            error!(error = %e, "Postgres pool could not be created");
            DatabaseError::from_sqlx(e)
        })?;

        pool.acquire().await.map_err(|e| {
            error!(error = %e, "Postgres pool handed out no connection");
            DatabaseError::from_sqlx(e)
        })?;

        Ok(pool)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn min_connections_never_exceed_max() {
            let config = DatabaseConfig {
                url: "postgres://localhost/reconciliation".to_string(),
                max_connections: 2,
                min_connections: 5,
                connection_timeout: 3,
                idle_timeout: None,
            };
            let options = options(&config);
            assert_eq!(options.get_max_connections(), 2);
            assert_eq!(options.get_min_connections(), 2);
            assert_eq!(options.get_acquire_timeout(), Duration::from_secs(3));
        }
    }
}
