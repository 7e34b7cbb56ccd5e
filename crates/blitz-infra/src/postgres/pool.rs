use std::str::FromStr;
use std::time::Duration;

use blitz_types::config::DatabaseConfig;
use blitz_types::error::ConfigError;
use secrecy::ExposeSecret;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};

/// Connection options from config. `url` wins over the discrete fields.
pub fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions, ConfigError> {
    if let Some(url) = &config.url {
        return PgConnectOptions::from_str(url).map_err(|e| ConfigError::Invalid {
            key: "database.url",
            message: e.to_string(),
        });
    }

    let ssl_mode = PgSslMode::from_str(&config.ssl_mode).map_err(|e| ConfigError::Invalid {
        key: "database.ssl_mode",
        message: e.to_string(),
    })?;
    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .username(&config.user)
        .ssl_mode(ssl_mode)
        .application_name("blitz");
    if let Some(password) = &config.password {
        options = options.password(password.expose_secret());
    }
    Ok(options)
}

/// Same as [`connect_options`] but for an explicit URL (memory store).
pub fn url_options(url: &str) -> Result<PgConnectOptions, ConfigError> {
    PgConnectOptions::from_str(url).map_err(|e| ConfigError::Invalid {
        key: "memory.database_url",
        message: e.to_string(),
    })
}

/// Lazily connecting pool; the first query opens connections.
pub fn lazy_pool(options: PgConnectOptions, pool_size: u32) -> PgPool {
    PgPoolOptions::new()
        .max_connections(pool_size.max(1))
        .acquire_timeout(Duration::from_secs(10))
        .connect_lazy_with(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn test_options_from_fields() {
        let config = DatabaseConfig {
            host: "db.internal".into(),
            port: 6543,
            database: "analytics".into(),
            user: "reader".into(),
            password: Some(SecretString::from("hunter2".to_string())),
            ssl_mode: "require".into(),
            ..DatabaseConfig::default()
        };
        let options = connect_options(&config).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("analytics"));
        assert_eq!(options.get_username(), "reader");
    }

    #[test]
    fn test_url_wins() {
        let config = DatabaseConfig {
            url: Some("postgres://u@other:5000/x".into()),
            ..DatabaseConfig::default()
        };
        let options = connect_options(&config).unwrap();
        assert_eq!(options.get_host(), "other");
        assert_eq!(options.get_port(), 5000);
    }

    #[test]
    fn test_bad_ssl_mode_is_config_error() {
        let config = DatabaseConfig {
            ssl_mode: "sometimes".into(),
            ..DatabaseConfig::default()
        };
        assert!(matches!(
            connect_options(&config),
            Err(ConfigError::Invalid { key: "database.ssl_mode", .. })
        ));
    }
}
