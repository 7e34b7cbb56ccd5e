//! Runtime configuration loader.
//!
//! Reads `blitz.toml` and deserializes it into [`RuntimeConfig`]. Falls back
//! to defaults when the file is missing or malformed, then applies
//! `BLITZ_*` environment overrides on top.

use std::path::{Path, PathBuf};

use blitz_types::config::RuntimeConfig;
use secrecy::SecretString;

const CONFIG_FILE: &str = "blitz.toml";

/// Load configuration from `path`.
///
/// - If the file does not exist, starts from [`RuntimeConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and
///   starts from the default.
/// - Environment overrides are applied in every case.
pub async fn load_runtime_config(path: &Path) -> RuntimeConfig {
    let mut config = read_config_file(path).await;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config
}

async fn read_config_file(path: &Path) -> RuntimeConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return RuntimeConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return RuntimeConfig::default();
        }
    };

    match toml::from_str::<RuntimeConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            RuntimeConfig::default()
        }
    }
}

/// Overlay `BLITZ_*` variables. `lookup` is `std::env::var` outside tests.
pub fn apply_env_overrides(config: &mut RuntimeConfig, lookup: impl Fn(&str) -> Option<String>) {
    let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(url) = lookup("BLITZ_TRANSPORT_URL") {
        config.transport.url = url;
    }
    if let Some(url) = lookup("BLITZ_DATABASE_URL") {
        config.database.url = Some(url);
    }
    if let Some(host) = lookup("BLITZ_DATABASE_HOST") {
        config.database.host = host;
    }
    if let Some(port) = lookup("BLITZ_DATABASE_PORT") {
        match port.parse() {
            Ok(port) => config.database.port = port,
            Err(_) => tracing::warn!(value = %port, "ignoring invalid BLITZ_DATABASE_PORT"),
        }
    }
    if let Some(name) = lookup("BLITZ_DATABASE_NAME") {
        config.database.database = name;
    }
    if let Some(user) = lookup("BLITZ_DATABASE_USER") {
        config.database.user = user;
    }
    if let Some(password) = lookup("BLITZ_DATABASE_PASSWORD") {
        config.database.password = Some(SecretString::from(password));
    }
    if let Some(url) = lookup("BLITZ_MEMORY_URL") {
        config.memory.database_url = Some(url);
    }
    if let Some(key) = lookup("BLITZ_EMBEDDING_API_KEY") {
        config.embedding.api_key = Some(SecretString::from(key));
    }
}

/// Data directory: `BLITZ_DATA_DIR`, else `~/.blitz`.
pub fn default_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("BLITZ_DATA_DIR").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".blitz")
}

pub fn default_config_path() -> PathBuf {
    default_data_dir().join(CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use blitz_types::tool::TransportKind;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = read_config_file(&tmp.path().join(CONFIG_FILE)).await;
        assert_eq!(config.transport.kind, TransportKind::WebSocket);
        assert_eq!(config.memory.recall.top_k, 5);
    }

    #[tokio::test]
    async fn valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        tokio::fs::write(
            &path,
            r#"
[transport]
kind = "direct"

[database]
url = "sqlite:///tmp/data.db"

[memory.storage]
dimension = 768
"#,
        )
        .await
        .unwrap();

        let config = read_config_file(&path).await;
        assert_eq!(config.transport.kind, TransportKind::Direct);
        assert_eq!(config.database.url.as_deref(), Some("sqlite:///tmp/data.db"));
        assert_eq!(config.memory.storage.dimension, 768);
    }

    #[tokio::test]
    async fn invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = read_config_file(&path).await;
        assert_eq!(config.memory.storage.dimension, 1536);
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("BLITZ_DATABASE_HOST", "db.internal"),
            ("BLITZ_DATABASE_PORT", "6543"),
            ("BLITZ_DATABASE_PASSWORD", "hunter2"),
            ("BLITZ_MEMORY_URL", "postgres://mem/db"),
            ("BLITZ_EMBEDDING_API_KEY", "sk-env"),
            ("BLITZ_TRANSPORT_URL", "wss://tools.example.com/mcp"),
        ]);
        let mut config = RuntimeConfig::default();
        apply_env_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.port, 6543);
        assert_eq!(
            config.database.password.as_ref().map(|p| p.expose_secret()),
            Some("hunter2")
        );
        assert_eq!(config.memory.database_url.as_deref(), Some("postgres://mem/db"));
        assert_eq!(
            config.embedding.api_key.as_ref().map(|k| k.expose_secret()),
            Some("sk-env")
        );
        assert_eq!(config.transport.url, "wss://tools.example.com/mcp");
    }

    #[test]
    fn invalid_and_blank_overrides_are_ignored() {
        let vars: HashMap<&str, &str> =
            HashMap::from([("BLITZ_DATABASE_PORT", "not-a-port"), ("BLITZ_DATABASE_HOST", "  ")]);
        let mut config = RuntimeConfig::default();
        apply_env_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.host, "localhost");
    }

    #[test]
    fn default_config_path_ends_with_file_name() {
        assert!(default_config_path().ends_with(CONFIG_FILE));
    }
}
