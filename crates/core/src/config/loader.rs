//! Configuration file loader for the `.tender-kit/` directory.
//!
//! Only one file is read: `.tender-kit/config.toml`. A missing directory or
//! file yields [`EngineConfig::default`].

use crate::config::error::ConfigError;
use crate::config::error::ConfigResult;
use crate::config::models::{EngineConfig, StoreBackend};
use std::path::Path;

/// Name of the configuration directory under the project root.
pub const CONFIG_DIR_NAME: &str = ".tender-kit";

/// Loads engine configuration from `root/.tender-kit/config.toml`.
///
/// # Errors
///
/// Returns `ConfigError` if:
/// - The file exists but cannot be read
/// - The file is not valid TOML or has fields of the wrong type
/// - The values are inconsistent (e.g. redis backend without a URL)
///
/// # Example
///
/// ```rust,no_run
/// use tk_core::config::loader::load_config;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new(".")).await?;
/// println!("cache ttl: {:?}", config.cache.ttl());
/// # Ok(())
/// # }
/// ```
pub async fn load_config(root: &Path) -> ConfigResult<EngineConfig> {
    let config_path = root.join(CONFIG_DIR_NAME).join("config.toml");

    if !config_path.exists() {
        return Ok(EngineConfig::default());
    }

    let content = tokio::fs::read_to_string(&config_path)
        .await
        .map_err(|source| ConfigError::FileRead {
            path: config_path.clone(),
            source,
        })?;

    let config: EngineConfig =
        toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
            path: config_path.clone(),
            source,
        })?;

    validate(&config_path, &config)?;
    Ok(config)
}

fn validate(path: &Path, config: &EngineConfig) -> ConfigResult<()> {
    let invalid = |reason: &str| ConfigError::InvalidConfig {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if config.store.backend == StoreBackend::Redis && config.store.redis_url.is_none() {
        return Err(invalid("store.backend = \"redis\" requires store.redis_url"));
    }
    if config.cache.state_history_limit == 0 || config.cache.message_history_limit == 0 {
        return Err(invalid("history limits must be at least 1"));
    }
    if config.cache.ttl_secs == 0 {
        return Err(invalid("cache.ttl_secs must be positive"));
    }
    if config.lock.ttl_ms == 0 {
        return Err(invalid("lock.ttl_ms must be positive"));
    }
    if config.lock.extend_interval_ms >= config.lock.ttl_ms {
        return Err(invalid("lock.extend_interval_ms must be shorter than lock.ttl_ms"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::BackoffKind;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_config_full_file() {
        let dir = tempdir().expect("Failed to create temp dir");
        let root = dir.path();
        let tk_dir = root.join(CONFIG_DIR_NAME);
        fs::create_dir_all(&tk_dir).expect("Failed to create config dir");

        let config_toml = r#"
[store]
backend = "redis"
redis_url = "redis://127.0.0.1:6379/2"
key_prefix = "bids"

[cache]
ttl_secs = 60
state_history_limit = 5

[lock]
backoff = "fixed"
retries = 3

[worker]
poll_interval_ms = 50
"#;
        fs::write(tk_dir.join("config.toml"), config_toml).expect("Failed to write config.toml");

        let config = load_config(root).await.expect("Failed to load config");

        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(
            config.store.redis_url.as_deref(),
            Some("redis://127.0.0.1:6379/2")
        );
        assert_eq!(config.store.key_prefix, "bids");
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.state_history_limit, 5);
        // untouched fields keep their defaults
        assert_eq!(config.cache.message_history_limit, 200);
        assert_eq!(config.lock.backoff, BackoffKind::Fixed);
        assert_eq!(config.lock.retries, 3);
        assert_eq!(config.worker.poll_interval_ms, 50);
    }

    #[tokio::test]
    async fn test_load_config_empty_directory() {
        let dir = tempdir().expect("Failed to create temp dir");

        let config = load_config(dir.path())
            .await
            .expect("Should handle missing .tender-kit");

        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.cache.ttl_secs, 900);
    }

    #[tokio::test]
    async fn test_load_config_invalid_toml() {
        let dir = tempdir().expect("Failed to create temp dir");
        let tk_dir = dir.path().join(CONFIG_DIR_NAME);
        fs::create_dir_all(&tk_dir).expect("Failed to create config dir");
        fs::write(tk_dir.join("config.toml"), "[cache\nttl_secs = 1")
            .expect("Failed to write config.toml");

        let result = load_config(dir.path()).await;

        if let Err(ConfigError::TomlParse { path, .. }) = result {
            assert!(path.ends_with("config.toml"));
        } else {
            panic!("Expected TomlParse error");
        }
    }

    #[tokio::test]
    async fn test_load_config_redis_without_url() {
        let dir = tempdir().expect("Failed to create temp dir");
        let tk_dir = dir.path().join(CONFIG_DIR_NAME);
        fs::create_dir_all(&tk_dir).expect("Failed to create config dir");
        fs::write(tk_dir.join("config.toml"), "[store]\nbackend = \"redis\"\n")
            .expect("Failed to write config.toml");

        let result = load_config(dir.path()).await;

        if let Err(ConfigError::InvalidConfig { reason, .. }) = result {
            assert!(reason.contains("redis_url"));
        } else {
            panic!("Expected InvalidConfig error");
        }
    }

    #[tokio::test]
    async fn test_load_config_rejects_keepalive_longer_than_ttl() {
        let dir = tempdir().expect("Failed to create temp dir");
        let tk_dir = dir.path().join(CONFIG_DIR_NAME);
        fs::create_dir_all(&tk_dir).expect("Failed to create config dir");
        fs::write(
            tk_dir.join("config.toml"),
            "[lock]\nttl_ms = 1000\nextend_interval_ms = 1000\n",
        )
        .expect("Failed to write config.toml");

        assert!(matches!(
            load_config(dir.path()).await,
            Err(ConfigError::InvalidConfig { .. })
        ));
    }
}
