use super::{CacheConfig, ConfigError, InfraConfig, LoggingConfig, MeshConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub infra: InfraConfig,

    #[serde(default)]
    pub mesh: MeshConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file, or defaults when no path is given.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match config_path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_toml_str(&content)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_slabs("cache.msg_cache_slabs", self.cache.msg_cache_slabs)?;
        check_slabs("cache.rrset_cache_slabs", self.cache.rrset_cache_slabs)?;
        check_slabs("infra.slabs", self.infra.slabs)?;

        if self.cache.msg_cache_size == 0 || self.cache.rrset_cache_size == 0 {
            return Err(ConfigError::Validation(
                "cache sizes must be greater than zero".to_string(),
            ));
        }
        if self.infra.numhosts == 0 {
            return Err(ConfigError::Validation(
                "infra.numhosts must be greater than zero".to_string(),
            ));
        }
        if self.mesh.num_queries_per_thread == 0 {
            return Err(ConfigError::Validation(
                "mesh.num_queries_per_thread must be greater than zero".to_string(),
            ));
        }
        if self.mesh.max_activation == 0 {
            return Err(ConfigError::Validation(
                "mesh.max_activation must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_slabs(field: &str, slabs: usize) -> Result<(), ConfigError> {
    if slabs == 0 || !slabs.is_power_of_two() || slabs > 65_536 {
        return Err(ConfigError::Validation(format!(
            "{} must be a power of two between 1 and 65536, got {}",
            field, slabs
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_resolver_policy() {
        let config = Config::default();
        assert_eq!(config.cache.msg_cache_size, 4 * 1024 * 1024);
        assert_eq!(config.cache.rrset_cache_slabs, 4);
        assert_eq!(config.infra.host_ttl, 900);
        assert_eq!(config.infra.probe_max_rto_ms, 12_000);
        assert_eq!(config.mesh.num_queries_per_thread, 1024);
        assert_eq!(config.mesh.max_forever_states(), 512);
        assert_eq!(config.mesh.jostle_timeout_ms, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [mesh]
            num_queries_per_thread = 8

            [cache]
            prefetch = true
            "#,
        )
        .unwrap();
        assert_eq!(config.mesh.num_queries_per_thread, 8);
        assert_eq!(config.mesh.max_activation, 3000);
        assert!(config.cache.prefetch);
        assert_eq!(config.cache.prefetch_expiry_add, 60);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_rejects_non_power_of_two_slabs() {
        let config = Config::from_toml_str("[cache]\nmsg_cache_slabs = 3\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_error_is_reported() {
        assert!(matches!(
            Config::from_toml_str("[mesh\n"),
            Err(ConfigError::Parse(_))
        ));
    }
}
