//! Tunables for mappers and repositories.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Top-level configuration.
///
/// ```toml
/// [mapper]
/// max_batch_size = 500
///
/// [repository]
/// default_page_size = 50
/// find_all_limit = 500
/// cache_ttl_secs = 600
/// cache_prefix = "blog:"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DatamapConfig {
    pub mapper: MapperSettings,
    pub repository: RepositorySettings,
}

impl DatamapConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ModelError> {
        let config: DatamapConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks each section, then that every repository page fits in one
    /// mapper batch.
    pub fn validate(&self) -> Result<(), ModelError> {
        self.mapper.validate()?;
        self.repository.validate()?;
        let max = self.mapper.max_batch_size as u64;
        within_batch("repository.default_page_size", self.repository.default_page_size, max)?;
        within_batch("repository.find_all_limit", self.repository.find_all_limit, max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MapperSettings {
    /// Largest number of ids a single batch fetch may request.
    pub max_batch_size: usize,
}

impl Default for MapperSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 1000,
        }
    }
}

impl MapperSettings {
    pub fn validate(&self) -> Result<(), ModelError> {
        at_least_one("mapper.max_batch_size", self.max_batch_size as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RepositorySettings {
    /// Rows per `find` when the filter sets no limit.
    pub default_page_size: u64,

    /// Limit used by `find_all` when none is given.
    pub find_all_limit: u64,

    /// Lifetime of cached entities. Zero keeps them until evicted.
    pub cache_ttl_secs: u64,

    /// Prepended to every map-id used as a cache key.
    pub cache_prefix: String,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            default_page_size: 25,
            find_all_limit: 1000,
            cache_ttl_secs: 3600,
            cache_prefix: String::new(),
        }
    }
}

impl RepositorySettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        at_least_one("repository.default_page_size", self.default_page_size)?;
        at_least_one("repository.find_all_limit", self.find_all_limit)
    }
}

fn at_least_one(field: &str, value: u64) -> Result<(), ModelError> {
    if value == 0 {
        return Err(ModelError::InvalidConfig {
            field: field.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}

fn within_batch(field: &str, value: u64, max_batch_size: u64) -> Result<(), ModelError> {
    if value > max_batch_size {
        return Err(ModelError::InvalidConfig {
            field: field.to_string(),
            reason: format!("{value} exceeds mapper.max_batch_size ({max_batch_size})"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = DatamapConfig::from_toml_str("").unwrap();
        assert_eq!(config, DatamapConfig::default());
        assert_eq!(config.mapper.max_batch_size, 1000);
        assert_eq!(config.repository.default_page_size, 25);
        assert_eq!(config.repository.cache_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = DatamapConfig::from_toml_str(
            r#"
            [repository]
            cache_prefix = "blog:"
            default_page_size = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.repository.cache_prefix, "blog:");
        assert_eq!(config.repository.default_page_size, 10);
        assert_eq!(config.repository.find_all_limit, 1000);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = DatamapConfig::from_toml_str("[mapper]\nbatch = 3\n");
        assert!(matches!(result, Err(ModelError::ConfigParse(_))));
    }

    #[test]
    fn zero_sizes_are_invalid() {
        let result = DatamapConfig::from_toml_str("[mapper]\nmax_batch_size = 0\n");
        assert!(matches!(
            result,
            Err(ModelError::InvalidConfig { field, .. }) if field == "mapper.max_batch_size"
        ));
    }

    #[test]
    fn page_sizes_must_fit_in_a_batch() {
        let result = DatamapConfig::from_toml_str("[mapper]\nmax_batch_size = 500\n");
        assert!(matches!(
            result,
            Err(ModelError::InvalidConfig { field, .. }) if field == "repository.find_all_limit"
        ));

        let result = DatamapConfig::from_toml_str(
            "[mapper]\nmax_batch_size = 20\n[repository]\nfind_all_limit = 20\n",
        );
        assert!(matches!(
            result,
            Err(ModelError::InvalidConfig { field, .. }) if field == "repository.default_page_size"
        ));

        let config = DatamapConfig::from_toml_str(
            "[mapper]\nmax_batch_size = 500\n[repository]\nfind_all_limit = 500\ndefault_page_size = 50\n",
        )
        .unwrap();
        assert_eq!(config.repository.find_all_limit, 500);
    }
}
