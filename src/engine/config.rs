//! World configuration.
//!
//! Controls the capacity policy of archetype tables and the entity directory.
//! Every field has a default, so a partial TOML document only overrides what
//! it names:
//!
//! ```toml
//! initial_table_capacity = 256
//! growth_factor = 2
//! ```

use serde::Deserialize;

use crate::engine::error::ConfigError;


/// Capacity policy of a [`World`](crate::World).

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorldConfig {
    /// Rows allocated the first time a table grows.
    pub initial_table_capacity: usize,

    /// Multiplier applied to a table's capacity on every later growth.
    pub growth_factor: usize,

    /// Entity directory slots reserved up front.
    pub initial_entity_capacity: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            initial_table_capacity: 64,
            growth_factor: 2,
            initial_entity_capacity: 0,
        }
    }
}

impl WorldConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: WorldConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_table_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "initial_table_capacity",
                reason: "must be at least 1",
            });
        }
        if self.growth_factor < 2 {
            return Err(ConfigError::Invalid {
                field: "growth_factor",
                reason: "must be at least 2",
            });
        }
        Ok(())
    }

    /// Capacity a table should grow to so that it can hold `required` rows.
    ///
    /// Empty tables jump straight to `initial_table_capacity`; otherwise the
    /// capacity is multiplied by `growth_factor` until it fits.
    pub fn grown_capacity(&self, current: usize, required: usize) -> usize {
        if required <= current {
            return current;
        }
        let mut capacity = if current == 0 {
            self.initial_table_capacity
        } else {
            current.saturating_mul(self.growth_factor)
        };
        while capacity < required {
            capacity = capacity.saturating_mul(self.growth_factor);
        }
        capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = WorldConfig::from_toml_str("growth_factor = 4").unwrap();
        assert_eq!(config.growth_factor, 4);
        assert_eq!(config.initial_table_capacity, 64);
    }

    #[test]
    fn rejects_degenerate_growth() {
        let err = WorldConfig::from_toml_str("growth_factor = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "growth_factor", .. }));

        let err = WorldConfig::from_toml_str("initial_table_capacity = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "initial_table_capacity", .. }));
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(matches!(
            WorldConfig::from_toml_str("chunk_size = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn growth_is_geometric() {
        let config = WorldConfig::default();
        assert_eq!(config.grown_capacity(0, 1), 64);
        assert_eq!(config.grown_capacity(64, 65), 128);
        assert_eq!(config.grown_capacity(64, 300), 512);
        assert_eq!(config.grown_capacity(128, 100), 128);
    }
}
