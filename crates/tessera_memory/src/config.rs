//! # Allocator Configuration
//!
//! Sizing is loaded once at startup, before the first allocation.
//!
//! ```toml
//! arena_capacity = 1048576
//! size_classes = [64, 128, 256, 512, 1024, 2048, 4096]
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};

/// Reference size-class thresholds in bytes.
pub const DEFAULT_SIZE_CLASSES: [usize; 7] = [64, 128, 256, 512, 1024, 2048, 4096];

/// Default arena capacity (1 MiB).
pub const DEFAULT_ARENA_CAPACITY: usize = 1024 * 1024;

/// Smallest block that can carry a free-list link.
pub const MIN_BLOCK_SIZE: usize = std::mem::size_of::<*mut u8>();

/// Sizing of a [`SizeClassAllocator`](crate::SizeClassAllocator).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Total arena capacity in bytes.
    pub arena_capacity: usize,
    /// Ascending size-class thresholds in bytes.
    pub size_classes: Vec<usize>,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            arena_capacity: DEFAULT_ARENA_CAPACITY,
            size_classes: DEFAULT_SIZE_CLASSES.to_vec(),
        }
    }
}

impl AllocatorConfig {
    /// Creates a config with the reference thresholds and the given arena size.
    #[must_use]
    pub fn with_capacity(arena_capacity: usize) -> Self {
        Self {
            arena_capacity,
            ..Self::default()
        }
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML, or the first
    /// validation failure.
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`AllocatorConfig::from_toml_str`].
    pub fn from_toml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks capacity and threshold ordering.
    ///
    /// # Errors
    ///
    /// Returns the first rule the config breaks.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.arena_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        let Some(&first) = self.size_classes.first() else {
            return Err(ConfigError::NoSizeClasses);
        };
        if first < MIN_BLOCK_SIZE {
            return Err(ConfigError::SizeClassTooSmall {
                size: first,
                minimum: MIN_BLOCK_SIZE,
            });
        }

        for pair in self.size_classes.windows(2) {
            if pair[1] <= pair[0] {
                return Err(ConfigError::UnorderedSizeClasses {
                    previous: pair[0],
                    next: pair[1],
                });
            }
        }

        Ok(())
    }

    /// Largest threshold; anything above it is served by the heap.
    #[must_use]
    pub fn largest_class(&self) -> Option<usize> {
        self.size_classes.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = AllocatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.largest_class(), Some(4096));
    }

    #[test]
    fn test_parse_full_document() {
        let config = AllocatorConfig::from_toml_str(
            "arena_capacity = 4096\nsize_classes = [32, 96, 512]\n",
        )
        .unwrap();
        assert_eq!(config.arena_capacity, 4096);
        assert_eq!(config.size_classes, vec![32, 96, 512]);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config = AllocatorConfig::from_toml_str("arena_capacity = 2048\n").unwrap();
        assert_eq!(config.size_classes, DEFAULT_SIZE_CLASSES.to_vec());
    }

    #[test]
    fn test_rejects_unordered_classes() {
        let err = AllocatorConfig::from_toml_str("size_classes = [64, 64, 128]\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnorderedSizeClasses { previous: 64, next: 64 }
        ));
    }

    #[test]
    fn test_rejects_tiny_class() {
        let config = AllocatorConfig {
            arena_capacity: 1024,
            size_classes: vec![1, 64],
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SizeClassTooSmall { size: 1, .. })
        ));
    }

    #[test]
    fn test_rejects_empty_and_zero() {
        let empty = AllocatorConfig {
            arena_capacity: 1024,
            size_classes: Vec::new(),
        };
        assert!(matches!(empty.validate(), Err(ConfigError::NoSizeClasses)));
        assert!(matches!(
            AllocatorConfig::with_capacity(0).validate(),
            Err(ConfigError::ZeroCapacity)
        ));
    }

    #[test]
    fn test_malformed_toml() {
        let err = AllocatorConfig::from_toml_str("arena_capacity = \"lots\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = AllocatorConfig::from_toml_file("/nonexistent/tessera.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
