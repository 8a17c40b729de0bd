//! Build configuration shared by the driver, the builders and the engine.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::env;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tuning knobs for the matmul transpose-elimination heuristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatMulTuning {
    /// Trailing dims that are all multiples of this are left untouched.
    pub alignment: usize,
    /// Trailing dims at or above this count as large.
    pub large_dim: usize,
    /// Element count above which an operand is a large tensor.
    pub large_tensor_elements: usize,
}

impl Default for MatMulTuning {
    fn default() -> Self {
        Self {
            alignment: 16,
            large_dim: 64,
            large_tensor_elements: 100_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub enable_profiling: bool,
    /// Externally supplied regime flag; only consulted by inner builds.
    pub allow_new_shape_infer: bool,
    pub partial_build: bool,
    pub optimize_data: bool,
    /// Default overlay source, loaded first.
    pub global_custom_kernels_config: Option<PathBuf>,
    /// Build-specific overlay source, loaded after the global one.
    pub custom_kernels_config: Option<PathBuf>,
    /// Whether the build-specific source may replace global entries.
    pub custom_kernels_override: bool,
    pub matmul: MatMulTuning,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            enable_profiling: false,
            allow_new_shape_infer: false,
            partial_build: false,
            optimize_data: false,
            global_custom_kernels_config: None,
            custom_kernels_config: None,
            custom_kernels_override: false,
            matmul: MatMulTuning::default(),
        }
    }
}

impl BuildConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Applies `OPLOWER_*` environment variables on top of this config.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(enabled) = env::flag(env::ENABLE_PROFILING) {
            self.enable_profiling = enabled;
        }
        if let Some(path) = env::path(env::CUSTOM_KERNELS) {
            self.custom_kernels_config = Some(path);
        }
        if let Some(path) = env::path(env::GLOBAL_CUSTOM_KERNELS) {
            self.global_custom_kernels_config = Some(path);
        }
        self
    }

    pub fn with_profiling(mut self, enabled: bool) -> Self {
        self.enable_profiling = enabled;
        self
    }

    pub fn with_custom_kernels(mut self, path: impl Into<PathBuf>, allow_override: bool) -> Self {
        self.custom_kernels_config = Some(path.into());
        self.custom_kernels_override = allow_override;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_documents_keep_defaults() {
        let config = BuildConfig::from_json_str(
            r#"{ "enable_profiling": true, "matmul": { "large_dim": 128 } }"#,
        )
        .expect("parse config");
        assert!(config.enable_profiling);
        assert_eq!(config.matmul.large_dim, 128);
        assert_eq!(config.matmul.alignment, 16);
        assert_eq!(config.matmul.large_tensor_elements, 100_000);
        assert!(config.custom_kernels_config.is_none());
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(matches!(
            BuildConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
