//! User-supplied kernel overlays keyed by operation type name.
//!
//! Overlay documents are JSON:
//!
//! ```json
//! { "kernels": [ {
//!     "type": "Erf",
//!     "entry_point": "erf_kernel",
//!     "source": "__kernel void erf_kernel(...) { ... }",
//!     "defines": [ { "name": "ALPHA", "param": "alpha", "default": "1.0" } ],
//!     "inputs": [ { "port": 0 } ],
//!     "outputs": [ { "port": 0 } ],
//!     "compiler_options": "-cl-mad-enable",
//!     "global_work_size": ["B*F", "Y", "X"],
//!     "local_work_size": []
//! } ] }
//! ```
//!
//! A missing overlay file is an empty overlay, not an error.

mod work_size;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use work_size::{evaluate_work_size, WorkSizeDims};

#[derive(Debug, Error)]
pub enum CustomKernelError {
    #[error("failed to read custom kernel config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse custom kernel config {source_name}: {source}")]
    Parse {
        source_name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("custom kernel for type {type_name} defined twice (second definition in {source_name})")]
    Duplicate {
        type_name: String,
        source_name: String,
    },
    #[error("invalid work size expression '{expression}': {reason}")]
    WorkSize { expression: String, reason: String },
}

/// Compile-time define bound to a node attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelDefine {
    pub name: String,
    /// Attribute supplying the value; falls back to `default` when absent.
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub port: usize,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomKernelDescriptor {
    #[serde(rename = "type")]
    pub type_name: String,
    pub entry_point: String,
    pub source: String,
    #[serde(default)]
    pub defines: Vec<KernelDefine>,
    #[serde(default)]
    pub inputs: Vec<PortBinding>,
    #[serde(default)]
    pub outputs: Vec<PortBinding>,
    #[serde(default)]
    pub compiler_options: String,
    #[serde(default)]
    pub global_work_size: Vec<String>,
    #[serde(default)]
    pub local_work_size: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OverlayDocument {
    #[serde(default)]
    kernels: Vec<CustomKernelDescriptor>,
}

/// Overlay table consulted before the builder registry.
#[derive(Debug, Clone, Default)]
pub struct CustomKernelTable {
    kernels: BTreeMap<String, Arc<CustomKernelDescriptor>>,
}

impl CustomKernelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads an overlay file; returns the number of descriptors read.
    pub fn load_file(&mut self, path: &Path, allow_override: bool) -> Result<usize, CustomKernelError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("custom kernel config {} not found; skipping", path.display());
                return Ok(0);
            }
            Err(source) => {
                return Err(CustomKernelError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        self.load_str(&text, &path.display().to_string(), allow_override)
    }

    pub fn load_str(
        &mut self,
        text: &str,
        source_name: &str,
        allow_override: bool,
    ) -> Result<usize, CustomKernelError> {
        let document: OverlayDocument =
            serde_json::from_str(text).map_err(|source| CustomKernelError::Parse {
                source_name: source_name.to_string(),
                source,
            })?;
        let count = document.kernels.len();
        for descriptor in document.kernels {
            self.insert(descriptor, source_name, allow_override)?;
        }
        debug!("loaded {count} custom kernel(s) from {source_name}");
        Ok(count)
    }

    pub fn insert(
        &mut self,
        descriptor: CustomKernelDescriptor,
        source_name: &str,
        allow_override: bool,
    ) -> Result<(), CustomKernelError> {
        if self.kernels.contains_key(&descriptor.type_name) && !allow_override {
            return Err(CustomKernelError::Duplicate {
                type_name: descriptor.type_name,
                source_name: source_name.to_string(),
            });
        }
        self.kernels
            .insert(descriptor.type_name.clone(), Arc::new(descriptor));
        Ok(())
    }

    /// Exact type-name match only.
    pub fn get(&self, type_name: &str) -> Option<&Arc<CustomKernelDescriptor>> {
        self.kernels.get(type_name)
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.kernels.keys().map(String::as_str)
    }
}
