use thiserror::Error;

use crate::config::ConfigError;
use crate::custom_kernel::CustomKernelError;
use crate::engine::EngineError;
use crate::graph::Node;
use crate::registry::RegistryError;
use crate::topology::TopologyError;

/// Failures surfaced while lowering a graph or compiling its topology.
///
/// Every variant aborts the build; only the support-query entry points turn
/// them into a boolean.
#[derive(Debug, Error)]
pub enum LoweringError {
    #[error("invalid inputs count ({actual}) in {node} ({type_name} {version_id}); accepted counts: {expected:?}")]
    InvalidArity {
        node: String,
        type_name: String,
        version_id: String,
        actual: usize,
        expected: Vec<usize>,
    },
    #[error("input {identity} of {node} hasn't been found in primitive_ids map")]
    UnresolvedInput { node: String, identity: String },
    #[error("operation: {node} of type {type_name}({version_id}) is not supported")]
    UnsupportedOperation {
        node: String,
        type_name: String,
        version_id: String,
    },
    #[error("invalid parameters for {node} ({type_name}): {reason}")]
    InvalidParameter {
        node: String,
        type_name: String,
        reason: String,
    },
    #[error("program build failed: {source}")]
    BuildFailed {
        #[source]
        source: EngineError,
    },
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    CustomKernel(#[from] CustomKernelError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl LoweringError {
    pub fn invalid_arity(node: &Node, expected: &[usize]) -> Self {
        LoweringError::InvalidArity {
            node: node.friendly_name().to_string(),
            type_name: node.type_name().to_string(),
            version_id: node.version_id().to_string(),
            actual: node.input_count(),
            expected: expected.to_vec(),
        }
    }

    pub fn unsupported(node: &Node) -> Self {
        LoweringError::UnsupportedOperation {
            node: node.friendly_name().to_string(),
            type_name: node.type_name().to_string(),
            version_id: node.version_id().to_string(),
        }
    }

    pub fn invalid_parameter(node: &Node, reason: impl Into<String>) -> Self {
        LoweringError::InvalidParameter {
            node: node.friendly_name().to_string(),
            type_name: node.type_name().to_string(),
            reason: reason.into(),
        }
    }
}

pub type LoweringResult<T> = Result<T, LoweringError>;
