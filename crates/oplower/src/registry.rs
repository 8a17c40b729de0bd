//! Registry mapping operation type identities to builder functions.
//!
//! Builders are contributed at link time through [`OP_BUILDERS`] (usually via
//! [`register_op_builder!`](crate::register_op_builder)) and folded into a
//! process-wide [`OperationRegistry`] on first use. After initialization the
//! registry is only read; late registrations go through the same lock.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use thiserror::Error;

use crate::context::BuildContext;
use crate::error::LoweringResult;
use crate::graph::{Node, TypeInfo};

/// Lowers one node into zero or more primitives added through the context.
pub type BuilderFn = fn(&mut BuildContext<'_>, &Node) -> LoweringResult<()>;

pub struct OpBuilderRegistration {
    pub type_info: TypeInfo,
    pub builder: BuilderFn,
}

#[linkme::distributed_slice]
pub static OP_BUILDERS: [OpBuilderRegistration] = [..];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a builder for {0} is already registered")]
    DuplicateBuilder(TypeInfo),
}

pub struct OperationRegistry {
    builders: RwLock<HashMap<TypeInfo, BuilderFn>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self {
            builders: RwLock::new(HashMap::new()),
        }
    }

    /// A fresh registry seeded with every link-time registration.
    pub fn with_registered_builders() -> Result<Self, RegistryError> {
        let registry = Self::new();
        for registration in OP_BUILDERS.iter() {
            registry.register(registration.type_info.clone(), registration.builder)?;
        }
        Ok(registry)
    }

    /// Adds a builder. Each type identity may be registered once.
    pub fn register(&self, type_info: TypeInfo, builder: BuilderFn) -> Result<(), RegistryError> {
        let mut builders = self
            .builders
            .write()
            .expect("operation registry poisoned");
        if builders.contains_key(&type_info) {
            return Err(RegistryError::DuplicateBuilder(type_info));
        }
        builders.insert(type_info, builder);
        Ok(())
    }

    pub fn lookup(&self, type_info: &TypeInfo) -> Option<BuilderFn> {
        self.builders
            .read()
            .expect("operation registry poisoned")
            .get(type_info)
            .copied()
    }

    pub fn contains(&self, type_info: &TypeInfo) -> bool {
        self.lookup(type_info).is_some()
    }

    /// Registered identities, sorted for stable listings.
    pub fn registered_types(&self) -> Vec<TypeInfo> {
        let mut types: Vec<TypeInfo> = self
            .builders
            .read()
            .expect("operation registry poisoned")
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.builders
            .read()
            .expect("operation registry poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_REGISTRY: OnceLock<Result<Arc<OperationRegistry>, RegistryError>> = OnceLock::new();

/// Process-wide registry, built from [`OP_BUILDERS`] on first access.
pub fn global_registry() -> Result<Arc<OperationRegistry>, RegistryError> {
    GLOBAL_REGISTRY
        .get_or_init(|| OperationRegistry::with_registered_builders().map(Arc::new))
        .clone()
}

/// Registers a builder in the process-wide registry.
pub fn register_op_builder(type_info: TypeInfo, builder: BuilderFn) -> Result<(), RegistryError> {
    global_registry()?.register(type_info, builder)
}

/// Contributes a builder to [`OP_BUILDERS`] at link time.
///
/// ```ignore
/// oplower::register_op_builder!(REGISTER_MY_OP, MY_OP, create_my_op);
/// ```
#[macro_export]
macro_rules! register_op_builder {
    ($registration:ident, $type_info:expr, $builder:path) => {
        #[$crate::linkme::distributed_slice($crate::registry::OP_BUILDERS)]
        #[linkme(crate = $crate::linkme)]
        static $registration: $crate::registry::OpBuilderRegistration =
            $crate::registry::OpBuilderRegistration {
                type_info: $type_info,
                builder: $builder,
            };
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::opset;

    fn noop(_ctx: &mut BuildContext<'_>, _node: &Node) -> LoweringResult<()> {
        Ok(())
    }

    #[test]
    fn link_time_builders_are_collected() {
        let registry = OperationRegistry::with_registered_builders().expect("registry");
        for type_info in [opset::MATMUL, opset::PARAMETER, opset::ARITHMETIC_REDUCTION_KEEP_DIMS] {
            assert!(registry.contains(&type_info), "{type_info} should be registered");
        }
        // Concrete reductions resolve through their generic parent.
        assert!(!registry.contains(&opset::REDUCE_L2));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = OperationRegistry::new();
        let custom = TypeInfo::new("Custom", "extension");
        registry.register(custom.clone(), noop).expect("first registration");
        assert_eq!(
            registry.register(custom.clone(), noop),
            Err(RegistryError::DuplicateBuilder(custom))
        );
        assert_eq!(registry.len(), 1);
    }
}
