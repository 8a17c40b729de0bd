//! Engine seam: the backend that turns a finished topology into a program.
//!
//! Engines are registered by name at runtime, mirroring how backends are
//! selected elsewhere. Crates contribute engines by pushing a registrar into
//! [`ENGINE_REGISTRARS`]; the registrars run once, on first registry access.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Once, OnceLock, RwLock};

use serde::{Deserialize, Serialize};

use crate::config::BuildConfig;
use crate::topology::Topology;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    Unimplemented {
        primitive: &'static str,
        message: String,
    },
    Execution {
        message: String,
    },
}

impl EngineError {
    pub fn execution(message: impl Into<String>) -> Self {
        EngineError::Execution {
            message: message.into(),
        }
    }

    pub fn unimplemented(primitive: &'static str, message: impl Into<String>) -> Self {
        EngineError::Unimplemented {
            primitive,
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Unimplemented { primitive, message } => {
                write!(f, "primitive '{primitive}' is not implemented: {message}")
            }
            EngineError::Execution { message } => write!(f, "execution error: {message}"),
        }
    }
}

impl std::error::Error for EngineError {}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

/// Capabilities the builders consult when choosing a lowering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub kind: DeviceKind,
    /// Hardware integer matrix-multiply-accumulate support.
    pub supports_immad: bool,
}

impl DeviceInfo {
    pub fn cpu(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DeviceKind::Cpu,
            supports_immad: false,
        }
    }

    pub fn with_immad(mut self, supports_immad: bool) -> Self {
        self.supports_immad = supports_immad;
        self
    }
}

/// Executable form of a topology, owned by the engine that produced it.
pub trait CompiledProgram: Send + Sync + fmt::Debug {
    fn engine_name(&self) -> &str;

    /// Number of primitives that survived compilation.
    fn primitive_count(&self) -> usize;

    fn as_any(&self) -> &dyn Any;
}

pub trait Engine: Send + Sync {
    fn name(&self) -> &str;

    fn device_info(&self) -> &DeviceInfo;

    /// Compiles a complete, validated topology.
    fn build_program(
        &self,
        topology: &Topology,
        config: &BuildConfig,
    ) -> EngineResult<Arc<dyn CompiledProgram>>;
}

pub type EngineConstructor = Box<dyn Fn() -> Arc<dyn Engine> + Send + Sync>;

#[linkme::distributed_slice]
pub static ENGINE_REGISTRARS: [fn()] = [..];

struct EngineRegistry {
    engines: RwLock<HashMap<String, EngineConstructor>>,
}

impl EngineRegistry {
    fn new() -> Self {
        Self {
            engines: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, name: String, constructor: EngineConstructor) {
        self.engines
            .write()
            .expect("engine registry poisoned")
            .insert(name, constructor);
    }

    fn create(&self, name: &str) -> Option<Arc<dyn Engine>> {
        let engines = self.engines.read().expect("engine registry poisoned");
        let constructor = engines.get(name)?;
        Some(constructor())
    }

    fn list_engines(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .engines
            .read()
            .expect("engine registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn has_engine(&self, name: &str) -> bool {
        self.engines
            .read()
            .expect("engine registry poisoned")
            .contains_key(name)
    }
}

static GLOBAL_REGISTRY: OnceLock<EngineRegistry> = OnceLock::new();
static REGISTRARS: Once = Once::new();

fn global_registry() -> &'static EngineRegistry {
    GLOBAL_REGISTRY.get_or_init(EngineRegistry::new)
}

fn run_registrars() {
    REGISTRARS.call_once(|| {
        for registrar in ENGINE_REGISTRARS.iter() {
            registrar();
        }
    });
}

/// Registers an engine by name. A later registration under the same name wins.
pub fn register_engine<F>(name: impl Into<String>, constructor: F)
where
    F: Fn() -> Arc<dyn Engine> + Send + Sync + 'static,
{
    global_registry().register(name.into(), Box::new(constructor));
}

/// Creates an engine by name, or `None` when nothing is registered under it.
pub fn create_engine(name: &str) -> Option<Arc<dyn Engine>> {
    run_registrars();
    global_registry().create(name)
}

pub fn list_engines() -> Vec<String> {
    run_registrars();
    global_registry().list_engines()
}

pub fn has_engine(name: &str) -> bool {
    run_registrars();
    global_registry().has_engine(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct EmptyProgram;

    impl CompiledProgram for EmptyProgram {
        fn engine_name(&self) -> &str {
            "null"
        }

        fn primitive_count(&self) -> usize {
            0
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct NullEngine {
        device: DeviceInfo,
    }

    impl Engine for NullEngine {
        fn name(&self) -> &str {
            "null"
        }

        fn device_info(&self) -> &DeviceInfo {
            &self.device
        }

        fn build_program(
            &self,
            _topology: &Topology,
            _config: &BuildConfig,
        ) -> EngineResult<Arc<dyn CompiledProgram>> {
            Ok(Arc::new(EmptyProgram))
        }
    }

    #[test]
    fn engines_are_created_by_name() {
        register_engine("null-engine-test", || {
            Arc::new(NullEngine {
                device: DeviceInfo::cpu("null"),
            })
        });
        assert!(has_engine("null-engine-test"));
        assert!(list_engines().contains(&"null-engine-test".to_string()));
        let engine = create_engine("null-engine-test").expect("registered engine");
        assert_eq!(engine.device_info().kind, DeviceKind::Cpu);
        assert!(create_engine("missing-engine").is_none());
    }

    #[test]
    fn error_messages_name_the_failure() {
        let err = EngineError::unimplemented("custom_gpu_primitive", "no kernel compiler");
        assert_eq!(
            err.to_string(),
            "primitive 'custom_gpu_primitive' is not implemented: no kernel compiler"
        );
    }
}
