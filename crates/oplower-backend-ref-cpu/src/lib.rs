pub mod engine;
pub mod kernels;
mod plan_cache;
pub mod reference;
pub mod tensor;

use std::sync::Arc;

use oplower::engine::Engine;

pub use engine::{as_ref_cpu_program, RefCpuEngine, RefCpuProgram, ENGINE_NAME};
pub use reference::evaluate_graph;
pub use tensor::{CpuTensor, TensorData};

/// Register the reference engine with the global engine registry.
///
/// Runs automatically through [`oplower::engine::ENGINE_REGISTRARS`], but can
/// also be called manually.
pub fn register_ref_cpu_engine() {
    oplower::engine::register_engine(ENGINE_NAME, || {
        Arc::new(RefCpuEngine::new()) as Arc<dyn Engine>
    });
}

#[oplower::linkme::distributed_slice(oplower::engine::ENGINE_REGISTRARS)]
static REGISTER_REF_CPU_ENGINE: fn() = register_ref_cpu_engine;
