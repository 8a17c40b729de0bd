#![allow(dead_code)]

use std::any::Any;
use std::sync::{Arc, Mutex};

use oplower::engine::{CompiledProgram, DeviceInfo, Engine, EngineError, EngineResult};
use oplower::{BuildConfig, ProgramBuilder, Topology};

pub fn setup_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug)]
pub struct RecordedProgram {
    pub primitive_count: usize,
}

impl CompiledProgram for RecordedProgram {
    fn engine_name(&self) -> &str {
        "recording"
    }

    fn primitive_count(&self) -> usize {
        self.primitive_count
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Test-only engine that records the latest topology and config it compiled.
pub struct RecordingEngine {
    device: DeviceInfo,
    fail_with: Option<String>,
    last: Mutex<Option<(Topology, BuildConfig)>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::with_device(DeviceInfo::cpu("recording"))
    }

    pub fn with_device(device: DeviceInfo) -> Self {
        Self {
            device,
            fail_with: None,
            last: Mutex::new(None),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::new()
        }
    }

    pub fn recorded_topology_or_panic(&self) -> Topology {
        self.last
            .lock()
            .expect("engine mutex poisoned")
            .as_ref()
            .map(|(topology, _)| topology.clone())
            .expect("engine should record compiled topology")
    }

    pub fn recorded_config_or_panic(&self) -> BuildConfig {
        self.last
            .lock()
            .expect("engine mutex poisoned")
            .as_ref()
            .map(|(_, config)| config.clone())
            .expect("engine should record build config")
    }
}

impl Engine for RecordingEngine {
    fn name(&self) -> &str {
        "recording"
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.device
    }

    fn build_program(
        &self,
        topology: &Topology,
        config: &BuildConfig,
    ) -> EngineResult<Arc<dyn CompiledProgram>> {
        if let Some(message) = &self.fail_with {
            return Err(EngineError::execution(message.clone()));
        }
        self.last
            .lock()
            .expect("engine mutex poisoned")
            .replace((topology.clone(), config.clone()));
        Ok(Arc::new(RecordedProgram {
            primitive_count: topology.len(),
        }))
    }
}

pub fn builder_with(engine: &Arc<RecordingEngine>, config: BuildConfig) -> ProgramBuilder {
    let engine: Arc<dyn Engine> = engine.clone();
    ProgramBuilder::new(engine, config).expect("program builder")
}
