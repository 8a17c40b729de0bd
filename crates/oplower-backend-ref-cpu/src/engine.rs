use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use oplower::engine::{CompiledProgram, DeviceInfo, Engine, EngineError, EngineResult};
use oplower::primitive::{ActivationFunc, PrimitiveKind};
use oplower::profiling::{ProfilingStatus, ProfilingTable};
use oplower::types::{Dimension, TensorSpec};
use oplower::{BuildConfig, Topology};

use crate::kernels::{
    op_concat, op_crop, op_eltwise, op_erf, op_fully_connected, op_gemm, op_permute, op_reduce,
    op_reorder, op_reshape,
};
use crate::plan_cache::PlanCache;
use crate::tensor::{CpuTensor, TensorData};

pub const ENGINE_NAME: &str = "ref-cpu";

/// Engine that executes topologies with the reference kernels. Compiled
/// programs are shared between builds of identical topologies.
pub struct RefCpuEngine {
    device: DeviceInfo,
    plans: PlanCache<RefCpuProgram>,
}

impl RefCpuEngine {
    pub fn new() -> Self {
        Self::with_device(DeviceInfo::cpu(ENGINE_NAME))
    }

    pub fn with_device(device: DeviceInfo) -> Self {
        Self {
            device,
            plans: PlanCache::new(),
        }
    }

    pub fn cached_programs(&self) -> usize {
        self.plans.len()
    }
}

impl Default for RefCpuEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for RefCpuEngine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.device
    }

    fn build_program(
        &self,
        topology: &Topology,
        config: &BuildConfig,
    ) -> EngineResult<Arc<dyn CompiledProgram>> {
        let fingerprint = topology
            .fingerprint()
            .map_err(|err| EngineError::execution(format!("cannot fingerprint topology: {err}")))?;
        let (program, hit) = self
            .plans
            .get_or_try_insert_with(fingerprint, || RefCpuProgram::compile(topology, fingerprint))?;
        log::debug!(
            "ref-cpu program {fingerprint:016x}: {} primitives (cache {}, partial_build={})",
            program.steps.len(),
            if hit { "hit" } else { "miss" },
            config.partial_build
        );
        Ok(program)
    }
}

#[derive(Debug)]
struct Step {
    id: String,
    origin: String,
    origin_type: String,
    kind: PrimitiveKind,
    inputs: Vec<usize>,
    constant: Option<CpuTensor>,
}

impl Step {
    fn is_result(&self) -> bool {
        self.origin_type == "Result"
    }

    fn output_name(&self) -> &str {
        if self.is_result() {
            &self.origin
        } else {
            &self.id
        }
    }
}

/// Topology flattened into dependency order with inputs resolved to slots.
#[derive(Debug)]
pub struct RefCpuProgram {
    fingerprint: u64,
    steps: Vec<Step>,
    outputs: Vec<usize>,
}

impl RefCpuProgram {
    fn compile(topology: &Topology, fingerprint: u64) -> EngineResult<Self> {
        let order = topology
            .execution_order()
            .map_err(|err| EngineError::execution(err.to_string()))?;

        let mut slots: HashMap<&str, usize> = HashMap::new();
        let mut steps = Vec::with_capacity(order.len());
        for primitive in order {
            let constant = match &primitive.kind {
                PrimitiveKind::CustomKernel(spec) => {
                    return Err(EngineError::unimplemented(
                        "custom_gpu_primitive",
                        format!(
                            "{} ({}) needs a device kernel compiler",
                            primitive.id, spec.entry_point
                        ),
                    ))
                }
                PrimitiveKind::Data { literal } => Some(CpuTensor::from_literal(literal)?),
                _ => None,
            };

            let mut inputs = Vec::with_capacity(primitive.inputs.len());
            for input in &primitive.inputs {
                if input.idx != 0 {
                    return Err(EngineError::execution(format!(
                        "{} reads output {} of {}; reference primitives have a single output",
                        primitive.id, input.idx, input.pid
                    )));
                }
                let slot = slots.get(input.pid.as_str()).ok_or_else(|| {
                    EngineError::execution(format!("{} scheduled before {}", primitive.id, input.pid))
                })?;
                inputs.push(*slot);
            }

            slots.insert(primitive.id.as_str(), steps.len());
            steps.push(Step {
                id: primitive.id.clone(),
                origin: primitive.origin_op_name.clone(),
                origin_type: primitive.origin_op_type_name.clone(),
                kind: primitive.kind.clone(),
                inputs,
                constant,
            });
        }

        // Outputs are every `Result` plus any other non-data primitive nothing consumes.
        let consumed: HashSet<usize> = steps.iter().flat_map(|step| step.inputs.iter().copied()).collect();
        let outputs = steps
            .iter()
            .enumerate()
            .filter(|(slot, step)| {
                step.is_result() || (!consumed.contains(slot) && !step.kind.is_data())
            })
            .map(|(slot, _)| slot)
            .collect();

        Ok(Self {
            fingerprint,
            steps,
            outputs,
        })
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Friendly names of the parameters `execute` expects.
    pub fn input_names(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|step| matches!(step.kind, PrimitiveKind::InputLayout { .. }))
            .map(|step| step.origin.as_str())
            .collect()
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.outputs
            .iter()
            .map(|&slot| self.steps[slot].output_name())
            .collect()
    }

    /// Runs the program on inputs keyed by parameter name. `Result` outputs
    /// are keyed by the result's name, dangling primitives by primitive id.
    pub fn execute(
        &self,
        inputs: &BTreeMap<String, CpuTensor>,
    ) -> EngineResult<BTreeMap<String, CpuTensor>> {
        self.run(inputs, None)
    }

    /// Like [`RefCpuProgram::execute`], also storing per-primitive timings.
    pub fn execute_profiled(
        &self,
        inputs: &BTreeMap<String, CpuTensor>,
        profiling: &mut ProfilingTable,
    ) -> EngineResult<BTreeMap<String, CpuTensor>> {
        self.run(inputs, Some(profiling))
    }

    fn run(
        &self,
        inputs: &BTreeMap<String, CpuTensor>,
        mut profiling: Option<&mut ProfilingTable>,
    ) -> EngineResult<BTreeMap<String, CpuTensor>> {
        let mut values: Vec<Option<CpuTensor>> = vec![None; self.steps.len()];
        for (slot, step) in self.steps.iter().enumerate() {
            let start = Instant::now();
            let value = match (&step.kind, &step.constant) {
                (PrimitiveKind::InputLayout { spec }, _) => bind_input(step, spec, inputs)?,
                (_, Some(constant)) => constant.clone(),
                _ => {
                    let args = step
                        .inputs
                        .iter()
                        .map(|&input| {
                            values[input].as_ref().ok_or_else(|| {
                                EngineError::execution(format!("{} read an empty slot", step.id))
                            })
                        })
                        .collect::<EngineResult<Vec<&CpuTensor>>>()?;
                    run_step(step, &args)?
                }
            };
            if let Some(table) = profiling.as_deref_mut() {
                let status = if matches!(step.kind, PrimitiveKind::Reshape { .. }) {
                    ProfilingStatus::OptimizedOut
                } else {
                    ProfilingStatus::Executed
                };
                let micros = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
                table.update(&step.id, status, micros, 0);
            }
            values[slot] = Some(value);
        }

        self.outputs
            .iter()
            .map(|&slot| {
                let step = &self.steps[slot];
                let value = values[slot]
                    .take()
                    .ok_or_else(|| EngineError::execution(format!("{} produced nothing", step.id)))?;
                Ok((step.output_name().to_string(), value))
            })
            .collect()
    }
}

impl CompiledProgram for RefCpuProgram {
    fn engine_name(&self) -> &str {
        ENGINE_NAME
    }

    fn primitive_count(&self) -> usize {
        self.steps.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Downcasts a built program produced by [`RefCpuEngine`].
pub fn as_ref_cpu_program(program: &dyn CompiledProgram) -> Option<&RefCpuProgram> {
    program.as_any().downcast_ref::<RefCpuProgram>()
}

fn bind_input(
    step: &Step,
    spec: &TensorSpec,
    inputs: &BTreeMap<String, CpuTensor>,
) -> EngineResult<CpuTensor> {
    let tensor = inputs
        .get(&step.origin)
        .ok_or_else(|| EngineError::execution(format!("missing input '{}'", step.origin)))?;
    let dims_match = tensor.dims.len() == spec.shape.rank()
        && spec
            .shape
            .dims()
            .iter()
            .zip(&tensor.dims)
            .all(|(expected, &actual)| match expected {
                Dimension::Static(value) => *value == actual,
                Dimension::Dynamic(_) => true,
            });
    if !dims_match || tensor.dtype() != spec.dtype {
        return Err(EngineError::execution(format!(
            "input '{}' expects {} {}, got {} {:?}",
            step.origin,
            spec.dtype,
            spec.shape,
            tensor.dtype(),
            tensor.dims
        )));
    }
    Ok(tensor.clone())
}

fn expect_arg<'a>(step: &Step, args: &[&'a CpuTensor], index: usize) -> EngineResult<&'a CpuTensor> {
    args.get(index).copied().ok_or_else(|| {
        EngineError::execution(format!(
            "{} expects at least {} inputs, got {}",
            step.id,
            index + 1,
            args.len()
        ))
    })
}

fn shape_from_tensor(step: &Step, tensor: &CpuTensor) -> EngineResult<Vec<usize>> {
    let values: Vec<i64> = match &tensor.data {
        TensorData::Si32(values) => values.iter().map(|&v| i64::from(v)).collect(),
        TensorData::Si64(values) => values.to_vec(),
        TensorData::F32(_) => {
            return Err(EngineError::execution(format!(
                "{} shape input must be integer",
                step.id
            )))
        }
    };
    values
        .into_iter()
        .map(|v| {
            usize::try_from(v).map_err(|_| {
                EngineError::execution(format!("{} target shape has negative extent {v}", step.id))
            })
        })
        .collect()
}

fn run_step(step: &Step, args: &[&CpuTensor]) -> EngineResult<CpuTensor> {
    match &step.kind {
        PrimitiveKind::Reorder { output_dtype } => op_reorder(expect_arg(step, args, 0)?, *output_dtype),
        PrimitiveKind::Eltwise { mode, .. } => {
            op_eltwise(expect_arg(step, args, 0)?, expect_arg(step, args, 1)?, *mode)
        }
        PrimitiveKind::Activation {
            func: ActivationFunc::Erf,
        } => op_erf(expect_arg(step, args, 0)?),
        PrimitiveKind::Gemm(spec) => {
            op_gemm(expect_arg(step, args, 0)?, expect_arg(step, args, 1)?, spec)
        }
        PrimitiveKind::Permute { order } => op_permute(expect_arg(step, args, 0)?, order),
        PrimitiveKind::Reshape {
            output_shape: Some(dims),
        } => op_reshape(expect_arg(step, args, 0)?, dims),
        PrimitiveKind::Reshape { output_shape: None } => {
            let dims = shape_from_tensor(step, expect_arg(step, args, 1)?)?;
            op_reshape(expect_arg(step, args, 0)?, &dims)
        }
        PrimitiveKind::Reduce {
            mode,
            axes,
            keep_dims,
        } => op_reduce(expect_arg(step, args, 0)?, *mode, axes, *keep_dims),
        PrimitiveKind::Crop {
            axis,
            offset,
            length,
        } => op_crop(expect_arg(step, args, 0)?, *axis, *offset, *length),
        PrimitiveKind::Concatenation { axis } => op_concat(args, *axis),
        PrimitiveKind::FullyConnected {
            compressed,
            has_zero_point,
            ..
        } => {
            let scale = if *compressed {
                Some(expect_arg(step, args, 2)?)
            } else {
                None
            };
            let zero_point = if *has_zero_point {
                Some(expect_arg(step, args, 3)?)
            } else {
                None
            };
            op_fully_connected(
                expect_arg(step, args, 0)?,
                expect_arg(step, args, 1)?,
                scale,
                zero_point,
            )
        }
        PrimitiveKind::InputLayout { .. }
        | PrimitiveKind::Data { .. }
        | PrimitiveKind::CustomKernel(_) => Err(EngineError::execution(format!(
            "{} ({}) cannot run as a compute step",
            step.id,
            step.kind.type_string()
        ))),
    }
}
