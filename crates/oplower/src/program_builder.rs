//! Lowering driver: walks a graph, dispatches each node to its builder and
//! hands the finished topology to the engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};

use crate::config::BuildConfig;
use crate::context::BuildContext;
use crate::custom_kernel::CustomKernelTable;
use crate::engine::{CompiledProgram, Engine};
use crate::error::{LoweringError, LoweringResult};
use crate::graph::{opset, Graph, Node, NodeId, TypeInfo};
use crate::identity::PrimitiveIdMap;
use crate::ops;
use crate::profiling::ProfilingTable;
use crate::registry::{global_registry, OperationRegistry};
use crate::topology::Topology;

/// Ranks above this force the new shape-inference regime.
const MAX_LEGACY_RANK: usize = 6;

/// Operation kinds that only have a new-regime lowering.
const NEW_SHAPE_INFER_TYPES: &[TypeInfo] = &[opset::FULLY_CONNECTED_COMPRESSED];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Stop after lowering; no engine compilation.
    pub create_topology_only: bool,
    pub partial_build: bool,
    /// Inner programs also honour the externally configured regime flag.
    pub is_inner_program: bool,
}

/// Result of lowering without compilation.
#[derive(Debug, Clone)]
pub struct Lowered {
    pub topology: Topology,
    pub primitive_ids: PrimitiveIdMap,
    pub profiling: ProfilingTable,
    pub allow_new_shape_infer: bool,
}

#[derive(Debug, Clone)]
pub struct BuiltProgram {
    pub program: Arc<dyn CompiledProgram>,
    pub primitive_ids: PrimitiveIdMap,
    pub profiling: ProfilingTable,
    pub allow_new_shape_infer: bool,
}

#[derive(Debug, Clone)]
pub enum BuildOutput {
    Topology(Lowered),
    Program(BuiltProgram),
}

/// True when `node` cannot be lowered in the legacy regime.
pub fn requires_new_shape_infer(node: &Node) -> bool {
    if node.is_dynamic() {
        return true;
    }
    if NEW_SHAPE_INFER_TYPES.iter().any(|info| node.is_a(info)) {
        return true;
    }
    node.input_specs()
        .iter()
        .chain(node.output_specs())
        .any(|spec| spec.shape.rank() > MAX_LEGACY_RANK)
}

/// Errors unless the node's input count is one of `accepted`.
pub fn validate_inputs_count(node: &Node, accepted: &[usize]) -> LoweringResult<()> {
    if accepted.contains(&node.input_count()) {
        return Ok(());
    }
    Err(LoweringError::invalid_arity(node, accepted))
}

pub struct ProgramBuilder {
    engine: Arc<dyn Engine>,
    config: BuildConfig,
    registry: Arc<OperationRegistry>,
    custom_kernels: CustomKernelTable,
}

impl ProgramBuilder {
    /// Creates a driver over the process-wide builder registry.
    pub fn new(engine: Arc<dyn Engine>, config: BuildConfig) -> LoweringResult<Self> {
        let registry = global_registry()?;
        Self::with_registry(engine, config, registry)
    }

    pub fn with_registry(
        engine: Arc<dyn Engine>,
        config: BuildConfig,
        registry: Arc<OperationRegistry>,
    ) -> LoweringResult<Self> {
        let mut custom_kernels = CustomKernelTable::new();
        if let Some(path) = &config.global_custom_kernels_config {
            custom_kernels.load_file(path, true)?;
        }
        if let Some(path) = &config.custom_kernels_config {
            custom_kernels.load_file(path, config.custom_kernels_override)?;
        }
        Ok(Self {
            engine,
            config,
            registry,
            custom_kernels,
        })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn custom_kernels(&self) -> &CustomKernelTable {
        &self.custom_kernels
    }

    pub fn custom_kernels_mut(&mut self) -> &mut CustomKernelTable {
        &mut self.custom_kernels
    }

    /// Lowers every node in order into a fresh topology.
    pub fn lower(&self, graph: &Graph, options: &BuildOptions) -> LoweringResult<Lowered> {
        let mut allow_new_shape_infer = graph.ordered_ops().iter().any(requires_new_shape_infer);
        if options.is_inner_program {
            allow_new_shape_infer |= self.config.allow_new_shape_infer;
        }

        info!(
            "lowering {} operations for engine {} (new shape infer: {allow_new_shape_infer})",
            graph.len(),
            self.engine.name()
        );

        let mut ctx = BuildContext::new(
            graph,
            &self.config,
            self.engine.device_info(),
            allow_new_shape_infer,
            false,
        );
        for node in graph.ordered_ops() {
            self.create_single_layer_primitive(&mut ctx, node)?;
        }

        let (topology, primitive_ids, profiling) = ctx.into_parts();
        topology.validate()?;
        Ok(Lowered {
            topology,
            primitive_ids,
            profiling,
            allow_new_shape_infer,
        })
    }

    /// Lowers and compiles with default options.
    pub fn build(&self, graph: &Graph) -> LoweringResult<BuiltProgram> {
        let options = BuildOptions::default();
        let lowered = self.lower(graph, &options)?;
        self.compile(lowered, &options)
    }

    pub fn build_with(&self, graph: &Graph, options: &BuildOptions) -> LoweringResult<BuildOutput> {
        let lowered = self.lower(graph, options)?;
        if options.create_topology_only {
            return Ok(BuildOutput::Topology(lowered));
        }
        self.compile(lowered, options).map(BuildOutput::Program)
    }

    fn compile(&self, lowered: Lowered, options: &BuildOptions) -> LoweringResult<BuiltProgram> {
        let Lowered {
            topology,
            primitive_ids,
            profiling,
            allow_new_shape_infer,
        } = lowered;

        let mut engine_config = self.config.clone();
        engine_config.partial_build = options.partial_build;
        engine_config.optimize_data = true;
        engine_config.allow_new_shape_infer = allow_new_shape_infer;

        let result = self.engine.build_program(&topology, &engine_config);
        debug!("releasing topology with {} primitives", topology.len());
        drop(topology);

        let program = result.map_err(|source| LoweringError::BuildFailed { source })?;
        info!(
            "built program on {} with {} primitives",
            program.engine_name(),
            program.primitive_count()
        );
        Ok(BuiltProgram {
            program,
            primitive_ids,
            profiling,
            allow_new_shape_infer,
        })
    }

    /// Lowers `node` alone in query mode. Nothing produced escapes the probe.
    pub fn probe(&self, graph: &Graph, node: NodeId) -> LoweringResult<()> {
        let node = graph.node(node);
        let mut ctx = BuildContext::new(
            graph,
            &self.config,
            self.engine.device_info(),
            requires_new_shape_infer(node),
            true,
        );
        self.create_single_layer_primitive(&mut ctx, node)
    }

    pub fn is_op_supported(&self, graph: &Graph, node: NodeId) -> bool {
        match self.probe(graph, node) {
            Ok(()) => true,
            Err(err) => {
                debug!("{} is not supported: {err}", graph.node(node).friendly_name());
                false
            }
        }
    }

    /// Support verdict for every node, keyed by friendly name.
    pub fn query_supported(&self, graph: &Graph) -> BTreeMap<String, bool> {
        graph
            .ordered_ops()
            .iter()
            .map(|node| {
                (
                    node.friendly_name().to_string(),
                    self.is_op_supported(graph, node.id()),
                )
            })
            .collect()
    }

    fn create_single_layer_primitive(
        &self,
        ctx: &mut BuildContext<'_>,
        node: &Node,
    ) -> LoweringResult<()> {
        debug!(
            "Process {}::{} operation (friendly_name={})",
            node.version_id(),
            node.type_name(),
            node.friendly_name()
        );

        if let Some(kernel) = self.custom_kernels.get(node.type_name()) {
            return ops::custom::create_custom_op(ctx, node, kernel);
        }
        for type_info in node.op_type().chain() {
            if let Some(builder) = self.registry.lookup(type_info) {
                return builder(ctx, node);
            }
        }
        Err(LoweringError::unsupported(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::tensor_utils::{tensor_spec_mixed, tensor_spec_static};
    use crate::types::DType;

    #[test]
    fn regime_is_forced_by_dynamic_rank_and_kind() {
        let mut builder = GraphBuilder::new();
        let dynamic = builder.parameter("dyn", tensor_spec_mixed(DType::F32, &[None, Some(4)]));
        let deep = builder.parameter("deep", tensor_spec_static(DType::F32, &[1; 7]));
        let plain = builder.parameter("plain", tensor_spec_static(DType::F32, &[2, 3]));
        let graph = builder.finish();

        assert!(requires_new_shape_infer(graph.node(dynamic)));
        assert!(requires_new_shape_infer(graph.node(deep)));
        assert!(!requires_new_shape_infer(graph.node(plain)));
    }

    #[test]
    fn arity_errors_report_actual_and_accepted() {
        let mut builder = GraphBuilder::new();
        let x = builder.parameter("x", tensor_spec_static(DType::F32, &[2]));
        let graph = builder.finish();
        let err = validate_inputs_count(graph.node(x), &[1, 2]).expect_err("parameters have no inputs");
        match err {
            LoweringError::InvalidArity { actual, expected, .. } => {
                assert_eq!(actual, 0);
                assert_eq!(expected, vec![1, 2]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
