//! Mutable per-build state handed to operation builders.

use log::debug;

use crate::config::BuildConfig;
use crate::engine::DeviceInfo;
use crate::error::{LoweringError, LoweringResult};
use crate::graph::{opset, Graph, Node};
use crate::identity::{layer_type_name_id, output_suffix, resolve_inputs, PrimitiveIdMap};
use crate::primitive::{InputInfo, Primitive};
use crate::profiling::ProfilingTable;
use crate::topology::Topology;
use crate::types::TensorLiteral;

/// State owned by one build (or one support probe).
///
/// Builders only see the graph read-only; everything they produce flows
/// through [`BuildContext::add_primitive`].
pub struct BuildContext<'a> {
    graph: &'a Graph,
    config: &'a BuildConfig,
    device: &'a DeviceInfo,
    topology: Topology,
    primitive_ids: PrimitiveIdMap,
    profiling: ProfilingTable,
    allow_new_shape_infer: bool,
    query_mode: bool,
}

impl<'a> BuildContext<'a> {
    pub(crate) fn new(
        graph: &'a Graph,
        config: &'a BuildConfig,
        device: &'a DeviceInfo,
        allow_new_shape_infer: bool,
        query_mode: bool,
    ) -> Self {
        Self {
            graph,
            config,
            device,
            topology: Topology::new(),
            primitive_ids: PrimitiveIdMap::new(),
            profiling: ProfilingTable::new(),
            allow_new_shape_infer,
            query_mode,
        }
    }

    pub fn graph(&self) -> &'a Graph {
        self.graph
    }

    pub fn config(&self) -> &BuildConfig {
        self.config
    }

    pub fn device_info(&self) -> &DeviceInfo {
        self.device
    }

    /// Whether builders must emit the shape-agnostic (new) lowering.
    pub fn use_new_shape_infer(&self) -> bool {
        self.allow_new_shape_infer
    }

    pub fn is_query_mode(&self) -> bool {
        self.query_mode
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn primitive_ids(&self) -> &PrimitiveIdMap {
        &self.primitive_ids
    }

    /// Resolves the inputs of `node` to primitive references.
    pub fn input_info(&self, node: &Node) -> LoweringResult<Vec<InputInfo>> {
        resolve_inputs(
            self.graph,
            node,
            &self.primitive_ids,
            self.allow_new_shape_infer,
            self.query_mode,
        )
    }

    /// Constant payload feeding input `index`; errors when the producer is
    /// not a `Constant`.
    pub fn constant_input(&self, node: &Node, index: usize) -> LoweringResult<&'a TensorLiteral> {
        if index >= node.input_count() {
            return Err(LoweringError::invalid_arity(node, &[index + 1]));
        }
        let producer = self.graph.producer(node, index);
        if !producer.is_a(&opset::CONSTANT) {
            return Err(LoweringError::invalid_parameter(
                node,
                format!("input {index} must be a constant, got {}", producer.type_name()),
            ));
        }
        producer.value().ok_or_else(|| {
            LoweringError::invalid_parameter(node, format!("constant input {index} carries no value"))
        })
    }

    /// Registers `primitive` as (part of) the lowering of `node`.
    ///
    /// The node's layer identity always maps to the most recently added
    /// primitive, so builders add their final output primitive last.
    pub fn add_primitive(
        &mut self,
        node: &Node,
        mut primitive: Primitive,
        aliases: &[String],
    ) -> LoweringResult<()> {
        primitive.origin_op_name = node.friendly_name().to_string();
        primitive.origin_op_type_name = node.type_name().to_string();

        let prim_id = primitive.id.clone();
        let identity = layer_type_name_id(node);
        self.primitive_ids.insert(identity.clone(), prim_id.clone());

        let first_output_of_split = prim_id
            .strip_suffix(&output_suffix(0))
            .is_some_and(|stem| stem == identity);
        if identity != prim_id {
            self.primitive_ids.insert(prim_id.clone(), prim_id.clone());
            if !first_output_of_split {
                primitive.origin_op_type_name = primitive.type_string().to_string();
            }
        }

        if self.config.enable_profiling && !primitive.kind.is_data() {
            self.profiling.record(
                &prim_id,
                &primitive.origin_op_type_name,
                &primitive.origin_op_name,
            );
        }

        for alias in aliases {
            self.primitive_ids.insert(alias.clone(), prim_id.clone());
        }

        debug!(
            "added {} primitive {prim_id} for {}",
            primitive.type_string(),
            node.friendly_name()
        );
        self.topology.add_primitive(primitive)?;
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (Topology, PrimitiveIdMap, ProfilingTable) {
        (self.topology, self.primitive_ids, self.profiling)
    }
}
