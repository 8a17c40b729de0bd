//! Immutable operation graph consumed by the lowering driver.
//!
//! Graphs arrive already shape- and type-validated: every node carries the
//! specs of its inputs and outputs, and nodes are stored in topological
//! order. The lowering layer never infers shapes; it only reads them.

mod const_path;
pub mod opset;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{TensorLiteral, TensorSpec};

pub use const_path::is_node_on_const_path;

/// Identity of an operation kind at one specificity level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeInfo {
    pub name: Cow<'static, str>,
    pub version_id: Cow<'static, str>,
}

impl TypeInfo {
    pub const fn from_static(name: &'static str, version_id: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            version_id: Cow::Borrowed(version_id),
        }
    }

    pub fn new(name: impl Into<String>, version_id: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            version_id: Cow::Owned(version_id.into()),
        }
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.version_id, self.name)
    }
}

/// Ordered type-identity chain: most specific level first, generic fallback last.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpType {
    chain: Vec<TypeInfo>,
}

impl OpType {
    pub fn new(info: TypeInfo) -> Self {
        Self { chain: vec![info] }
    }

    /// Appends a less specific level consulted after every level before it.
    pub fn with_parent(mut self, parent: TypeInfo) -> Self {
        self.chain.push(parent);
        self
    }

    pub fn type_info(&self) -> &TypeInfo {
        &self.chain[0]
    }

    pub fn name(&self) -> &str {
        &self.chain[0].name
    }

    pub fn version_id(&self) -> &str {
        &self.chain[0].version_id
    }

    pub fn chain(&self) -> &[TypeInfo] {
        &self.chain
    }

    /// True when any level of the chain equals `info`.
    pub fn is_a(&self, info: &TypeInfo) -> bool {
        self.chain.iter().any(|level| level == info)
    }
}

impl From<TypeInfo> for OpType {
    fn from(info: TypeInfo) -> Self {
        OpType::new(info)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl NodeId {
    pub fn output(self, index: usize) -> OutputRef {
        OutputRef { node: self, index }
    }
}

/// Reference to one output port of a producer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    pub node: NodeId,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Attribute {
    Bool(bool),
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    op_type: OpType,
    friendly_name: String,
    inputs: Vec<OutputRef>,
    input_specs: Vec<TensorSpec>,
    outputs: Vec<TensorSpec>,
    attrs: BTreeMap<String, Attribute>,
    value: Option<TensorLiteral>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn op_type(&self) -> &OpType {
        &self.op_type
    }

    pub fn type_name(&self) -> &str {
        self.op_type.name()
    }

    pub fn version_id(&self) -> &str {
        self.op_type.version_id()
    }

    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    pub fn is_a(&self, info: &TypeInfo) -> bool {
        self.op_type.is_a(info)
    }

    pub fn inputs(&self) -> &[OutputRef] {
        &self.inputs
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn input_spec(&self, index: usize) -> &TensorSpec {
        &self.input_specs[index]
    }

    pub fn input_specs(&self) -> &[TensorSpec] {
        &self.input_specs
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn output_spec(&self, index: usize) -> &TensorSpec {
        &self.outputs[index]
    }

    pub fn output_specs(&self) -> &[TensorSpec] {
        &self.outputs
    }

    /// Constant payload; only set for `Constant` nodes.
    pub fn value(&self) -> Option<&TensorLiteral> {
        self.value.as_ref()
    }

    pub fn attrs(&self) -> &BTreeMap<String, Attribute> {
        &self.attrs
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attrs.get(name)
    }

    pub fn attr_bool(&self, name: &str, default: bool) -> bool {
        match self.attrs.get(name) {
            Some(Attribute::Bool(value)) => *value,
            _ => default,
        }
    }

    pub fn attr_i64(&self, name: &str) -> Option<i64> {
        match self.attrs.get(name) {
            Some(Attribute::Int(value)) => Some(*value),
            _ => None,
        }
    }

    /// A node is dynamic when any of its input or output shapes is.
    pub fn is_dynamic(&self) -> bool {
        self.input_specs
            .iter()
            .chain(self.outputs.iter())
            .any(|spec| spec.shape.is_dynamic())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("node '{node}' references unknown producer {producer:?}")]
    UnknownProducer { node: String, producer: NodeId },
    #[error("node '{node}' references output {index} of '{producer}' which has {available} outputs")]
    OutputOutOfRange {
        node: String,
        producer: String,
        index: usize,
        available: usize,
    },
}

/// Topologically ordered operation graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Nodes in topological order (producers before consumers).
    pub fn ordered_ops(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find(&self, friendly_name: &str) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|node| node.friendly_name == friendly_name)
    }

    /// Producer node of input `index` of `node`.
    pub fn producer(&self, node: &Node, index: usize) -> &Node {
        self.node(node.inputs[index].node)
    }
}

/// Appends nodes in topological order; edges may only point backwards.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parameter(&mut self, name: &str, spec: TensorSpec) -> NodeId {
        self.push(
            OpType::new(opset::PARAMETER),
            name,
            Vec::new(),
            Vec::new(),
            vec![spec],
            BTreeMap::new(),
            None,
        )
    }

    pub fn constant(&mut self, name: &str, literal: TensorLiteral) -> NodeId {
        let spec = literal.spec.clone();
        self.push(
            OpType::new(opset::CONSTANT),
            name,
            Vec::new(),
            Vec::new(),
            vec![spec],
            BTreeMap::new(),
            Some(literal),
        )
    }

    pub fn result(&mut self, name: &str, input: OutputRef) -> Result<NodeId, GraphError> {
        let spec = self.output_spec_of(name, input)?;
        Ok(self.push(
            OpType::new(opset::RESULT),
            name,
            vec![input],
            vec![spec.clone()],
            vec![spec],
            BTreeMap::new(),
            None,
        ))
    }

    /// Appends an operation node. Output specs are supplied by the caller:
    /// the graph carries precomputed shapes.
    pub fn add(
        &mut self,
        op_type: impl Into<OpType>,
        name: &str,
        inputs: &[OutputRef],
        outputs: Vec<TensorSpec>,
        attrs: impl IntoIterator<Item = (&'static str, Attribute)>,
    ) -> Result<NodeId, GraphError> {
        let mut input_specs = Vec::with_capacity(inputs.len());
        for input in inputs {
            input_specs.push(self.output_spec_of(name, *input)?);
        }
        let attrs = attrs
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        Ok(self.push(
            op_type.into(),
            name,
            inputs.to_vec(),
            input_specs,
            outputs,
            attrs,
            None,
        ))
    }

    pub fn finish(self) -> Graph {
        Graph { nodes: self.nodes }
    }

    fn output_spec_of(&self, consumer: &str, input: OutputRef) -> Result<TensorSpec, GraphError> {
        let producer = self
            .nodes
            .get(input.node.0)
            .ok_or_else(|| GraphError::UnknownProducer {
                node: consumer.to_string(),
                producer: input.node,
            })?;
        producer
            .outputs
            .get(input.index)
            .cloned()
            .ok_or_else(|| GraphError::OutputOutOfRange {
                node: consumer.to_string(),
                producer: producer.friendly_name.clone(),
                index: input.index,
                available: producer.outputs.len(),
            })
    }

    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        op_type: OpType,
        name: &str,
        inputs: Vec<OutputRef>,
        input_specs: Vec<TensorSpec>,
        outputs: Vec<TensorSpec>,
        attrs: BTreeMap<String, Attribute>,
        value: Option<TensorLiteral>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            op_type,
            friendly_name: name.to_string(),
            inputs,
            input_specs,
            outputs,
            attrs,
            value,
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor_utils::tensor_spec_static;
    use crate::types::DType;

    #[test]
    fn builder_rejects_out_of_range_outputs() {
        let mut builder = GraphBuilder::new();
        let x = builder.parameter("x", tensor_spec_static(DType::F32, &[2, 2]));
        let err = builder
            .add(
                opset::ERF,
                "erf",
                &[x.output(1)],
                vec![tensor_spec_static(DType::F32, &[2, 2])],
                [],
            )
            .expect_err("output 1 does not exist");
        assert!(matches!(err, GraphError::OutputOutOfRange { available: 1, .. }));
    }

    #[test]
    fn input_specs_follow_producers() {
        let mut builder = GraphBuilder::new();
        let x = builder.parameter("x", tensor_spec_static(DType::F32, &[4]));
        let erf = builder
            .add(
                opset::ERF,
                "erf",
                &[x.output(0)],
                vec![tensor_spec_static(DType::F32, &[4])],
                [],
            )
            .expect("erf node");
        let graph = builder.finish();
        let node = graph.node(erf);
        assert_eq!(node.input_spec(0), &tensor_spec_static(DType::F32, &[4]));
        assert_eq!(graph.producer(node, 0).friendly_name(), "x");
        assert!(!node.is_dynamic());
    }

    #[test]
    fn type_chain_checks_every_level() {
        let op_type = OpType::new(opset::REDUCE_L2).with_parent(opset::ARITHMETIC_REDUCTION_KEEP_DIMS);
        assert!(op_type.is_a(&opset::ARITHMETIC_REDUCTION_KEEP_DIMS));
        assert!(!op_type.is_a(&opset::REDUCE_SUM));
        assert_eq!(op_type.type_info().to_string(), "opset4::ReduceL2");
    }
}
