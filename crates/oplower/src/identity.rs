//! Deterministic primitive naming and input resolution.
//!
//! Every node gets a layer identity `lower(type_name):friendly_name`. The
//! identity map translates those (and any alias a builder declares) into the
//! id of the primitive that actually produces the value, so that consumers
//! never need to know how a producer was lowered.

use std::collections::BTreeMap;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::{LoweringError, LoweringResult};
use crate::graph::{opset, Graph, Node};
use crate::primitive::InputInfo;

/// Suffix appended to the layer identity of output `index` of a multi-output producer.
pub fn output_suffix(index: usize) -> String {
    format!(".out{index}")
}

pub fn layer_type_lower(node: &Node) -> String {
    node.type_name().to_lowercase()
}

/// `lower(type_name):friendly_name`.
pub fn layer_type_name_id(node: &Node) -> String {
    format!("{}:{}", layer_type_lower(node), node.friendly_name())
}

/// Multi-output producers whose outputs are emitted as separate `.outN`
/// primitives in both shape-inference regimes.
fn splits_into_separate_primitives(node: &Node) -> bool {
    node.is_a(&opset::SPLIT) || node.is_a(&opset::VARIADIC_SPLIT)
}

/// True when consumers must address `producer`'s outputs as `.outN` primitives.
pub fn is_legacy_multiple_outputs(producer: &Node, allow_new_shape_infer: bool) -> bool {
    producer.output_count() > 1 && (!allow_new_shape_infer || splits_into_separate_primitives(producer))
}

/// Graph-level identity to primitive id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimitiveIdMap {
    ids: BTreeMap<String, String>,
}

impl PrimitiveIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, identity: impl Into<String>, primitive_id: impl Into<String>) {
        self.ids.insert(identity.into(), primitive_id.into());
    }

    pub fn get(&self, identity: &str) -> Option<&str> {
        self.ids.get(identity).map(String::as_str)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.ids.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.ids.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Resolves every input of `node` to a primitive reference.
///
/// In query mode the derived identity is returned without consulting the map,
/// since producers are never lowered during a support probe.
pub fn resolve_inputs(
    graph: &Graph,
    node: &Node,
    primitive_ids: &PrimitiveIdMap,
    allow_new_shape_infer: bool,
    query_mode: bool,
) -> LoweringResult<Vec<InputInfo>> {
    let mut inputs = Vec::with_capacity(node.input_count());
    for (port, edge) in node.inputs().iter().enumerate() {
        let producer = graph.node(edge.node);
        let mut identity = layer_type_name_id(producer);
        let mut index = edge.index;
        if is_legacy_multiple_outputs(producer, allow_new_shape_infer) {
            identity.push_str(&output_suffix(edge.index));
            index = 0;
        }

        if query_mode {
            inputs.push(InputInfo::new(identity, index));
            continue;
        }

        let primitive_id = primitive_ids
            .get(&identity)
            .ok_or_else(|| LoweringError::UnresolvedInput {
                node: node.friendly_name().to_string(),
                identity: identity.clone(),
            })?;
        trace!(
            "{} input {port}: {identity} -> {primitive_id}[{index}]",
            node.friendly_name()
        );
        inputs.push(InputInfo::new(primitive_id, index));
    }
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, TypeInfo};
    use crate::tensor_utils::{literal_i64_vec, tensor_spec_static};
    use crate::types::DType;

    fn two_output_graph(op: TypeInfo) -> (Graph, crate::graph::NodeId) {
        let mut builder = GraphBuilder::new();
        let x = builder.parameter("x", tensor_spec_static(DType::F32, &[4, 2]));
        let axis = builder.constant("axis", literal_i64_vec(&[0]));
        let half = tensor_spec_static(DType::F32, &[2, 2]);
        let split = builder
            .add(
                op,
                "split",
                &[x.output(0), axis.output(0)],
                vec![half.clone(), half.clone()],
                [],
            )
            .expect("split");
        let erf = builder
            .add(opset::ERF, "erf", &[split.output(1)], vec![half], [])
            .expect("erf");
        (builder.finish(), erf)
    }

    #[test]
    fn identity_uses_lowercased_type() {
        let (graph, erf) = two_output_graph(opset::SPLIT);
        assert_eq!(layer_type_name_id(graph.node(erf)), "erf:erf");
    }

    #[test]
    fn split_outputs_resolve_through_suffix_in_both_regimes() {
        let (graph, erf) = two_output_graph(opset::SPLIT);
        let mut ids = PrimitiveIdMap::new();
        ids.insert("split:split.out1", "split:split.out1");
        for regime in [false, true] {
            let inputs =
                resolve_inputs(&graph, graph.node(erf), &ids, regime, false).expect("resolve");
            assert_eq!(inputs, vec![InputInfo::new("split:split.out1", 0)]);
        }
    }

    #[test]
    fn other_multi_output_producers_keep_port_in_new_regime() {
        let (graph, erf) = two_output_graph(TypeInfo::new("TopK", "opset11"));
        let mut ids = PrimitiveIdMap::new();
        ids.insert("topk:split", "topk:split");
        ids.insert("topk:split.out1", "topk:split.out1");

        let legacy = resolve_inputs(&graph, graph.node(erf), &ids, false, false).expect("legacy");
        assert_eq!(legacy, vec![InputInfo::new("topk:split.out1", 0)]);
        let modern = resolve_inputs(&graph, graph.node(erf), &ids, true, false).expect("new");
        assert_eq!(modern, vec![InputInfo::new("topk:split", 1)]);
    }

    #[test]
    fn unresolved_identity_is_an_error_outside_query_mode() {
        let (graph, erf) = two_output_graph(opset::SPLIT);
        let ids = PrimitiveIdMap::new();
        let err = resolve_inputs(&graph, graph.node(erf), &ids, false, false)
            .expect_err("nothing lowered yet");
        assert!(matches!(
            err,
            LoweringError::UnresolvedInput { ref identity, .. } if identity == "split:split.out1"
        ));
        let probed = resolve_inputs(&graph, graph.node(erf), &ids, false, true).expect("query");
        assert_eq!(probed, vec![InputInfo::new("split:split.out1", 0)]);
    }
}
