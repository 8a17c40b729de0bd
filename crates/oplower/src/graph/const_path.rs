use std::collections::HashSet;

use super::{opset, Graph, NodeId};

/// Returns `true` when every upstream path of `node` terminates in a `Constant`.
///
/// A source node that is not a `Constant` (e.g. a `Parameter`) puts the node on
/// a dynamic path. Graphs are acyclic by construction; a cycle here would be an
/// upstream validation bug and is only guarded by the visited set.
pub fn is_node_on_const_path(graph: &Graph, node: NodeId) -> bool {
    let mut visited = HashSet::new();
    let mut pending = vec![node];

    while let Some(id) = pending.pop() {
        if !visited.insert(id) {
            continue;
        }
        let current = graph.node(id);
        if current.is_a(&opset::CONSTANT) {
            continue;
        }
        if current.input_count() == 0 {
            return false;
        }
        pending.extend(current.inputs().iter().map(|input| input.node));
    }
    true
}
