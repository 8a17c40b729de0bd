//! Per-operation builders. Each submodule registers its builders into
//! [`OP_BUILDERS`](crate::registry::OP_BUILDERS) at link time.

pub mod custom;
pub mod eltwise;
pub mod fully_connected;
pub mod io;
pub mod matmul;
pub mod reduce;
pub mod shape;
pub mod split;

use crate::error::{LoweringError, LoweringResult};
use crate::graph::Node;
use crate::types::Shape;

/// Maps a possibly negative axis into `0..rank`.
pub(crate) fn normalize_axis(node: &Node, axis: i64, rank: usize) -> LoweringResult<usize> {
    let rank_i = rank as i64;
    let normalized = if axis < 0 { axis + rank_i } else { axis };
    if !(0..rank_i).contains(&normalized) {
        return Err(LoweringError::invalid_parameter(
            node,
            format!("axis {axis} is out of range for rank {rank}"),
        ));
    }
    Ok(normalized as usize)
}

pub(crate) fn require_static_dims(node: &Node, shape: &Shape, what: &str) -> LoweringResult<Vec<usize>> {
    shape.static_dims().ok_or_else(|| {
        LoweringError::invalid_parameter(node, format!("{what} shape {shape} must be static"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::tensor_utils::tensor_spec_static;
    use crate::types::DType;

    #[test]
    fn negative_axes_wrap_once() {
        let mut builder = GraphBuilder::new();
        let x = builder.parameter("x", tensor_spec_static(DType::F32, &[2, 3, 4]));
        let graph = builder.finish();
        let node = graph.node(x);
        assert_eq!(normalize_axis(node, -1, 3).expect("axis"), 2);
        assert_eq!(normalize_axis(node, 0, 3).expect("axis"), 0);
        assert!(normalize_axis(node, 3, 3).is_err());
        assert!(normalize_axis(node, -4, 3).is_err());
    }
}
