//! Fully connected layers: `y = x · Wᵀ` with `W` shaped `[N, K]`.
//!
//! The compressed variant carries a per-row decompression scale and an
//! optional zero point; it only has a new-regime lowering.

use crate::context::BuildContext;
use crate::error::{LoweringError, LoweringResult};
use crate::graph::{is_node_on_const_path, opset, Node};
use crate::identity::layer_type_name_id;
use crate::primitive::{Primitive, PrimitiveKind};
use crate::program_builder::validate_inputs_count;
use crate::register_op_builder;

fn require_const_path(ctx: &BuildContext<'_>, node: &Node, index: usize, what: &str) -> LoweringResult<()> {
    let producer = node.inputs()[index].node;
    if is_node_on_const_path(ctx.graph(), producer) {
        return Ok(());
    }
    Err(LoweringError::invalid_parameter(
        node,
        format!("{what} must be computable from constants"),
    ))
}

fn create_fully_connected_op(ctx: &mut BuildContext<'_>, node: &Node) -> LoweringResult<()> {
    validate_inputs_count(node, &[2])?;
    require_const_path(ctx, node, 1, "weights")?;
    let inputs = ctx.input_info(node)?;
    let primitive = Primitive::new(
        layer_type_name_id(node),
        PrimitiveKind::FullyConnected {
            compressed: false,
            has_zero_point: false,
            output_dtype: node.output_spec(0).dtype,
        },
        inputs,
    );
    ctx.add_primitive(node, primitive, &[])
}

fn create_fully_connected_compressed_op(ctx: &mut BuildContext<'_>, node: &Node) -> LoweringResult<()> {
    validate_inputs_count(node, &[3, 4])?;
    for (index, what) in [(1, "weights"), (2, "decompression scale"), (3, "decompression zero point")] {
        if index < node.input_count() {
            require_const_path(ctx, node, index, what)?;
        }
    }
    let inputs = ctx.input_info(node)?;
    let primitive = Primitive::new(
        layer_type_name_id(node),
        PrimitiveKind::FullyConnected {
            compressed: true,
            has_zero_point: node.input_count() == 4,
            output_dtype: node.output_spec(0).dtype,
        },
        inputs,
    );
    ctx.add_primitive(node, primitive, &[])
}

register_op_builder!(REGISTER_FULLY_CONNECTED, opset::FULLY_CONNECTED, create_fully_connected_op);
register_op_builder!(
    REGISTER_FULLY_CONNECTED_COMPRESSED,
    opset::FULLY_CONNECTED_COMPRESSED,
    create_fully_connected_compressed_op
);
