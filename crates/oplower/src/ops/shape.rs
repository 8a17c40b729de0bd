//! Layout-only operations: transpose, reshape and concat.

use crate::context::BuildContext;
use crate::error::{LoweringError, LoweringResult};
use crate::graph::{opset, Node};
use crate::identity::layer_type_name_id;
use crate::ops::normalize_axis;
use crate::primitive::{Primitive, PrimitiveKind};
use crate::program_builder::validate_inputs_count;
use crate::register_op_builder;

fn create_transpose_op(ctx: &mut BuildContext<'_>, node: &Node) -> LoweringResult<()> {
    validate_inputs_count(node, &[1, 2])?;
    let mut inputs = ctx.input_info(node)?;
    inputs.truncate(1);

    let rank = node.input_spec(0).shape.rank();
    let order = if node.input_count() == 2 {
        let raw = ctx
            .constant_input(node, 1)?
            .to_i64_vec()
            .ok_or_else(|| LoweringError::invalid_parameter(node, "permutation must be integers"))?;
        raw.into_iter()
            .map(|axis| normalize_axis(node, axis, rank))
            .collect::<LoweringResult<Vec<_>>>()?
    } else {
        // No order input reverses the axes.
        (0..rank).rev().collect()
    };
    if order.len() != rank {
        return Err(LoweringError::invalid_parameter(
            node,
            format!("permutation {order:?} does not match rank {rank}"),
        ));
    }
    let mut seen = vec![false; rank];
    for &axis in &order {
        if std::mem::replace(&mut seen[axis], true) {
            return Err(LoweringError::invalid_parameter(
                node,
                format!("permutation {order:?} repeats axis {axis}"),
            ));
        }
    }

    let primitive = Primitive::new(
        layer_type_name_id(node),
        PrimitiveKind::Permute { order },
        inputs,
    );
    ctx.add_primitive(node, primitive, &[])
}

/// Static output shapes are baked in; dynamic ones keep the shape input.
fn create_reshape_op(ctx: &mut BuildContext<'_>, node: &Node) -> LoweringResult<()> {
    validate_inputs_count(node, &[2])?;
    let mut inputs = ctx.input_info(node)?;
    let output_shape = node.output_spec(0).shape.static_dims();
    if output_shape.is_some() {
        inputs.truncate(1);
    }
    let primitive = Primitive::new(
        layer_type_name_id(node),
        PrimitiveKind::Reshape { output_shape },
        inputs,
    );
    ctx.add_primitive(node, primitive, &[])
}

fn create_concat_op(ctx: &mut BuildContext<'_>, node: &Node) -> LoweringResult<()> {
    if node.input_count() == 0 {
        return Err(LoweringError::invalid_arity(node, &[]));
    }
    let inputs = ctx.input_info(node)?;
    let axis = node
        .attr_i64("axis")
        .ok_or_else(|| LoweringError::invalid_parameter(node, "missing axis attribute"))?;
    let axis = normalize_axis(node, axis, node.output_spec(0).shape.rank())?;
    let primitive = Primitive::new(
        layer_type_name_id(node),
        PrimitiveKind::Concatenation { axis },
        inputs,
    );
    ctx.add_primitive(node, primitive, &[])
}

register_op_builder!(REGISTER_TRANSPOSE, opset::TRANSPOSE, create_transpose_op);
register_op_builder!(REGISTER_RESHAPE, opset::RESHAPE, create_reshape_op);
register_op_builder!(REGISTER_CONCAT, opset::CONCAT, create_concat_op);
