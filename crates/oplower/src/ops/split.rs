//! `Split` and `VariadicSplit` lower to one crop per output.

use crate::context::BuildContext;
use crate::error::{LoweringError, LoweringResult};
use crate::graph::{opset, Node};
use crate::identity::{layer_type_name_id, output_suffix};
use crate::ops::{normalize_axis, require_static_dims};
use crate::primitive::{Primitive, PrimitiveKind};
use crate::program_builder::validate_inputs_count;
use crate::register_op_builder;

fn create_split_op(ctx: &mut BuildContext<'_>, node: &Node) -> LoweringResult<()> {
    if node.is_a(&opset::VARIADIC_SPLIT) {
        validate_inputs_count(node, &[3])?;
    } else {
        validate_inputs_count(node, &[2])?;
    }
    let mut inputs = ctx.input_info(node)?;
    inputs.truncate(1);

    let axis = ctx
        .constant_input(node, 1)?
        .to_i64_vec()
        .and_then(|values| values.first().copied())
        .ok_or_else(|| LoweringError::invalid_parameter(node, "split axis must be an integer scalar"))?;
    let axis = normalize_axis(node, axis, node.input_spec(0).shape.rank())?;

    let layer_name = layer_type_name_id(node);
    let mut offset = 0;
    for (index, spec) in node.output_specs().iter().enumerate() {
        let dims = require_static_dims(node, &spec.shape, "split output")?;
        let length = dims[axis];
        let crop = Primitive::new(
            format!("{layer_name}{}", output_suffix(index)),
            PrimitiveKind::Crop {
                axis,
                offset,
                length,
            },
            inputs.clone(),
        );
        ctx.add_primitive(node, crop, &[])?;
        offset += length;
    }
    Ok(())
}

register_op_builder!(REGISTER_SPLIT, opset::SPLIT, create_split_op);
register_op_builder!(REGISTER_VARIADIC_SPLIT, opset::VARIADIC_SPLIT, create_split_op);
