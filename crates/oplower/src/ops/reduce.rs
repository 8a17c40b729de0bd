use crate::context::BuildContext;
use crate::error::{LoweringError, LoweringResult};
use crate::graph::{opset, Node};
use crate::identity::layer_type_name_id;
use crate::ops::normalize_axis;
use crate::primitive::{Primitive, PrimitiveKind, ReduceMode};
use crate::program_builder::validate_inputs_count;
use crate::register_op_builder;

fn reduce_mode(node: &Node) -> LoweringResult<ReduceMode> {
    let mode = match node.type_name() {
        "ReduceSum" => ReduceMode::Sum,
        "ReduceMean" => ReduceMode::Mean,
        "ReduceMax" => ReduceMode::Max,
        "ReduceMin" => ReduceMode::Min,
        "ReduceProd" => ReduceMode::Prod,
        "ReduceL1" => ReduceMode::L1,
        "ReduceL2" => ReduceMode::L2,
        _ => return Err(LoweringError::unsupported(node)),
    };
    Ok(mode)
}

/// Shared builder for every keep-dims arithmetic reduction. Concrete
/// reduction types reach it through their type chain.
fn create_reduction_op(ctx: &mut BuildContext<'_>, node: &Node) -> LoweringResult<()> {
    validate_inputs_count(node, &[2])?;
    let mode = reduce_mode(node)?;
    let mut inputs = ctx.input_info(node)?;
    inputs.truncate(1);

    let rank = node.input_spec(0).shape.rank();
    let raw_axes = ctx
        .constant_input(node, 1)?
        .to_i64_vec()
        .ok_or_else(|| LoweringError::invalid_parameter(node, "reduction axes must be integers"))?;
    let mut axes = Vec::with_capacity(raw_axes.len());
    for axis in raw_axes {
        let axis = normalize_axis(node, axis, rank)?;
        if !axes.contains(&axis) {
            axes.push(axis);
        }
    }
    axes.sort_unstable();

    let primitive = Primitive::new(
        layer_type_name_id(node),
        PrimitiveKind::Reduce {
            mode,
            axes,
            keep_dims: node.attr_bool("keep_dims", false),
        },
        inputs,
    );
    ctx.add_primitive(node, primitive, &[])
}

register_op_builder!(
    REGISTER_ARITHMETIC_REDUCTION,
    opset::ARITHMETIC_REDUCTION_KEEP_DIMS,
    create_reduction_op
);
