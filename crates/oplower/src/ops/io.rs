//! Graph boundaries and constants.

use crate::context::BuildContext;
use crate::error::{LoweringError, LoweringResult};
use crate::graph::{opset, Node};
use crate::identity::layer_type_name_id;
use crate::primitive::{Primitive, PrimitiveKind};
use crate::program_builder::validate_inputs_count;
use crate::register_op_builder;

fn create_parameter_op(ctx: &mut BuildContext<'_>, node: &Node) -> LoweringResult<()> {
    validate_inputs_count(node, &[0])?;
    let primitive = Primitive::new(
        layer_type_name_id(node),
        PrimitiveKind::InputLayout {
            spec: node.output_spec(0).clone(),
        },
        Vec::new(),
    );
    ctx.add_primitive(node, primitive, &[])
}

fn create_constant_op(ctx: &mut BuildContext<'_>, node: &Node) -> LoweringResult<()> {
    validate_inputs_count(node, &[0])?;
    let literal = node
        .value()
        .ok_or_else(|| LoweringError::invalid_parameter(node, "constant carries no value"))?;
    let primitive = Primitive::new(
        layer_type_name_id(node),
        PrimitiveKind::Data {
            literal: literal.clone(),
        },
        Vec::new(),
    );
    ctx.add_primitive(node, primitive, &[])
}

fn create_result_op(ctx: &mut BuildContext<'_>, node: &Node) -> LoweringResult<()> {
    validate_inputs_count(node, &[1])?;
    let inputs = ctx.input_info(node)?;
    let primitive = Primitive::new(
        layer_type_name_id(node),
        PrimitiveKind::Reorder {
            output_dtype: node.output_spec(0).dtype,
        },
        inputs,
    );
    ctx.add_primitive(node, primitive, &[])
}

register_op_builder!(REGISTER_PARAMETER, opset::PARAMETER, create_parameter_op);
register_op_builder!(REGISTER_CONSTANT, opset::CONSTANT, create_constant_op);
register_op_builder!(REGISTER_RESULT, opset::RESULT, create_result_op);
