use crate::context::BuildContext;
use crate::error::{LoweringError, LoweringResult};
use crate::graph::{opset, Node};
use crate::identity::layer_type_name_id;
use crate::primitive::{ActivationFunc, EltwiseMode, Primitive, PrimitiveKind};
use crate::program_builder::validate_inputs_count;
use crate::register_op_builder;

const ELTWISE_MODES: &[(&str, EltwiseMode)] = &[
    ("Add", EltwiseMode::Sum),
    ("Subtract", EltwiseMode::Sub),
    ("Multiply", EltwiseMode::Prod),
    ("Divide", EltwiseMode::Div),
    ("SquaredDifference", EltwiseMode::SquaredDiff),
    ("Power", EltwiseMode::Pow),
    ("FloorMod", EltwiseMode::FloorMod),
    ("Mod", EltwiseMode::Mod),
    ("Maximum", EltwiseMode::Max),
    ("Minimum", EltwiseMode::Min),
];

fn eltwise_mode(node: &Node) -> LoweringResult<EltwiseMode> {
    ELTWISE_MODES
        .iter()
        .find(|(name, _)| *name == node.type_name())
        .map(|(_, mode)| *mode)
        .ok_or_else(|| LoweringError::unsupported(node))
}

fn create_eltwise_op(ctx: &mut BuildContext<'_>, node: &Node) -> LoweringResult<()> {
    validate_inputs_count(node, &[2])?;
    let mode = eltwise_mode(node)?;
    let inputs = ctx.input_info(node)?;
    let primitive = Primitive::new(
        layer_type_name_id(node),
        PrimitiveKind::Eltwise {
            mode,
            output_dtype: node.output_spec(0).dtype,
        },
        inputs,
    );
    ctx.add_primitive(node, primitive, &[])
}

fn create_erf_op(ctx: &mut BuildContext<'_>, node: &Node) -> LoweringResult<()> {
    validate_inputs_count(node, &[1])?;
    let inputs = ctx.input_info(node)?;
    let primitive = Primitive::new(
        layer_type_name_id(node),
        PrimitiveKind::Activation {
            func: ActivationFunc::Erf,
        },
        inputs,
    );
    ctx.add_primitive(node, primitive, &[])
}

register_op_builder!(REGISTER_ADD, opset::ADD, create_eltwise_op);
register_op_builder!(REGISTER_SUBTRACT, opset::SUBTRACT, create_eltwise_op);
register_op_builder!(REGISTER_MULTIPLY, opset::MULTIPLY, create_eltwise_op);
register_op_builder!(REGISTER_DIVIDE, opset::DIVIDE, create_eltwise_op);
register_op_builder!(REGISTER_SQUARED_DIFFERENCE, opset::SQUARED_DIFFERENCE, create_eltwise_op);
register_op_builder!(REGISTER_POWER, opset::POWER, create_eltwise_op);
register_op_builder!(REGISTER_FLOOR_MOD, opset::FLOOR_MOD, create_eltwise_op);
register_op_builder!(REGISTER_MOD, opset::MOD, create_eltwise_op);
register_op_builder!(REGISTER_MAXIMUM, opset::MAXIMUM, create_eltwise_op);
register_op_builder!(REGISTER_MINIMUM, opset::MINIMUM, create_eltwise_op);
register_op_builder!(REGISTER_ERF, opset::ERF, create_erf_op);
