//! Lowering through a user-supplied kernel overlay.

use crate::context::BuildContext;
use crate::custom_kernel::{evaluate_work_size, CustomKernelDescriptor, WorkSizeDims};
use crate::error::{LoweringError, LoweringResult};
use crate::graph::{Attribute, Node};
use crate::identity::layer_type_name_id;
use crate::ops::require_static_dims;
use crate::primitive::{CustomKernelSpec, InputInfo, Primitive, PrimitiveKind};

fn attribute_literal(value: &Attribute) -> String {
    match value {
        Attribute::Bool(flag) => u8::from(*flag).to_string(),
        Attribute::Int(value) => value.to_string(),
        Attribute::Float(value) => format!("{value:?}"),
        Attribute::Ints(values) => values
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(","),
        Attribute::Str(value) => value.clone(),
    }
}

/// Compiler options followed by one `-D NAME=VALUE` per define.
fn build_options(node: &Node, kernel: &CustomKernelDescriptor) -> LoweringResult<String> {
    let mut options = kernel.compiler_options.trim().to_string();
    for define in &kernel.defines {
        let value = define
            .param
            .as_deref()
            .and_then(|param| node.attr(param))
            .map(attribute_literal)
            .or_else(|| define.default.clone())
            .ok_or_else(|| {
                LoweringError::invalid_parameter(
                    node,
                    format!("no value for kernel define {}", define.name),
                )
            })?;
        if !options.is_empty() {
            options.push(' ');
        }
        options.push_str(&format!("-D {}={value}", define.name));
    }
    Ok(options)
}

fn work_sizes(expressions: &[String], dims: &WorkSizeDims) -> LoweringResult<Vec<usize>> {
    expressions
        .iter()
        .map(|expression| evaluate_work_size(expression, dims).map_err(LoweringError::from))
        .collect()
}

pub fn create_custom_op(
    ctx: &mut BuildContext<'_>,
    node: &Node,
    kernel: &CustomKernelDescriptor,
) -> LoweringResult<()> {
    let node_inputs = ctx.input_info(node)?;
    let inputs: Vec<InputInfo> = if kernel.inputs.is_empty() {
        node_inputs
    } else {
        kernel
            .inputs
            .iter()
            .map(|binding| {
                node_inputs.get(binding.port).cloned().ok_or_else(|| {
                    LoweringError::invalid_parameter(
                        node,
                        format!("kernel binds input port {} but the node has {}", binding.port, node.input_count()),
                    )
                })
            })
            .collect::<LoweringResult<_>>()?
    };

    let output_port = kernel.outputs.first().map_or(0, |binding| binding.port);
    if output_port >= node.output_count() {
        return Err(LoweringError::invalid_parameter(
            node,
            format!("kernel binds output port {output_port} but the node has {}", node.output_count()),
        ));
    }
    let output = node.output_spec(output_port).clone();
    let dims = WorkSizeDims::from_dims(&require_static_dims(node, &output.shape, "custom kernel output")?);

    let spec = CustomKernelSpec {
        entry_point: kernel.entry_point.clone(),
        source: kernel.source.clone(),
        build_options: build_options(node, kernel)?,
        global_work_size: work_sizes(&kernel.global_work_size, &dims)?,
        local_work_size: work_sizes(&kernel.local_work_size, &dims)?,
        output,
    };
    let primitive = Primitive::new(
        layer_type_name_id(node),
        PrimitiveKind::CustomKernel(spec),
        inputs,
    );
    ctx.add_primitive(node, primitive, &[])
}
