use crate::config::MatMulTuning;
use crate::context::BuildContext;
use crate::error::LoweringResult;
use crate::graph::{opset, Node};
use crate::identity::layer_type_name_id;
use crate::ops::require_static_dims;
use crate::primitive::{GemmSpec, InputInfo, Primitive, PrimitiveKind};
use crate::program_builder::validate_inputs_count;
use crate::register_op_builder;
use crate::types::{DType, Shape};

/// Minimum rank the gemm primitive produces in the legacy regime.
const GEMM_NATIVE_RANK: usize = 4;

fn trailing_all(shape: &Shape, pred: impl Fn(usize) -> bool) -> bool {
    shape
        .trailing(2)
        .is_some_and(|dims| dims.iter().all(|dim| dim.static_value().is_some_and(&pred)))
}

/// Whether explicit permutes ahead of the gemm are expected to pay off.
///
/// Only a performance decision; the lowered program is numerically the same
/// either way.
pub fn can_transpose_inputs(
    tuning: &MatMulTuning,
    shapes: [&Shape; 2],
    transpose_a: bool,
    transpose_b: bool,
    input_dtype: DType,
    supports_immad: bool,
) -> bool {
    if !transpose_a && !transpose_b {
        return false;
    }
    if shapes.iter().any(|shape| shape.is_dynamic() || shape.rank() < 2) {
        return false;
    }

    let aligned = |dim: usize| tuning.alignment != 0 && dim % tuning.alignment == 0;
    if shapes.iter().all(|shape| trailing_all(shape, aligned)) {
        return false;
    }

    let large = |dim: usize| dim >= tuning.large_dim;
    let both_large = shapes.iter().all(|shape| trailing_all(shape, large));

    let very_large = shapes.iter().any(|shape| {
        shape
            .element_count()
            .is_some_and(|count| count > tuning.large_tensor_elements)
    });
    let needs_transpose = very_large && !input_dtype.is_8bit_integer() && !supports_immad;

    both_large || needs_transpose
}

fn transpose_input(
    ctx: &mut BuildContext<'_>,
    node: &Node,
    shape: &Shape,
    suffix: &str,
    input: InputInfo,
) -> LoweringResult<InputInfo> {
    let rank = shape.rank();
    let mut order: Vec<usize> = (0..rank).collect();
    order.swap(rank - 1, rank - 2);

    let permute_name = format!("{}{suffix}", node.friendly_name());
    let permute = Primitive::new(
        permute_name.clone(),
        PrimitiveKind::Permute { order },
        vec![input],
    );
    ctx.add_primitive(node, permute, &[])?;
    Ok(InputInfo::new(permute_name, 0))
}

fn create_matmul_op(ctx: &mut BuildContext<'_>, node: &Node) -> LoweringResult<()> {
    validate_inputs_count(node, &[2])?;
    let mut inputs = ctx.input_info(node)?;
    let layer_name = layer_type_name_id(node);

    let shape_a = &node.input_spec(0).shape;
    let shape_b = &node.input_spec(1).shape;
    let mut transpose_a = node.attr_bool("transpose_a", false);
    let mut transpose_b = node.attr_bool("transpose_b", false);

    if can_transpose_inputs(
        &ctx.config().matmul,
        [shape_a, shape_b],
        transpose_a,
        transpose_b,
        node.input_spec(0).dtype,
        ctx.device_info().supports_immad,
    ) {
        if transpose_a {
            inputs[0] = transpose_input(ctx, node, shape_a, "/transpose_a", inputs[0].clone())?;
            transpose_a = false;
        }
        if transpose_b {
            inputs[1] = transpose_input(ctx, node, shape_b, "/transpose_b", inputs[1].clone())?;
            transpose_b = false;
        }
    }

    let gemm = Primitive::new(
        layer_name.clone(),
        PrimitiveKind::Gemm(GemmSpec {
            output_dtype: node.output_spec(0).dtype,
            transpose_a,
            transpose_b,
            alpha: 1.0,
            beta: 0.0,
            input_rank: shape_a.rank(),
            weight_rank: shape_b.rank(),
        }),
        inputs,
    );
    ctx.add_primitive(node, gemm, &[])?;

    if !ctx.use_new_shape_infer() {
        let out_dims = require_static_dims(node, &node.output_spec(0).shape, "output")?;
        if out_dims.len() < GEMM_NATIVE_RANK {
            let reshape = Primitive::new(
                format!("{layer_name}_out_reshape"),
                PrimitiveKind::Reshape {
                    output_shape: Some(out_dims),
                },
                vec![InputInfo::from(layer_name)],
            );
            ctx.add_primitive(node, reshape, &[])?;
        }
    }
    Ok(())
}

register_op_builder!(REGISTER_MATMUL, opset::MATMUL, create_matmul_op);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor_utils::shape_static;

    fn decide(a: &[usize], b: &[usize], ta: bool, tb: bool, dtype: DType, immad: bool) -> bool {
        can_transpose_inputs(
            &MatMulTuning::default(),
            [&shape_static(a), &shape_static(b)],
            ta,
            tb,
            dtype,
            immad,
        )
    }

    #[test]
    fn no_transpose_flags_means_no_permute() {
        assert!(!decide(&[1000, 1000], &[1000, 1000], false, false, DType::F32, false));
    }

    #[test]
    fn aligned_inputs_are_left_alone() {
        assert!(!decide(&[16, 16], &[16, 16], true, false, DType::F32, false));
        assert!(!decide(&[512, 1024], &[1024, 512], true, true, DType::F32, false));
    }

    #[test]
    fn large_trailing_dims_trigger_permute() {
        assert!(decide(&[1000, 1000], &[1000, 1000], true, false, DType::F32, false));
        assert!(decide(&[100, 70], &[70, 65], false, true, DType::F32, true));
    }

    #[test]
    fn very_large_tensors_depend_on_dtype_and_device() {
        // Second operand is the large one; it must count on its own.
        let small = [8, 3];
        let big = [3, 40_000];
        assert!(decide(&small, &big, true, false, DType::F32, false));
        assert!(!decide(&small, &big, true, false, DType::Si8, false));
        assert!(!decide(&small, &big, true, false, DType::F32, true));
    }

    #[test]
    fn vectors_are_never_permuted() {
        assert!(!decide(&[1000], &[1000, 1000], true, true, DType::F32, false));
    }
}
