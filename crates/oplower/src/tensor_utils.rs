use std::sync::Arc;

use crate::types::{DType, DimSymbol, Dimension, Shape, TensorLiteral, TensorSpec};

/// Builds a static shape from explicit dimensions.
pub fn shape_static(dims: &[usize]) -> Shape {
    Shape::new(
        dims.iter()
            .copied()
            .map(Dimension::Static)
            .collect::<Vec<_>>(),
    )
}

/// Builds a mixed static/dynamic shape; `None` entries become dynamic.
pub fn shape_mixed(dims: &[Option<usize>]) -> Shape {
    Shape::new(
        dims.iter()
            .enumerate()
            .map(|(idx, dim)| match dim {
                Some(value) => Dimension::Static(*value),
                None => Dimension::Dynamic(DimSymbol::new(format!("d{idx}"))),
            })
            .collect::<Vec<_>>(),
    )
}

pub fn tensor_spec_static(dtype: DType, dims: &[usize]) -> TensorSpec {
    TensorSpec::new(dtype, shape_static(dims))
}

pub fn tensor_spec_mixed(dtype: DType, dims: &[Option<usize>]) -> TensorSpec {
    TensorSpec::new(dtype, shape_mixed(dims))
}

/// Creates an `f32` literal with the given static dimensions.
pub fn literal_f32(dims: &[usize], values: &[f32]) -> TensorLiteral {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    TensorLiteral::new(tensor_spec_static(DType::F32, dims), Arc::from(bytes))
}

/// Creates an `i64` literal with the given static dimensions.
pub fn literal_i64(dims: &[usize], values: &[i64]) -> TensorLiteral {
    let mut bytes = Vec::with_capacity(values.len() * 8);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    TensorLiteral::new(tensor_spec_static(DType::Si64, dims), Arc::from(bytes))
}

/// Creates a rank-1 `i64` literal, the usual carrier for axes and orders.
pub fn literal_i64_vec(values: &[i64]) -> TensorLiteral {
    literal_i64(&[values.len()], values)
}
