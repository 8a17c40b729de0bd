use std::sync::Arc;

use oplower::engine::{EngineError, EngineResult};
use oplower::tensor_utils::tensor_spec_static;
use oplower::types::{DType, TensorLiteral, TensorSpec};

#[derive(Debug, Clone, PartialEq)]
pub struct CpuTensor {
    pub dims: Vec<usize>,
    pub data: TensorData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Arc<[f32]>),
    Si32(Arc<[i32]>),
    Si64(Arc<[i64]>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(values) => values.len(),
            TensorData::Si32(values) => values.len(),
            TensorData::Si64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self {
            TensorData::F32(_) => DType::F32,
            TensorData::Si32(_) => DType::Si32,
            TensorData::Si64(_) => DType::Si64,
        }
    }

    /// Builds a tensor of the same dtype from element indices into `self`.
    pub(crate) fn gather(&self, indices: &[usize]) -> TensorData {
        match self {
            TensorData::F32(values) => {
                TensorData::F32(indices.iter().map(|&idx| values[idx]).collect())
            }
            TensorData::Si32(values) => {
                TensorData::Si32(indices.iter().map(|&idx| values[idx]).collect())
            }
            TensorData::Si64(values) => {
                TensorData::Si64(indices.iter().map(|&idx| values[idx]).collect())
            }
        }
    }

    /// Values widened (or narrowed) to `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            TensorData::F32(values) => values.to_vec(),
            TensorData::Si32(values) => values.iter().map(|&v| v as f32).collect(),
            TensorData::Si64(values) => values.iter().map(|&v| v as f32).collect(),
        }
    }
}

impl CpuTensor {
    pub fn from_f32(dims: &[usize], values: Vec<f32>) -> EngineResult<Self> {
        Self::new(dims.to_vec(), TensorData::F32(Arc::from(values)))
    }

    pub fn new(dims: Vec<usize>, data: TensorData) -> EngineResult<Self> {
        let expected: usize = dims.iter().product();
        if expected != data.len() {
            return Err(EngineError::execution(format!(
                "tensor dims {dims:?} need {expected} elements, got {}",
                data.len()
            )));
        }
        Ok(Self { dims, data })
    }

    pub fn element_count(&self) -> usize {
        self.data.len()
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn spec(&self) -> TensorSpec {
        tensor_spec_static(self.dtype(), &self.dims)
    }

    pub fn as_f32(&self) -> EngineResult<&[f32]> {
        match &self.data {
            TensorData::F32(values) => Ok(&values[..]),
            other => Err(EngineError::execution(format!(
                "expected f32 tensor, got {}",
                other.dtype()
            ))),
        }
    }

    pub fn from_literal(literal: &TensorLiteral) -> EngineResult<Self> {
        let dims = literal.spec.shape.static_dims().ok_or_else(|| {
            EngineError::execution(format!(
                "literal shape {} must be static",
                literal.spec.shape
            ))
        })?;
        let data = match literal.spec.dtype {
            DType::F32 => literal.to_f32_vec().map(|v| TensorData::F32(Arc::from(v))),
            DType::Si32 => literal.to_i64_vec().map(|v| {
                TensorData::Si32(v.into_iter().map(|x| x as i32).collect())
            }),
            DType::Si64 => literal.to_i64_vec().map(|v| TensorData::Si64(Arc::from(v))),
            other => {
                return Err(EngineError::unimplemented(
                    "data",
                    format!("dtype {other} not supported by the reference engine"),
                ))
            }
        };
        let data = data.ok_or_else(|| EngineError::execution("literal payload mismatch"))?;
        Self::new(dims, data)
    }
}
