//! Straightforward reference kernels. Correctness over speed: every kernel
//! walks logical indices and never assumes a memory layout beyond row-major.

use std::sync::Arc;

use oplower::engine::{EngineError, EngineResult};
use oplower::primitive::{EltwiseMode, GemmSpec, ReduceMode};
use oplower::types::DType;

use crate::tensor::{CpuTensor, TensorData};

pub(crate) fn compute_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; dims.len()];
    let mut acc = 1usize;
    for (i, dim) in dims.iter().enumerate().rev() {
        strides[i] = acc;
        acc *= *dim;
    }
    strides
}

pub(crate) fn unravel_index(mut index: usize, dims: &[usize]) -> Vec<usize> {
    let mut coords = vec![0; dims.len()];
    for (i, dim) in dims.iter().enumerate().rev() {
        coords[i] = index % *dim;
        index /= *dim;
    }
    coords
}

/// Numpy-style broadcast of two shapes.
pub fn broadcast_dims(lhs: &[usize], rhs: &[usize]) -> EngineResult<Vec<usize>> {
    let rank = lhs.len().max(rhs.len());
    let pad = |dims: &[usize], i: usize| {
        let offset = rank - dims.len();
        if i < offset {
            1
        } else {
            dims[i - offset]
        }
    };
    (0..rank)
        .map(|i| match (pad(lhs, i), pad(rhs, i)) {
            (l, r) if l == r => Ok(l),
            (1, r) => Ok(r),
            (l, 1) => Ok(l),
            _ => Err(EngineError::execution(format!(
                "shapes {lhs:?} and {rhs:?} do not broadcast"
            ))),
        })
        .collect()
}

/// Flat index into a (possibly lower-rank) broadcast source.
fn broadcast_source_index(out_coords: &[usize], src_dims: &[usize], src_strides: &[usize]) -> usize {
    let offset = out_coords.len() - src_dims.len();
    src_dims
        .iter()
        .enumerate()
        .map(|(j, &dim)| {
            if dim == 1 {
                0
            } else {
                out_coords[j + offset] * src_strides[j]
            }
        })
        .sum()
}

fn broadcast_values(tensor: &CpuTensor, target: &[usize]) -> EngineResult<Vec<f32>> {
    if broadcast_dims(&tensor.dims, target)? != target {
        return Err(EngineError::execution(format!(
            "cannot broadcast {:?} to {target:?}",
            tensor.dims
        )));
    }
    let values = tensor.data.to_f32_vec();
    let strides = compute_strides(&tensor.dims);
    let count: usize = target.iter().product();
    Ok((0..count)
        .map(|idx| values[broadcast_source_index(&unravel_index(idx, target), &tensor.dims, &strides)])
        .collect())
}

fn apply_eltwise(mode: EltwiseMode, x: f32, y: f32) -> f32 {
    match mode {
        EltwiseMode::Sum => x + y,
        EltwiseMode::Sub => x - y,
        EltwiseMode::Prod => x * y,
        EltwiseMode::Div => x / y,
        EltwiseMode::SquaredDiff => (x - y) * (x - y),
        EltwiseMode::Pow => x.powf(y),
        EltwiseMode::FloorMod => x - (x / y).floor() * y,
        EltwiseMode::Mod => x % y,
        EltwiseMode::Max => x.max(y),
        EltwiseMode::Min => x.min(y),
    }
}

pub fn op_eltwise(lhs: &CpuTensor, rhs: &CpuTensor, mode: EltwiseMode) -> EngineResult<CpuTensor> {
    let a = lhs.as_f32()?;
    let b = rhs.as_f32()?;
    let dims = broadcast_dims(&lhs.dims, &rhs.dims)?;
    let lhs_strides = compute_strides(&lhs.dims);
    let rhs_strides = compute_strides(&rhs.dims);
    let count: usize = dims.iter().product();

    let mut result = Vec::with_capacity(count);
    for index in 0..count {
        let coords = unravel_index(index, &dims);
        let x = a[broadcast_source_index(&coords, &lhs.dims, &lhs_strides)];
        let y = b[broadcast_source_index(&coords, &rhs.dims, &rhs_strides)];
        result.push(apply_eltwise(mode, x, y));
    }
    CpuTensor::from_f32(&dims, result)
}

pub fn op_erf(input: &CpuTensor) -> EngineResult<CpuTensor> {
    let values = input.as_f32()?;
    CpuTensor::from_f32(&input.dims, values.iter().map(|&x| libm::erff(x)).collect())
}

/// Batched matrix product over the two trailing axes; leading axes broadcast.
/// Batched matrix product. A 1-D lhs is treated as `[1, K]` and a 1-D rhs
/// as `[K, 1]`; the inserted axis is dropped from the result and transpose
/// flags do not apply to it.
pub fn op_gemm(lhs: &CpuTensor, rhs: &CpuTensor, spec: &GemmSpec) -> EngineResult<CpuTensor> {
    if lhs.dims.is_empty() || rhs.dims.is_empty() {
        return Err(EngineError::unimplemented("gemm", "scalar operands"));
    }
    let vector_a = lhs.dims.len() == 1;
    let vector_b = rhs.dims.len() == 1;
    let lhs_dims = if vector_a { vec![1, lhs.dims[0]] } else { lhs.dims.clone() };
    let rhs_dims = if vector_b { vec![rhs.dims[0], 1] } else { rhs.dims.clone() };
    let transpose_a = spec.transpose_a && !vector_a;
    let transpose_b = spec.transpose_b && !vector_b;
    let (ra, rb) = (lhs_dims.len(), rhs_dims.len());
    let a = lhs.as_f32()?;
    let b = rhs.as_f32()?;

    let (rows_a, cols_a) = (lhs_dims[ra - 2], lhs_dims[ra - 1]);
    let (rows_b, cols_b) = (rhs_dims[rb - 2], rhs_dims[rb - 1]);
    let (m, k) = if transpose_a { (cols_a, rows_a) } else { (rows_a, cols_a) };
    let (k_b, n) = if transpose_b { (cols_b, rows_b) } else { (rows_b, cols_b) };
    if k != k_b {
        return Err(EngineError::execution(format!(
            "gemm contraction mismatch: {:?} x {:?}",
            lhs.dims, rhs.dims
        )));
    }

    let a_batch = &lhs_dims[..ra - 2];
    let b_batch = &rhs_dims[..rb - 2];
    let batch = broadcast_dims(a_batch, b_batch)?;
    let a_strides = compute_strides(a_batch);
    let b_strides = compute_strides(b_batch);
    let batch_count: usize = batch.iter().product();

    let mut result = Vec::with_capacity(batch_count * m * n);
    for batch_index in 0..batch_count {
        let coords = unravel_index(batch_index, &batch);
        let a_off = broadcast_source_index(&coords, a_batch, &a_strides) * rows_a * cols_a;
        let b_off = broadcast_source_index(&coords, b_batch, &b_strides) * rows_b * cols_b;
        for i in 0..m {
            for j in 0..n {
                let mut sum = 0.0f32;
                for p in 0..k {
                    let x = if transpose_a {
                        a[a_off + p * cols_a + i]
                    } else {
                        a[a_off + i * cols_a + p]
                    };
                    let y = if transpose_b {
                        b[b_off + j * cols_b + p]
                    } else {
                        b[b_off + p * cols_b + j]
                    };
                    sum += x * y;
                }
                result.push(spec.alpha * sum);
            }
        }
    }

    let mut dims = batch;
    if !vector_a {
        dims.push(m);
    }
    if !vector_b {
        dims.push(n);
    }
    CpuTensor::from_f32(&dims, result)
}

pub fn op_permute(input: &CpuTensor, order: &[usize]) -> EngineResult<CpuTensor> {
    if order.len() != input.dims.len() || order.iter().any(|&axis| axis >= input.dims.len()) {
        return Err(EngineError::execution(format!(
            "permutation {order:?} does not match rank {}",
            input.dims.len()
        )));
    }
    let out_dims: Vec<usize> = order.iter().map(|&axis| input.dims[axis]).collect();
    let in_strides = compute_strides(&input.dims);
    let indices: Vec<usize> = (0..input.element_count())
        .map(|idx| {
            unravel_index(idx, &out_dims)
                .iter()
                .zip(order)
                .map(|(coord, &axis)| coord * in_strides[axis])
                .sum()
        })
        .collect();
    CpuTensor::new(out_dims, input.data.gather(&indices))
}

pub fn op_reshape(input: &CpuTensor, dims: &[usize]) -> EngineResult<CpuTensor> {
    let count: usize = dims.iter().product();
    if count != input.element_count() {
        return Err(EngineError::execution(format!(
            "cannot reshape {:?} into {dims:?}",
            input.dims
        )));
    }
    CpuTensor::new(dims.to_vec(), input.data.clone())
}

pub fn op_reduce(
    input: &CpuTensor,
    mode: ReduceMode,
    axes: &[usize],
    keep_dims: bool,
) -> EngineResult<CpuTensor> {
    let values = input.as_f32()?;
    let rank = input.dims.len();
    if let Some(axis) = axes.iter().find(|&&axis| axis >= rank) {
        return Err(EngineError::execution(format!(
            "reduce axis {axis} out of range for rank {rank}"
        )));
    }

    let kept_dims: Vec<usize> = input
        .dims
        .iter()
        .enumerate()
        .map(|(i, &dim)| if axes.contains(&i) { 1 } else { dim })
        .collect();
    let out_strides = compute_strides(&kept_dims);
    let out_count: usize = kept_dims.iter().product();
    let reduced: usize = axes.iter().map(|&axis| input.dims[axis]).product();

    let init = match mode {
        ReduceMode::Prod => 1.0,
        ReduceMode::Max => f32::NEG_INFINITY,
        ReduceMode::Min => f32::INFINITY,
        ReduceMode::Sum | ReduceMode::Mean | ReduceMode::L1 | ReduceMode::L2 => 0.0,
    };
    let mut acc = vec![init; out_count];
    for (idx, &value) in values.iter().enumerate() {
        let out_idx: usize = unravel_index(idx, &input.dims)
            .iter()
            .enumerate()
            .map(|(i, &coord)| if axes.contains(&i) { 0 } else { coord * out_strides[i] })
            .sum();
        let slot = &mut acc[out_idx];
        *slot = match mode {
            ReduceMode::Sum | ReduceMode::Mean => *slot + value,
            ReduceMode::Prod => *slot * value,
            ReduceMode::Max => slot.max(value),
            ReduceMode::Min => slot.min(value),
            ReduceMode::L1 => *slot + value.abs(),
            ReduceMode::L2 => *slot + value * value,
        };
    }
    match mode {
        ReduceMode::Mean => acc.iter_mut().for_each(|v| *v /= reduced as f32),
        ReduceMode::L2 => acc.iter_mut().for_each(|v| *v = v.sqrt()),
        _ => {}
    }

    let dims = if keep_dims {
        kept_dims
    } else {
        input
            .dims
            .iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, &dim)| dim)
            .collect()
    };
    CpuTensor::from_f32(&dims, acc)
}

pub fn op_crop(input: &CpuTensor, axis: usize, offset: usize, length: usize) -> EngineResult<CpuTensor> {
    if axis >= input.dims.len() || offset + length > input.dims[axis] {
        return Err(EngineError::execution(format!(
            "crop [{offset}, {}) on axis {axis} exceeds {:?}",
            offset + length,
            input.dims
        )));
    }
    let mut out_dims = input.dims.clone();
    out_dims[axis] = length;
    let in_strides = compute_strides(&input.dims);
    let count: usize = out_dims.iter().product();
    let indices: Vec<usize> = (0..count)
        .map(|idx| {
            unravel_index(idx, &out_dims)
                .iter()
                .enumerate()
                .map(|(i, &coord)| {
                    let coord = if i == axis { coord + offset } else { coord };
                    coord * in_strides[i]
                })
                .sum()
        })
        .collect();
    CpuTensor::new(out_dims, input.data.gather(&indices))
}

fn concat_values<T: Copy>(parts: &[&[T]], chunks: &[usize], outer: usize) -> Vec<T> {
    let mut result = Vec::with_capacity(parts.iter().map(|part| part.len()).sum());
    for o in 0..outer {
        for (part, &chunk) in parts.iter().zip(chunks) {
            result.extend_from_slice(&part[o * chunk..(o + 1) * chunk]);
        }
    }
    result
}

fn f32_view(data: &TensorData) -> Option<&[f32]> {
    match data {
        TensorData::F32(values) => Some(&values[..]),
        _ => None,
    }
}

fn i32_view(data: &TensorData) -> Option<&[i32]> {
    match data {
        TensorData::Si32(values) => Some(&values[..]),
        _ => None,
    }
}

fn i64_view(data: &TensorData) -> Option<&[i64]> {
    match data {
        TensorData::Si64(values) => Some(&values[..]),
        _ => None,
    }
}

fn typed_parts<'a, T>(
    inputs: &[&'a CpuTensor],
    view: fn(&TensorData) -> Option<&[T]>,
) -> EngineResult<Vec<&'a [T]>> {
    inputs
        .iter()
        .map(|tensor| {
            view(&tensor.data)
                .ok_or_else(|| EngineError::execution("concatenation inputs differ in dtype"))
        })
        .collect()
}

pub fn op_concat(inputs: &[&CpuTensor], axis: usize) -> EngineResult<CpuTensor> {
    let first = inputs
        .first()
        .ok_or_else(|| EngineError::execution("concatenation needs at least one input"))?;
    let rank = first.dims.len();
    if axis >= rank {
        return Err(EngineError::execution(format!(
            "concatenation axis {axis} out of range for rank {rank}"
        )));
    }
    for tensor in inputs {
        let compatible = tensor.dims.len() == rank
            && tensor
                .dims
                .iter()
                .zip(&first.dims)
                .enumerate()
                .all(|(i, (a, b))| i == axis || a == b);
        if !compatible {
            return Err(EngineError::execution(format!(
                "cannot concatenate {:?} with {:?} on axis {axis}",
                tensor.dims, first.dims
            )));
        }
    }

    let outer: usize = first.dims[..axis].iter().product();
    let chunks: Vec<usize> = inputs
        .iter()
        .map(|tensor| tensor.dims[axis..].iter().product())
        .collect();
    let mut out_dims = first.dims.clone();
    out_dims[axis] = inputs.iter().map(|tensor| tensor.dims[axis]).sum();

    let data = match first.data {
        TensorData::F32(_) => TensorData::F32(Arc::from(concat_values(
            &typed_parts(inputs, f32_view)?,
            &chunks,
            outer,
        ))),
        TensorData::Si32(_) => TensorData::Si32(Arc::from(concat_values(
            &typed_parts(inputs, i32_view)?,
            &chunks,
            outer,
        ))),
        TensorData::Si64(_) => TensorData::Si64(Arc::from(concat_values(
            &typed_parts(inputs, i64_view)?,
            &chunks,
            outer,
        ))),
    };
    CpuTensor::new(out_dims, data)
}

/// `y = x · Wᵀ` with `W: [N, K]`; compressed weights are decompressed as
/// `(W - zero_point) * scale`, both broadcast to `[N, K]`.
pub fn op_fully_connected(
    input: &CpuTensor,
    weights: &CpuTensor,
    scale: Option<&CpuTensor>,
    zero_point: Option<&CpuTensor>,
) -> EngineResult<CpuTensor> {
    let x = input.as_f32()?;
    let k = *input
        .dims
        .last()
        .ok_or_else(|| EngineError::execution("fully connected input must have rank >= 1"))?;
    if weights.dims.len() != 2 || weights.dims[1] != k {
        return Err(EngineError::execution(format!(
            "weights {:?} do not match input {:?}",
            weights.dims, input.dims
        )));
    }
    let n = weights.dims[0];

    let mut w = weights.data.to_f32_vec();
    if let Some(zero_point) = zero_point {
        let zp = broadcast_values(zero_point, &weights.dims)?;
        w.iter_mut().zip(zp).for_each(|(v, z)| *v -= z);
    }
    if let Some(scale) = scale {
        let s = broadcast_values(scale, &weights.dims)?;
        w.iter_mut().zip(s).for_each(|(v, s)| *v *= s);
    }

    let rows = if k == 0 { 0 } else { x.len() / k };
    let mut result = Vec::with_capacity(rows * n);
    for r in 0..rows {
        let row = &x[r * k..(r + 1) * k];
        for j in 0..n {
            let column = &w[j * k..(j + 1) * k];
            result.push(row.iter().zip(column).map(|(a, b)| a * b).sum());
        }
    }

    let mut dims = input.dims[..input.dims.len() - 1].to_vec();
    dims.push(n);
    CpuTensor::from_f32(&dims, result)
}

pub fn op_reorder(input: &CpuTensor, dtype: DType) -> EngineResult<CpuTensor> {
    if input.dtype() == dtype {
        return Ok(input.clone());
    }
    let data = match (&input.data, dtype) {
        (_, DType::F32) => TensorData::F32(Arc::from(input.data.to_f32_vec())),
        (TensorData::F32(values), DType::Si32) => {
            TensorData::Si32(values.iter().map(|&v| v as i32).collect())
        }
        (TensorData::Si64(values), DType::Si32) => {
            TensorData::Si32(values.iter().map(|&v| v as i32).collect())
        }
        (TensorData::F32(values), DType::Si64) => {
            TensorData::Si64(values.iter().map(|&v| v as i64).collect())
        }
        (TensorData::Si32(values), DType::Si64) => {
            TensorData::Si64(values.iter().map(|&v| i64::from(v)).collect())
        }
        (_, other) => {
            return Err(EngineError::unimplemented(
                "reorder",
                format!("conversion to {other} not supported"),
            ))
        }
    };
    CpuTensor::new(input.dims.clone(), data)
}
