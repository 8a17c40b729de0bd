//! Direct graph interpreter. Evaluates operations with their graph-level
//! semantics, bypassing lowering, so built programs can be checked against
//! an independent result.

use std::collections::BTreeMap;

use oplower::engine::{EngineError, EngineResult};
use oplower::graph::{Graph, Node};
use oplower::primitive::{EltwiseMode, GemmSpec, ReduceMode};
use oplower::types::DType;

use crate::kernels::{
    op_concat, op_crop, op_eltwise, op_erf, op_fully_connected, op_gemm, op_permute, op_reduce,
    op_reshape,
};
use crate::tensor::{CpuTensor, TensorData};

fn eltwise_mode(type_name: &str) -> Option<EltwiseMode> {
    let mode = match type_name {
        "Add" => EltwiseMode::Sum,
        "Subtract" => EltwiseMode::Sub,
        "Multiply" => EltwiseMode::Prod,
        "Divide" => EltwiseMode::Div,
        "SquaredDifference" => EltwiseMode::SquaredDiff,
        "Power" => EltwiseMode::Pow,
        "FloorMod" => EltwiseMode::FloorMod,
        "Mod" => EltwiseMode::Mod,
        "Maximum" => EltwiseMode::Max,
        "Minimum" => EltwiseMode::Min,
        _ => return None,
    };
    Some(mode)
}

fn reduce_mode(type_name: &str) -> Option<ReduceMode> {
    let mode = match type_name {
        "ReduceSum" => ReduceMode::Sum,
        "ReduceMean" => ReduceMode::Mean,
        "ReduceMax" => ReduceMode::Max,
        "ReduceMin" => ReduceMode::Min,
        "ReduceProd" => ReduceMode::Prod,
        "ReduceL1" => ReduceMode::L1,
        "ReduceL2" => ReduceMode::L2,
        _ => return None,
    };
    Some(mode)
}

fn node_error(node: &Node, message: impl std::fmt::Display) -> EngineError {
    EngineError::execution(format!("{} ({}): {message}", node.friendly_name(), node.type_name()))
}

fn normalize(node: &Node, axis: i64, rank: usize) -> EngineResult<usize> {
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    usize::try_from(resolved)
        .ok()
        .filter(|&axis| axis < rank)
        .ok_or_else(|| node_error(node, format!("axis {axis} out of range for rank {rank}")))
}

fn integer_values(node: &Node, tensor: &CpuTensor) -> EngineResult<Vec<i64>> {
    match &tensor.data {
        TensorData::Si32(values) => Ok(values.iter().map(|&v| i64::from(v)).collect()),
        TensorData::Si64(values) => Ok(values.to_vec()),
        TensorData::F32(_) => Err(node_error(node, "expected an integer tensor")),
    }
}

fn output_dims(node: &Node, index: usize) -> EngineResult<Vec<usize>> {
    node.output_spec(index)
        .shape
        .static_dims()
        .ok_or_else(|| node_error(node, "output shape must be static"))
}

/// Evaluates every node in graph order. Inputs are keyed by parameter name;
/// the returned map holds one entry per `Result` node.
pub fn evaluate_graph(
    graph: &Graph,
    inputs: &BTreeMap<String, CpuTensor>,
) -> EngineResult<BTreeMap<String, CpuTensor>> {
    let mut values: Vec<Vec<CpuTensor>> = Vec::with_capacity(graph.len());
    let mut results = BTreeMap::new();

    for node in graph.ordered_ops() {
        let args: Vec<&CpuTensor> = node
            .inputs()
            .iter()
            .map(|edge| {
                values
                    .get(edge.node.0)
                    .and_then(|outputs| outputs.get(edge.index))
                    .ok_or_else(|| node_error(node, "input evaluated out of order"))
            })
            .collect::<EngineResult<_>>()?;
        let arg = |index: usize| {
            args.get(index)
                .copied()
                .ok_or_else(|| node_error(node, format!("missing input {index}")))
        };

        let type_name = node.type_name();
        let outputs = if let Some(mode) = eltwise_mode(type_name) {
            vec![op_eltwise(arg(0)?, arg(1)?, mode)?]
        } else if let Some(mode) = reduce_mode(type_name) {
            let rank = arg(0)?.dims.len();
            let mut axes = integer_values(node, arg(1)?)?
                .into_iter()
                .map(|axis| normalize(node, axis, rank))
                .collect::<EngineResult<Vec<_>>>()?;
            axes.sort_unstable();
            axes.dedup();
            vec![op_reduce(arg(0)?, mode, &axes, node.attr_bool("keep_dims", false))?]
        } else {
            match type_name {
                "Parameter" => {
                    let tensor = inputs
                        .get(node.friendly_name())
                        .ok_or_else(|| node_error(node, "no value supplied"))?;
                    vec![tensor.clone()]
                }
                "Constant" => {
                    let literal = node
                        .value()
                        .ok_or_else(|| node_error(node, "constant without payload"))?;
                    vec![CpuTensor::from_literal(literal)?]
                }
                "Result" => {
                    results.insert(node.friendly_name().to_string(), arg(0)?.clone());
                    vec![arg(0)?.clone()]
                }
                "Erf" => vec![op_erf(arg(0)?)?],
                "MatMul" => {
                    let spec = GemmSpec {
                        output_dtype: DType::F32,
                        transpose_a: node.attr_bool("transpose_a", false),
                        transpose_b: node.attr_bool("transpose_b", false),
                        alpha: 1.0,
                        beta: 0.0,
                        input_rank: arg(0)?.dims.len(),
                        weight_rank: arg(1)?.dims.len(),
                    };
                    vec![op_gemm(arg(0)?, arg(1)?, &spec)?]
                }
                "FullyConnected" => vec![op_fully_connected(arg(0)?, arg(1)?, None, None)?],
                "FullyConnectedCompressed" => vec![op_fully_connected(
                    arg(0)?,
                    arg(1)?,
                    Some(arg(2)?),
                    args.get(3).copied(),
                )?],
                "Split" | "VariadicSplit" => {
                    let input = arg(0)?;
                    let axis = integer_values(node, arg(1)?)?
                        .first()
                        .copied()
                        .ok_or_else(|| node_error(node, "empty split axis"))?;
                    let axis = normalize(node, axis, input.dims.len())?;
                    let mut offset = 0;
                    let mut parts = Vec::with_capacity(node.output_count());
                    for index in 0..node.output_count() {
                        let length = output_dims(node, index)?[axis];
                        parts.push(op_crop(input, axis, offset, length)?);
                        offset += length;
                    }
                    parts
                }
                "Transpose" => {
                    let input = arg(0)?;
                    let order = match args.get(1) {
                        Some(order) => integer_values(node, order)?
                            .into_iter()
                            .map(|axis| normalize(node, axis, input.dims.len()))
                            .collect::<EngineResult<Vec<_>>>()?,
                        None => (0..input.dims.len()).rev().collect(),
                    };
                    vec![op_permute(input, &order)?]
                }
                "Reshape" => vec![op_reshape(arg(0)?, &output_dims(node, 0)?)?],
                "Concat" => {
                    let rank = arg(0)?.dims.len();
                    let axis = node
                        .attr_i64("axis")
                        .ok_or_else(|| node_error(node, "missing axis attribute"))?;
                    vec![op_concat(&args, normalize(node, axis, rank)?)?]
                }
                other => {
                    return Err(EngineError::execution(format!(
                        "reference evaluation of {other} is not available"
                    )))
                }
            }
        };
        log::trace!("evaluated {} ({type_name})", node.friendly_name());
        values.push(outputs);
    }

    Ok(results)
}
