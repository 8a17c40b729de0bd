//! Type identities of the operation kinds the builders understand.

use super::{OpType, TypeInfo};

pub const PARAMETER: TypeInfo = TypeInfo::from_static("Parameter", "opset1");
pub const CONSTANT: TypeInfo = TypeInfo::from_static("Constant", "opset1");
pub const RESULT: TypeInfo = TypeInfo::from_static("Result", "opset1");

pub const MATMUL: TypeInfo = TypeInfo::from_static("MatMul", "opset1");
pub const FULLY_CONNECTED: TypeInfo = TypeInfo::from_static("FullyConnected", "internal");
pub const FULLY_CONNECTED_COMPRESSED: TypeInfo =
    TypeInfo::from_static("FullyConnectedCompressed", "internal");

pub const ADD: TypeInfo = TypeInfo::from_static("Add", "opset1");
pub const SUBTRACT: TypeInfo = TypeInfo::from_static("Subtract", "opset1");
pub const MULTIPLY: TypeInfo = TypeInfo::from_static("Multiply", "opset1");
pub const DIVIDE: TypeInfo = TypeInfo::from_static("Divide", "opset1");
pub const SQUARED_DIFFERENCE: TypeInfo = TypeInfo::from_static("SquaredDifference", "opset1");
pub const POWER: TypeInfo = TypeInfo::from_static("Power", "opset1");
pub const FLOOR_MOD: TypeInfo = TypeInfo::from_static("FloorMod", "opset1");
pub const MOD: TypeInfo = TypeInfo::from_static("Mod", "opset1");
pub const MAXIMUM: TypeInfo = TypeInfo::from_static("Maximum", "opset1");
pub const MINIMUM: TypeInfo = TypeInfo::from_static("Minimum", "opset1");
pub const ERF: TypeInfo = TypeInfo::from_static("Erf", "opset1");

pub const ARITHMETIC_REDUCTION_KEEP_DIMS: TypeInfo =
    TypeInfo::from_static("ArithmeticReductionKeepDims", "util");
pub const REDUCE_SUM: TypeInfo = TypeInfo::from_static("ReduceSum", "opset1");
pub const REDUCE_MEAN: TypeInfo = TypeInfo::from_static("ReduceMean", "opset1");
pub const REDUCE_MAX: TypeInfo = TypeInfo::from_static("ReduceMax", "opset1");
pub const REDUCE_MIN: TypeInfo = TypeInfo::from_static("ReduceMin", "opset1");
pub const REDUCE_PROD: TypeInfo = TypeInfo::from_static("ReduceProd", "opset1");
pub const REDUCE_L1: TypeInfo = TypeInfo::from_static("ReduceL1", "opset4");
pub const REDUCE_L2: TypeInfo = TypeInfo::from_static("ReduceL2", "opset4");

pub const SPLIT: TypeInfo = TypeInfo::from_static("Split", "opset1");
pub const VARIADIC_SPLIT: TypeInfo = TypeInfo::from_static("VariadicSplit", "opset1");
pub const TRANSPOSE: TypeInfo = TypeInfo::from_static("Transpose", "opset1");
pub const RESHAPE: TypeInfo = TypeInfo::from_static("Reshape", "opset1");
pub const CONCAT: TypeInfo = TypeInfo::from_static("Concat", "opset1");

/// Reductions are lowered through their shared generic level.
pub fn reduction(kind: TypeInfo) -> OpType {
    OpType::new(kind).with_parent(ARITHMETIC_REDUCTION_KEEP_DIMS)
}
