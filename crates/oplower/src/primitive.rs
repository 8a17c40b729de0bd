//! Backend-native units of work emitted by the operation builders.

use serde::{Deserialize, Serialize};

use crate::types::{DType, TensorLiteral, TensorSpec};

/// Reference to output `idx` of primitive `pid`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputInfo {
    pub pid: String,
    pub idx: usize,
}

impl InputInfo {
    pub fn new(pid: impl Into<String>, idx: usize) -> Self {
        Self {
            pid: pid.into(),
            idx,
        }
    }
}

impl From<&str> for InputInfo {
    fn from(pid: &str) -> Self {
        InputInfo::new(pid, 0)
    }
}

impl From<String> for InputInfo {
    fn from(pid: String) -> Self {
        InputInfo::new(pid, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EltwiseMode {
    Sum,
    Sub,
    Prod,
    Div,
    SquaredDiff,
    Pow,
    FloorMod,
    Mod,
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivationFunc {
    Erf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceMode {
    Sum,
    Mean,
    Max,
    Min,
    Prod,
    L1,
    L2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GemmSpec {
    pub output_dtype: DType,
    pub transpose_a: bool,
    pub transpose_b: bool,
    pub alpha: f32,
    pub beta: f32,
    pub input_rank: usize,
    pub weight_rank: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomKernelSpec {
    pub entry_point: String,
    pub source: String,
    pub build_options: String,
    pub global_work_size: Vec<usize>,
    pub local_work_size: Vec<usize>,
    pub output: TensorSpec,
}

/// Kind-specific payload of a primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrimitiveKind {
    InputLayout { spec: TensorSpec },
    Data { literal: TensorLiteral },
    Reorder { output_dtype: DType },
    Eltwise { mode: EltwiseMode, output_dtype: DType },
    Activation { func: ActivationFunc },
    Gemm(GemmSpec),
    Permute { order: Vec<usize> },
    /// `None` reads the target shape from the second input at run time.
    Reshape { output_shape: Option<Vec<usize>> },
    Reduce {
        mode: ReduceMode,
        axes: Vec<usize>,
        keep_dims: bool,
    },
    Crop {
        axis: usize,
        offset: usize,
        length: usize,
    },
    Concatenation { axis: usize },
    FullyConnected {
        compressed: bool,
        has_zero_point: bool,
        output_dtype: DType,
    },
    CustomKernel(CustomKernelSpec),
}

impl PrimitiveKind {
    pub fn type_string(&self) -> &'static str {
        match self {
            PrimitiveKind::InputLayout { .. } => "input_layout",
            PrimitiveKind::Data { .. } => "data",
            PrimitiveKind::Reorder { .. } => "reorder",
            PrimitiveKind::Eltwise { .. } => "eltwise",
            PrimitiveKind::Activation { .. } => "activation",
            PrimitiveKind::Gemm(_) => "gemm",
            PrimitiveKind::Permute { .. } => "permute",
            PrimitiveKind::Reshape { .. } => "reshape",
            PrimitiveKind::Reduce { .. } => "reduce",
            PrimitiveKind::Crop { .. } => "crop",
            PrimitiveKind::Concatenation { .. } => "concatenation",
            PrimitiveKind::FullyConnected { .. } => "fully_connected",
            PrimitiveKind::CustomKernel(_) => "custom_gpu_primitive",
        }
    }

    /// Pass-through data holders are not profiled.
    pub fn is_data(&self) -> bool {
        matches!(self, PrimitiveKind::Data { .. })
    }
}

/// A single backend primitive. Immutable once added to a topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Primitive {
    pub id: String,
    pub kind: PrimitiveKind,
    pub inputs: Vec<InputInfo>,
    /// Friendly name of the graph node that produced this primitive.
    pub origin_op_name: String,
    /// Type name used in profiling and diagnostics.
    pub origin_op_type_name: String,
}

impl Primitive {
    pub fn new(id: impl Into<String>, kind: PrimitiveKind, inputs: Vec<InputInfo>) -> Self {
        Self {
            id: id.into(),
            kind,
            inputs,
            origin_op_name: String::new(),
            origin_op_type_name: String::new(),
        }
    }

    pub fn type_string(&self) -> &'static str {
        self.kind.type_string()
    }
}
