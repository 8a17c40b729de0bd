//! Lowering of validated operation graphs into backend primitive topologies.
//!
//! A [`ProgramBuilder`] walks a [`Graph`] in topological order, dispatches
//! each node through the operation registry (or a user-supplied custom
//! kernel overlay), and collects the emitted [`Primitive`]s into a
//! [`Topology`] that an [`Engine`] compiles into a program.

pub mod config;
pub mod context;
pub mod custom_kernel;
pub mod engine;
mod env;
pub mod error;
pub mod graph;
pub mod identity;
pub mod ops;
pub mod primitive;
pub mod profiling;
pub mod program_builder;
pub mod registry;
pub mod tensor_utils;
pub mod topology;
pub mod types;

pub use linkme;

pub use config::{BuildConfig, MatMulTuning};
pub use context::BuildContext;
pub use engine::{CompiledProgram, DeviceInfo, DeviceKind, Engine, EngineError, EngineResult};
pub use error::{LoweringError, LoweringResult};
pub use graph::{Graph, GraphBuilder, Node, NodeId, OpType, TypeInfo};
pub use primitive::{InputInfo, Primitive, PrimitiveKind};
pub use program_builder::{BuildOptions, BuildOutput, BuiltProgram, Lowered, ProgramBuilder};
pub use topology::Topology;
