use std::collections::BTreeMap;
use std::sync::Arc;

use oplower::engine::{create_engine, has_engine, Engine};
use oplower::graph::{opset, Attribute, Graph, GraphBuilder};
use oplower::profiling::ProfilingStatus;
use oplower::tensor_utils::{literal_f32, literal_i64, literal_i64_vec, tensor_spec_static};
use oplower::types::DType;
use oplower::{BuildConfig, BuiltProgram, MatMulTuning, ProgramBuilder};
use oplower_backend_ref_cpu::{
    as_ref_cpu_program, evaluate_graph, register_ref_cpu_engine, CpuTensor, RefCpuEngine,
    ENGINE_NAME,
};

fn setup_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn ramp(dims: &[usize], scale: f32) -> CpuTensor {
    let count: usize = dims.iter().product();
    let values = (0..count).map(|i| (i as f32 - count as f32 / 2.0) * scale).collect();
    CpuTensor::from_f32(dims, values).expect("ramp tensor")
}

fn build(engine: &Arc<RefCpuEngine>, config: BuildConfig, graph: &Graph) -> BuiltProgram {
    let engine: Arc<dyn Engine> = engine.clone();
    ProgramBuilder::new(engine, config)
        .expect("builder")
        .build(graph)
        .expect("build")
}

fn assert_close(actual: &CpuTensor, expected: &CpuTensor) {
    assert_eq!(actual.dims, expected.dims);
    let lhs = actual.as_f32().expect("f32 output");
    let rhs = expected.as_f32().expect("f32 reference");
    for (i, (a, b)) in lhs.iter().zip(rhs).enumerate() {
        assert!(
            (a - b).abs() <= 1e-4 * (1.0 + b.abs()),
            "element {i}: {a} != {b}"
        );
    }
}

/// Builds `graph`, runs it, and checks every output against direct evaluation.
fn check_parity(config: BuildConfig, graph: &Graph, inputs: BTreeMap<String, CpuTensor>) -> BuiltProgram {
    setup_logger();
    let engine = Arc::new(RefCpuEngine::new());
    let built = build(&engine, config, graph);
    let program = as_ref_cpu_program(built.program.as_ref()).expect("ref-cpu program");

    let actual = program.execute(&inputs).expect("execute");
    let expected = evaluate_graph(graph, &inputs).expect("reference");
    assert_eq!(
        actual.keys().collect::<Vec<_>>(),
        expected.keys().collect::<Vec<_>>()
    );
    for (name, value) in &expected {
        assert_close(&actual[name], value);
    }
    built
}

#[test]
fn permuted_matmul_matches_direct_evaluation() {
    let mut builder = GraphBuilder::new();
    let a = builder.parameter("a", tensor_spec_static(DType::F32, &[2, 5, 3]));
    let b = builder.parameter("b", tensor_spec_static(DType::F32, &[5, 4]));
    let mm = builder
        .add(
            opset::MATMUL,
            "mm",
            &[a.output(0), b.output(0)],
            vec![tensor_spec_static(DType::F32, &[2, 3, 4])],
            [("transpose_a", Attribute::Bool(true))],
        )
        .expect("matmul");
    builder.result("out", mm.output(0)).expect("result");
    let graph = builder.finish();

    let config = BuildConfig {
        matmul: MatMulTuning {
            large_dim: 2,
            ..MatMulTuning::default()
        },
        ..BuildConfig::default()
    };
    let inputs = BTreeMap::from([
        ("a".to_string(), ramp(&[2, 5, 3], 0.25)),
        ("b".to_string(), ramp(&[5, 4], 0.5)),
    ]);
    let built = check_parity(config, &graph, inputs);
    assert_eq!(built.primitive_ids.get("matmul:mm"), Some("matmul:mm_out_reshape"));
    assert_eq!(built.primitive_ids.get("mm/transpose_a"), Some("mm/transpose_a"));
}

#[test]
fn vector_matmul_matches_direct_evaluation() {
    let mut builder = GraphBuilder::new();
    let v = builder.parameter("v", tensor_spec_static(DType::F32, &[4]));
    let w = builder.parameter("w", tensor_spec_static(DType::F32, &[4, 3]));
    let mv = builder
        .add(
            opset::MATMUL,
            "mv",
            &[v.output(0), w.output(0)],
            vec![tensor_spec_static(DType::F32, &[3])],
            [],
        )
        .expect("matmul");
    builder.result("out", mv.output(0)).expect("result");
    let graph = builder.finish();

    let inputs = BTreeMap::from([
        ("v".to_string(), ramp(&[4], 1.0)),
        ("w".to_string(), ramp(&[4, 3], 0.5)),
    ]);
    let built = check_parity(BuildConfig::default(), &graph, inputs);
    assert_eq!(built.primitive_ids.get("matmul:mv"), Some("matmul:mv_out_reshape"));
}

#[test]
fn variadic_split_and_reductions_match() {
    let mut builder = GraphBuilder::new();
    let x = builder.parameter("x", tensor_spec_static(DType::F32, &[2, 6, 3]));
    let axis = builder.constant("split_axis", literal_i64_vec(&[1]));
    let lengths = builder.constant("lengths", literal_i64(&[3], &[1, 2, 3]));
    let split = builder
        .add(
            opset::VARIADIC_SPLIT,
            "split",
            &[x.output(0), axis.output(0), lengths.output(0)],
            vec![
                tensor_spec_static(DType::F32, &[2, 1, 3]),
                tensor_spec_static(DType::F32, &[2, 2, 3]),
                tensor_spec_static(DType::F32, &[2, 3, 3]),
            ],
            [],
        )
        .expect("split");
    let axes = builder.constant("axes", literal_i64(&[2], &[0, -1]));
    let l2 = builder
        .add(
            opset::reduction(opset::REDUCE_L2),
            "l2",
            &[split.output(2), axes.output(0)],
            vec![tensor_spec_static(DType::F32, &[1, 3, 1])],
            [("keep_dims", Attribute::Bool(true))],
        )
        .expect("reduce");
    let mean = builder
        .add(
            opset::reduction(opset::REDUCE_MEAN),
            "mean",
            &[split.output(1), axes.output(0)],
            vec![tensor_spec_static(DType::F32, &[2])],
            [],
        )
        .expect("reduce");
    builder.result("first", split.output(0)).expect("result");
    builder.result("norm", l2.output(0)).expect("result");
    builder.result("avg", mean.output(0)).expect("result");
    let graph = builder.finish();

    let inputs = BTreeMap::from([("x".to_string(), ramp(&[2, 6, 3], 1.0))]);
    check_parity(BuildConfig::default(), &graph, inputs);
}

#[test]
fn broadcast_eltwise_transpose_and_concat_match() {
    let mut builder = GraphBuilder::new();
    let x = builder.parameter("x", tensor_spec_static(DType::F32, &[2, 3]));
    let bias = builder.constant("bias", literal_f32(&[3], &[0.5, -1.0, 2.0]));
    let sum = builder
        .add(
            opset::ADD,
            "sum",
            &[x.output(0), bias.output(0)],
            vec![tensor_spec_static(DType::F32, &[2, 3])],
            [],
        )
        .expect("add");
    let fmod = builder
        .add(
            opset::FLOOR_MOD,
            "fmod",
            &[sum.output(0), bias.output(0)],
            vec![tensor_spec_static(DType::F32, &[2, 3])],
            [],
        )
        .expect("floor mod");
    let erf = builder
        .add(
            opset::ERF,
            "erf",
            &[fmod.output(0)],
            vec![tensor_spec_static(DType::F32, &[2, 3])],
            [],
        )
        .expect("erf");
    let transposed = builder
        .add(
            opset::TRANSPOSE,
            "t",
            &[erf.output(0)],
            vec![tensor_spec_static(DType::F32, &[3, 2])],
            [],
        )
        .expect("transpose");
    let target = builder.constant("target", literal_i64(&[2], &[3, 2]));
    let flat = builder
        .add(
            opset::RESHAPE,
            "flat",
            &[x.output(0), target.output(0)],
            vec![tensor_spec_static(DType::F32, &[3, 2])],
            [],
        )
        .expect("reshape");
    let joined = builder
        .add(
            opset::CONCAT,
            "joined",
            &[transposed.output(0), flat.output(0)],
            vec![tensor_spec_static(DType::F32, &[3, 4])],
            [("axis", Attribute::Int(-1))],
        )
        .expect("concat");
    builder.result("out", joined.output(0)).expect("result");
    let graph = builder.finish();

    let inputs = BTreeMap::from([("x".to_string(), ramp(&[2, 3], 0.75))]);
    check_parity(BuildConfig::default(), &graph, inputs);
}

#[test]
fn compressed_fully_connected_matches_and_is_profiled() {
    let mut builder = GraphBuilder::new();
    let x = builder.parameter("x", tensor_spec_static(DType::F32, &[2, 4]));
    let weights = builder.constant(
        "weights",
        literal_f32(&[3, 4], &[1.0, 2.0, 3.0, 4.0, 0.0, 1.0, 0.0, 1.0, 4.0, 4.0, 4.0, 4.0]),
    );
    let scale = builder.constant("scale", literal_f32(&[3, 1], &[0.5, 2.0, 0.25]));
    let zero_point = builder.constant("zp", literal_f32(&[1], &[1.0]));
    let fc = builder
        .add(
            opset::FULLY_CONNECTED_COMPRESSED,
            "fc",
            &[x.output(0), weights.output(0), scale.output(0), zero_point.output(0)],
            vec![tensor_spec_static(DType::F32, &[2, 3])],
            [],
        )
        .expect("fc");
    builder.result("out", fc.output(0)).expect("result");
    let graph = builder.finish();

    let inputs = BTreeMap::from([("x".to_string(), ramp(&[2, 4], 1.0))]);
    let mut built = check_parity(
        BuildConfig::default().with_profiling(true),
        &graph,
        inputs.clone(),
    );
    assert!(built.allow_new_shape_infer);

    let program = as_ref_cpu_program(built.program.as_ref()).expect("ref-cpu program");
    program
        .execute_profiled(&inputs, &mut built.profiling)
        .expect("profiled run");
    let entry = built
        .profiling
        .get("fullyconnectedcompressed:fc")
        .expect("fc profiled");
    assert_eq!(entry.status, ProfilingStatus::Executed);
    assert!(built.profiling.get("constant:weights").is_none());
}

#[test]
fn identical_topologies_share_a_compiled_program() {
    let mut builder = GraphBuilder::new();
    let x = builder.parameter("x", tensor_spec_static(DType::F32, &[4]));
    builder.result("out", x.output(0)).expect("result");
    let graph = builder.finish();

    let engine = Arc::new(RefCpuEngine::new());
    let first = build(&engine, BuildConfig::default(), &graph);
    let second = build(&engine, BuildConfig::default(), &graph);
    assert!(Arc::ptr_eq(&first.program, &second.program));
    assert_eq!(engine.cached_programs(), 1);

    let program = as_ref_cpu_program(first.program.as_ref()).expect("ref-cpu program");
    assert_eq!(program.input_names(), vec!["x"]);
    assert_eq!(program.output_names(), vec!["out"]);
    let wrong = BTreeMap::from([("x".to_string(), ramp(&[5], 1.0))]);
    assert!(program.execute(&wrong).is_err());
}

#[test]
fn dangling_split_outputs_are_kept_apart() {
    setup_logger();
    let mut builder = GraphBuilder::new();
    let x = builder.parameter("x", tensor_spec_static(DType::F32, &[2, 4]));
    let axis = builder.constant("axis", literal_i64_vec(&[1]));
    builder
        .add(
            opset::SPLIT,
            "halves",
            &[x.output(0), axis.output(0)],
            vec![
                tensor_spec_static(DType::F32, &[2, 2]),
                tensor_spec_static(DType::F32, &[2, 2]),
            ],
            [],
        )
        .expect("split");
    builder.result("halves", x.output(0)).expect("result");
    let graph = builder.finish();

    let engine = Arc::new(RefCpuEngine::new());
    let built = build(&engine, BuildConfig::default(), &graph);
    let program = as_ref_cpu_program(built.program.as_ref()).expect("ref-cpu program");
    assert_eq!(
        program.output_names(),
        vec!["split:halves.out0", "split:halves.out1", "halves"]
    );

    let input = ramp(&[2, 4], 1.0);
    let outputs = program
        .execute(&BTreeMap::from([("x".to_string(), input.clone())]))
        .expect("execute");
    assert_eq!(outputs.len(), 3);
    assert_eq!(outputs["halves"], input);
    let left = outputs["split:halves.out0"].as_f32().expect("f32");
    let right = outputs["split:halves.out1"].as_f32().expect("f32");
    assert_eq!(left, &[-4.0, -3.0, 0.0, 1.0]);
    assert_eq!(right, &[-2.0, -1.0, 2.0, 3.0]);
}

#[test]
fn engine_is_registered_by_name() {
    register_ref_cpu_engine();
    assert!(has_engine(ENGINE_NAME));
    let engine = create_engine(ENGINE_NAME).expect("ref-cpu engine");
    assert_eq!(engine.name(), ENGINE_NAME);
    assert!(!engine.device_info().supports_immad);
}
