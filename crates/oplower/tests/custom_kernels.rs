mod common;

use std::fs;
use std::sync::Arc;

use common::{builder_with, setup_logger, RecordingEngine};
use oplower::custom_kernel::CustomKernelError;
use oplower::graph::{opset, Attribute, Graph, GraphBuilder};
use oplower::primitive::{InputInfo, PrimitiveKind};
use oplower::tensor_utils::tensor_spec_static;
use oplower::types::DType;
use oplower::{BuildConfig, Engine, LoweringError, ProgramBuilder};

const ERF_OVERLAY: &str = r#"{
  "kernels": [
    {
      "type": "Erf",
      "entry_point": "fast_erf",
      "source": "__kernel void fast_erf(__global const float* in, __global float* out) {}",
      "defines": [
        { "name": "SCALE", "param": "scale", "default": "1.0" },
        { "name": "VEC", "default": "4" }
      ],
      "inputs": [ { "port": 0, "format": "bfyx" } ],
      "outputs": [ { "port": 0 } ],
      "compiler_options": "-cl-mad-enable",
      "global_work_size": ["B*F", "(Y*X + 3) / 4"],
      "local_work_size": ["1", "16"]
    }
  ]
}"#;

fn erf_graph(with_scale: bool) -> Graph {
    let mut builder = GraphBuilder::new();
    let x = builder.parameter("x", tensor_spec_static(DType::F32, &[2, 3, 4, 8]));
    let attrs = if with_scale {
        vec![("scale", Attribute::Float(0.5))]
    } else {
        Vec::new()
    };
    let erf = builder
        .add(
            opset::ERF,
            "gelu_erf",
            &[x.output(0)],
            vec![tensor_spec_static(DType::F32, &[2, 3, 4, 8])],
            attrs,
        )
        .expect("erf");
    builder.result("out", erf.output(0)).expect("result");
    builder.finish()
}

#[test]
fn overlay_takes_precedence_over_registered_builder() -> anyhow::Result<()> {
    setup_logger();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("kernels.json");
    fs::write(&path, ERF_OVERLAY)?;

    let engine = Arc::new(RecordingEngine::new());
    let driver = builder_with(&engine, BuildConfig::default().with_custom_kernels(&path, false));
    assert_eq!(driver.custom_kernels().len(), 1);
    driver.build(&erf_graph(true))?;

    let topology = engine.recorded_topology_or_panic();
    let primitive = topology.get("erf:gelu_erf").expect("custom primitive");
    assert_eq!(primitive.type_string(), "custom_gpu_primitive");
    assert_eq!(primitive.inputs, vec![InputInfo::new("parameter:x", 0)]);
    match &primitive.kind {
        PrimitiveKind::CustomKernel(spec) => {
            assert_eq!(spec.entry_point, "fast_erf");
            assert_eq!(spec.build_options, "-cl-mad-enable -D SCALE=0.5 -D VEC=4");
            assert_eq!(spec.global_work_size, vec![6, 8]);
            assert_eq!(spec.local_work_size, vec![1, 16]);
        }
        other => panic!("expected custom kernel, got {other:?}"),
    }
    Ok(())
}

#[test]
fn defines_fall_back_to_defaults() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("kernels.json");
    fs::write(&path, ERF_OVERLAY)?;

    let engine = Arc::new(RecordingEngine::new());
    builder_with(&engine, BuildConfig::default().with_custom_kernels(&path, false))
        .build(&erf_graph(false))?;
    let topology = engine.recorded_topology_or_panic();
    match &topology.get("erf:gelu_erf").expect("custom primitive").kind {
        PrimitiveKind::CustomKernel(spec) => {
            assert_eq!(spec.build_options, "-cl-mad-enable -D SCALE=1.0 -D VEC=4");
        }
        other => panic!("expected custom kernel, got {other:?}"),
    }
    Ok(())
}

#[test]
fn missing_overlay_file_leaves_registry_lowering() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(RecordingEngine::new());
    let driver = builder_with(
        &engine,
        BuildConfig::default().with_custom_kernels(dir.path().join("absent.json"), false),
    );
    assert!(driver.custom_kernels().is_empty());
    driver.build(&erf_graph(false))?;
    let topology = engine.recorded_topology_or_panic();
    assert_eq!(
        topology.get("erf:gelu_erf").expect("erf").type_string(),
        "activation"
    );
    Ok(())
}

#[test]
fn build_specific_overlay_needs_override_to_replace_global() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let global = dir.path().join("global.json");
    let local = dir.path().join("local.json");
    fs::write(&global, ERF_OVERLAY)?;
    fs::write(&local, ERF_OVERLAY.replace("fast_erf", "local_erf"))?;

    let config = BuildConfig {
        global_custom_kernels_config: Some(global.clone()),
        custom_kernels_config: Some(local.clone()),
        custom_kernels_override: false,
        ..BuildConfig::default()
    };
    let engine: Arc<dyn Engine> = Arc::new(RecordingEngine::new());
    let err = ProgramBuilder::new(engine.clone(), config.clone())
        .err()
        .expect("duplicate without override");
    assert!(matches!(
        err,
        LoweringError::CustomKernel(CustomKernelError::Duplicate { .. })
    ));

    let driver = ProgramBuilder::new(
        engine,
        BuildConfig {
            custom_kernels_override: true,
            ..config
        },
    )?;
    let kernel = driver.custom_kernels().get("Erf").expect("erf overlay");
    assert_eq!(kernel.entry_point, "local_erf");
    Ok(())
}

#[test]
fn malformed_overlay_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("kernels.json");
    fs::write(&path, "{ \"kernels\": [ { \"type\": 3 } ] }")?;

    let engine: Arc<dyn Engine> = Arc::new(RecordingEngine::new());
    let err = ProgramBuilder::new(engine, BuildConfig::default().with_custom_kernels(&path, false))
        .err()
        .expect("parse failure");
    assert!(matches!(
        err,
        LoweringError::CustomKernel(CustomKernelError::Parse { .. })
    ));
    Ok(())
}

#[test]
fn bad_work_size_expression_fails_the_node() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("kernels.json");
    fs::write(&path, ERF_OVERLAY.replace("(Y*X + 3) / 4", "Y*W"))?;

    let engine = Arc::new(RecordingEngine::new());
    let driver = builder_with(&engine, BuildConfig::default().with_custom_kernels(&path, false));
    let err = driver
        .build(&erf_graph(false))
        .expect_err("unknown symbol W");
    assert!(matches!(
        err,
        LoweringError::CustomKernel(CustomKernelError::WorkSize { .. })
    ));
    Ok(())
}

#[test]
fn overflowing_work_size_is_unsupported_not_fatal() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("kernels.json");
    fs::write(
        &path,
        ERF_OVERLAY.replace("\"B*F\"", "\"9999999999*9999999999\""),
    )?;

    let engine = Arc::new(RecordingEngine::new());
    let driver = builder_with(&engine, BuildConfig::default().with_custom_kernels(&path, false));
    let graph = erf_graph(false);
    let erf = graph.find("gelu_erf").expect("erf node").id();

    assert!(!driver.is_op_supported(&graph, erf));
    assert!(!driver.query_supported(&graph)["gelu_erf"]);
    let err = driver.build(&graph).expect_err("work size overflows");
    assert!(err.to_string().contains("overflow"), "{err}");
    Ok(())
}
