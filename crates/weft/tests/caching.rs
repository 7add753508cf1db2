use std::sync::Arc;

use weft::compile::{CompileOptions, CompiledProgram, TracedFn};
use weft::executor::{Executor, ExecutorRegistry};
use weft::prims;
use weft::trace::{record, Args, BoundOp, DType, Device, OpaqueRef, TensorMeta, Value};
use weft::CacheMode;

struct Interp;

impl Executor for Interp {
    fn name(&self) -> &'static str {
        "interp"
    }

    fn can_execute(&self, _op: &BoundOp) -> bool {
        true
    }
}

fn registry() -> ExecutorRegistry {
    ExecutorRegistry::from_entries(vec![Arc::new(Interp)])
}

fn tensor(shape: &[usize], dtype: DType) -> Value {
    Value::tensor(TensorMeta::new(shape.to_vec(), dtype, Device::Cpu))
}

fn add_program() -> TracedFn {
    Arc::new(|args: &[Value]| {
        record(
            &prims::add(),
            Args::positional(vec![args[0].clone(), args[1].clone()]),
        )
    })
}

fn identity_program() -> TracedFn {
    Arc::new(|args: &[Value]| Ok(Value::Seq(args.to_vec())))
}

fn assert_counts(program: &CompiledProgram, misses: u64, hits: u64) {
    assert_eq!(program.cache_misses(), misses, "miss count");
    assert_eq!(program.cache_hits(), hits, "hit count");
}

#[test]
fn conflicting_cache_modes_are_a_configuration_error() {
    let err = CompileOptions::from_cache_flags(true, true).expect_err("must conflict");
    let message = err.to_string();
    assert!(message.contains("use_static_caching"), "{message}");
    assert!(message.contains("use_last_executed"), "{message}");

    assert_eq!(
        CompileOptions::from_cache_flags(true, false)
            .expect("static flags valid")
            .cache,
        CacheMode::Static
    );
    assert_eq!(
        CompileOptions::from_cache_flags(false, true)
            .expect("last-executed flags valid")
            .cache,
        CacheMode::LastExecuted
    );
    assert_eq!(
        CompileOptions::from_cache_flags(false, false)
            .expect("disabled flags valid")
            .cache,
        CacheMode::Disabled
    );
}

#[test]
fn static_caching_counts_hits_and_misses_by_metadata() {
    let program = CompiledProgram::new(add_program(), registry(), CompileOptions::default());
    assert_eq!(program.cache_mode(), CacheMode::Static);

    let a = tensor(&[2, 2], DType::F32);
    let b = tensor(&[2, 2], DType::F32);

    // Tensor x tensor.
    program.call(&[a.clone(), b.clone()]).expect("call failed");
    assert_counts(&program, 1, 0);

    // Same tensors.
    program.call(&[a.clone(), b.clone()]).expect("call failed");
    assert_counts(&program, 1, 1);

    // Different tensors, same metadata.
    program
        .call(&[tensor(&[2, 2], DType::F32), tensor(&[2, 2], DType::F32)])
        .expect("call failed");
    assert_counts(&program, 1, 2);

    // Different shape.
    program
        .call(&[tensor(&[2, 1], DType::F32), tensor(&[2, 1], DType::F32)])
        .expect("call failed");
    assert_counts(&program, 2, 2);

    // Different element type.
    program
        .call(&[tensor(&[2, 2], DType::I64), tensor(&[2, 2], DType::I64)])
        .expect("call failed");
    assert_counts(&program, 3, 2);

    // Tensor x float number.
    program
        .call(&[tensor(&[2, 2], DType::F32), Value::float(1.0)])
        .expect("call failed");
    assert_counts(&program, 4, 2);

    // Tensor x float number again, different tensor storage.
    program
        .call(&[tensor(&[2, 2], DType::F32), Value::float(1.0)])
        .expect("call failed");
    assert_counts(&program, 4, 3);

    // Same number type, different value.
    program
        .call(&[tensor(&[2, 2], DType::F32), Value::float(2.0)])
        .expect("call failed");
    assert_counts(&program, 5, 3);

    // Different number type.
    program
        .call(&[tensor(&[2, 2], DType::F32), Value::int(2)])
        .expect("call failed");
    assert_counts(&program, 6, 3);

    // Same integer again.
    program
        .call(&[tensor(&[2, 2], DType::F32), Value::int(2)])
        .expect("call failed");
    assert_counts(&program, 6, 4);
}

#[test]
fn strings_are_compatible_by_value_objects_by_identity() {
    let program = CompiledProgram::new(identity_program(), registry(), CompileOptions::default());

    // String x string.
    program
        .call(&[Value::string("a"), Value::string("b")])
        .expect("call failed");
    assert_counts(&program, 1, 0);

    // Same strings.
    program
        .call(&[Value::string("a"), Value::string("b")])
        .expect("call failed");
    assert_counts(&program, 1, 1);

    // Equal value, independently created string.
    let other_b = Value::Str(String::from("b"));
    program
        .call(&[Value::string("a"), other_b])
        .expect("call failed");
    assert_counts(&program, 1, 2);

    // Object x string.
    let first_object = Value::Opaque(OpaqueRef::new());
    program
        .call(&[first_object.clone(), Value::string("b")])
        .expect("call failed");
    assert_counts(&program, 2, 2);

    // A fresh object never matches.
    program
        .call(&[Value::Opaque(OpaqueRef::new()), Value::string("b")])
        .expect("call failed");
    assert_counts(&program, 3, 2);

    // The same object does.
    program
        .call(&[first_object, Value::string("b")])
        .expect("call failed");
    assert_counts(&program, 3, 3);
}

#[test]
fn parameter_metadata_participates_in_the_fingerprint() {
    let program = CompiledProgram::new(identity_program(), registry(), CompileOptions::default());
    program.set_params(vec![tensor(&[5, 5], DType::F32)]);

    let input = tensor(&[5, 5], DType::F32);
    program.call(&[input.clone()]).expect("call failed");
    assert_counts(&program, 1, 0);

    program.call(&[input.clone()]).expect("call failed");
    assert_counts(&program, 1, 1);

    // Swapping parameters for fresh storage with identical metadata is still
    // a hit: values never invalidate, metadata does.
    program.set_params(vec![tensor(&[5, 5], DType::F32)]);
    program.call(&[input.clone()]).expect("call failed");
    assert_counts(&program, 1, 2);

    program.set_params(vec![tensor(&[6, 5], DType::F32)]);
    program.call(&[input]).expect("call failed");
    assert_counts(&program, 2, 2);
}

#[test]
fn last_executed_mode_replays_without_fingerprinting() {
    let options = CompileOptions::from_cache_flags(false, true).expect("options valid");
    let program = CompiledProgram::new(add_program(), registry(), options);

    program
        .call(&[tensor(&[2, 2], DType::F32), tensor(&[2, 2], DType::F32)])
        .expect("call failed");
    assert_counts(&program, 1, 0);

    // Metadata changed, but the prior artifact is replayed anyway.
    program
        .call(&[tensor(&[4, 4], DType::F32), tensor(&[4, 4], DType::F32)])
        .expect("call failed");
    assert_counts(&program, 1, 1);
}

#[test]
fn disabled_mode_always_recompiles() {
    let options = CompileOptions::from_cache_flags(false, false).expect("options valid");
    let program = CompiledProgram::new(add_program(), registry(), options);

    let a = tensor(&[2, 2], DType::F32);
    let b = tensor(&[2, 2], DType::F32);
    program.call(&[a.clone(), b.clone()]).expect("call failed");
    program.call(&[a, b]).expect("call failed");
    assert_counts(&program, 2, 0);
}

#[test]
fn clearing_the_cache_resets_counters_and_entries() {
    let program = CompiledProgram::new(add_program(), registry(), CompileOptions::default());
    let a = tensor(&[2, 2], DType::F32);
    let b = tensor(&[2, 2], DType::F32);

    program.call(&[a.clone(), b.clone()]).expect("call failed");
    program.call(&[a.clone(), b.clone()]).expect("call failed");
    assert_counts(&program, 1, 1);

    program.clear_cache();
    assert_counts(&program, 0, 0);

    program.call(&[a, b]).expect("call failed");
    assert_counts(&program, 1, 0);
}

#[test]
fn cache_events_feed_the_profiling_counters() {
    let program = CompiledProgram::new(add_program(), registry(), CompileOptions::default());
    let before_misses = weft::profiling::counter("call_cache_miss");
    let before_hits = weft::profiling::counter("call_cache_hit");

    let a = tensor(&[2, 2], DType::F32);
    let b = tensor(&[2, 2], DType::F32);
    program.call(&[a.clone(), b.clone()]).expect("call failed");
    program.call(&[a, b]).expect("call failed");

    // Counters are process-wide and monotonic; other activity may add to
    // them, but this program's events are included.
    assert!(weft::profiling::counter("call_cache_miss") >= before_misses + 1);
    assert!(weft::profiling::counter("call_cache_hit") >= before_hits + 1);
}

#[test]
fn artifacts_expose_snapshots_and_regions() {
    let program = CompiledProgram::new(add_program(), registry(), CompileOptions::default());
    let artifact = program
        .call(&[tensor(&[2, 2], DType::F32), tensor(&[2, 2], DType::F32)])
        .expect("call failed");

    assert_eq!(artifact.regions().len(), 1);
    assert_eq!(artifact.trace().ops.len(), 1);

    let traces = program.last_traces();
    assert!(!traces.is_empty());
    assert_eq!(traces[0].0, "interpretation");
    assert!(traces.iter().any(|(label, _)| label.starts_with("dce")));
    assert!(traces.iter().any(|(label, _)| label.starts_with("cse")));

    // A hit replays the stored artifact rather than recompiling.
    let replayed = program
        .call(&[tensor(&[2, 2], DType::F32), tensor(&[2, 2], DType::F32)])
        .expect("call failed");
    assert!(Arc::ptr_eq(&artifact, &replayed));
}
