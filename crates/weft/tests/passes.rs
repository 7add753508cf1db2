use std::sync::Arc;

use weft::executor::{Executor, ExecutorRegistry};
use weft::partition::PartitionOptions;
use weft::passes::{
    run_passes, CommonSubexpressionEliminationPass, DeadCodeEliminationPass, TracePass,
};
use weft::prims;
use weft::trace::{
    push_trace, record, Args, BoundOp, DType, Device, Proxy, TensorMeta, Trace, TraceScope, Value,
};

struct AcceptAll;

impl Executor for AcceptAll {
    fn name(&self) -> &'static str {
        "interp"
    }

    fn can_execute(&self, _op: &BoundOp) -> bool {
        true
    }
}

fn interp_registry() -> ExecutorRegistry {
    ExecutorRegistry::from_entries(vec![Arc::new(AcceptAll)])
}

fn meta_2x2() -> TensorMeta {
    TensorMeta::new(vec![2, 2], DType::F32, Device::Cpu)
}

fn begin_with_inputs(names: &[&str]) -> (TraceScope, Vec<Value>) {
    let scope = push_trace(Trace::new("test"));
    let handle = scope.handle();
    let inputs = handle.with(|trace| {
        names
            .iter()
            .map(|name| {
                let proxy = Proxy::tensor(*name, meta_2x2());
                trace.add_input(proxy.clone());
                Value::Proxy(proxy)
            })
            .collect()
    });
    (scope, inputs)
}

fn finish(scope: TraceScope, output: Value) -> Trace {
    scope.handle().with(|trace| trace.set_output(output));
    scope.finish()
}

fn op_names(trace: &Trace) -> Vec<&str> {
    trace.ops.iter().map(|op| op.sym.name()).collect()
}

#[test]
fn dce_drops_operations_that_cannot_reach_the_output() {
    let (scope, inputs) = begin_with_inputs(&["a", "b"]);
    let args = || Args::positional(vec![inputs[0].clone(), inputs[1].clone()]);
    let kept = record(&prims::add(), args()).expect("record failed");
    record(&prims::sub(), args()).expect("record failed");
    let trace = finish(scope, kept);

    let (cleaned, stats) = DeadCodeEliminationPass.run(&trace).expect("dce failed");
    assert!(stats.changed);
    assert_eq!(stats.erased_ops, 1);
    assert_eq!(op_names(&cleaned), vec!["add"]);
}

#[test]
fn dce_is_idempotent_on_clean_traces() {
    let (scope, inputs) = begin_with_inputs(&["a", "b"]);
    let args = || Args::positional(vec![inputs[0].clone(), inputs[1].clone()]);
    let c = record(&prims::add(), args()).expect("record failed");
    let d = record(
        &prims::mul(),
        Args::positional(vec![c.clone(), inputs[0].clone()]),
    )
    .expect("record failed");
    let trace = finish(scope, d);

    let (once, _) = DeadCodeEliminationPass.run(&trace).expect("dce failed");
    let (twice, stats) = DeadCodeEliminationPass.run(&once).expect("dce failed");
    assert!(!stats.changed);
    assert_eq!(op_names(&once), op_names(&twice));
    assert_eq!(once.ops.len(), twice.ops.len());
}

#[test]
fn dce_keeps_side_effecting_operations() {
    let (scope, inputs) = begin_with_inputs(&["a", "b"]);
    let kept = record(
        &prims::add(),
        Args::positional(vec![inputs[0].clone(), inputs[1].clone()]),
    )
    .expect("record failed");
    // The draw's output goes nowhere, but the draw itself must survive.
    record(
        &prims::uniform(),
        Args::positional(vec![Value::Seq(vec![Value::int(2), Value::int(2)])]),
    )
    .expect("record failed");
    let trace = finish(scope, kept);

    let (cleaned, _) = DeadCodeEliminationPass.run(&trace).expect("dce failed");
    assert_eq!(op_names(&cleaned), vec!["add", "uniform"]);
}

#[test]
fn cse_rewires_consumers_to_the_earliest_duplicate() {
    let (scope, inputs) = begin_with_inputs(&["a", "b"]);
    let args = || Args::positional(vec![inputs[0].clone(), inputs[1].clone()]);
    let c = record(&prims::add(), args()).expect("record failed");
    let d = record(&prims::add(), args()).expect("record failed");
    let e = record(&prims::mul(), Args::positional(vec![c.clone(), d.clone()]))
        .expect("record failed");
    let trace = finish(scope, e);

    let (deduped, stats) = CommonSubexpressionEliminationPass
        .run(&trace)
        .expect("cse failed");
    assert!(stats.changed);
    assert_eq!(stats.rewrites, 1);

    let (cleaned, _) = DeadCodeEliminationPass.run(&deduped).expect("dce failed");
    assert_eq!(op_names(&cleaned), vec!["add", "mul"]);

    // Both operands of the multiply now reference the surviving add.
    let surviving = cleaned.ops[0]
        .output_proxies()
        .first()
        .expect("add output")
        .clone();
    let mul = &cleaned.ops[1];
    for arg in &mul.args {
        assert_eq!(
            arg.as_proxy().expect("proxy operand").name(),
            surviving.name()
        );
    }
}

#[test]
fn cse_keeps_keyword_and_positional_calls_distinct() {
    let (scope, inputs) = begin_with_inputs(&["a", "b"]);
    let c = record(
        &prims::add(),
        Args::positional(vec![inputs[0].clone(), inputs[1].clone()]),
    )
    .expect("record failed");
    let d = record(
        &prims::add(),
        Args::keyword(vec![
            ("lhs", inputs[0].clone()),
            ("rhs", inputs[1].clone()),
        ]),
    )
    .expect("record failed");
    let trace = finish(scope, Value::Seq(vec![c, d]));

    let (deduped, stats) = CommonSubexpressionEliminationPass
        .run(&trace)
        .expect("cse failed");
    assert!(!stats.changed);
    let (cleaned, _) = DeadCodeEliminationPass.run(&deduped).expect("dce failed");
    assert_eq!(op_names(&cleaned), vec!["add", "add"]);
}

#[test]
fn cse_never_touches_side_effecting_operations() {
    let (scope, _inputs) = begin_with_inputs(&[]);
    let shape = || Value::Seq(vec![Value::int(2), Value::int(2)]);
    let first = record(&prims::uniform(), Args::positional(vec![shape()]))
        .expect("record failed");
    let second = record(&prims::uniform(), Args::positional(vec![shape()]))
        .expect("record failed");
    let trace = finish(scope, Value::Seq(vec![first, second]));

    let (deduped, stats) = CommonSubexpressionEliminationPass
        .run(&trace)
        .expect("cse failed");
    assert!(!stats.changed);
    assert_eq!(op_names(&deduped), vec!["uniform", "uniform"]);
}

#[test]
fn pipeline_snapshots_are_queryable_by_prefix() {
    let (scope, inputs) = begin_with_inputs(&["a", "b"]);
    let args = || Args::positional(vec![inputs[0].clone(), inputs[1].clone()]);
    let c = record(&prims::add(), args()).expect("record failed");
    record(&prims::sub(), args()).expect("record failed");
    let trace = finish(scope, c);

    let run = run_passes(trace, &interp_registry(), &PartitionOptions::default())
        .expect("pipeline failed");

    assert_eq!(run.snapshots_with_prefix("dce").len(), 2);
    assert_eq!(run.snapshots_with_prefix("cse").len(), 1);
    assert_eq!(run.snapshots().len(), 4);

    // Snapshots record the state after each pass: the first DCE already
    // removed the dead subtract.
    let (_, after_dce) = run.snapshots_with_prefix("dce")[0];
    assert_eq!(op_names(after_dce), vec!["add"]);
    assert_eq!(op_names(&run.trace), vec!["add"]);
    assert_eq!(run.regions.len(), 1);
}
