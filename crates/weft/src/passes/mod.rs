//! Rewrite passes over traces and the fixed pipeline that applies them.

mod cse;
mod dce;

pub use cse::CommonSubexpressionEliminationPass;
pub use dce::DeadCodeEliminationPass;

use anyhow::Result;

use crate::analysis::{self, DependencyMaps};
use crate::executor::ExecutorRegistry;
use crate::partition::{partition, PartitionOptions, Region};
use crate::trace::Trace;

/// Result returned by a [`TracePass`] alongside the rewritten trace.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    /// Whether the pass changed the trace.
    pub changed: bool,
    /// Number of rewrites applied (CSE redirections, etc.).
    pub rewrites: usize,
    /// Operations removed by the pass.
    pub erased_ops: usize,
}

/// Canonical interface implemented by trace rewrite passes.
///
/// Passes never swallow errors: any internal invariant violation surfaces
/// immediately with the trace provenance attached by the pipeline.
pub trait TracePass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, trace: &Trace) -> Result<(Trace, PassStats)>;
}

/// Output of the full pipeline: one provenance-labelled snapshot per pass,
/// the final trace, and its regions.
#[derive(Debug, Clone)]
pub struct PassRun {
    snapshots: Vec<(String, Trace)>,
    pub trace: Trace,
    pub deps: DependencyMaps,
    pub regions: Vec<Region>,
}

impl PassRun {
    /// All snapshots in application order.
    pub fn snapshots(&self) -> &[(String, Trace)] {
        &self.snapshots
    }

    /// Snapshots whose label starts with `prefix` (e.g. `"dce"` matches
    /// `dce_0` and `dce_1`).
    pub fn snapshots_with_prefix(&self, prefix: &str) -> Vec<&(String, Trace)> {
        self.snapshots
            .iter()
            .filter(|(label, _)| label.starts_with(prefix))
            .collect()
    }
}

/// Applies the fixed pass order: DCE, CSE, DCE (to drop CSE leftovers),
/// dependency analysis, region partitioning. Every intermediate trace is
/// retained as a labelled snapshot for diagnostics.
pub fn run_passes(
    trace: Trace,
    registry: &ExecutorRegistry,
    options: &PartitionOptions,
) -> Result<PassRun> {
    let passes: [&dyn TracePass; 3] = [
        &DeadCodeEliminationPass,
        &CommonSubexpressionEliminationPass,
        &DeadCodeEliminationPass,
    ];

    let mut snapshots = Vec::with_capacity(passes.len() + 1);
    snapshots.push((trace.provenance().to_string(), trace.clone()));

    let mut current = trace;
    let mut counts: std::collections::HashMap<&'static str, usize> =
        std::collections::HashMap::new();
    for pass in passes {
        let ordinal = counts.entry(pass.name()).or_insert(0);
        let label = format!("{}_{}", pass.name(), ordinal);
        *ordinal += 1;

        let (next, _stats) = pass
            .run(&current)
            .map_err(|err| err.context(format!("pass `{label}` failed")))?;
        let next = next.relabeled(label.as_str());
        snapshots.push((label, next.clone()));
        current = next;
    }

    let deps = analysis::analyze(&current)?;
    let regions = partition(&current, &deps, registry, options)?;

    Ok(PassRun {
        snapshots,
        trace: current,
        deps,
        regions,
    })
}
