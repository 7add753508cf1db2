//! Region partitioning and the dependency-respecting fusion merge.

mod bookend;

use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Result};

use crate::analysis::DependencyMaps;
use crate::error::{ConsistencyError, UnsupportedOpError};
use crate::executor::ExecutorRegistry;
use crate::trace::{ProxyRef, Trace};

/// Options recognized by the partitioner.
#[derive(Debug, Clone, Copy)]
pub struct PartitionOptions {
    /// Whether leading/trailing layout-only operations are hoisted out of
    /// fusion regions.
    pub bookend: bool,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        PartitionOptions { bookend: true }
    }
}

/// A maximal group of operations assigned to one executor.
///
/// `ops` are indices into the trace's operation list, ascending. `inputs` are
/// proxies consumed but not produced inside the region; `outputs` are proxies
/// produced inside and visible outside (consumed later or part of the trace
/// output). Both are sorted by name so region boundaries are deterministic.
#[derive(Debug, Clone)]
pub struct Region {
    pub executor: &'static str,
    pub executor_index: usize,
    pub ops: Vec<usize>,
    pub inputs: Vec<ProxyRef>,
    pub outputs: Vec<ProxyRef>,
}

impl Region {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Working representation before inputs/outputs are computed.
#[derive(Debug, Clone)]
struct ProtoRegion {
    executor_index: usize,
    ops: Vec<usize>,
}

impl ProtoRegion {
    fn min_op(&self) -> usize {
        self.ops.first().copied().unwrap_or(usize::MAX)
    }
}

/// Splits a trace into executor regions and merges compatible regions.
///
/// Each operation is assigned the first executor in the registry that claims
/// it. Maximal runs of adjacent same-executor operations seed the partition;
/// same-executor regions are then merged whenever no different-executor
/// region sits on a dependency path between them, to a fixpoint. The final
/// region list is a stable topological order of the merged graph,
/// tie-broken by original trace position so output is reproducible.
pub fn partition(
    trace: &Trace,
    deps: &DependencyMaps,
    registry: &ExecutorRegistry,
    options: &PartitionOptions,
) -> Result<Vec<Region>> {
    if trace.ops.is_empty() {
        return Ok(Vec::new());
    }

    // 1. Candidate executor per operation.
    let mut assignment = Vec::with_capacity(trace.ops.len());
    for op in &trace.ops {
        let executor = registry.assign(op).ok_or_else(|| {
            anyhow::Error::new(UnsupportedOpError::new(
                op.sym.name(),
                "lowering: no registered executor accepts this operation",
            ))
        })?;
        assignment.push(executor);
    }

    // 2. Naive partition: maximal adjacent same-executor runs.
    let mut regions: Vec<ProtoRegion> = Vec::new();
    for (idx, &executor_index) in assignment.iter().enumerate() {
        match regions.last_mut() {
            Some(last) if last.executor_index == executor_index => last.ops.push(idx),
            _ => regions.push(ProtoRegion {
                executor_index,
                ops: vec![idx],
            }),
        }
    }

    // 3 + 4. Merge same-executor regions across the region dependency graph.
    let merged = merge_regions(trace, deps, regions);

    // Stable topological order over the merged graph.
    let ordered = order_regions(trace, deps, merged)?;

    // 5. Bookend hoist for fusion backends.
    let hoisted = if options.bookend {
        bookend::hoist_bookends(trace, deps, registry, ordered)
    } else {
        ordered
    };

    finalize(trace, deps, registry, hoisted)
}

/// Region-level dependency edges: `edges[a]` contains `b` when region `a`
/// consumes a proxy produced by region `b`.
fn region_edges(
    trace: &Trace,
    deps: &DependencyMaps,
    regions: &[ProtoRegion],
) -> Vec<HashSet<usize>> {
    let mut op_region = HashMap::new();
    for (region_idx, region) in regions.iter().enumerate() {
        for &op in &region.ops {
            op_region.insert(op, region_idx);
        }
    }

    let mut edges = vec![HashSet::new(); regions.len()];
    for (region_idx, region) in regions.iter().enumerate() {
        for &op in &region.ops {
            for proxy in trace.ops[op].input_proxies() {
                if let Some(&producer_op) = deps.producers.get(proxy.name()) {
                    let producer_region = op_region[&producer_op];
                    if producer_region != region_idx {
                        edges[region_idx].insert(producer_region);
                    }
                }
            }
        }
    }
    edges
}

/// Transitive reachability over the region graph. `reach[a][b]` is `true`
/// when `b` transitively depends on `a`. Region counts are small enough that
/// the dense closure is the simplest correct choice.
fn reachability(edges: &[HashSet<usize>]) -> Vec<Vec<bool>> {
    let n = edges.len();
    let mut reach = vec![vec![false; n]; n];
    for (consumer, producers) in edges.iter().enumerate() {
        for &producer in producers {
            reach[producer][consumer] = true;
        }
    }
    for k in 0..n {
        for i in 0..n {
            if reach[i][k] {
                for j in 0..n {
                    if reach[k][j] {
                        reach[i][j] = true;
                    }
                }
            }
        }
    }
    reach
}

/// Fixpoint merge. Two same-executor regions merge when every region on a
/// dependency path between them shares their executor; all such intermediate
/// regions are absorbed in the same step so the region graph stays acyclic.
/// Candidate pairs are scanned in original trace order, so ties between
/// equally legal merges resolve deterministically.
fn merge_regions(
    trace: &Trace,
    deps: &DependencyMaps,
    mut regions: Vec<ProtoRegion>,
) -> Vec<ProtoRegion> {
    loop {
        let edges = region_edges(trace, deps, &regions);
        let reach = reachability(&edges);

        let mut order: Vec<usize> = (0..regions.len()).collect();
        order.sort_by_key(|&idx| regions[idx].min_op());

        let mut merge: Option<(usize, usize, Vec<usize>)> = None;
        'scan: for (pos, &a) in order.iter().enumerate() {
            for &b in order.iter().skip(pos + 1) {
                if regions[a].executor_index != regions[b].executor_index {
                    continue;
                }
                // Only consider pairs where `b` does not precede `a`.
                let (first, second) = if reach[b][a] { (b, a) } else { (a, b) };
                let between: Vec<usize> = (0..regions.len())
                    .filter(|&k| k != first && k != second)
                    .filter(|&k| reach[first][k] && reach[k][second])
                    .collect();
                let legal = between
                    .iter()
                    .all(|&k| regions[k].executor_index == regions[first].executor_index);
                if legal {
                    merge = Some((first, second, between));
                    break 'scan;
                }
            }
        }

        let Some((first, second, between)) = merge else {
            return regions;
        };

        let mut absorbed: Vec<usize> = Vec::new();
        absorbed.push(second);
        absorbed.extend(between);
        let mut ops = std::mem::take(&mut regions[first].ops);
        for &idx in &absorbed {
            ops.extend(regions[idx].ops.iter().copied());
        }
        ops.sort_unstable();
        regions[first].ops = ops;

        absorbed.sort_unstable();
        for idx in absorbed.into_iter().rev() {
            regions.remove(idx);
        }
    }
}

/// Stable topological sort of regions: among regions whose producers are all
/// emitted, the one containing the earliest original operation goes first.
fn order_regions(
    trace: &Trace,
    deps: &DependencyMaps,
    regions: Vec<ProtoRegion>,
) -> Result<Vec<ProtoRegion>> {
    let edges = region_edges(trace, deps, &regions);
    let mut emitted = vec![false; regions.len()];
    let mut out = Vec::with_capacity(regions.len());

    while out.len() < regions.len() {
        let next = (0..regions.len())
            .filter(|&idx| !emitted[idx])
            .filter(|&idx| edges[idx].iter().all(|&producer| emitted[producer]))
            .min_by_key(|&idx| regions[idx].min_op());
        let Some(next) = next else {
            return Err(anyhow!(
                "region dependency graph contains a cycle; partitioning is inconsistent"
            ));
        };
        emitted[next] = true;
        out.push(regions[next].clone());
    }

    Ok(out)
}

/// Computes region inputs/outputs and validates the partition invariants:
/// exact coverage, no empty regions, and a valid topological order.
fn finalize(
    trace: &Trace,
    deps: &DependencyMaps,
    registry: &ExecutorRegistry,
    regions: Vec<ProtoRegion>,
) -> Result<Vec<Region>> {
    let mut covered: HashSet<usize> = HashSet::new();
    for region in &regions {
        if region.ops.is_empty() {
            return Err(anyhow::Error::new(ConsistencyError::EmptyRegion {
                executor: registry.get(region.executor_index).name().to_string(),
            }));
        }
        for &op in &region.ops {
            if !covered.insert(op) {
                return Err(anyhow!(
                    "operation {op} assigned to more than one region"
                ));
            }
        }
    }
    if covered.len() != trace.ops.len() {
        return Err(anyhow!(
            "partition covers {} of {} operations",
            covered.len(),
            trace.ops.len()
        ));
    }

    let trace_outputs: HashSet<String> = trace
        .output_proxies()
        .iter()
        .map(|proxy| proxy.name().to_string())
        .collect();

    let mut out = Vec::with_capacity(regions.len());
    let mut emitted_ops: HashSet<usize> = HashSet::new();
    for (region_idx, region) in regions.iter().enumerate() {
        let member: HashSet<usize> = region.ops.iter().copied().collect();

        // Validate topological order region-by-region: every producer op of a
        // region input must already be emitted.
        for &op in &region.ops {
            for proxy in trace.ops[op].input_proxies() {
                if let Some(&producer) = deps.producers.get(proxy.name()) {
                    if !member.contains(&producer) && !emitted_ops.contains(&producer) {
                        return Err(anyhow::Error::new(ConsistencyError::RegionOrder {
                            region: region_idx,
                            dependency: producer,
                        }));
                    }
                }
            }
        }
        emitted_ops.extend(region.ops.iter().copied());

        let mut inputs: Vec<ProxyRef> = Vec::new();
        let mut outputs: Vec<ProxyRef> = Vec::new();
        let mut seen_inputs: HashSet<String> = HashSet::new();
        let mut seen_outputs: HashSet<String> = HashSet::new();

        for &op in &region.ops {
            for proxy in trace.ops[op].input_proxies() {
                let produced_inside = deps
                    .producers
                    .get(proxy.name())
                    .map(|producer| member.contains(producer))
                    .unwrap_or(false);
                if !produced_inside && seen_inputs.insert(proxy.name().to_string()) {
                    inputs.push(proxy.clone());
                }
            }
            for proxy in trace.ops[op].output_proxies() {
                let escapes = trace_outputs.contains(proxy.name())
                    || deps
                        .consumers_of(proxy.name())
                        .iter()
                        .any(|consumer| !member.contains(consumer));
                if escapes && seen_outputs.insert(proxy.name().to_string()) {
                    outputs.push(proxy.clone());
                }
            }
        }

        inputs.sort_by(|a, b| a.name().cmp(b.name()));
        outputs.sort_by(|a, b| a.name().cmp(b.name()));

        out.push(Region {
            executor: registry.get(region.executor_index).name(),
            executor_index: region.executor_index,
            ops: region.ops.clone(),
            inputs,
            outputs,
        });
    }

    Ok(out)
}
