//! Bookend hoist: moving layout-only leading/trailing operations out of
//! fusion regions.
//!
//! Fusion backends handle pure layout changes (transpose, reshape) poorly at
//! region boundaries. An operation at the front of a fused region whose
//! inputs all come from outside can run before the region; one at the rear
//! whose outputs are only consumed outside can run after it. Layout
//! operations sandwiched between compute stay where they are. Hoisted runs
//! become their own regions, assigned to the fallback executor.

use std::collections::HashSet;

use crate::analysis::DependencyMaps;
use crate::executor::ExecutorRegistry;
use crate::trace::Trace;

use super::ProtoRegion;

pub(super) fn hoist_bookends(
    trace: &Trace,
    deps: &DependencyMaps,
    registry: &ExecutorRegistry,
    regions: Vec<ProtoRegion>,
) -> Vec<ProtoRegion> {
    let Some(fallback) = registry.fallback_index() else {
        return regions;
    };

    let mut out = Vec::with_capacity(regions.len());
    for region in regions {
        let executor = registry.get(region.executor_index);
        if !executor.is_fusion_backend() || region.executor_index == fallback {
            out.push(region);
            continue;
        }

        let (front, middle, rear) = split_region(trace, deps, &region);

        if !front.is_empty() {
            out.push(ProtoRegion {
                executor_index: fallback,
                ops: front,
            });
        }
        if !middle.is_empty() {
            out.push(ProtoRegion {
                executor_index: region.executor_index,
                ops: middle,
            });
        }
        if !rear.is_empty() {
            out.push(ProtoRegion {
                executor_index: fallback,
                ops: rear,
            });
        }
    }
    coalesce_adjacent(out)
}

/// Merges neighbouring same-executor regions left behind by hoisting, so a
/// rear bookend followed by the next region's front bookend becomes one
/// region.
fn coalesce_adjacent(regions: Vec<ProtoRegion>) -> Vec<ProtoRegion> {
    let mut out: Vec<ProtoRegion> = Vec::with_capacity(regions.len());
    for region in regions {
        match out.last_mut() {
            Some(last) if last.executor_index == region.executor_index => {
                last.ops.extend(region.ops);
                last.ops.sort_unstable();
            }
            _ => out.push(region),
        }
    }
    out
}

/// Splits a region's operations (in order) into front bookends, the fused
/// middle, and rear bookends.
fn split_region(
    trace: &Trace,
    deps: &DependencyMaps,
    region: &ProtoRegion,
) -> (Vec<usize>, Vec<usize>, Vec<usize>) {
    let member: HashSet<usize> = region.ops.iter().copied().collect();

    // Proxies available at the region boundary: everything produced outside.
    // Hoisting an operation makes its outputs boundary values as well.
    let mut boundary: HashSet<String> = HashSet::new();
    for &op in &region.ops {
        for proxy in trace.ops[op].input_proxies() {
            let produced_inside = deps
                .producers
                .get(proxy.name())
                .map(|producer| member.contains(producer))
                .unwrap_or(false);
            if !produced_inside {
                boundary.insert(proxy.name().to_string());
            }
        }
    }

    let mut front = Vec::new();
    let mut middle = Vec::new();
    for &op in &region.ops {
        let movable = trace.ops[op].is_layout_only()
            && trace.ops[op]
                .input_proxies()
                .iter()
                .all(|proxy| boundary.contains(proxy.name()));
        if movable {
            front.push(op);
            for proxy in trace.ops[op].output_proxies() {
                boundary.insert(proxy.name().to_string());
            }
        } else {
            middle.push(op);
        }
    }

    // Rear pass in reverse: movable when no remaining middle operation
    // consumes any of the outputs.
    let mut rear = Vec::new();
    let mut middle_set: HashSet<usize> = middle.iter().copied().collect();
    for &op in middle.clone().iter().rev() {
        let movable = trace.ops[op].is_layout_only()
            && trace.ops[op].output_proxies().iter().all(|proxy| {
                deps.consumers_of(proxy.name())
                    .iter()
                    .all(|consumer| !middle_set.contains(consumer) || *consumer == op)
            });
        if movable {
            middle_set.remove(&op);
            middle.retain(|&existing| existing != op);
            rear.insert(0, op);
        }
    }

    (front, middle, rear)
}
