//! Dead-code elimination over a trace.

use std::collections::HashSet;

use anyhow::Result;

use crate::trace::Trace;

use super::{PassStats, TracePass};

/// Removes operations whose outputs cannot reach the declared output.
///
/// Walks the operation list in reverse, keeping an operation iff one of its
/// outputs is already required or the operation has side effects; kept
/// operations add their inputs to the required set. The relative order of
/// surviving operations is preserved, and a second application is a no-op.
#[derive(Default)]
pub struct DeadCodeEliminationPass;

impl DeadCodeEliminationPass {
    const NAME: &'static str = "dce";
}

impl TracePass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, trace: &Trace) -> Result<(Trace, PassStats)> {
        let mut required: HashSet<String> = trace
            .output_proxies()
            .iter()
            .map(|proxy| proxy.name().to_string())
            .collect();

        let mut keep = vec![false; trace.ops.len()];
        for (idx, op) in trace.ops.iter().enumerate().rev() {
            let live = op.is_side_effecting()
                || op
                    .output_proxies()
                    .iter()
                    .any(|proxy| required.contains(proxy.name()));
            if !live {
                continue;
            }
            keep[idx] = true;
            for proxy in op.input_proxies() {
                required.insert(proxy.name().to_string());
            }
        }

        let mut out = trace.relabeled(Self::NAME);
        out.ops = trace
            .ops
            .iter()
            .zip(keep.iter())
            .filter(|(_, kept)| **kept)
            .map(|(op, _)| op.clone())
            .collect();

        let erased = trace.ops.len() - out.ops.len();
        Ok((
            out,
            PassStats {
                changed: erased > 0,
                rewrites: 0,
                erased_ops: erased,
            },
        ))
    }
}
