//! Common-subexpression elimination over a trace.

use std::collections::HashMap;

use anyhow::Result;

use crate::trace::{BoundOp, ProxyRef, Trace};

use super::{PassStats, TracePass};

/// Rewrites uses of duplicated pure operations to the earliest occurrence.
///
/// Operations are keyed by their structural right-hand side (symbol id plus
/// canonicalized arguments). When a later operation matches an earlier one,
/// every downstream use of its outputs is redirected to the earlier outputs;
/// the duplicate itself is left in place, now dead, for the following DCE
/// pass to remove.
///
/// Positional and keyword spellings of the same call key differently and are
/// therefore never deduplicated against each other. That conservatism is the
/// documented behavior of the structural key, kept as-is on purpose.
#[derive(Default)]
pub struct CommonSubexpressionEliminationPass;

impl CommonSubexpressionEliminationPass {
    const NAME: &'static str = "cse";
}

fn rewrite_op(op: &BoundOp, subst: &HashMap<String, ProxyRef>) -> BoundOp {
    let mut rewritten = op.clone();
    rewritten.args = op
        .args
        .iter()
        .map(|value| value.substitute(&|name| subst.get(name).cloned()))
        .collect();
    rewritten.kwargs = op
        .kwargs
        .iter()
        .map(|(name, value)| {
            (
                name.clone(),
                value.substitute(&|name| subst.get(name).cloned()),
            )
        })
        .collect();
    rewritten
}

impl TracePass for CommonSubexpressionEliminationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, trace: &Trace) -> Result<(Trace, PassStats)> {
        let mut seen: HashMap<Vec<u8>, Vec<ProxyRef>> = HashMap::new();
        let mut subst: HashMap<String, ProxyRef> = HashMap::new();
        let mut stats = PassStats::default();

        let mut out = trace.relabeled(Self::NAME);
        out.ops = Vec::with_capacity(trace.ops.len());

        for op in &trace.ops {
            let rewritten = rewrite_op(op, &subst);

            if !rewritten.is_side_effecting() {
                match bincode::serialize(&rewritten.rhs()) {
                    Ok(key_bytes) => {
                        let outputs = rewritten.output_proxies();
                        if let Some(existing) = seen.get(&key_bytes) {
                            if existing.len() == outputs.len() {
                                for (from, to) in outputs.iter().zip(existing.iter()) {
                                    subst.insert(from.name().to_string(), to.clone());
                                }
                                stats.changed = true;
                                stats.rewrites += 1;
                            }
                        } else {
                            seen.insert(key_bytes, outputs.into_vec());
                        }
                    }
                    Err(_) => {
                        // Unkeyable operations simply stay unique.
                    }
                }
            }

            out.ops.push(rewritten);
        }

        out.output = trace
            .output
            .substitute(&|name| subst.get(name).cloned());
        Ok((out, stats))
    }
}
