//! Producer/consumer maps over a trace.

use std::collections::HashMap;

use crate::error::ConsistencyError;
use crate::trace::Trace;

/// Dependency maps computed in one forward walk.
///
/// Every proxy that is not a declared trace input has exactly one producer;
/// anything else is a consistency error in the trace, not user input.
#[derive(Debug, Default, Clone)]
pub struct DependencyMaps {
    /// Proxy name to the index of the operation that created it.
    pub producers: HashMap<String, usize>,
    /// Proxy name to the indices of operations that read it, in trace order.
    pub consumers: HashMap<String, Vec<usize>>,
}

impl DependencyMaps {
    pub fn consumers_of(&self, name: &str) -> &[usize] {
        self.consumers.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

pub fn analyze(trace: &Trace) -> Result<DependencyMaps, ConsistencyError> {
    let inputs = trace.input_names();
    let mut maps = DependencyMaps::default();

    for (idx, op) in trace.ops.iter().enumerate() {
        for proxy in op.input_proxies() {
            let name = proxy.name();
            if !inputs.contains(name) && !maps.producers.contains_key(name) {
                return Err(ConsistencyError::MissingProducer {
                    proxy: name.to_string(),
                    op: op.sym.name().to_string(),
                });
            }
            maps.consumers.entry(name.to_string()).or_default().push(idx);
        }
        for proxy in op.output_proxies() {
            if let Some(&first) = maps.producers.get(proxy.name()) {
                return Err(ConsistencyError::DuplicateProducer {
                    proxy: proxy.name().to_string(),
                    first,
                    second: idx,
                });
            }
            maps.producers.insert(proxy.name().to_string(), idx);
        }
    }

    // The declared output must also be reachable from inputs or producers.
    for proxy in trace.output_proxies() {
        let name = proxy.name();
        if !inputs.contains(name) && !maps.producers.contains_key(name) {
            return Err(ConsistencyError::MissingProducer {
                proxy: name.to_string(),
                op: "<trace output>".to_string(),
            });
        }
    }

    Ok(maps)
}
