//! Bound operations and the trace that records them.

use std::collections::HashSet;
use std::fmt;

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use smallvec::SmallVec;

use crate::error::ConsistencyError;

use super::proxy::{Proxy, ProxyMeta, ProxyRef};
use super::symbol::{ProxySource, SymbolId, SymbolRef};
use super::value::{Structural, Value};

/// One recorded application of a symbol to concrete arguments.
#[derive(Debug, Clone)]
pub struct BoundOp {
    pub sym: SymbolRef,
    pub args: Vec<Value>,
    pub kwargs: Vec<(String, Value)>,
    pub output: Value,
    /// Decomposition into simpler operations, when the symbol has one.
    pub subops: Vec<BoundOp>,
}

/// Structural-equality key of a bound operation's right-hand side.
///
/// Two bound operations share a key iff their symbol id and their positional
/// and keyword arguments are recursively equal by value and metadata. The
/// output is deliberately excluded. Positional and keyword spellings of the
/// same call produce different keys; this asymmetry is a known, intentional
/// limitation carried from the recording model, not a defect to fix here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StructuralKey {
    sym: SymbolId,
    args: Vec<Structural>,
    kwargs: Vec<(String, Structural)>,
}

impl BoundOp {
    pub fn new(
        sym: SymbolRef,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        output: Value,
    ) -> Self {
        BoundOp {
            sym,
            args,
            kwargs,
            output,
            subops: Vec::new(),
        }
    }

    pub fn rhs(&self) -> StructuralKey {
        StructuralKey {
            sym: self.sym.id(),
            args: self.args.iter().map(Value::structural).collect(),
            kwargs: self
                .kwargs
                .iter()
                .map(|(name, value)| (name.clone(), value.structural()))
                .collect(),
        }
    }

    /// Every proxy consumed by this operation, containers included.
    pub fn input_proxies(&self) -> Vec<ProxyRef> {
        let mut out = Vec::new();
        for value in &self.args {
            value.collect_proxies(&mut out);
        }
        for (_, value) in &self.kwargs {
            value.collect_proxies(&mut out);
        }
        out
    }

    /// Every proxy this operation produces.
    pub fn output_proxies(&self) -> SmallVec<[ProxyRef; 2]> {
        let mut flat = Vec::new();
        self.output.collect_proxies(&mut flat);
        SmallVec::from_vec(flat)
    }

    /// Whether this operation (or any of its decomposition) has observable
    /// side effects and must survive dead-code elimination.
    pub fn is_side_effecting(&self) -> bool {
        self.sym.tags().side_effects || self.subops.iter().any(BoundOp::is_side_effecting)
    }

    /// Whether this operation and its entire decomposition are purely
    /// layout-changing, making it a bookend-hoist candidate.
    pub fn is_layout_only(&self) -> bool {
        self.sym.tags().layout && self.subops.iter().all(BoundOp::is_layout_only)
    }
}

impl fmt::Display for BoundOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}(", self.output, self.sym)?;
        let mut first = true;
        for arg in &self.args {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
            first = false;
        }
        for (name, value) in &self.kwargs {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
            first = false;
        }
        f.write_str(")")
    }
}

/// An ordered sequence of bound operations with declared inputs and an output.
#[derive(Debug, Clone)]
pub struct Trace {
    provenance: String,
    pub args: Vec<ProxyRef>,
    pub ops: Vec<BoundOp>,
    pub output: Value,
    name_counter: u64,
    reserved_names: HashSet<String>,
}

impl Trace {
    pub fn new(provenance: impl Into<String>) -> Self {
        Trace {
            provenance: provenance.into(),
            args: Vec::new(),
            ops: Vec::new(),
            output: Value::Null,
            name_counter: 0,
            reserved_names: HashSet::new(),
        }
    }

    /// Which pass produced this snapshot.
    pub fn provenance(&self) -> &str {
        &self.provenance
    }

    /// Clones the trace under a new provenance label.
    pub fn relabeled(&self, provenance: impl Into<String>) -> Trace {
        let mut snapshot = self.clone();
        snapshot.provenance = provenance.into();
        snapshot
    }

    /// Marks a user-supplied name as taken so generated names can never
    /// collide with it.
    pub fn reserve_name(&mut self, name: &str) {
        self.reserved_names.insert(name.to_string());
    }

    /// Produces the next generated name. Candidates already present in the
    /// reserved set are skipped; handing out a duplicate is a fatal
    /// consistency error rather than a silent reuse.
    pub fn next_name(&mut self) -> Result<String, ConsistencyError> {
        loop {
            let candidate = format!("t{}", self.name_counter);
            self.name_counter += 1;
            if self.reserved_names.contains(&candidate) {
                continue;
            }
            if !self.reserved_names.insert(candidate.clone()) {
                return Err(ConsistencyError::DuplicateName {
                    name: candidate,
                    provenance: self.provenance.clone(),
                });
            }
            return Ok(candidate);
        }
    }

    /// Creates a proxy with a generated name.
    pub fn make_proxy(&mut self, meta: ProxyMeta) -> Result<ProxyRef, ConsistencyError> {
        let name = self.next_name()?;
        Ok(Proxy::new(name, meta))
    }

    /// Declares a trace input, reserving its name.
    pub fn add_input(&mut self, proxy: ProxyRef) {
        self.reserve_name(proxy.name());
        self.args.push(proxy);
    }

    pub fn push(&mut self, op: BoundOp) {
        self.ops.push(op);
    }

    pub fn set_output(&mut self, output: Value) {
        self.output = output;
    }

    /// Proxies reachable from the declared output.
    pub fn output_proxies(&self) -> Vec<ProxyRef> {
        let mut out = Vec::new();
        self.output.collect_proxies(&mut out);
        out
    }

    /// Names of the declared inputs.
    pub fn input_names(&self) -> HashSet<&str> {
        self.args.iter().map(|proxy| proxy.name()).collect()
    }

    /// JSON dump for diagnostics and snapshot inspection.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "provenance": self.provenance,
            "args": self.args.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
            "ops": self.ops.iter().map(|op| op.to_string()).collect::<Vec<_>>(),
            "output": self.output.to_string(),
        })
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.to_json())
    }
}

impl ProxySource for Trace {
    fn fresh(&mut self, meta: ProxyMeta) -> Result<ProxyRef> {
        Ok(self.make_proxy(meta)?)
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# trace[{}]", self.provenance)?;
        write!(f, "inputs:")?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        writeln!(f)?;
        for op in &self.ops {
            writeln!(f, "  {op}")?;
        }
        writeln!(f, "return {}", self.output)
    }
}
