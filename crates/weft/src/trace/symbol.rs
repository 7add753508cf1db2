//! Operation-kind descriptors and the process-wide symbol registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::error::UnsupportedOpError;

use super::proxy::{ProxyMeta, ProxyRef};
use super::value::Value;

/// Process-wide identifier for a symbol. Two symbol references with the same
/// id compare and hash equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SymbolId(pub u32);

/// Behavioral tags consulted by the rewrite and partitioning passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpTags {
    /// Purely layout-changing (transpose/reshape/view); bookend-eligible.
    pub layout: bool,
    /// Observable side effects; never removed by dead-code elimination.
    pub side_effects: bool,
}

impl OpTags {
    pub const NONE: OpTags = OpTags {
        layout: false,
        side_effects: false,
    };
    pub const LAYOUT: OpTags = OpTags {
        layout: true,
        side_effects: false,
    };
    pub const SIDE_EFFECTS: OpTags = OpTags {
        layout: false,
        side_effects: true,
    };
}

/// Resolved positional and keyword arguments for one invocation.
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keyword: Vec<(String, Value)>,
}

impl Args {
    pub fn positional(values: Vec<Value>) -> Self {
        Args {
            positional: values,
            keyword: Vec::new(),
        }
    }

    pub fn keyword(pairs: Vec<(&str, Value)>) -> Self {
        Args {
            positional: Vec::new(),
            keyword: pairs
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }

    pub fn get_keyword(&self, name: &str) -> Option<&Value> {
        self.keyword
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Positional argument at `index`, or the keyword fallback with `name`.
    pub fn operand(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional.get(index).or_else(|| self.get_keyword(name))
    }
}

/// Allocates fresh proxies while a meta function runs. Implemented by the
/// trace so inferred outputs draw from its name generator.
pub trait ProxySource {
    fn fresh(&mut self, meta: ProxyMeta) -> Result<ProxyRef>;
}

/// Infers output proxies from input metadata without computing anything.
pub type MetaFn = fn(&Args, &mut dyn ProxySource) -> Result<Value>;

/// Direct (non-recorded) implementation used when no trace is active.
pub type EagerFn = fn(&Args) -> Result<Value, UnsupportedOpError>;

/// Immutable description of an operation kind.
pub struct Symbol {
    id: SymbolId,
    name: String,
    tags: OpTags,
    meta: MetaFn,
    eager: Option<EagerFn>,
}

pub type SymbolRef = Arc<Symbol>;

struct SymbolRegistry {
    by_name: HashMap<String, SymbolRef>,
    next_id: u32,
}

static REGISTRY: Lazy<Mutex<SymbolRegistry>> = Lazy::new(|| {
    Mutex::new(SymbolRegistry {
        by_name: HashMap::new(),
        next_id: 0,
    })
});

impl Symbol {
    /// Interns a symbol. Registering the same name twice returns the original
    /// descriptor, so symbols stay deduplicated process-wide.
    pub fn register(
        name: &str,
        tags: OpTags,
        meta: MetaFn,
        eager: Option<EagerFn>,
    ) -> SymbolRef {
        let mut registry = REGISTRY.lock().expect("symbol registry poisoned");
        if let Some(existing) = registry.by_name.get(name) {
            return existing.clone();
        }
        let id = SymbolId(registry.next_id);
        registry.next_id += 1;
        let symbol = Arc::new(Symbol {
            id,
            name: name.to_string(),
            tags,
            meta,
            eager,
        });
        registry.by_name.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn id(&self) -> SymbolId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> OpTags {
        self.tags
    }

    pub fn meta(&self) -> MetaFn {
        self.meta
    }

    pub fn has_eager(&self) -> bool {
        self.eager.is_some()
    }

    /// Runs the direct implementation, or reports the symbol as unsupported
    /// outside a recording context.
    pub fn eager(&self, args: &Args) -> Result<Value, UnsupportedOpError> {
        match self.eager {
            Some(f) => f(args),
            None => Err(UnsupportedOpError::new(
                self.name.clone(),
                "direct execution outside a recording context",
            )),
        }
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl std::hash::Hash for Symbol {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Symbol")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("tags", &self.tags)
            .finish()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
