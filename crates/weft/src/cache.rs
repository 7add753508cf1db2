//! Call-level cache keyed by argument-metadata fingerprints.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::compile::CompiledArtifact;
use crate::hashing;
use crate::profiling;
use crate::trace::{ScalarKind, TensorMeta, Value};

/// How the cache decides whether a call can reuse a prior compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Fingerprint argument metadata; hit when it matches a prior call.
    Static,
    /// Always replay the immediately prior artifact. Fastest, and unsafe
    /// when inputs change shape.
    LastExecuted,
    /// Recompile on every call.
    Disabled,
}

/// Canonical, metadata-only key of one argument.
///
/// Tensors contribute shape/dtype/device and nothing about their contents.
/// Numbers are keyed by type and exact value, strings by value, opaque
/// objects by identity. Two independently created equal strings fingerprint
/// identically; two distinct objects never do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ArgKey {
    Tensor(TensorMeta),
    Scalar(ScalarKind),
    Int(i64),
    FloatBits(u64),
    Bool(bool),
    Str(String),
    Object(u64),
    Seq(Vec<ArgKey>),
    Null,
}

/// Reduces a value to its fingerprint key.
pub fn arg_key(value: &Value) -> ArgKey {
    match value {
        Value::Tensor(arg) => ArgKey::Tensor(arg.meta.clone()),
        Value::Proxy(proxy) => match proxy.meta() {
            crate::trace::ProxyMeta::Tensor(meta) => ArgKey::Tensor(meta.clone()),
            crate::trace::ProxyMeta::Scalar(kind) => ArgKey::Scalar(*kind),
        },
        Value::Number(number) => match number {
            crate::trace::Number::Int(value) => ArgKey::Int(*value),
            crate::trace::Number::Float(value) => ArgKey::FloatBits(value.to_bits()),
            crate::trace::Number::Bool(value) => ArgKey::Bool(*value),
        },
        Value::Str(value) => ArgKey::Str(value.clone()),
        Value::Seq(items) => ArgKey::Seq(items.iter().map(arg_key).collect()),
        Value::Opaque(opaque) => ArgKey::Object(opaque.id()),
        Value::Null => ArgKey::Null,
    }
}

/// Fingerprint of one call: a 64-bit digest plus the exact key structure it
/// was derived from. Lookups compare the full structure, never the digest
/// alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    hash: u64,
    keys: Vec<ArgKey>,
}

impl Fingerprint {
    /// Fingerprints call arguments together with the metadata of any bound
    /// parameters of the compiled unit. Parameter metadata participates
    /// exactly like arguments: swapping parameters only invalidates the
    /// cache when shape/dtype/device changes.
    pub fn of(args: &[Value], params: &[Value]) -> Self {
        let mut keys: Vec<ArgKey> = args.iter().map(arg_key).collect();
        if !params.is_empty() {
            keys.push(ArgKey::Seq(params.iter().map(arg_key).collect()));
        }
        let hash = hashing::hash_serializable(&keys).unwrap_or_else(|_| {
            // Canonical keys are plain data; serialization cannot fail for
            // them, but a digest of zero still behaves correctly because
            // lookups validate the full key structure.
            0
        });
        Fingerprint { hash, keys }
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }
}

struct CacheSlot {
    keys: Vec<ArgKey>,
    artifact: Arc<CompiledArtifact>,
}

/// Shared, process-wide mutable cache state. Entries are created on miss and
/// never mutated afterwards; only the counters move. Concurrent misses on the
/// same fingerprint may both compile; the last writer wins.
pub struct CallCache {
    mode: CacheMode,
    entries: Mutex<HashMap<u64, Vec<CacheSlot>>>,
    last: Mutex<Option<Arc<CompiledArtifact>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CallCache {
    pub fn new(mode: CacheMode) -> Self {
        CallCache {
            mode,
            entries: Mutex::new(HashMap::new()),
            last: Mutex::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Looks up a fingerprint, counting the hit or miss. A missing
    /// fingerprint is never an error.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<Arc<CompiledArtifact>> {
        let found = match self.mode {
            CacheMode::Disabled => None,
            CacheMode::LastExecuted => self.last.lock().expect("call cache poisoned").clone(),
            CacheMode::Static => {
                let entries = self.entries.lock().expect("call cache poisoned");
                entries.get(&fingerprint.hash).and_then(|slots| {
                    slots
                        .iter()
                        .find(|slot| slot.keys == fingerprint.keys)
                        .map(|slot| slot.artifact.clone())
                })
            }
        };

        match &found {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                profiling::cache_event("call_cache_hit");
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                profiling::cache_event("call_cache_miss");
            }
        }
        found
    }

    /// Stores a compiled artifact for the fingerprint.
    pub fn store(&self, fingerprint: &Fingerprint, artifact: Arc<CompiledArtifact>) {
        *self.last.lock().expect("call cache poisoned") = Some(artifact.clone());
        if self.mode != CacheMode::Static {
            return;
        }
        let mut entries = self.entries.lock().expect("call cache poisoned");
        let slots = entries.entry(fingerprint.hash).or_default();
        match slots
            .iter_mut()
            .find(|slot| slot.keys == fingerprint.keys)
        {
            Some(slot) => slot.artifact = artifact,
            None => slots.push(CacheSlot {
                keys: fingerprint.keys.clone(),
                artifact,
            }),
        }
        profiling::cache_event("call_cache_store");
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Drops all entries and resets the counters.
    pub fn clear(&self) {
        self.entries.lock().expect("call cache poisoned").clear();
        *self.last.lock().expect("call cache poisoned") = None;
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}
