//! The heterogeneous argument universe and its canonical forms.
//!
//! Every argument a recorded operation can receive is one of a closed set of
//! variants. Each concern that needs to walk arguments (printing, structural
//! comparison, cache fingerprinting) is a single recursive traversal over the
//! variant rather than ad hoc type checks at call sites.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::proxy::{ProxyMeta, ProxyRef, ScalarKind, TensorMeta};

/// A compile-time number argument.
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Number {
    /// Fixed-width key used for equality and hashing. Floats compare by bit
    /// pattern so NaN payloads stay distinguishable and hashing stays
    /// consistent with equality.
    fn key(self) -> (u8, u64) {
        match self {
            Number::Int(value) => (0, value as u64),
            Number::Float(value) => (1, value.to_bits()),
            Number::Bool(value) => (2, u64::from(value)),
        }
    }

    pub fn kind(self) -> ScalarKind {
        match self {
            Number::Int(_) => ScalarKind::Int,
            Number::Float(_) => ScalarKind::Float,
            Number::Bool(_) => ScalarKind::Bool,
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Number {}

impl std::hash::Hash for Number {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(value) => write!(f, "{value}"),
            Number::Float(value) => write!(f, "{value}"),
            Number::Bool(value) => write!(f, "{value}"),
        }
    }
}

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(0);

/// An opaque object argument the pipeline cannot look inside.
///
/// Carries a process-unique identity and, when the object is serializable, a
/// canonical representation. Structural comparison uses the representation
/// when both sides have one and falls back to identity otherwise, so two
/// distinct unserializable objects never compare equal.
#[derive(Debug, Clone)]
pub struct OpaqueRef {
    id: u64,
    repr: Option<String>,
}

impl OpaqueRef {
    pub fn new() -> Self {
        OpaqueRef {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            repr: None,
        }
    }

    pub fn with_repr(repr: impl Into<String>) -> Self {
        OpaqueRef {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            repr: Some(repr.into()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn repr(&self) -> Option<&str> {
        self.repr.as_deref()
    }
}

impl Default for OpaqueRef {
    fn default() -> Self {
        OpaqueRef::new()
    }
}

static NEXT_TENSOR_ID: AtomicU64 = AtomicU64::new(0);

/// Runtime descriptor for an array-like call argument: static metadata plus a
/// stable storage identity. The identity never reaches cache fingerprints;
/// only the metadata does.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorArg {
    pub meta: TensorMeta,
    pub id: u64,
}

impl TensorArg {
    pub fn new(meta: TensorMeta) -> Self {
        TensorArg {
            meta,
            id: NEXT_TENSOR_ID.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// A value that can appear as an operation argument or output.
#[derive(Debug, Clone)]
pub enum Value {
    /// Recording placeholder owned by the active trace.
    Proxy(ProxyRef),
    /// Runtime tensor descriptor supplied at call time.
    Tensor(TensorArg),
    Number(Number),
    Str(String),
    /// Ordered container of further values.
    Seq(Vec<Value>),
    Opaque(OpaqueRef),
    Null,
}

impl Value {
    pub fn int(value: i64) -> Self {
        Value::Number(Number::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Value::Number(Number::Float(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Value::Str(value.into())
    }

    pub fn tensor(meta: TensorMeta) -> Self {
        Value::Tensor(TensorArg::new(meta))
    }

    pub fn as_proxy(&self) -> Option<&ProxyRef> {
        match self {
            Value::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    /// Canonical form driving structural equality and hashing.
    pub fn structural(&self) -> Structural {
        match self {
            Value::Proxy(proxy) => Structural::Proxy {
                name: proxy.name().to_string(),
                meta: proxy.meta().clone(),
            },
            Value::Tensor(arg) => Structural::Tensor {
                meta: arg.meta.clone(),
                id: arg.id,
            },
            Value::Number(number) => match number {
                Number::Int(value) => Structural::Int(*value),
                Number::Float(value) => Structural::FloatBits(value.to_bits()),
                Number::Bool(value) => Structural::Bool(*value),
            },
            Value::Str(value) => Structural::Str(value.clone()),
            Value::Seq(items) => Structural::Seq(items.iter().map(Value::structural).collect()),
            Value::Opaque(opaque) => match opaque.repr() {
                Some(repr) => Structural::Opaque {
                    id: None,
                    repr: Some(repr.to_string()),
                },
                None => Structural::Opaque {
                    id: Some(opaque.id()),
                    repr: None,
                },
            },
            Value::Null => Structural::Null,
        }
    }

    /// Collects every proxy reachable through containers, in order.
    pub fn collect_proxies(&self, out: &mut Vec<ProxyRef>) {
        match self {
            Value::Proxy(proxy) => out.push(proxy.clone()),
            Value::Seq(items) => {
                for item in items {
                    item.collect_proxies(out);
                }
            }
            _ => {}
        }
    }

    /// Rewrites proxy leaves through a substitution, leaving everything else
    /// untouched.
    pub fn substitute<F>(&self, lookup: &F) -> Value
    where
        F: Fn(&str) -> Option<ProxyRef>,
    {
        match self {
            Value::Proxy(proxy) => match lookup(proxy.name()) {
                Some(replacement) => Value::Proxy(replacement),
                None => self.clone(),
            },
            Value::Seq(items) => Value::Seq(items.iter().map(|v| v.substitute(lookup)).collect()),
            other => other.clone(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.structural() == other.structural()
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Proxy(proxy) => write!(f, "{proxy}"),
            Value::Tensor(arg) => write!(f, "tensor#{}: {}", arg.id, arg.meta),
            Value::Number(number) => write!(f, "{number}"),
            Value::Str(value) => write!(f, "{value:?}"),
            Value::Seq(items) => {
                f.write_str("(")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Value::Opaque(opaque) => match opaque.repr() {
                Some(repr) => write!(f, "object<{repr}>"),
                None => write!(f, "object#{}", opaque.id()),
            },
            Value::Null => f.write_str("null"),
        }
    }
}

/// Fixed, order-preserving primitive representation of a value. Reducing every
/// argument to this form before comparing or hashing collapses container-type
/// differences that do not affect semantics and keeps hashing consistent with
/// equality across nested structures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Structural {
    Proxy { name: String, meta: ProxyMeta },
    Tensor { meta: TensorMeta, id: u64 },
    Int(i64),
    FloatBits(u64),
    Bool(bool),
    Str(String),
    Seq(Vec<Structural>),
    Opaque { id: Option<u64>, repr: Option<String> },
    Null,
}
