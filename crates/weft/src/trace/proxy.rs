//! Static placeholders recorded in place of runtime values.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Logical element type carried by tensor metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Bool,
    I32,
    I64,
    F16,
    F32,
    F64,
}

impl DType {
    /// Returns `true` when the dtype is a floating-point representation.
    pub fn is_float(self) -> bool {
        matches!(self, DType::F16 | DType::F32 | DType::F64)
    }

    /// Returns `true` when the dtype is a signed integer.
    pub fn is_integer(self) -> bool {
        matches!(self, DType::I32 | DType::I64)
    }

    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Bool => 1,
            DType::F16 => 2,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            DType::Bool => "bool",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F16 => "f16",
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        f.write_str(tag)
    }
}

/// Device tag attached to tensor metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    Cpu,
    Cuda(u32),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

/// Shape, element type, and device of an array-like value. This is the entire
/// static description the pipeline ever sees; no data rides along.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorMeta {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub device: Device,
}

impl TensorMeta {
    pub fn new<S: Into<Vec<usize>>>(shape: S, dtype: DType, device: Device) -> Self {
        TensorMeta {
            shape: shape.into(),
            dtype,
            device,
        }
    }

    /// Returns the rank (number of axes).
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Computes the total number of elements implied by the shape.
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }
}

impl fmt::Display for TensorMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.dtype)?;
        for (idx, dim) in self.shape.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dim}")?;
        }
        write!(f, "]@{}", self.device)
    }
}

/// Scalar category for number-valued proxies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    Int,
    Float,
    Bool,
}

/// Static metadata attached to a proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProxyMeta {
    Tensor(TensorMeta),
    Scalar(ScalarKind),
}

/// A named placeholder standing in for a runtime value while recording.
///
/// Proxies are created by the trace that owns them and are never shared across
/// traces; the name is unique within that trace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Proxy {
    name: String,
    meta: ProxyMeta,
}

/// Shared proxy handle. Cloning is cheap; equality is by name and metadata,
/// not by pointer.
pub type ProxyRef = Arc<Proxy>;

impl Proxy {
    pub fn new(name: impl Into<String>, meta: ProxyMeta) -> ProxyRef {
        Arc::new(Proxy {
            name: name.into(),
            meta,
        })
    }

    pub fn tensor(name: impl Into<String>, meta: TensorMeta) -> ProxyRef {
        Proxy::new(name, ProxyMeta::Tensor(meta))
    }

    pub fn scalar(name: impl Into<String>, kind: ScalarKind) -> ProxyRef {
        Proxy::new(name, ProxyMeta::Scalar(kind))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> &ProxyMeta {
        &self.meta
    }

    /// Tensor metadata when the proxy is array-like.
    pub fn tensor_meta(&self) -> Option<&TensorMeta> {
        match &self.meta {
            ProxyMeta::Tensor(meta) => Some(meta),
            ProxyMeta::Scalar(_) => None,
        }
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.meta {
            ProxyMeta::Tensor(meta) => write!(f, "{}: {}", self.name, meta),
            ProxyMeta::Scalar(kind) => write!(f, "{}: {:?}", self.name, kind),
        }
    }
}
