//! Trace intermediate representation: proxies, symbols, bound operations, and
//! the thread-local recording context.

mod context;
mod ir;
mod proxy;
mod symbol;
mod value;

pub use context::{
    begin_trace, current_trace, detached_trace, end_trace, push_trace, record, TraceHandle,
    TraceScope,
};
pub use ir::{BoundOp, StructuralKey, Trace};
pub use proxy::{DType, Device, Proxy, ProxyMeta, ProxyRef, ScalarKind, TensorMeta};
pub use symbol::{Args, EagerFn, MetaFn, OpTags, ProxySource, Symbol, SymbolId, SymbolRef};
pub use value::{Number, OpaqueRef, Structural, TensorArg, Value};
