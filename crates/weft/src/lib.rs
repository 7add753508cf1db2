//! weft: a tracing compiler core.
//!
//! Programs are recorded as traces of bound operations, cleaned up by
//! dead-code and common-subexpression elimination, partitioned into executor
//! regions with a dependency-respecting fusion merge and bookend hoist, and
//! cached at the call level by argument-metadata fingerprints.

pub mod analysis;
pub mod cache;
pub mod compile;
pub mod error;
pub mod executor;
pub mod hashing;
pub mod partition;
pub mod passes;
pub mod prims;
pub mod profiling;
pub mod trace;

pub use cache::{CacheMode, CallCache, Fingerprint};
pub use compile::{CompileOptions, CompiledArtifact, CompiledProgram};
pub use executor::{Executor, ExecutorRegistry};
pub use partition::{PartitionOptions, Region};
pub use passes::{run_passes, PassRun};
pub use trace::{
    begin_trace, detached_trace, end_trace, record, Args, BoundOp, DType, Device, Proxy, Symbol,
    TensorMeta, Trace, Value,
};
