//! Call-level driver: fingerprint, replay or trace-and-compile, store.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use crate::cache::{CacheMode, CallCache, Fingerprint};
use crate::error::ConfigError;
use crate::executor::ExecutorRegistry;
use crate::partition::{PartitionOptions, Region};
use crate::passes::{run_passes, PassRun};
use crate::trace::{push_trace, Trace, Value};

/// Options recognized by [`CompiledProgram`].
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    pub cache: CacheMode,
    /// Whether layout bookends are hoisted out of fusion regions.
    pub bookend: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            cache: CacheMode::Static,
            bookend: true,
        }
    }
}

impl CompileOptions {
    /// Builds options from the two mutually exclusive cache flags. Requesting
    /// both is a fatal configuration error, reported before any compilation.
    pub fn from_cache_flags(
        use_static_caching: bool,
        use_last_executed: bool,
    ) -> Result<Self, ConfigError> {
        let cache = match (use_static_caching, use_last_executed) {
            (true, true) => {
                return Err(ConfigError {
                    first: "use_static_caching",
                    second: "use_last_executed",
                })
            }
            (false, true) => CacheMode::LastExecuted,
            (true, false) => CacheMode::Static,
            (false, false) => CacheMode::Disabled,
        };
        Ok(CompileOptions {
            cache,
            ..CompileOptions::default()
        })
    }
}

/// Everything produced by one compilation: the per-pass snapshots, the final
/// trace, and its executor regions. Never mutated after creation.
#[derive(Debug)]
pub struct CompiledArtifact {
    pub run: PassRun,
}

impl CompiledArtifact {
    pub fn regions(&self) -> &[Region] {
        &self.run.regions
    }

    pub fn trace(&self) -> &Trace {
        &self.run.trace
    }
}

/// A recordable program. The closure receives proxy-converted arguments and
/// runs once per cache miss under an active recording context.
pub type TracedFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// A program compiled on first call and replayed from the cache afterwards.
pub struct CompiledProgram {
    f: TracedFn,
    registry: ExecutorRegistry,
    options: CompileOptions,
    cache: CallCache,
    /// Parameters of a wrapped stateful callable; their metadata participates
    /// in the fingerprint like arguments.
    params: Mutex<Vec<Value>>,
    last_run: Mutex<Option<Arc<CompiledArtifact>>>,
}

impl CompiledProgram {
    pub fn new(f: TracedFn, registry: ExecutorRegistry, options: CompileOptions) -> Self {
        CompiledProgram {
            f,
            registry,
            options,
            cache: CallCache::new(options.cache),
            params: Mutex::new(Vec::new()),
            last_run: Mutex::new(None),
        }
    }

    /// Binds the mutable parameters of a wrapped module-like object.
    pub fn set_params(&self, params: Vec<Value>) {
        *self.params.lock().expect("compiled program poisoned") = params;
    }

    pub fn cache_mode(&self) -> CacheMode {
        self.cache.mode()
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache.hits()
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache.misses()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Snapshots from the most recent call, for inspection.
    pub fn last_traces(&self) -> Vec<(String, Trace)> {
        self.last_run
            .lock()
            .expect("compiled program poisoned")
            .as_ref()
            .map(|artifact| artifact.run.snapshots().to_vec())
            .unwrap_or_default()
    }

    /// Invokes the program: replays the cached artifact when the call is
    /// structurally indistinguishable from a prior one, compiles otherwise.
    pub fn call(&self, args: &[Value]) -> Result<Arc<CompiledArtifact>> {
        let params = self.params.lock().expect("compiled program poisoned").clone();
        let fingerprint = Fingerprint::of(args, &params);

        if let Some(artifact) = self.cache.lookup(&fingerprint) {
            *self.last_run.lock().expect("compiled program poisoned") = Some(artifact.clone());
            return Ok(artifact);
        }

        let artifact = Arc::new(self.compile_once(args, &params)?);
        self.cache.store(&fingerprint, artifact.clone());
        *self.last_run.lock().expect("compiled program poisoned") = Some(artifact.clone());
        Ok(artifact)
    }

    /// Runs the program once under a fresh recording context and compiles the
    /// resulting trace. The context guard restores the previous recording
    /// state even when the program fails mid-trace.
    fn compile_once(&self, args: &[Value], params: &[Value]) -> Result<CompiledArtifact> {
        let scope = push_trace(Trace::new("interpretation"));
        let handle = scope.handle();

        let mut proxy_args = Vec::with_capacity(args.len() + params.len());
        handle.with(|trace| -> Result<()> {
            for (index, arg) in args.iter().enumerate() {
                proxy_args.push(bind_input(trace, arg, &format!("a{index}"))?);
            }
            for (index, param) in params.iter().enumerate() {
                bind_input(trace, param, &format!("p{index}"))?;
            }
            Ok(())
        })?;

        let output = (self.f)(&proxy_args).context("traced program failed")?;
        handle.with(|trace| trace.set_output(output));

        let trace = scope.finish();
        let run = run_passes(
            trace,
            &self.registry,
            &PartitionOptions {
                bookend: self.options.bookend,
            },
        )?;
        Ok(CompiledArtifact { run })
    }
}

/// Converts one call argument into its recording-time form. Array-like
/// arguments become declared input proxies named after their position;
/// numbers, strings, and opaque objects pass through as compile-time
/// constants; containers convert elementwise.
fn bind_input(trace: &mut Trace, arg: &Value, name: &str) -> Result<Value> {
    match arg {
        Value::Tensor(tensor) => {
            let proxy = crate::trace::Proxy::tensor(name, tensor.meta.clone());
            trace.add_input(proxy.clone());
            Ok(Value::Proxy(proxy))
        }
        Value::Seq(items) => {
            let mut converted = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                converted.push(bind_input(trace, item, &format!("{name}_{index}"))?);
            }
            Ok(Value::Seq(converted))
        }
        other => Ok(other.clone()),
    }
}
