//! Thread-local recording context stack.
//!
//! Recording is a stack-discipline resource: starting a trace pushes a handle
//! onto a thread-local stack, every symbol invocation appends to the topmost
//! trace, and guards restore the previous context on drop, including when the
//! guarded scope unwinds. Each thread owns an independent stack; an
//! in-progress trace is never shared across threads.

use std::cell::RefCell;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::ir::{BoundOp, Trace};
use super::symbol::{Args, SymbolRef};
use super::value::Value;

/// Shared handle to a trace being recorded.
#[derive(Clone)]
pub struct TraceHandle(Arc<Mutex<Trace>>);

impl TraceHandle {
    pub fn new(trace: Trace) -> Self {
        TraceHandle(Arc::new(Mutex::new(trace)))
    }

    /// Runs `f` with exclusive access to the underlying trace.
    pub fn with<R>(&self, f: impl FnOnce(&mut Trace) -> R) -> R {
        let mut trace = self.0.lock().expect("trace handle poisoned");
        f(&mut trace)
    }

    /// Whether two handles refer to the same in-progress trace.
    pub fn same_trace(&self, other: &TraceHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Extracts the recorded trace, leaving an empty one behind.
    fn take(&self) -> Trace {
        let mut trace = self.0.lock().expect("trace handle poisoned");
        std::mem::replace(&mut *trace, Trace::new("detached"))
    }
}

thread_local! {
    static TRACE_STACK: RefCell<Vec<TraceHandle>> = const { RefCell::new(Vec::new()) };
}

/// RAII guard that pops the trace it pushed when dropped.
///
/// The pop happens unconditionally on drop, so an aborted recording always
/// restores the previous context.
pub struct TraceScope {
    handle: TraceHandle,
    active: bool,
}

impl TraceScope {
    pub fn handle(&self) -> TraceHandle {
        self.handle.clone()
    }

    /// Ends the scope and returns the recorded trace.
    pub fn finish(mut self) -> Trace {
        self.pop();
        self.handle.take()
    }

    fn pop(&mut self) {
        if self.active {
            TRACE_STACK.with(|stack| {
                stack.borrow_mut().pop();
            });
            self.active = false;
        }
    }
}

impl Drop for TraceScope {
    fn drop(&mut self) {
        self.pop();
    }
}

/// Pushes a trace onto this thread's context stack, returning the guard that
/// restores the previous context.
pub fn push_trace(trace: Trace) -> TraceScope {
    let handle = TraceHandle::new(trace);
    TRACE_STACK.with(|stack| {
        stack.borrow_mut().push(handle.clone());
    });
    TraceScope {
        handle,
        active: true,
    }
}

/// Starts a new recording context and returns its handle. Pair with
/// [`end_trace`]; nesting is allowed.
pub fn begin_trace(provenance: &str) -> TraceHandle {
    let handle = TraceHandle::new(Trace::new(provenance));
    TRACE_STACK.with(|stack| {
        stack.borrow_mut().push(handle.clone());
    });
    handle
}

/// Ends the recording context started by [`begin_trace`]. The handle must be
/// the topmost context on this thread.
pub fn end_trace(handle: &TraceHandle) -> Result<Trace> {
    TRACE_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        match stack.last() {
            Some(top) if top.same_trace(handle) => {
                stack.pop();
                Ok(handle.take())
            }
            Some(_) => Err(anyhow!(
                "end_trace called on a handle that is not the active recording context"
            )),
            None => Err(anyhow!("end_trace called with no active recording context")),
        }
    })
}

/// The topmost recording context on this thread, if any.
pub fn current_trace() -> Option<TraceHandle> {
    TRACE_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Runs `f` under a brand-new, independent trace context. Nothing recorded
/// inside leaks into the caller's trace, and the prior context is restored
/// even if `f` panics.
pub fn detached_trace<R>(f: impl FnOnce(&TraceHandle) -> R) -> R {
    let scope = push_trace(Trace::new("detached"));
    let handle = scope.handle();
    f(&handle)
}

/// Records one symbol invocation.
///
/// With an active trace, the symbol's meta function infers output proxies,
/// a bound operation is appended to the topmost trace, and the outputs are
/// returned. With no active trace, the symbol computes directly; that is not
/// an error.
pub fn record(sym: &SymbolRef, args: Args) -> Result<Value> {
    let Some(handle) = current_trace() else {
        return Ok(sym.eager(&args)?);
    };

    handle.with(|trace| {
        let output = (sym.meta())(&args, &mut *trace)?;
        trace.push(BoundOp::new(
            sym.clone(),
            args.positional,
            args.keyword,
            output.clone(),
        ));
        Ok(output)
    })
}
