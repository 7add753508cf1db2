//! Error types shared across the trace pipeline.

use thiserror::Error;

/// Internal invariant violations. These indicate a bug in the pipeline, never
/// bad user input, and are propagated with enough context to reproduce.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("proxy `{proxy}` consumed by `{op}` has no producer and is not a trace input")]
    MissingProducer { proxy: String, op: String },

    #[error("proxy `{proxy}` is produced more than once (ops {first} and {second})")]
    DuplicateProducer {
        proxy: String,
        first: usize,
        second: usize,
    },

    #[error("region assigned to executor `{executor}` was left without operations")]
    EmptyRegion { executor: String },

    #[error("generated name `{name}` collides with an existing name in trace `{provenance}`")]
    DuplicateName { name: String, provenance: String },

    #[error("region list is not a valid topological order: region {region} depends on later region {dependency}")]
    RegionOrder { region: usize, dependency: usize },
}

/// Fatal configuration conflicts, reported before any work happens.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("conflicting options: `{first}` and `{second}` cannot be requested together")]
pub struct ConfigError {
    pub first: &'static str,
    pub second: &'static str,
}

/// An operation could not be handled for the given arguments. Recoverable by
/// the caller; always names the offending symbol.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("`{symbol}` does not support {detail}")]
pub struct UnsupportedOpError {
    pub symbol: String,
    pub detail: String,
}

impl UnsupportedOpError {
    pub fn new(symbol: impl Into<String>, detail: impl Into<String>) -> Self {
        UnsupportedOpError {
            symbol: symbol.into(),
            detail: detail.into(),
        }
    }
}
