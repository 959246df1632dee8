use std::sync::Arc;

use thiserror::Error;

use crate::core::ArcStr;
use crate::diagnostics::Chain;
use crate::{Path, Value};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValueError {
    #[error("Expected a {expected} value, found a {found}")]
    Mismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Vector length mismatch: {0} vs {1}")]
    Length(usize, usize),
}

#[derive(Debug, Error)]
pub enum GraphBuildError {
    #[error(
        "Output '{path}' is declared by both '{first}' and '{second}', and at least one of them is exclusive"
    )]
    DuplicateOutput {
        path: Path,
        first: ArcStr,
        second: ArcStr,
    },

    #[error("Function '{0}' is already registered")]
    DuplicateFunction(ArcStr),

    #[error(transparent)]
    Unreachable(#[from] UnreachableDeclarationError),
}

/// A function reads a path which is neither a primary input nor produced by
/// any registered function.
#[derive(Debug, Error, Clone)]
#[error("Function '{function}' reads '{path}', which no function produces and is not a primary input: {chain}")]
pub struct UnreachableDeclarationError {
    pub path: Path,
    pub function: ArcStr,
    pub chain: Chain,
}

#[derive(Debug, Error, Clone)]
pub enum ResolutionError {
    #[error(transparent)]
    MissingInput(#[from] MissingInputError),

    #[error(transparent)]
    Cycle(#[from] CycleError),
}

/// A requested output cannot be materialized from the known inputs.
#[derive(Debug, Error, Clone)]
#[error("Cannot materialize '{path}' from the known inputs: {chain}")]
pub struct MissingInputError {
    /// The first unreachable desired output.
    pub path: Path,
    /// Shortest chain from `path` down to a path nobody can provide.
    pub chain: Chain,
}

/// The functions needed for a request depend on each other in a loop.
#[derive(Debug, Error, Clone)]
#[error("Dependency cycle: {chain}")]
pub struct CycleError {
    /// Cycle members, starting at the earliest registered one.
    pub functions: Vec<ArcStr>,
    pub chain: Chain,
}

/// Failure raised by the logic of a single function.
#[derive(Debug, Error, Clone)]
#[error("Function '{function}' failed: {cause:#}")]
pub struct FunctionExecutionError {
    pub function: ArcStr,
    /// The values the function was given.
    pub inputs: Vec<(Path, Value)>,
    pub cause: Arc<anyhow::Error>,
}

/// Some functions of a plan failed or did not run, while others succeeded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error(
    "{failed} function(s) failed, {skipped} skipped after upstream failures, {pending} not started; {succeeded} succeeded"
)]
pub struct PartialPlanFailure {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Cannot {action} a calculation in state {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: crate::RequestState,
    },

    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

#[derive(Debug, Error)]
pub enum IoError {
    #[error("Couldn't access file.\n{0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Couldn't parse JSON.\n{0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported value at '{0}': {1}")]
    Shape(Path, &'static str),

    #[error("Path '{0}' is both a value and a parent of other values")]
    Conflict(Path),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OverrideError {
    #[error("Not a KEY=VALUE syntax: {0}")]
    Syntax(String),
}

/// An engine model rejected before anything is calculated from it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("Invalid value at '{path}': {source}")]
    Kind { path: Path, source: ValueError },

    #[error("'{path}' must be a positive number, found {value}")]
    NotPositive { path: Path, value: f64 },

    #[error("Unknown fuel '{fuel}', expected one of: {expected}")]
    UnknownFuel { fuel: String, expected: String },

    #[error("Idle speed ({idle} rpm) must be below the rated speed ({rated} rpm)")]
    SpeedRange { idle: f64, rated: f64 },
}

#[derive(Debug, Error)]
pub enum KeisanError {
    #[error("Error while building the graph.\n{0}")]
    Build(#[from] GraphBuildError),

    #[error("Error while resolving the request.\n{0}")]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("Error while reading or writing values.\n{0}")]
    Io(#[from] IoError),

    #[error(transparent)]
    Override(#[from] OverrideError),

    #[error("Model validation failed.\n{0}")]
    Model(#[from] ModelError),

    #[error(transparent)]
    Partial(#[from] PartialPlanFailure),
}
