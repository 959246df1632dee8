#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod core;
mod diagnostics;
mod engine;
mod error;
mod function;
mod graph;
mod request;
mod resolver;
mod value;

pub mod config;
pub mod io;
pub mod models;
pub mod utils;

pub use crate::core::{Mode, Path};
pub use crate::diagnostics::{Chain, Link};
pub use crate::engine::{
    AbortReason, CancelFlag, ExecuteOptions, ExecutionReport, Failure, RunState, Skip, SkipReason,
    TaskExecution, execute,
};
pub use crate::error::*;
pub use crate::function::{Callable, FunctionId, FunctionSpec, Inputs};
pub use crate::graph::{FunctionDef, Graph, GraphBuilder};
pub use crate::request::{Calculation, RequestState};
pub use crate::resolver::{ExecutionPlan, ResolveOptions, resolve};
pub use crate::value::{Value, ValueStore};

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_shared_types_are_thread_safe() {
        assert_send_sync::<Graph>();
        assert_send_sync::<ExecutionPlan>();
        assert_send_sync::<ValueStore>();
        assert_send_sync::<ExecutionReport>();
    }
}
