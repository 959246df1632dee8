//! A single calculation request against a shared [`Graph`].
//!
//! ```text
//! NotStarted -> Resolving -> Resolved -> Executing -> Completed
//!                        \-> ResolutionFailed    |-> PartiallyCompleted
//!                                                \-> Aborted
//! ```

use crate::engine::{ExecuteOptions, ExecutionReport, RunState};
use crate::error::RequestError;
use crate::resolver::{ExecutionPlan, ResolveOptions};
use crate::{Graph, Path, ValueStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    NotStarted,
    Resolving,
    Resolved,
    ResolutionFailed,
    Executing,
    Completed,
    PartiallyCompleted,
    Aborted,
}

impl RequestState {
    /// Whether no further transition is possible.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            Self::ResolutionFailed | Self::Completed | Self::PartiallyCompleted | Self::Aborted
        )
    }
}

/// Owns the value store of one request and drives it from resolution to a
/// final state.
pub struct Calculation<'g> {
    graph: &'g Graph,
    store: ValueStore,
    desired: Vec<Path>,
    state: RequestState,
    plan: Option<ExecutionPlan>,
    report: Option<ExecutionReport>,
}

impl<'g> Calculation<'g> {
    /// The paths held by `store` are the known inputs of the request.
    pub fn new<D>(graph: &'g Graph, store: ValueStore, desired: D) -> Self
    where
        D: IntoIterator,
        D::Item: Into<Path>,
    {
        Self {
            graph,
            store,
            desired: desired.into_iter().map(Into::into).collect(),
            state: RequestState::NotStarted,
            plan: None,
            report: None,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn store(&self) -> &ValueStore {
        &self.store
    }

    pub fn into_store(self) -> ValueStore {
        self.store
    }

    pub fn plan(&self) -> Option<&ExecutionPlan> {
        self.plan.as_ref()
    }

    pub fn report(&self) -> Option<&ExecutionReport> {
        self.report.as_ref()
    }

    pub fn resolve(&mut self, options: &ResolveOptions) -> Result<&ExecutionPlan, RequestError> {
        self.expect_state("resolve", RequestState::NotStarted)?;
        self.state = RequestState::Resolving;

        let known = self.store.paths();
        match crate::resolve(self.graph, known, self.desired.iter().cloned(), options) {
            Ok(plan) => {
                tracing::debug!(steps = plan.len(), "request resolved");
                self.state = RequestState::Resolved;
                Ok(self.plan.insert(plan))
            }
            Err(err) => {
                self.state = RequestState::ResolutionFailed;
                Err(err.into())
            }
        }
    }

    pub fn execute(&mut self, options: &ExecuteOptions) -> Result<&ExecutionReport, RequestError> {
        self.expect_state("execute", RequestState::Resolved)?;
        let Some(plan) = self.plan.as_ref() else {
            return Err(self.invalid("execute"));
        };

        self.state = RequestState::Executing;
        let report = crate::execute(self.graph, plan, &mut self.store, options);

        self.state = match report.state {
            RunState::Completed => RequestState::Completed,
            RunState::PartiallyCompleted => RequestState::PartiallyCompleted,
            RunState::Aborted => RequestState::Aborted,
        };

        Ok(self.report.insert(report))
    }

    /// Resolves and executes in one go.
    pub fn run(
        &mut self,
        resolve: &ResolveOptions,
        execute: &ExecuteOptions,
    ) -> Result<&ExecutionReport, RequestError> {
        self.resolve(resolve)?;
        self.execute(execute)
    }

    fn expect_state(&self, action: &'static str, expected: RequestState) -> Result<(), RequestError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &'static str) -> RequestError {
        RequestError::InvalidTransition {
            action,
            state: self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GraphBuilder, Inputs, ResolutionError, Value};

    fn graph() -> Graph {
        let mut builder = GraphBuilder::new();
        builder.primary_input("/in");
        builder
            .function("double")
            .inputs(["/in/a"])
            .outputs(["/b"])
            .register(|inputs: &Inputs| Ok(vec![inputs[0].map(|x| x * 2.0)?]))
            .unwrap();
        builder
            .function("fail")
            .inputs(["/in/a"])
            .outputs(["/c"])
            .register(|_: &Inputs| anyhow::bail!("failed"))
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_completed() {
        let graph = graph();
        let store: ValueStore = [("/in/a", 2.0)].into_iter().collect();
        let mut calc = Calculation::new(&graph, store, ["/b"]);
        assert_eq!(calc.state(), RequestState::NotStarted);

        calc.resolve(&Default::default()).unwrap();
        assert_eq!(calc.state(), RequestState::Resolved);

        calc.execute(&Default::default()).unwrap();
        assert_eq!(calc.state(), RequestState::Completed);
        assert!(calc.state().is_final());
        assert_eq!(calc.store().get(&Path::new("/b")), Some(&Value::Scalar(4.0)));
    }

    #[test]
    fn test_partially_completed() {
        let graph = graph();
        let store: ValueStore = [("/in/a", 2.0)].into_iter().collect();
        let mut calc = Calculation::new(&graph, store, ["/b", "/c"]);

        let report = calc.run(&Default::default(), &Default::default()).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(calc.state(), RequestState::PartiallyCompleted);
    }

    #[test]
    fn test_resolution_failed() {
        let graph = graph();
        let mut calc = Calculation::new(&graph, ValueStore::new(), ["/b"]);

        let err = calc.resolve(&Default::default()).unwrap_err();
        assert!(matches!(
            err,
            RequestError::Resolution(ResolutionError::MissingInput(_))
        ));
        assert_eq!(calc.state(), RequestState::ResolutionFailed);
    }

    #[test]
    fn test_invalid_transitions() {
        let graph = graph();
        let store: ValueStore = [("/in/a", 2.0)].into_iter().collect();
        let mut calc = Calculation::new(&graph, store, ["/b"]);

        let err = calc.execute(&Default::default()).unwrap_err();
        assert!(matches!(
            err,
            RequestError::InvalidTransition {
                action: "execute",
                state: RequestState::NotStarted
            }
        ));

        calc.run(&Default::default(), &Default::default()).unwrap();
        assert!(calc.resolve(&Default::default()).is_err());
        assert!(calc.execute(&Default::default()).is_err());
        assert_eq!(calc.state(), RequestState::Completed);
    }
}
