mod runner;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{FunctionExecutionError, PartialPlanFailure};
use crate::function::{FunctionId, FunctionSpec, Inputs};
use crate::{ExecutionPlan, Graph, Path, Value, ValueStore};

/// Cooperative cancellation flag shared between a caller and a running
/// execution. Checked before each function is launched; functions already
/// running are never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options controlling [`execute`].
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Run functions even when all their outputs are already in the store.
    pub force_recompute: bool,
    /// Stop launching functions after the first failure.
    pub abort_on_first_failure: bool,
    /// Run independent functions concurrently on the rayon pool.
    pub parallel: bool,
    pub cancel: Option<CancelFlag>,
}

impl ExecuteOptions {
    pub fn force_recompute(mut self, force: bool) -> Self {
        self.force_recompute = force;
        self
    }

    pub fn abort_on_first_failure(mut self, abort: bool) -> Self {
        self.abort_on_first_failure = abort;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled)
    }
}

/// Final state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Every planned function succeeded or was skipped as already known.
    Completed,
    /// Some functions failed, were skipped after a failure, or never started.
    PartiallyCompleted,
    /// The run hit a non-recoverable condition, see [`AbortReason`].
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The cancellation flag was raised.
    Cancelled,
    /// The plan references a function the graph doesn't have.
    StalePlan(FunctionId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Every output was already present in the store.
    AlreadyKnown,
    /// These inputs were missing, because an upstream function failed or was
    /// skipped itself.
    UpstreamFailure { missing: Vec<Path> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skip {
    pub function: FunctionId,
    pub reason: SkipReason,
}

#[derive(Debug, Clone)]
pub struct Failure {
    pub function: FunctionId,
    pub error: FunctionExecutionError,
}

/// When a function ran and for how long.
#[derive(Debug, Clone, Copy)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Succeeded,
    Failed,
    SkippedUpstream,
    SkippedKnown,
    Pending,
}

/// What happened to every function of a plan. All lists are in plan order.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub succeeded: Vec<FunctionId>,
    pub failed: Vec<Failure>,
    pub skipped: Vec<Skip>,
    /// Functions that were never started, after an abort or a failure with
    /// `abort_on_first_failure`.
    pub pending: Vec<FunctionId>,
    /// Values written by this run.
    pub produced_values: ValueStore,
    pub state: RunState,
    pub abort: Option<AbortReason>,
    pub execution_times: BTreeMap<FunctionId, TaskExecution>,
    order: Vec<FunctionId>,
}

impl ExecutionReport {
    pub fn failed_ids(&self) -> Vec<FunctionId> {
        self.failed.iter().map(|f| f.function).collect()
    }

    pub fn skipped_ids(&self) -> Vec<FunctionId> {
        self.skipped.iter().map(|s| s.function).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.state == RunState::Completed
    }

    /// The partial-failure condition of this run, if any function failed, was
    /// skipped after a failure, or never started.
    pub fn partial_failure(&self) -> Option<PartialPlanFailure> {
        let skipped = self
            .skipped
            .iter()
            .filter(|s| matches!(s.reason, SkipReason::UpstreamFailure { .. }))
            .count();

        if self.failed.is_empty() && skipped == 0 && self.pending.is_empty() {
            return None;
        }

        Some(PartialPlanFailure {
            succeeded: self.succeeded.len(),
            failed: self.failed.len(),
            skipped,
            pending: self.pending.len(),
        })
    }

    /// Every planned function with its outcome, in plan order.
    pub(crate) fn outcomes(&self) -> impl Iterator<Item = (FunctionId, Outcome)> + '_ {
        self.order.iter().map(|&id| {
            let outcome = if self.succeeded.contains(&id) {
                Outcome::Succeeded
            } else if self.failed.iter().any(|f| f.function == id) {
                Outcome::Failed
            } else if let Some(skip) = self.skipped.iter().find(|s| s.function == id) {
                match skip.reason {
                    SkipReason::AlreadyKnown => Outcome::SkippedKnown,
                    SkipReason::UpstreamFailure { .. } => Outcome::SkippedUpstream,
                }
            } else {
                Outcome::Pending
            };
            (id, outcome)
        })
    }
}

/// Runs `plan` against `store`.
///
/// Functions whose outputs are all in the store already are skipped unless
/// `force_recompute` is set. A failing function only takes down the functions
/// that depend on its outputs; independent branches keep running. The store is
/// updated in place, and the values written are also returned in the report.
pub fn execute(
    graph: &Graph,
    plan: &ExecutionPlan,
    store: &mut ValueStore,
    options: &ExecuteOptions,
) -> ExecutionReport {
    let start = Instant::now();

    let mut specs = Vec::with_capacity(plan.len());
    for &id in plan.steps() {
        let Some(spec) = graph.function(id) else {
            let mut recorder = Recorder::new(plan);
            recorder.abort(AbortReason::StalePlan(id));
            return recorder.finish_report();
        };
        specs.push(spec);
    }

    let report = if options.parallel {
        runner::run_parallel(plan, &specs, store, options)
    } else {
        runner::run_sequential(plan, &specs, store, options)
    };

    tracing::info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        skipped = report.skipped.len(),
        pending = report.pending.len(),
        state = ?report.state,
        "finished plan {}",
        crate::utils::as_overhead(start)
    );

    report
}

/// What to do with a function whose predecessors are all settled.
enum Decision {
    Skip(SkipReason),
    Invoke(Inputs),
}

fn decide(
    spec: &FunctionSpec,
    store: &ValueStore,
    missing: &HashSet<Path>,
    options: &ExecuteOptions,
) -> Decision {
    let available = |path: &Path| store.contains(path) && !missing.contains(path);

    if !options.force_recompute && !spec.outputs.is_empty() && spec.outputs.iter().all(available) {
        return Decision::Skip(SkipReason::AlreadyKnown);
    }

    let absent: Vec<Path> = spec
        .inputs
        .iter()
        .filter(|path| !available(*path))
        .cloned()
        .collect();

    if !absent.is_empty() {
        return Decision::Skip(SkipReason::UpstreamFailure { missing: absent });
    }

    let entries = spec
        .inputs
        .iter()
        .filter_map(|path| store.get(path).map(|value| (path.clone(), value.clone())))
        .collect();

    Decision::Invoke(Inputs::new(entries))
}

/// Calls the function logic, turning errors, panics and a wrong number of
/// outputs into a [`FunctionExecutionError`].
fn invoke(spec: &FunctionSpec, inputs: Inputs) -> Result<Vec<Value>, FunctionExecutionError> {
    // The callable only sees its own inputs, so a panic can't leave shared
    // state half-written.
    let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| spec.call(&inputs))) {
        Ok(result) => result,
        Err(panic) => {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                format!("Function panicked: {s}")
            } else if let Some(s) = panic.downcast_ref::<String>() {
                format!("Function panicked: {s}")
            } else {
                String::from("Function panicked with unknown payload")
            };

            Err(anyhow::anyhow!(msg))
        }
    };

    let result = result.and_then(|values| {
        if values.len() == spec.outputs.len() {
            Ok(values)
        } else {
            Err(anyhow::anyhow!(
                "returned {} value(s) for {} declared output(s)",
                values.len(),
                spec.outputs.len()
            ))
        }
    });

    result.map_err(|cause| FunctionExecutionError {
        function: spec.name.clone(),
        inputs: inputs.into_entries(),
        cause: Arc::new(cause),
    })
}

/// Bookkeeping shared by both runners.
struct Recorder<'a> {
    plan: &'a ExecutionPlan,
    missing: HashSet<Path>,
    succeeded: HashSet<FunctionId>,
    failed: Vec<Failure>,
    skipped: Vec<Skip>,
    produced: ValueStore,
    execution_times: BTreeMap<FunctionId, TaskExecution>,
    abort: Option<AbortReason>,
}

impl<'a> Recorder<'a> {
    fn new(plan: &'a ExecutionPlan) -> Self {
        Self {
            plan,
            missing: HashSet::new(),
            succeeded: HashSet::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            produced: ValueStore::new(),
            execution_times: BTreeMap::new(),
            abort: None,
        }
    }

    fn skip(&mut self, id: FunctionId, spec: &FunctionSpec, reason: SkipReason) {
        match &reason {
            SkipReason::AlreadyKnown => {
                tracing::debug!(function = %spec.name, "outputs already known, skipping");
            }
            SkipReason::UpstreamFailure { missing } => {
                tracing::info!(function = %spec.name, ?missing, "inputs missing after upstream failure, skipping");
                self.missing.extend(spec.outputs.iter().cloned());
            }
        }
        self.skipped.push(Skip {
            function: id,
            reason,
        });
    }

    /// Records the result of an invocation. Returns whether it failed.
    fn finish(
        &mut self,
        id: FunctionId,
        spec: &FunctionSpec,
        result: Result<Vec<Value>, FunctionExecutionError>,
        timing: TaskExecution,
        store: &mut ValueStore,
    ) -> bool {
        self.execution_times.insert(id, timing);

        match result {
            Ok(values) => {
                for (path, value) in spec.outputs.iter().zip(values) {
                    self.missing.remove(path);
                    self.produced.insert(path.clone(), value.clone());
                    store.insert(path.clone(), value);
                }
                tracing::debug!(function = %spec.name, "succeeded in {:.2?}", timing.duration);
                self.succeeded.insert(id);
                false
            }
            Err(error) => {
                tracing::warn!("{error}");
                self.missing.extend(spec.outputs.iter().cloned());
                self.failed.push(Failure {
                    function: id,
                    error,
                });
                true
            }
        }
    }

    fn abort(&mut self, reason: AbortReason) {
        if self.abort.is_none() {
            tracing::error!(?reason, "aborting execution");
            self.abort = Some(reason);
        }
    }

    fn finish_report(self) -> ExecutionReport {
        let order = self.plan.steps().to_vec();
        let position = |id: &FunctionId| order.iter().position(|x| x == id);

        let mut failed = self.failed;
        failed.sort_by_key(|f| position(&f.function));

        let mut skipped = self.skipped;
        skipped.sort_by_key(|s| position(&s.function));

        let succeeded: Vec<_> = order
            .iter()
            .copied()
            .filter(|id| self.succeeded.contains(id))
            .collect();

        let pending: Vec<_> = order
            .iter()
            .copied()
            .filter(|id| {
                !self.succeeded.contains(id)
                    && !failed.iter().any(|f| f.function == *id)
                    && !skipped.iter().any(|s| s.function == *id)
            })
            .collect();

        let partial = !failed.is_empty()
            || !pending.is_empty()
            || skipped
                .iter()
                .any(|s| matches!(s.reason, SkipReason::UpstreamFailure { .. }));

        let state = match (&self.abort, partial) {
            (Some(_), _) => RunState::Aborted,
            (None, true) => RunState::PartiallyCompleted,
            (None, false) => RunState::Completed,
        };

        ExecutionReport {
            succeeded,
            failed,
            skipped,
            pending,
            produced_values: self.produced,
            state,
            abort: self.abort,
            execution_times: self.execution_times,
            order,
        }
    }
}
