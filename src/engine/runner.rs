use std::collections::VecDeque;
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use super::{AbortReason, Decision, ExecuteOptions, ExecutionReport, Recorder, TaskExecution};
use crate::error::FunctionExecutionError;
use crate::function::FunctionSpec;
use crate::{ExecutionPlan, Value, ValueStore};

fn plan_span(total: usize) -> tracing::Span {
    let span = tracing::span!(Level::INFO, "executing_plan");
    span.pb_set_length(total as u64);
    span.pb_set_style(&crate::utils::get_style_plan());
    span.pb_set_message("Running functions...");
    span
}

/// Runs the plan one function at a time, in plan order.
pub(super) fn run_sequential(
    plan: &ExecutionPlan,
    specs: &[&FunctionSpec],
    store: &mut ValueStore,
    options: &ExecuteOptions,
) -> ExecutionReport {
    let mut recorder = Recorder::new(plan);

    let root_span = plan_span(specs.len());
    let _enter = root_span.enter();

    for (&id, &spec) in plan.steps().iter().zip(specs) {
        if options.is_cancelled() {
            recorder.abort(AbortReason::Cancelled);
            break;
        }

        match super::decide(spec, store, &recorder.missing, options) {
            Decision::Skip(reason) => recorder.skip(id, spec, reason),
            Decision::Invoke(inputs) => {
                let span = tracing::span!(Level::INFO, "function", name = spec.name());
                let _enter = span.enter();

                let start = Instant::now();
                let result = super::invoke(spec, inputs);
                let timing = TaskExecution {
                    start,
                    duration: start.elapsed(),
                };

                let failed = recorder.finish(id, spec, result, timing, store);
                if failed && options.abort_on_first_failure {
                    break;
                }
            }
        }

        root_span.pb_inc(1);
    }

    recorder.finish_report()
}

/// Runs the plan on the rayon pool, starting each function as soon as every
/// earlier function it depends on has settled.
///
/// A function depends on an earlier one in the plan when either writes a path
/// the other reads or writes. The main thread owns the store and makes every
/// skip decision; workers only receive a copy of their inputs and send the
/// result back over a channel. Since a function is only decided once all of
/// its dependencies are settled, the outcome of every function matches the
/// sequential run.
pub(super) fn run_parallel(
    plan: &ExecutionPlan,
    specs: &[&FunctionSpec],
    store: &mut ValueStore,
    options: &ExecuteOptions,
) -> ExecutionReport {
    let mut recorder = Recorder::new(plan);
    let steps = plan.steps();
    let total = specs.len();

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); total];
    let mut dependency_counts = vec![0usize; total];

    for (i, spec) in specs.iter().enumerate() {
        for (j, earlier) in specs[..i].iter().enumerate() {
            let touches = earlier
                .outputs
                .iter()
                .any(|path| spec.inputs.contains(path) || spec.outputs.contains(path))
                || earlier.inputs.iter().any(|path| spec.outputs.contains(path));

            if touches {
                dependents[j].push(i);
                dependency_counts[i] += 1;
            }
        }
    }

    let root_span = plan_span(total);
    let _enter = root_span.enter();

    let pb_style = crate::utils::get_style_task();

    rayon::scope(|s| {
        // (plan index, result, start, duration)
        let (result_sender, result_receiver) = channel::<(
            usize,
            Result<Vec<Value>, FunctionExecutionError>,
            Instant,
            Duration,
        )>();

        let mut ready: VecDeque<usize> = (0..total).filter(|&i| dependency_counts[i] == 0).collect();
        let mut running = 0;
        let mut stopping = false;

        loop {
            while let Some(i) = ready.pop_front() {
                // Anything not launched from here on stays pending, along with
                // its dependents.
                if stopping {
                    continue;
                }
                if options.is_cancelled() {
                    recorder.abort(AbortReason::Cancelled);
                    stopping = true;
                    continue;
                }

                let spec = specs[i];

                match super::decide(spec, store, &recorder.missing, options) {
                    Decision::Skip(reason) => {
                        recorder.skip(steps[i], spec, reason);
                        root_span.pb_inc(1);
                        release(i, &dependents, &mut dependency_counts, &mut ready);
                    }
                    Decision::Invoke(inputs) => {
                        let sender = result_sender.clone();
                        let pb_style = pb_style.clone();
                        running += 1;

                        s.spawn(move |_| {
                            let span = tracing::span!(Level::INFO, "function", name = spec.name());
                            span.pb_set_style(&pb_style);
                            span.pb_set_message(&format!("Running {}", spec.name()));
                            let _enter = span.enter();

                            let start = Instant::now();
                            let result = super::invoke(spec, inputs);
                            let elapsed = start.elapsed();

                            // The receiver outlives every worker.
                            let _ = sender.send((i, result, start, elapsed));
                        });
                    }
                }
            }

            if running == 0 {
                break;
            }

            // `result_sender` is still alive and `invoke` catches panics, so
            // every running function reports back.
            let Ok((i, result, start, duration)) = result_receiver.recv() else {
                break;
            };
            running -= 1;
            root_span.pb_inc(1);

            let timing = TaskExecution { start, duration };
            let failed = recorder.finish(steps[i], specs[i], result, timing, store);
            if failed && options.abort_on_first_failure {
                stopping = true;
            }

            release(i, &dependents, &mut dependency_counts, &mut ready);
        }
    });

    recorder.finish_report()
}

fn release(
    settled: usize,
    dependents: &[Vec<usize>],
    dependency_counts: &mut [usize],
    ready: &mut VecDeque<usize>,
) {
    for &index in &dependents[settled] {
        dependency_counts[index] -= 1;
        if dependency_counts[index] == 0 {
            ready.push_back(index);
        }
    }
}
