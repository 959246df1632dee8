//! Turning a request into an execution plan.
//!
//! [`resolve`] works in three passes:
//!
//! 1. A forward pass finds every path derivable from the known inputs.
//! 2. A backward walk from the desired outputs picks, for every path that is
//!    not already known, the first ranked producer whose inputs are derivable
//!    without going through a path still being resolved. Alternate producers
//!    break loops in the graph this way. Each walk step reruns the forward pass
//!    with the paths being resolved left out, so a request costs polynomial
//!    time however many loops the graph has.
//! 3. Kahn's algorithm over the selected functions, with the ready queue
//!    ordered by registration.
//!
//! A desired output that isn't derivable is explained by the shortest chain
//! of producers down to a path nothing produces, a [`MissingInputError`]. When
//! no such chain exists every way down loops, and the loop is reported as a
//! [`CycleError`].
//!
//! The result depends only on the graph, the known inputs, the desired outputs
//! and the options, never on hash iteration order.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};

use crate::diagnostics::Chain;
use crate::error::{CycleError, MissingInputError, ResolutionError};
use crate::function::FunctionId;
use crate::{Graph, Mode, Path};

/// Options controlling [`resolve`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Expand known paths whenever a viable producer exists, so their values
    /// get recomputed.
    pub force_recompute: bool,
    /// Rank producers with this execution mode before the others.
    pub prefer_mode: Option<Mode>,
}

impl ResolveOptions {
    pub fn force_recompute(mut self, force: bool) -> Self {
        self.force_recompute = force;
        self
    }

    pub fn prefer_mode(mut self, mode: Mode) -> Self {
        self.prefer_mode = Some(mode);
        self
    }
}

/// Ordered sequence of functions materializing the desired outputs of a
/// request. Only meaningful for the graph, known inputs and desired outputs it
/// was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    steps: Vec<FunctionId>,
    producers: BTreeMap<Path, FunctionId>,
    known: BTreeSet<Path>,
    desired: Vec<Path>,
    force_recompute: bool,
}

impl ExecutionPlan {
    /// Functions in execution order.
    pub fn steps(&self) -> &[FunctionId] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The function selected to produce `path`, if the plan produces it.
    pub fn producer_of(&self, path: &Path) -> Option<FunctionId> {
        self.producers.get(path).copied()
    }

    pub fn known(&self) -> &BTreeSet<Path> {
        &self.known
    }

    pub fn desired(&self) -> &[Path] {
        &self.desired
    }

    pub fn force_recompute(&self) -> bool {
        self.force_recompute
    }

    /// Names of the planned functions, in order.
    pub fn names<'g>(&self, graph: &'g Graph) -> Vec<&'g str> {
        self.steps
            .iter()
            .filter_map(|&id| graph.function(id).map(|spec| spec.name()))
            .collect()
    }
}

/// Computes the plan materializing `desired` from `known`.
///
/// # Errors
///
/// * [`MissingInputError`] when a desired output can't be reached from the
///   known inputs; the first such output in request order is reported.
/// * [`CycleError`] when every way of producing that output depends on itself.
pub fn resolve<K, D>(
    graph: &Graph,
    known: K,
    desired: D,
    options: &ResolveOptions,
) -> Result<ExecutionPlan, ResolutionError>
where
    K: IntoIterator,
    K::Item: Into<Path>,
    D: IntoIterator,
    D::Item: Into<Path>,
{
    let known: BTreeSet<Path> = known.into_iter().map(Into::into).collect();

    let mut seen = HashSet::new();
    let desired: Vec<Path> = desired
        .into_iter()
        .map(Into::into)
        .filter(|path: &Path| seen.insert(path.clone()))
        .collect();

    let mut resolver = Resolver {
        graph,
        known: &known,
        options,
        resolved: HashMap::new(),
        stack: Vec::new(),
    };

    let mut unresolved = None;
    for path in &desired {
        if resolver.resolved.contains_key(path) {
            continue;
        }
        if resolver.available().contains(path) {
            resolver.walk(path);
        } else {
            tracing::debug!(%path, "desired output is not derivable");
            if unresolved.is_none() {
                unresolved = Some(path.clone());
            }
        }
    }

    if let Some(path) = unresolved {
        return Err(resolver.diagnose(&path));
    }

    let selection: BTreeMap<Path, FunctionId> = resolver
        .resolved
        .iter()
        .filter_map(|(path, resolution)| match resolution {
            Resolution::Produced(id) => Some((path.clone(), *id)),
            Resolution::Known => None,
        })
        .collect();

    let candidates = collect(graph, &desired, &selection);
    let steps = match schedule(graph, &candidates, &selection) {
        Ok(steps) => steps,
        Err(leftovers) => return Err(cycle_error(graph, &leftovers, &selection).into()),
    };

    let steps: Vec<FunctionId> = steps
        .into_iter()
        .filter(|&id| {
            options.force_recompute
                || graph
                    .function(id)
                    .is_some_and(|spec| !spec.outputs().iter().all(|p| known.contains(p)))
        })
        .collect();

    let producers = selection
        .into_iter()
        .filter(|(_, id)| steps.contains(id))
        .collect();

    let plan = ExecutionPlan {
        steps,
        producers,
        known,
        desired,
        force_recompute: options.force_recompute,
    };

    tracing::debug!(steps = ?plan.names(graph), "resolved execution plan");

    Ok(plan)
}

#[derive(Debug, Clone, Copy)]
enum Resolution {
    Known,
    Produced(FunctionId),
}

struct Resolver<'a> {
    graph: &'a Graph,
    known: &'a BTreeSet<Path>,
    options: &'a ResolveOptions,
    resolved: HashMap<Path, Resolution>,
    /// Paths whose producer is being selected, outermost first.
    stack: Vec<Path>,
}

impl Resolver<'_> {
    fn ranked(&self, path: &Path) -> Vec<FunctionId> {
        let mut ranked = self.graph.producers(path).to_vec();
        if let Some(mode) = self.options.prefer_mode {
            ranked.sort_by_key(|&id| self.graph.function(id).is_none_or(|spec| spec.mode() != mode));
        }
        ranked
    }

    /// Paths derivable from the known inputs and the paths resolved so far,
    /// without passing through any path on the stack.
    fn available(&self) -> HashSet<Path> {
        let blocked = |path: &Path| self.stack.contains(path);

        let mut available: HashSet<Path> = self
            .known
            .iter()
            .chain(self.resolved.keys())
            .filter(|&path| !blocked(path))
            .cloned()
            .collect();

        let mut waiting: Vec<usize> = self
            .graph
            .functions()
            .map(|(_, spec)| spec.inputs().iter().collect::<HashSet<_>>().len())
            .collect();

        let mut queue: VecDeque<Path> = available.iter().cloned().collect();
        let fire = |id: FunctionId, available: &mut HashSet<Path>, queue: &mut VecDeque<Path>| {
            let Some(spec) = self.graph.function(id) else {
                return;
            };
            for output in spec.outputs() {
                if !blocked(output) && available.insert(output.clone()) {
                    queue.push_back(output.clone());
                }
            }
        };

        for (id, _) in self.graph.functions() {
            if waiting[id.index()] == 0 {
                fire(id, &mut available, &mut queue);
            }
        }

        while let Some(path) = queue.pop_front() {
            for id in self.graph.consumers(&path) {
                let count = &mut waiting[id.index()];
                *count = count.saturating_sub(1);
                if *count == 0 {
                    fire(id, &mut available, &mut queue);
                }
            }
        }

        available
    }

    /// Selects producers for `path` and everything it needs. Only called on
    /// paths that are available.
    fn walk(&mut self, path: &Path) {
        if self.resolved.contains_key(path) {
            return;
        }

        let is_known = self.known.contains(path);
        if is_known && !self.options.force_recompute {
            self.resolved.insert(path.clone(), Resolution::Known);
            return;
        }

        self.stack.push(path.clone());

        let graph = self.graph;
        let available = self.available();
        let chosen = self.ranked(path).into_iter().find(|&id| {
            graph
                .function(id)
                .is_some_and(|spec| spec.inputs().iter().all(|input| available.contains(input)))
        });

        if let Some(spec) = chosen.and_then(|id| graph.function(id)) {
            for input in spec.inputs() {
                self.walk(input);
            }
        }

        self.stack.pop();

        match chosen {
            Some(id) => {
                tracing::trace!(%path, producer = %self.name(id), "selected producer");
                self.resolved.insert(path.clone(), Resolution::Produced(id));
            }
            None if is_known => {
                self.resolved.insert(path.clone(), Resolution::Known);
            }
            None => {}
        }
    }

    /// Explains why `path` is not derivable.
    fn diagnose(&self, path: &Path) -> ResolutionError {
        let available = self.available();

        let depths = self.missing_depths(&available);
        if self.graph.producers(path).is_empty() || depths.contains_key(path) {
            let chain = self.missing_chain(path, &available, &depths);
            tracing::debug!(%chain, "missing input");
            return MissingInputError {
                path: path.clone(),
                chain,
            }
            .into();
        }

        // every way down loops, keep the top-ranked producers to find the loop
        let mut selection = BTreeMap::new();
        let mut queue = vec![path.clone()];
        while let Some(path) = queue.pop() {
            if available.contains(&path) || selection.contains_key(&path) {
                continue;
            }
            let Some(&id) = self.ranked(&path).first() else {
                continue;
            };
            selection.insert(path, id);
            if let Some(spec) = self.graph.function(id) {
                queue.extend(spec.inputs().iter().rev().cloned());
            }
        }

        let candidates = collect(self.graph, std::slice::from_ref(path), &selection);
        match schedule(self.graph, &candidates, &selection) {
            Err(leftovers) => cycle_error(self.graph, &leftovers, &selection).into(),
            Ok(_) => MissingInputError {
                path: path.clone(),
                chain: Chain::new().path(path),
            }
            .into(),
        }
    }

    /// For every underivable path, the number of producers between it and
    /// the nearest path nothing produces. Paths only reachable through loops
    /// are left out.
    fn missing_depths(&self, available: &HashSet<Path>) -> HashMap<Path, usize> {
        let mut depths = HashMap::new();
        let mut queue = VecDeque::new();

        for path in self.graph.paths() {
            if !available.contains(path) && self.graph.producers(path).is_empty() {
                depths.insert(path.clone(), 0);
                queue.push_back(path.clone());
            }
        }

        while let Some(path) = queue.pop_front() {
            let depth = depths.get(&path).copied().unwrap_or_default() + 1;
            for id in self.graph.consumers(&path) {
                let Some(spec) = self.graph.function(id) else {
                    continue;
                };
                for output in spec.outputs() {
                    if !available.contains(output) && !depths.contains_key(output) {
                        depths.insert(output.clone(), depth);
                        queue.push_back(output.clone());
                    }
                }
            }
        }

        depths
    }

    /// Follows the best ranked producer one step closer to a missing path at
    /// each level.
    fn missing_chain(
        &self,
        path: &Path,
        available: &HashSet<Path>,
        depths: &HashMap<Path, usize>,
    ) -> Chain {
        let mut chain = Chain::new().path(path);
        let mut current = path.clone();

        while let Some(&depth) = depths.get(&current)
            && depth > 0
        {
            let next = self.ranked(&current).into_iter().find_map(|id| {
                let spec = self.graph.function(id)?;
                spec.inputs()
                    .iter()
                    .find(|input| {
                        !available.contains(*input) && depths.get(*input) == Some(&(depth - 1))
                    })
                    .map(|input| (id, input.clone()))
            });

            let Some((id, input)) = next else {
                break;
            };
            chain = chain.function(&self.name(id)).path(&input);
            current = input;
        }

        chain
    }

    fn name(&self, id: FunctionId) -> crate::core::ArcStr {
        self.graph
            .function(id)
            .map(|spec| spec.name.clone())
            .unwrap_or_else(|| format!("#{}", id.index()).into())
    }
}

/// Functions reachable from `desired` through the selected producers.
fn collect(
    graph: &Graph,
    desired: &[Path],
    selection: &BTreeMap<Path, FunctionId>,
) -> BTreeSet<FunctionId> {
    let mut candidates = BTreeSet::new();
    let mut visited = HashSet::new();
    let mut queue: Vec<&Path> = desired.iter().collect();

    while let Some(path) = queue.pop() {
        if !visited.insert(path) {
            continue;
        }
        let Some(&id) = selection.get(path) else {
            continue;
        };
        if candidates.insert(id)
            && let Some(spec) = graph.function(id)
        {
            queue.extend(spec.inputs());
        }
    }

    candidates
}

/// Kahn's algorithm restricted to `candidates`. Inputs without a selected
/// producer among the candidates don't hold anything back. On failure returns
/// the functions that could not be scheduled.
fn schedule(
    graph: &Graph,
    candidates: &BTreeSet<FunctionId>,
    selection: &BTreeMap<Path, FunctionId>,
) -> Result<Vec<FunctionId>, BTreeSet<FunctionId>> {
    let mut in_degree: BTreeMap<FunctionId, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<FunctionId, Vec<FunctionId>> = BTreeMap::new();

    for &id in candidates {
        let predecessors: BTreeSet<FunctionId> = graph
            .function(id)
            .map(|spec| {
                spec.inputs()
                    .iter()
                    .filter_map(|input| selection.get(input).copied())
                    .filter(|producer| candidates.contains(producer))
                    .collect()
            })
            .unwrap_or_default();

        in_degree.insert(id, predecessors.len());
        for producer in predecessors {
            dependents.entry(producer).or_default().push(id);
        }
    }

    let mut ready: BinaryHeap<Reverse<FunctionId>> = in_degree
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(&id, _)| Reverse(id))
        .collect();

    let mut order = Vec::with_capacity(candidates.len());

    while let Some(Reverse(id)) = ready.pop() {
        order.push(id);

        for &dependent in dependents.get(&id).into_iter().flatten() {
            if let Some(count) = in_degree.get_mut(&dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }
    }

    if order.len() == candidates.len() {
        Ok(order)
    } else {
        let scheduled: BTreeSet<_> = order.into_iter().collect();
        Err(candidates.difference(&scheduled).copied().collect())
    }
}

/// Finds a cycle among the unscheduled functions. Every one of them waits on
/// an unscheduled producer, so following those producers backwards must end
/// up revisiting a function.
fn cycle_error(
    graph: &Graph,
    leftovers: &BTreeSet<FunctionId>,
    selection: &BTreeMap<Path, FunctionId>,
) -> CycleError {
    let mut walk: Vec<(FunctionId, Path)> = Vec::new();
    let mut position: HashMap<FunctionId, usize> = HashMap::new();
    let mut start = 0;

    if let Some(&first) = leftovers.first() {
        let mut current = first;

        loop {
            if let Some(&i) = position.get(&current) {
                start = i;
                break;
            }

            let next = graph.function(current).and_then(|spec| {
                spec.inputs().iter().find_map(|input| {
                    selection
                        .get(input)
                        .filter(|producer| leftovers.contains(producer))
                        .map(|&producer| (input.clone(), producer))
                })
            });

            let Some((input, producer)) = next else {
                break;
            };

            position.insert(current, walk.len());
            walk.push((current, input));
            current = producer;
        }
    }

    let mut cycle = walk.split_off(start);
    if let Some(lowest) = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, (id, _))| *id)
        .map(|(i, _)| i)
    {
        cycle.rotate_left(lowest);
    }

    let name = |id: FunctionId| {
        graph
            .function(id)
            .map(|spec| spec.name.clone())
            .unwrap_or_else(|| format!("#{}", id.index()).into())
    };

    let functions: Vec<_> = cycle.iter().map(|(id, _)| name(*id)).collect();

    let mut chain = Chain::new();
    for (id, input) in &cycle {
        chain = chain.function(&name(*id)).path(input);
    }
    if let Some(first) = functions.first() {
        chain = chain.function(first);
    }

    tracing::debug!(%chain, "dependency cycle");

    CycleError { functions, chain }
}
