//! The dependency graph and its builder.
//!
//! A [`Graph`] is bipartite: every [`Path`] and every registered function is a
//! node, with an edge from a path to each function consuming it and from each
//! function to the paths it produces. It is assembled once by a
//! [`GraphBuilder`] and never changes afterwards, so it can be shared by
//! reference between any number of concurrent requests.
//!
//! ## Multiple producers
//!
//! A path may be produced by several functions, e.g. engine speed derived
//! either from angular velocity or from mean piston speed. The producers of a
//! path are kept ranked by `(priority, registration order)`, lower first. The
//! resolver picks from this ranking, see [`resolve`](crate::resolve).
//!
//! ## Primary inputs
//!
//! Paths which are expected to be supplied by the caller are declared with
//! [`GraphBuilder::primary_input`]. A declaration covers the path itself and
//! everything below it. [`GraphBuilder::build`] refuses a graph in which a
//! function reads a path that is neither primary nor produced by anything.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{self, Display};

use petgraph::Direction;
use petgraph::graph::NodeIndex;

use crate::core::ArcStr;
use crate::diagnostics::Chain;
use crate::error::{GraphBuildError, UnreachableDeclarationError};
use crate::function::{FunctionId, FunctionSpec, Inputs};
use crate::{Mode, Path, Value};

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Path(Path),
    Function(FunctionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Edge {
    Consumes,
    Produces,
}

/// Immutable dependency graph over paths and functions.
pub struct Graph {
    pub(crate) graph: petgraph::Graph<Node, Edge>,
    functions: Vec<FunctionSpec>,
    path_nodes: BTreeMap<Path, NodeIndex>,
    producers: BTreeMap<Path, Vec<FunctionId>>,
    primary: Vec<Path>,
}

impl Graph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    pub fn function(&self, id: FunctionId) -> Option<&FunctionSpec> {
        self.functions.get(id.index())
    }

    /// Registered functions in registration order.
    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &FunctionSpec)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, spec)| (FunctionId(i as u32), spec))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<FunctionId> {
        self.functions
            .iter()
            .position(|spec| &*spec.name == name)
            .map(|i| FunctionId(i as u32))
    }

    /// Producers of `path`, best ranked first.
    pub fn producers(&self, path: &Path) -> &[FunctionId] {
        self.producers.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Functions reading `path`, in registration order.
    pub fn consumers(&self, path: &Path) -> Vec<FunctionId> {
        let Some(&index) = self.path_nodes.get(path) else {
            return vec![];
        };

        let mut consumers: Vec<_> = self
            .graph
            .neighbors_directed(index, Direction::Outgoing)
            .filter_map(|n| match self.graph[n] {
                Node::Function(id) => Some(id),
                Node::Path(_) => None,
            })
            .collect();
        consumers.sort();
        consumers.dedup();
        consumers
    }

    /// Every path mentioned by any function.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.path_nodes.keys()
    }

    pub fn is_primary(&self, path: &Path) -> bool {
        is_primary(&self.primary, path)
    }

    /// Whether some path transitively depends on itself. Such loops are
    /// allowed in the graph and only rejected when a request needs them.
    pub fn has_cycles(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }

    pub(crate) fn path_node(&self, path: &Path) -> Option<NodeIndex> {
        self.path_nodes.get(path).copied()
    }
}

impl Display for Graph {
    /// Mermaid flowchart of the graph: paths as boxes, functions as
    /// subroutines.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            if let Node::Path(path) = &self.graph[index] {
                writeln!(f, "    p{}[\"{}\"]", index.index(), path)?;
            }
        }

        for (id, spec) in self.functions() {
            let name = spec.name.replace('"', "\\\"");
            match spec.mode {
                Mode::Fast => writeln!(f, "    f{}[[\"{}\"]]", id.index(), name)?,
                Mode::Robust => writeln!(f, "    f{}[[\"{} ({})\"]]", id.index(), name, spec.mode)?,
            }
        }

        for edge in self.graph.raw_edges() {
            let (source, target) = (edge.source(), edge.target());
            writeln!(f, "    {} --> {}", self.mermaid_id(source), self.mermaid_id(target))?;
        }

        Ok(())
    }
}

impl Graph {
    fn mermaid_id(&self, index: NodeIndex) -> String {
        match &self.graph[index] {
            Node::Path(_) => format!("p{}", index.index()),
            Node::Function(id) => format!("f{}", id.index()),
        }
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("functions", &self.functions)
            .field("primary", &self.primary)
            .finish_non_exhaustive()
    }
}

fn is_primary(primary: &[Path], path: &Path) -> bool {
    primary.iter().any(|category| path.starts_with(category))
}

/// Collects function specifications and primary input declarations, then
/// freezes them into a [`Graph`].
///
/// # Example
///
/// ```rust
/// use keisan::{Graph, Value};
///
/// let mut builder = Graph::builder();
/// builder.primary_input("/data");
/// builder
///     .function("omega_from_rpm")
///     .inputs(["/data/rpm"])
///     .outputs(["/derived/omega"])
///     .register(|args| Ok(vec![args[0].map(|rpm| rpm * std::f64::consts::PI / 30.0)?]))
///     .unwrap();
///
/// let graph = builder.build().unwrap();
/// assert_eq!(graph.len(), 1);
/// ```
#[derive(Default)]
pub struct GraphBuilder {
    functions: Vec<FunctionSpec>,
    names: HashSet<ArcStr>,
    producers: HashMap<Path, Vec<usize>>,
    primary: Vec<Path>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a primary input category: the path and everything below it are
    /// expected to be supplied by the caller.
    pub fn primary_input(&mut self, path: impl Into<Path>) -> &mut Self {
        self.primary.push(path.into());
        self
    }

    /// Starts a fluent function definition.
    pub fn function(&mut self, name: impl Into<ArcStr>) -> FunctionDef<'_> {
        FunctionDef {
            builder: self,
            name: name.into(),
            inputs: vec![],
            outputs: vec![],
            priority: 0,
            mode: Mode::default(),
            exclusive: false,
        }
    }

    /// Adds a function to the registry.
    ///
    /// Several producers of one path are fine, unless one of them is
    /// exclusive.
    pub fn register(&mut self, spec: FunctionSpec) -> Result<FunctionId, GraphBuildError> {
        if self.names.contains(&spec.name) {
            return Err(GraphBuildError::DuplicateFunction(spec.name.clone()));
        }

        for output in &spec.outputs {
            let Some(existing) = self.producers.get(output) else {
                continue;
            };

            if let Some(&other) = existing
                .iter()
                .find(|&&i| spec.exclusive || self.functions[i].exclusive)
            {
                return Err(GraphBuildError::DuplicateOutput {
                    path: output.clone(),
                    first: self.functions[other].name.clone(),
                    second: spec.name.clone(),
                });
            }
        }

        let index = self.functions.len();
        for output in &spec.outputs {
            self.producers.entry(output.clone()).or_default().push(index);
        }
        self.names.insert(spec.name.clone());

        tracing::trace!(name = %spec.name, "registered function");
        self.functions.push(spec);

        Ok(FunctionId(index as u32))
    }

    /// Validates the registry and freezes it.
    pub fn build(self) -> Result<Graph, GraphBuildError> {
        for spec in &self.functions {
            for input in &spec.inputs {
                if !is_primary(&self.primary, input) && !self.producers.contains_key(input) {
                    return Err(UnreachableDeclarationError {
                        path: input.clone(),
                        function: spec.name.clone(),
                        chain: Chain::new().function(&spec.name).path(input),
                    }
                    .into());
                }
            }
        }

        let mut graph = petgraph::Graph::new();
        let mut path_nodes = BTreeMap::new();

        for (i, spec) in self.functions.iter().enumerate() {
            let node = graph.add_node(Node::Function(FunctionId(i as u32)));

            for input in &spec.inputs {
                let path = *path_nodes
                    .entry(input.clone())
                    .or_insert_with(|| graph.add_node(Node::Path(input.clone())));
                graph.update_edge(path, node, Edge::Consumes);
            }

            for output in &spec.outputs {
                let path = *path_nodes
                    .entry(output.clone())
                    .or_insert_with(|| graph.add_node(Node::Path(output.clone())));
                graph.add_edge(node, path, Edge::Produces);
            }
        }

        let mut producers = BTreeMap::new();
        for (path, &index) in &path_nodes {
            let mut ranked: Vec<FunctionId> = graph
                .neighbors_directed(index, Direction::Incoming)
                .filter_map(|n| match graph[n] {
                    Node::Function(id) => Some(id),
                    Node::Path(_) => None,
                })
                .collect();

            if ranked.is_empty() {
                continue;
            }

            ranked.sort_by_key(|id| (self.functions[id.index()].priority, *id));
            producers.insert(path.clone(), ranked);
        }

        let graph = Graph {
            graph,
            functions: self.functions,
            path_nodes,
            producers,
            primary: self.primary,
        };

        if graph.has_cycles() {
            tracing::debug!("graph contains dependency loops, requests needing them will be rejected");
        }

        tracing::debug!(
            functions = graph.len(),
            paths = graph.path_nodes.len(),
            "built dependency graph"
        );

        Ok(graph)
    }
}

/// Fluent definition of a function, finished by [`FunctionDef::register`].
pub struct FunctionDef<'a> {
    builder: &'a mut GraphBuilder,
    name: ArcStr,
    inputs: Vec<Path>,
    outputs: Vec<Path>,
    priority: i32,
    mode: Mode,
    exclusive: bool,
}

impl<'a> FunctionDef<'a> {
    pub fn inputs<I>(mut self, inputs: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Path>,
    {
        self.inputs.extend(inputs.into_iter().map(Into::into));
        self
    }

    pub fn outputs<O>(mut self, outputs: O) -> Self
    where
        O: IntoIterator,
        O::Item: Into<Path>,
    {
        self.outputs.extend(outputs.into_iter().map(Into::into));
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn register<F>(self, callable: F) -> Result<FunctionId, GraphBuildError>
    where
        F: Fn(&Inputs) -> anyhow::Result<Vec<Value>> + Send + Sync + 'static,
    {
        let mut spec = FunctionSpec::new(self.name, self.inputs, self.outputs, callable)
            .with_priority(self.priority)
            .with_mode(self.mode);
        if self.exclusive {
            spec = spec.exclusive();
        }
        self.builder.register(spec)
    }
}
