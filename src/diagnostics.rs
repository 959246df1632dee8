//! Rendering of dependency chains and run outcomes.
//!
//! Structural errors ([`UnreachableDeclarationError`], [`MissingInputError`],
//! [`CycleError`]) carry a [`Chain`]: the paths and functions walked from a
//! consumer towards the thing it depends on. Chains are printed consumer-first
//! with `<-` between the links, so
//!
//! ```text
//! /engine_map/a <- fit_engine_map() <- /data/pmf
//! ```
//!
//! reads as "`/engine_map/a` comes from `fit_engine_map`, which needs
//! `/data/pmf`". A cycle ends on the function it started from.
//!
//! [`UnreachableDeclarationError`]: crate::UnreachableDeclarationError
//! [`MissingInputError`]: crate::MissingInputError
//! [`CycleError`]: crate::CycleError

use std::fmt::{self, Display, Formatter, Write};

use crate::core::ArcStr;
use crate::engine::{ExecutionReport, Outcome};
use crate::{Graph, Path};

/// One step of a dependency chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    Path(Path),
    Function(ArcStr),
}

impl Display for Link {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Link::Path(path) => write!(f, "{path}"),
            Link::Function(name) => write!(f, "{name}()"),
        }
    }
}

/// An ordered dependency chain, consumer first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chain(Vec<Link>);

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn links(&self) -> &[Link] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn path(mut self, path: &Path) -> Self {
        self.0.push(Link::Path(path.clone()));
        self
    }

    pub(crate) fn function(mut self, name: &ArcStr) -> Self {
        self.0.push(Link::Function(name.clone()));
        self
    }

    /// Prepends links, used while unwinding a backward walk.
    pub(crate) fn behind(mut self, links: impl IntoIterator<Item = Link>) -> Self {
        let mut front: Vec<Link> = links.into_iter().collect();
        front.append(&mut self.0);
        Self(front)
    }

    /// Function names along the chain, in order.
    pub fn functions(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(|link| match link {
            Link::Function(name) => Some(&**name),
            Link::Path(_) => None,
        })
    }

    /// Paths along the chain, in order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.0.iter().filter_map(|link| match link {
            Link::Path(path) => Some(path),
            Link::Function(_) => None,
        })
    }
}

impl Display for Chain {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, link) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" <- ")?;
            }
            write!(f, "{link}")?;
        }
        Ok(())
    }
}

impl FromIterator<Link> for Chain {
    fn from_iter<I: IntoIterator<Item = Link>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl ExecutionReport {
    /// Renders the functions of the run as a Mermaid diagram, color-coded by
    /// outcome.
    ///
    /// * **Green**: Succeeded
    /// * **Red**: Failed
    /// * **Yellow**: Skipped after an upstream failure
    /// * **Blue**: Skipped, outputs already known
    /// * **Grey**: Not started
    pub fn render_mermaid(&self, graph: &Graph) -> String {
        let mut f = String::new();
        let _ = self.write_mermaid(&mut f, graph);
        f
    }

    fn write_mermaid(&self, f: &mut String, graph: &Graph) -> fmt::Result {
        writeln!(f, "graph LR")?;

        let mut paths = std::collections::BTreeSet::new();

        for (id, outcome) in self.outcomes() {
            let Some(spec) = graph.function(id) else {
                continue;
            };
            let name = spec.name().replace('"', "\\\"");

            let (label, color) = match outcome {
                Outcome::Succeeded => ("ok", "#90EE90"),
                Outcome::Failed => ("failed", "#FF7F7F"),
                Outcome::SkippedUpstream => ("skipped", "#FFE066"),
                Outcome::SkippedKnown => ("cached", "#ADD8E6"),
                Outcome::Pending => ("not started", "#D3D3D3"),
            };

            writeln!(f, "    f{}[\"{}\\n{}\"]", id.index(), name, label)?;
            writeln!(f, "    style f{} fill:{}", id.index(), color)?;

            for input in spec.inputs() {
                if let Some(node) = graph.path_node(input) {
                    paths.insert((node.index(), input));
                    writeln!(f, "    p{} --> f{}", node.index(), id.index())?;
                }
            }
            for output in spec.outputs() {
                if let Some(node) = graph.path_node(output) {
                    paths.insert((node.index(), output));
                    writeln!(f, "    f{} --> p{}", id.index(), node.index())?;
                }
            }
        }

        for (node, path) in paths {
            writeln!(f, "    p{node}[\"{path}\"]")?;
        }

        Ok(())
    }
}
