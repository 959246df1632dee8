use std::fmt::Debug;
use std::ops::Index;
use std::sync::Arc;

use crate::core::ArcStr;
use crate::error::ValueError;
use crate::{Mode, Path, Value};

/// Calculation logic of a function. It receives the values of the declared
/// inputs and must return one value per declared output, in declaration order.
pub type Callable = Arc<dyn Fn(&Inputs) -> anyhow::Result<Vec<Value>> + Send + Sync>;

/// Identifier of a registered function, equal to its registration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionId(pub(crate) u32);

impl FunctionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A named computation unit: the paths it reads, the paths it writes and the
/// logic in between.
#[derive(Clone)]
pub struct FunctionSpec {
    pub(crate) name: ArcStr,
    pub(crate) inputs: Vec<Path>,
    pub(crate) outputs: Vec<Path>,
    pub(crate) callable: Callable,
    pub(crate) priority: i32,
    pub(crate) mode: Mode,
    pub(crate) exclusive: bool,
}

impl FunctionSpec {
    pub fn new<I, O, F>(name: impl Into<ArcStr>, inputs: I, outputs: O, callable: F) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Path>,
        O: IntoIterator,
        O::Item: Into<Path>,
        F: Fn(&Inputs) -> anyhow::Result<Vec<Value>> + Send + Sync + 'static,
    {
        let mut outputs: Vec<Path> = outputs.into_iter().map(Into::into).collect();
        dedup_ordered(&mut outputs);

        Self {
            name: name.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs,
            callable: Arc::new(callable),
            priority: 0,
            mode: Mode::default(),
            exclusive: false,
        }
    }

    /// Lower values win when several functions produce the same path.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Claims sole ownership of the outputs; registering another producer for
    /// any of them is an error.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[Path] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Path] {
        &self.outputs
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub(crate) fn call(&self, inputs: &Inputs) -> anyhow::Result<Vec<Value>> {
        (self.callable)(inputs)
    }
}

impl Debug for FunctionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("priority", &self.priority)
            .field("mode", &self.mode)
            .field("exclusive", &self.exclusive)
            .finish_non_exhaustive()
    }
}

fn dedup_ordered(paths: &mut Vec<Path>) {
    let mut seen = std::collections::HashSet::new();
    paths.retain(|path| seen.insert(path.clone()));
}

/// The input values handed to a [`Callable`], in the order the function
/// declared its inputs.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    entries: Vec<(Path, Value)>,
}

impl Inputs {
    pub(crate) fn new(entries: Vec<(Path, Value)>) -> Self {
        Self { entries }
    }

    pub(crate) fn into_entries(self) -> Vec<(Path, Value)> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.entries.get(index).map(|(_, value)| value)
    }

    pub fn by_path(&self, path: &Path) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, value)| value)
    }

    pub fn scalar(&self, index: usize) -> Result<f64, ValueError> {
        self[index].as_scalar()
    }

    pub fn vector(&self, index: usize) -> Result<&[f64], ValueError> {
        self[index].as_vector()
    }

    pub fn text(&self, index: usize) -> Result<&str, ValueError> {
        self[index].as_text()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &Value)> {
        self.entries.iter().map(|(p, v)| (p, v))
    }
}

impl Index<usize> for Inputs {
    type Output = Value;

    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outputs_are_deduplicated_in_order() {
        let spec = FunctionSpec::new("f", ["/a"], ["/y", "/x", "/y"], |_| Ok(vec![]));
        assert_eq!(spec.outputs(), [Path::new("/y"), Path::new("/x")]);
        assert_eq!(spec.priority(), 0);
        assert_eq!(spec.mode(), Mode::Fast);
        assert!(!spec.is_exclusive());
    }

    #[test]
    fn test_inputs_accessors() {
        let inputs = Inputs::new(vec![
            (Path::new("/a"), Value::Scalar(2.0)),
            (Path::new("/b"), Value::Vector(vec![1.0])),
        ]);
        assert_eq!(inputs.scalar(0).unwrap(), 2.0);
        assert_eq!(inputs.vector(1).unwrap(), [1.0]);
        assert!(inputs.text(0).is_err());
        assert_eq!(inputs.by_path(&Path::new("/b")), Some(&Value::Vector(vec![1.0])));
        assert!(inputs.get(2).is_none());
    }

    #[test]
    fn test_call() {
        let spec = FunctionSpec::new("double", ["/a"], ["/b"], |inputs| {
            Ok(vec![inputs[0].map(|x| x * 2.0)?])
        });
        let inputs = Inputs::new(vec![(Path::new("/a"), Value::Scalar(4.0))]);
        assert_eq!(spec.call(&inputs).unwrap(), [Value::Scalar(8.0)]);
    }
}
