use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Path;
use crate::error::ValueError;

/// A value held in a [`ValueStore`] slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(f64),
    Vector(Vec<f64>),
    Flag(bool),
    Text(String),
}

impl Value {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "scalar",
            Value::Vector(_) => "vector",
            Value::Flag(_) => "flag",
            Value::Text(_) => "text",
        }
    }

    pub fn as_scalar(&self) -> Result<f64, ValueError> {
        match self {
            Value::Scalar(x) => Ok(*x),
            other => Err(ValueError::Mismatch {
                expected: "scalar",
                found: other.kind(),
            }),
        }
    }

    pub fn as_vector(&self) -> Result<&[f64], ValueError> {
        match self {
            Value::Vector(xs) => Ok(xs),
            other => Err(ValueError::Mismatch {
                expected: "vector",
                found: other.kind(),
            }),
        }
    }

    pub fn as_text(&self) -> Result<&str, ValueError> {
        match self {
            Value::Text(s) => Ok(s),
            other => Err(ValueError::Mismatch {
                expected: "text",
                found: other.kind(),
            }),
        }
    }

    pub fn as_flag(&self) -> Result<bool, ValueError> {
        match self {
            Value::Flag(b) => Ok(*b),
            other => Err(ValueError::Mismatch {
                expected: "flag",
                found: other.kind(),
            }),
        }
    }

    /// Applies `f` to every number, keeping the shape.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Result<Value, ValueError> {
        match self {
            Value::Scalar(x) => Ok(Value::Scalar(f(*x))),
            Value::Vector(xs) => Ok(Value::Vector(xs.iter().copied().map(f).collect())),
            other => Err(ValueError::Mismatch {
                expected: "number",
                found: other.kind(),
            }),
        }
    }

    /// Element-wise combination of two numeric values. A scalar is broadcast
    /// against a vector; two vectors must have the same length.
    pub fn zip_with(&self, other: &Value, f: impl Fn(f64, f64) -> f64) -> Result<Value, ValueError> {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(f(*a, *b))),
            (Value::Scalar(a), Value::Vector(bs)) => {
                Ok(Value::Vector(bs.iter().map(|b| f(*a, *b)).collect()))
            }
            (Value::Vector(xs), Value::Scalar(b)) => {
                Ok(Value::Vector(xs.iter().map(|a| f(*a, *b)).collect()))
            }
            (Value::Vector(xs), Value::Vector(ys)) => {
                if xs.len() != ys.len() {
                    return Err(ValueError::Length(xs.len(), ys.len()));
                }
                Ok(Value::Vector(
                    xs.iter().zip(ys).map(|(a, b)| f(*a, *b)).collect(),
                ))
            }
            (Value::Scalar(_) | Value::Vector(_), other) | (other, _) => {
                Err(ValueError::Mismatch {
                    expected: "number",
                    found: other.kind(),
                })
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(x) => write!(f, "{x}"),
            Value::Vector(xs) if xs.len() > 4 => {
                write!(f, "[{}, {}, … {} items]", xs[0], xs[1], xs.len())
            }
            Value::Vector(xs) => write!(f, "{xs:?}"),
            Value::Flag(b) => write!(f, "{b}"),
            Value::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Scalar(value)
    }
}

impl From<Vec<f64>> for Value {
    fn from(value: Vec<f64>) -> Self {
        Value::Vector(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Flag(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

/// Per-request mapping from [`Path`] to [`Value`].
///
/// Starts out holding the known inputs of a request and accumulates the outputs
/// of the functions executed against it. Ordered, so that serialized stores and
/// reports are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueStore {
    values: BTreeMap<Path, Value>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<&Value> {
        self.values.get(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.values.contains_key(path)
    }

    /// Inserts a value, returning the one it replaced.
    pub fn insert(&mut self, path: impl Into<Path>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(path.into(), value.into())
    }

    pub fn remove(&mut self, path: &Path) -> Option<Value> {
        self.values.remove(path)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &Value)> {
        self.values.iter()
    }

    /// The set of paths holding a value, suitable as the known inputs of a
    /// resolution.
    pub fn paths(&self) -> BTreeSet<Path> {
        self.values.keys().cloned().collect()
    }

    /// Copies every entry of `other` into `self`, overwriting on conflict.
    pub fn merge(&mut self, other: ValueStore) {
        self.values.extend(other.values);
    }
}

impl<P, V> FromIterator<(P, V)> for ValueStore
where
    P: Into<Path>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (P, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(p, v)| (p.into(), v.into()))
                .collect(),
        }
    }
}

impl<P, V> Extend<(P, V)> for ValueStore
where
    P: Into<Path>,
    V: Into<Value>,
{
    fn extend<I: IntoIterator<Item = (P, V)>>(&mut self, iter: I) {
        self.values
            .extend(iter.into_iter().map(|(p, v)| (p.into(), v.into())));
    }
}

impl IntoIterator for ValueStore {
    type Item = (Path, Value);
    type IntoIter = std::collections::btree_map::IntoIter<Path, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_scalar() {
        let a = Value::Vector(vec![1.0, 2.0, 3.0]);
        let b = Value::Scalar(2.0);
        assert_eq!(
            a.zip_with(&b, |x, y| x * y).unwrap(),
            Value::Vector(vec![2.0, 4.0, 6.0])
        );
        assert_eq!(
            b.zip_with(&a, |x, y| x - y).unwrap(),
            Value::Vector(vec![1.0, 0.0, -1.0])
        );
    }

    #[test]
    fn test_length_mismatch() {
        let a = Value::Vector(vec![1.0, 2.0]);
        let b = Value::Vector(vec![1.0]);
        assert!(matches!(
            a.zip_with(&b, |x, y| x + y),
            Err(ValueError::Length(2, 1))
        ));
    }

    #[test]
    fn test_text_is_not_a_number() {
        let a = Value::from("PETROL");
        assert!(a.map(|x| x + 1.0).is_err());
        assert!(Value::Scalar(1.0).zip_with(&a, |x, y| x + y).is_err());
        assert_eq!(a.as_text().unwrap(), "PETROL");
    }

    #[test]
    fn test_untagged_json() {
        let store: ValueStore =
            serde_json::from_str(r#"{"/a": 1.5, "/b": [1, 2], "/c": "x", "/d": true}"#).unwrap();
        assert_eq!(store.get(&Path::new("/a")), Some(&Value::Scalar(1.5)));
        assert_eq!(store.get(&Path::new("/b")), Some(&Value::Vector(vec![1.0, 2.0])));
        assert_eq!(store.get(&Path::new("/c")), Some(&Value::from("x")));
        assert_eq!(store.get(&Path::new("/d")), Some(&Value::Flag(true)));
    }

    #[test]
    fn test_store_paths() {
        let store: ValueStore = [("/b", 1.0), ("/a", 2.0)].into_iter().collect();
        let paths: Vec<_> = store.paths().into_iter().collect();
        assert_eq!(paths, [Path::new("/a"), Path::new("/b")]);
    }
}
