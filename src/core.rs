use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Atomic reference-counted string type used for identifiers.
pub(crate) type ArcStr = Arc<str>;

/// An identifier of a named value slot, e.g. `/engine/p_max`.
///
/// Paths follow JSON pointer syntax: a sequence of `/`-prefixed segments where
/// `~` and `/` inside a segment are escaped as `~0` and `~1`. Two paths are
/// equal only when their keys are byte-for-byte equal; no normalization or
/// coercion takes place beyond what [`Path::new`] does on construction.
///
/// Cloning a `Path` is cheap, the key is shared.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path(ArcStr);

impl Path {
    /// Creates a path from its key. A missing leading `/` is added, so `rpm`
    /// and `/rpm` name the same slot.
    pub fn new(key: impl AsRef<str>) -> Self {
        let key = key.as_ref();
        if key.starts_with('/') || key.is_empty() {
            Self(key.into())
        } else {
            Self(format!("/{key}").into())
        }
    }

    /// Builds a path from unescaped segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key = String::new();
        for segment in segments {
            key.push('/');
            key.push_str(&escape(segment.as_ref()));
        }
        Self(key.into())
    }

    /// The raw key, still escaped.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unescaped segments of the path. The root path `""` has none.
    pub fn segments(&self) -> impl Iterator<Item = String> + '_ {
        self.0.split('/').skip(1).map(unescape)
    }

    /// Appends one unescaped segment.
    pub fn join(&self, segment: impl AsRef<str>) -> Self {
        Self(format!("{}/{}", self.0, escape(segment.as_ref())).into())
    }

    /// Segment-aware prefix test: `/data` is a prefix of `/data/rpm` and of
    /// `/data` itself, but not of `/database`.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        match self.0.strip_prefix(&*prefix.0) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.0.is_empty(),
            None => false,
        }
    }
}

fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn unescape(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({})", self.0)
    }
}

impl From<&str> for Path {
    fn from(value: &str) -> Self {
        Path::new(value)
    }
}

impl From<String> for Path {
    fn from(value: String) -> Self {
        Path::new(value)
    }
}

impl From<&Path> for Path {
    fn from(value: &Path) -> Self {
        value.clone()
    }
}

impl Borrow<str> for Path {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Serialize for Path {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Path::new)
    }
}

/// Execution-mode hint attached to a function.
///
/// Two functions producing the same outputs can be registered as a fast and a
/// robust variant of one calculation. The resolver ranks producers whose mode
/// matches [`ResolveOptions::prefer_mode`](crate::ResolveOptions) first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// The cheap variant, used unless something else is preferred.
    #[default]
    Fast,
    /// An iterative or outlier-resistant variant.
    Robust,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Fast => f.write_str("fast"),
            Mode::Robust => f.write_str("robust"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_slash_is_added() {
        assert_eq!(Path::new("rpm"), Path::new("/rpm"));
        assert_eq!(Path::new("engine/p_max").as_str(), "/engine/p_max");
    }

    #[test]
    fn test_segments_roundtrip_escapes() {
        let path = Path::from_segments(["data", "a/b", "c~d"]);
        assert_eq!(path.as_str(), "/data/a~1b/c~0d");
        assert_eq!(path.segments().collect::<Vec<_>>(), ["data", "a/b", "c~d"]);
    }

    #[test]
    fn test_starts_with_is_segment_aware() {
        let data = Path::new("/data");
        assert!(Path::new("/data/rpm").starts_with(&data));
        assert!(Path::new("/data").starts_with(&data));
        assert!(!Path::new("/database").starts_with(&data));
        assert!(Path::new("/anything").starts_with(&Path::new("")));
    }

    #[test]
    fn test_join() {
        assert_eq!(Path::new("/engine").join("fuel"), Path::new("/engine/fuel"));
    }
}
