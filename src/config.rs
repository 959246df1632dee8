//! Model overrides given as `KEY=VALUE` pairs.
//!
//! A key starting with `/` is an absolute path, any other key is taken relative
//! to [`DEFAULT_PREFIX`], so `rpm_idle=850` and `/engine/rpm_idle=850` set the
//! same value.

use std::fmt;
use std::str::FromStr;

use crate::error::OverrideError;
use crate::{Path, Value, ValueStore};

/// Prepended to relative override keys.
pub const DEFAULT_PREFIX: &str = "/engine/";

#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    pub path: Path,
    pub value: Value,
}

impl Override {
    /// Parses `KEY=VALUE`. The value is read as a number, `true`/`false`, a
    /// JSON array of numbers, or else as text.
    pub fn parse(arg: &str) -> Result<Self, OverrideError> {
        let syntax = || OverrideError::Syntax(arg.to_string());

        let (key, value) = arg.split_once('=').ok_or_else(syntax)?;
        let key = key.trim();

        if key.is_empty() || key.contains(char::is_whitespace) || key.ends_with('/') {
            return Err(syntax());
        }

        let path = if key.starts_with('/') {
            Path::new(key)
        } else if key.starts_with(|c: char| c.is_ascii_alphabetic()) {
            Path::new(format!("{DEFAULT_PREFIX}{key}"))
        } else {
            return Err(syntax());
        };

        Ok(Self {
            path,
            value: parse_value(value.trim()),
        })
    }
}

fn parse_value(text: &str) -> Value {
    if let Ok(x) = text.parse::<f64>() {
        return Value::Scalar(x);
    }

    match text {
        "true" => return Value::Flag(true),
        "false" => return Value::Flag(false),
        _ => {}
    }

    if text.starts_with('[')
        && let Ok(vector) = serde_json::from_str::<Vec<f64>>(text)
    {
        return Value::Vector(vector);
    }

    Value::Text(text.to_string())
}

impl FromStr for Override {
    type Err = OverrideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.path, self.value)
    }
}

/// Writes every override into `store`, later ones winning.
pub fn apply_overrides<I>(store: &mut ValueStore, overrides: I)
where
    I: IntoIterator<Item = Override>,
{
    for Override { path, value } in overrides {
        tracing::debug!(%path, %value, "override");
        store.insert(path, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_key_gets_prefix() {
        let o = Override::parse("rpm_idle=850").unwrap();
        assert_eq!(o.path, Path::new("/engine/rpm_idle"));
        assert_eq!(o.value, Value::Scalar(850.0));
    }

    #[test]
    fn test_absolute_key() {
        let o = Override::parse(" /engine/p_max = 660 ").unwrap();
        assert_eq!(o.path, Path::new("/engine/p_max"));
        assert_eq!(o.value, Value::Scalar(660.0));
    }

    #[test]
    fn test_value_kinds() {
        assert_eq!(Override::parse("fuel=diesel").unwrap().value, Value::Text("diesel".into()));
        assert_eq!(Override::parse("turbo=true").unwrap().value, Value::Flag(true));
        assert_eq!(
            Override::parse("/data/rpm=[800, 1200]").unwrap().value,
            Value::Vector(vec![800.0, 1200.0])
        );
        assert_eq!(Override::parse("note=").unwrap().value, Value::Text(String::new()));
    }

    #[test]
    fn test_syntax_errors() {
        for arg in ["novalue", "=5", "9lives=1", "a b=1", "/engine/=1"] {
            assert_eq!(
                Override::parse(arg),
                Err(OverrideError::Syntax(arg.to_string())),
                "{arg}"
            );
        }
    }

    #[test]
    fn test_apply_later_wins() {
        let mut store = ValueStore::new();
        apply_overrides(
            &mut store,
            ["p_max=600", "/engine/p_max=660"].map(|arg| Override::parse(arg).unwrap()),
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&Path::new("/engine/p_max")), Some(&Value::Scalar(660.0)));
    }
}
