//! Reading and writing value stores as JSON documents.
//!
//! A document is a tree of objects whose leaves are values. Every leaf becomes
//! one [`Path`] built from the keys leading to it, so
//!
//! ```json
//! { "engine": { "p_max": 660, "fuel": "diesel" }, "data": { "rpm": [800, 1200] } }
//! ```
//!
//! holds `/engine/p_max`, `/engine/fuel` and `/data/rpm`. Arrays of numbers
//! are vectors; any other array and `null` are rejected.

use std::fs;
use std::io::{Read, Write};

use camino::Utf8Path;
use serde_json::{Map, Value as Json};

use crate::error::IoError;
use crate::{Path, Value, ValueStore};

/// Flattens a JSON document into a store.
pub fn flatten(doc: &Json) -> Result<ValueStore, IoError> {
    let root = Path::new("");
    let Json::Object(map) = doc else {
        return Err(IoError::Shape(root, "the document must be an object"));
    };

    let mut store = ValueStore::new();
    flatten_into(&root, map, &mut store)?;
    Ok(store)
}

fn flatten_into(prefix: &Path, map: &Map<String, Json>, store: &mut ValueStore) -> Result<(), IoError> {
    for (key, json) in map {
        let path = prefix.join(key);

        let value = match json {
            Json::Object(inner) => {
                flatten_into(&path, inner, store)?;
                continue;
            }
            Json::Number(number) => match number.as_f64() {
                Some(x) => Value::Scalar(x),
                None => return Err(IoError::Shape(path, "number out of range")),
            },
            Json::Bool(flag) => Value::Flag(*flag),
            Json::String(text) => Value::Text(text.clone()),
            Json::Array(items) => match items.iter().map(Json::as_f64).collect::<Option<Vec<f64>>>() {
                Some(vector) => Value::Vector(vector),
                None => return Err(IoError::Shape(path, "arrays may only hold numbers")),
            },
            Json::Null => return Err(IoError::Shape(path, "null is not a value")),
        };

        store.insert(path, value);
    }

    Ok(())
}

/// Rebuilds the nested document of a store.
pub fn unflatten(store: &ValueStore) -> Result<Json, IoError> {
    let mut root = Map::new();

    for (path, value) in store.iter() {
        let segments: Vec<String> = path.segments().collect();
        let Some((last, parents)) = segments.split_last() else {
            return Err(IoError::Conflict(path.clone()));
        };

        let mut node = &mut root;
        for segment in parents {
            let entry = node
                .entry(segment.clone())
                .or_insert_with(|| Json::Object(Map::new()));
            node = match entry {
                Json::Object(inner) => inner,
                _ => return Err(IoError::Conflict(path.clone())),
            };
        }

        if node.contains_key(last) {
            return Err(IoError::Conflict(path.clone()));
        }
        node.insert(last.clone(), serde_json::to_value(value)?);
    }

    Ok(Json::Object(root))
}

/// Reads a JSON document from `path`, or from stdin when it is `-`.
pub fn read_values(path: &Utf8Path) -> Result<ValueStore, IoError> {
    let text = if path.as_str() == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        text
    } else {
        fs::read_to_string(path)?
    };

    let doc: Json = serde_json::from_str(&text)?;
    let store = flatten(&doc)?;
    tracing::debug!(%path, values = store.len(), "read values");
    Ok(store)
}

/// Writes a store as a pretty-printed JSON document to `path`, or to stdout
/// when there is none.
pub fn write_values(path: Option<&Utf8Path>, store: &ValueStore) -> Result<(), IoError> {
    let doc = unflatten(store)?;
    let text = serde_json::to_string_pretty(&doc)?;

    match path {
        Some(path) => {
            fs::write(path, text)?;
            tracing::debug!(%path, values = store.len(), "wrote values");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{text}")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_flatten_nested_model() {
        let doc = json!({
            "engine": { "p_max": 660, "fuel": "diesel", "turbo": true },
            "data": { "rpm": [800.0, 1200.0] },
        });

        let store = flatten(&doc).unwrap();

        assert_eq!(store.len(), 4);
        assert_eq!(store.get(&Path::new("/engine/p_max")), Some(&Value::Scalar(660.0)));
        assert_eq!(store.get(&Path::new("/engine/fuel")), Some(&Value::Text("diesel".into())));
        assert_eq!(store.get(&Path::new("/engine/turbo")), Some(&Value::Flag(true)));
        assert_eq!(
            store.get(&Path::new("/data/rpm")),
            Some(&Value::Vector(vec![800.0, 1200.0]))
        );

        assert_eq!(unflatten(&store).unwrap(), json!({
            "engine": { "p_max": 660.0, "fuel": "diesel", "turbo": true },
            "data": { "rpm": [800.0, 1200.0] },
        }));
    }

    #[test]
    fn test_escaped_keys() {
        let doc = json!({ "a/b": { "c~d": 1 } });
        let store = flatten(&doc).unwrap();
        assert!(store.contains(&Path::new("/a~1b/c~0d")));
        assert_eq!(unflatten(&store).unwrap(), json!({ "a/b": { "c~d": 1.0 } }));
    }

    #[test]
    fn test_rejected_shapes() {
        assert!(matches!(flatten(&json!([1, 2])), Err(IoError::Shape(..))));
        assert!(matches!(
            flatten(&json!({ "a": null })),
            Err(IoError::Shape(path, _)) if path == Path::new("/a")
        ));
        assert!(matches!(
            flatten(&json!({ "a": ["x"] })),
            Err(IoError::Shape(..))
        ));
    }

    #[test]
    fn test_unflatten_conflict() {
        let store: ValueStore = [("/a", 1.0), ("/a/b", 2.0)].into_iter().collect();
        assert!(matches!(unflatten(&store), Err(IoError::Conflict(path)) if path == Path::new("/a/b")));
    }

    #[test]
    fn test_write_and_read_file() {
        let dir = std::env::temp_dir().join(format!("keisan-io-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let file = camino::Utf8PathBuf::try_from(dir.join("values.json")).unwrap();

        let store: ValueStore = [("/engine/p_max", Value::Scalar(660.0))].into_iter().collect();
        write_values(Some(file.as_path()), &store).unwrap();
        assert_eq!(read_values(&file).unwrap(), store);

        fs::remove_dir_all(&dir).unwrap();
    }
}
