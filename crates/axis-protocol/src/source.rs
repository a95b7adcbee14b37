//! Producer-side dataset stores.
//!
//! A [`SourceStore`] resolves `/`-separated hierarchical paths to payloads.
//! Resolution is by key presence only.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use axis_stream::{ArrayData, Payload};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{NegotiationError, NegotiationResult};

/// Hierarchical dataset store a responder serves from.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// The current value at `path`, or `None` if nothing lives there.
    async fn lookup(&self, path: &str) -> NegotiationResult<Option<Payload>>;
}

/// Split a path into its non-empty segments, so `/a/b`, `a/b` and `a//b/`
/// all name the same dataset.
fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

fn normalize(path: &str) -> String {
    segments(path).collect::<Vec<_>>().join("/")
}

/// Flat path-to-payload map.
#[derive(Debug, Clone, Default)]
pub struct MemorySourceStore {
    datasets: HashMap<String, Payload>,
}

impl MemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, payload: Payload) {
        self.datasets.insert(normalize(path), payload);
    }

    pub fn with(mut self, path: &str, payload: Payload) -> Self {
        self.insert(path, payload);
        self
    }

    pub fn remove(&mut self, path: &str) -> Option<Payload> {
        self.datasets.remove(&normalize(path))
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

#[async_trait]
impl SourceStore for MemorySourceStore {
    async fn lookup(&self, path: &str) -> NegotiationResult<Option<Payload>> {
        Ok(self.datasets.get(&normalize(path)).cloned())
    }
}

/// Store backed by a nested JSON document.
///
/// Objects are groups; an object with `dtype` and `values` keys is a
/// dataset, optionally carrying a `shape` (one-dimensional otherwise):
///
/// ```json
/// { "diag": { "a": { "dtype": "f64", "shape": [2, 2], "values": [1, 2, 3, 4] } } }
/// ```
#[derive(Debug, Clone)]
pub struct JsonSourceStore {
    root: Value,
}

impl JsonSourceStore {
    pub fn from_value(root: Value) -> NegotiationResult<Self> {
        if !root.is_object() {
            return Err(NegotiationError::Source(
                "document root must be an object".to_string(),
            ));
        }
        Ok(Self { root })
    }

    pub fn parse(document: &str) -> NegotiationResult<Self> {
        let root = serde_json::from_str(document)
            .map_err(|e| NegotiationError::Source(format!("invalid document: {}", e)))?;
        Self::from_value(root)
    }

    /// Load a document from disk.
    pub async fn open(path: impl AsRef<Path>) -> NegotiationResult<Self> {
        let path = path.as_ref();
        let document = tokio::fs::read_to_string(path).await.map_err(|e| {
            NegotiationError::Source(format!("cannot read {}: {}", path.display(), e))
        })?;
        let store = Self::parse(&document)?;
        debug!(path = %path.display(), "Loaded source document");
        Ok(store)
    }

    fn node(&self, path: &str) -> Option<&Value> {
        segments(path).try_fold(&self.root, |node, segment| node.get(segment))
    }
}

fn is_dataset(node: &Map<String, Value>) -> bool {
    node.get("dtype").is_some_and(Value::is_string) && node.contains_key("values")
}

fn parse_dataset(path: &str, node: &Map<String, Value>) -> NegotiationResult<Payload> {
    let invalid = |detail: String| NegotiationError::Source(format!("dataset '{}': {}", path, detail));

    let mut tagged = Map::new();
    tagged.insert("dtype".to_string(), node["dtype"].clone());
    tagged.insert("values".to_string(), node["values"].clone());
    let data: ArrayData =
        serde_json::from_value(Value::Object(tagged)).map_err(|e| invalid(e.to_string()))?;

    match node.get("shape") {
        Some(shape) => {
            let shape: Vec<usize> =
                serde_json::from_value(shape.clone()).map_err(|e| invalid(e.to_string()))?;
            Payload::new(shape, data).map_err(|e| invalid(e.to_string()))
        }
        None => Ok(Payload::vector(data)),
    }
}

#[async_trait]
impl SourceStore for JsonSourceStore {
    async fn lookup(&self, path: &str) -> NegotiationResult<Option<Payload>> {
        match self.node(path) {
            Some(Value::Object(node)) if is_dataset(node) => parse_dataset(path, node).map(Some),
            // Groups and scalars are not datasets
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> JsonSourceStore {
        JsonSourceStore::from_value(json!({
            "diag": {
                "a": { "dtype": "f64", "shape": [2, 2], "values": [1.0, 2.0, 3.0, 4.0] },
                "flat": { "dtype": "i32", "values": [7, 8, 9] },
                "broken": { "dtype": "f32", "shape": [5], "values": [1.0] }
            },
            "note": "not a dataset"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_memory_store_normalizes_leading_slash() {
        let store = MemorySourceStore::new().with("/diag/a", Payload::vector(ArrayData::U8(vec![1])));

        assert!(store.lookup("diag/a").await.unwrap().is_some());
        assert!(store.lookup("/diag/a").await.unwrap().is_some());
        assert!(store.lookup("/diag/b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_store_resolves_nested_dataset() {
        let payload = document().lookup("/diag/a").await.unwrap().unwrap();
        assert_eq!(payload.shape, vec![2, 2]);
        assert_eq!(payload.data, ArrayData::F64(vec![1.0, 2.0, 3.0, 4.0]));
    }

    #[tokio::test]
    async fn test_json_store_defaults_to_vector_shape() {
        let payload = document().lookup("diag/flat").await.unwrap().unwrap();
        assert_eq!(payload.shape, vec![3]);
    }

    #[tokio::test]
    async fn test_json_store_groups_and_missing_paths_are_absent() {
        let store = document();
        assert!(store.lookup("/diag").await.unwrap().is_none());
        assert!(store.lookup("/note").await.unwrap().is_none());
        assert!(store.lookup("/diag/a/deeper").await.unwrap().is_none());
        assert!(store.lookup("/nowhere").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_store_rejects_inconsistent_shape() {
        let result = document().lookup("/diag/broken").await;
        assert!(matches!(result, Err(NegotiationError::Source(_))));
    }

    #[test]
    fn test_json_store_requires_object_root() {
        assert!(JsonSourceStore::parse("[1, 2, 3]").is_err());
        assert!(JsonSourceStore::parse("not json").is_err());
    }

    #[tokio::test]
    async fn test_json_store_opens_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("source.json");
        std::fs::write(&path, r#"{"x": {"dtype": "u8", "values": [1, 2]}}"#).unwrap();

        let store = JsonSourceStore::open(&path).await.unwrap();
        let payload = store.lookup("x").await.unwrap().unwrap();
        assert_eq!(payload.data, ArrayData::U8(vec![1, 2]));
    }
}
