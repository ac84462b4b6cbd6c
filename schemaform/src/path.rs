/// Data paths and flattened value snapshots.
///
/// A data path addresses one field inside the root value: `""` is the root,
/// `address.city` a nested property, `items.0` the first array item. Each
/// descent produces a new path via pure methods, the same way the validator
/// and the field tree walk the value.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataPath(String);

impl DataPath {
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn parse(s: &str) -> Self {
        Self(s.trim_matches('.').to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Descend into an object property.
    pub fn child(&self, key: &str) -> Self {
        if self.is_root() {
            Self(key.to_string())
        } else {
            Self(format!("{}.{}", self.0, key))
        }
    }

    /// Descend into an array item.
    pub fn index(&self, i: usize) -> Self {
        self.child(&i.to_string())
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.').filter(|s| !s.is_empty())
    }

    /// The last segment, i.e. the field's own key. Empty for the root.
    pub fn name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or("")
    }

    /// Look up the value this path addresses inside `root`.
    pub fn lookup<'v>(&self, root: &'v Value) -> Option<&'v Value> {
        self.segments().try_fold(root, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DataPath {
    fn from(s: &str) -> Self {
        DataPath::parse(s)
    }
}

/// Every non-root path of a value mapped to the value found there.
///
/// Containers are recorded as well as leaves, so an expression can depend on
/// a whole object or array. Rebuilt only when the root value changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatSnapshot {
    entries: BTreeMap<DataPath, Value>,
}

impl FlatSnapshot {
    pub fn new(root: &Value) -> Self {
        let mut entries = BTreeMap::new();
        flatten_into(&DataPath::root(), root, &mut entries);
        Self { entries }
    }

    pub fn get(&self, path: &DataPath) -> Option<&Value> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn flatten_into(path: &DataPath, value: &Value, out: &mut BTreeMap<DataPath, Value>) {
    if !path.is_root() {
        out.insert(path.clone(), value.clone());
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(&path.child(key), child, out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                flatten_into(&path.index(i), child, out);
            }
        }
        _ => {}
    }
}
