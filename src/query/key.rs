use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of a cached query: the procedure path plus its input.
///
/// Equality and hashing use the canonical JSON text of the input, so two keys
/// built from structurally equal inputs always land on the same entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "QueryKeyRepr", from = "QueryKeyRepr")]
pub struct QueryKey {
    path: Vec<String>,
    input: Value,
    canonical: String,
}

#[derive(Serialize, Deserialize)]
struct QueryKeyRepr {
    path: Vec<String>,
    input: Value,
}

impl QueryKey {
    /// `procedure` is slash separated, as on the wire (`user/get`).
    pub fn new(procedure: &str, input: Value) -> Self {
        let path = procedure
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        Self::from_parts(path, input)
    }

    fn from_parts(path: Vec<String>, input: Value) -> Self {
        // serde_json keeps object keys sorted, so this text is canonical.
        let canonical = input.to_string();
        Self {
            path,
            input,
            canonical,
        }
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn procedure(&self) -> String {
        self.path.join("/")
    }

    pub fn starts_with(&self, prefix: &[&str]) -> bool {
        prefix.len() <= self.path.len()
            && prefix
                .iter()
                .zip(&self.path)
                .all(|(a, b)| *a == b.as_str())
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.canonical == other.canonical
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
        self.canonical.hash(state);
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.path.join("."), self.canonical)
    }
}

impl From<QueryKeyRepr> for QueryKey {
    fn from(repr: QueryKeyRepr) -> Self {
        Self::from_parts(repr.path, repr.input)
    }
}

impl From<QueryKey> for QueryKeyRepr {
    fn from(key: QueryKey) -> Self {
        Self {
            path: key.path,
            input: key.input,
        }
    }
}
