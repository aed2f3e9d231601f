//! Match identity and callback arguments.
//!
//! Both serialise to canonical JSON (keys sorted), so equal values always
//! produce equal text. The text form of a [`Fingerprint`] is what the match
//! table's uniqueness constraint is declared over.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use ruleline_foundation::{Error, RecordId, Result, Value};

/// The identity of a match: id variable name to record id.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub BTreeMap<String, RecordId>);

impl Fingerprint {
    /// Parses canonical JSON text.
    ///
    /// # Errors
    /// Returns an internal error if the text is not an object of integers.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::internal(format!("malformed fingerprint {text}: {e}")))
    }

    /// Reads a fingerprint from a result column.
    ///
    /// # Errors
    /// Returns an internal error if the column does not hold fingerprint text.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(text) => Self::from_json(text),
            other => Err(Error::internal(format!(
                "expected fingerprint text, found {}",
                other.type_name()
            ))),
        }
    }

    /// Returns the canonical JSON text.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    /// Returns the record id bound to `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<RecordId> {
        self.0.get(name).copied()
    }

    /// Iterates over `(name, record id)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, RecordId)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

impl<const N: usize> From<[(&str, RecordId); N]> for Fingerprint {
    fn from(pairs: [(&str, RecordId); N]) -> Self {
        Self(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }
}

/// Arguments handed to a callback: variable name to value.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arguments(pub BTreeMap<String, serde_json::Value>);

impl Arguments {
    /// Parses canonical JSON text.
    ///
    /// # Errors
    /// Returns an internal error if the text is not a JSON object.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::internal(format!("malformed arguments {text}: {e}")))
    }

    /// Reads arguments from a nullable result column.
    ///
    /// # Errors
    /// Returns an internal error if the column holds something other than
    /// JSON object text or nil.
    pub fn from_value(value: &Value) -> Result<Option<Self>> {
        match value {
            Value::Nil => Ok(None),
            Value::Text(text) => Self::from_json(text).map(Some),
            other => Err(Error::internal(format!(
                "expected arguments text, found {}",
                other.type_name()
            ))),
        }
    }

    /// Returns the canonical JSON text.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    /// Returns the argument bound to `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.get(name)
    }

    /// Returns the argument bound to `name` as a [`Value`].
    #[must_use]
    pub fn value(&self, name: &str) -> Value {
        self.get(name).map(Value::from_json).unwrap_or_default()
    }
}

impl<const N: usize> From<[(&str, serde_json::Value); N]> for Arguments {
    fn from(pairs: [(&str, serde_json::Value); N]) -> Self {
        Self(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }
}
