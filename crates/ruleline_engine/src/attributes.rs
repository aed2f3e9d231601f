//! Relevant-attribute tracking.
//!
//! While a pattern compiles, every field it reads is recorded against the
//! record type it belongs to. A change that touches none of those fields
//! cannot affect the pattern.

use std::collections::{BTreeMap, BTreeSet};

use ruleline_foundation::Attributes;

/// Record type name to the set of fields a pattern reads.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttributeTracker {
    fields: BTreeMap<String, BTreeSet<String>>,
}

impl AttributeTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that the pattern matches records of `record_type`.
    pub fn add_type(&mut self, record_type: &str) {
        self.fields.entry(record_type.to_string()).or_default();
    }

    /// Records that the pattern reads `field` of `record_type`.
    pub fn add_field(&mut self, record_type: &str, field: &str) {
        self.fields
            .entry(record_type.to_string())
            .or_default()
            .insert(field.to_string());
    }

    /// Returns true if the pattern matches records of `record_type`.
    #[must_use]
    pub fn mentions(&self, record_type: &str) -> bool {
        self.fields.contains_key(record_type)
    }

    /// The fields read from `record_type`.
    #[must_use]
    pub fn fields(&self, record_type: &str) -> Option<&BTreeSet<String>> {
        self.fields.get(record_type)
    }

    /// Iterates over `(record type, fields)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns true if a change from `previous` to `current` to a record
    /// whose type chain is `types` could affect the pattern.
    ///
    /// Creation and deletion are relevant whenever a type is mentioned;
    /// updates only when a read field changed value.
    #[must_use]
    pub fn is_relevant(
        &self,
        types: &[String],
        previous: Option<&Attributes>,
        current: Option<&Attributes>,
    ) -> bool {
        let mentioned: Vec<&BTreeSet<String>> =
            types.iter().filter_map(|t| self.fields(t)).collect();
        if mentioned.is_empty() {
            return false;
        }
        let (Some(previous), Some(current)) = (previous, current) else {
            return previous.is_some() || current.is_some();
        };
        mentioned.iter().any(|fields| {
            fields
                .iter()
                .any(|field| previous.get(field) != current.get(field))
        })
    }
}
