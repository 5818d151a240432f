//! Index document and search result types

use crate::model::EntityRef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Fields copied into a document from one related entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedEntry {
    pub relation: String,
    pub target: EntityRef,
    pub fields: Map<String, Value>,
}

/// The index representation of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub entity: EntityRef,
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub embedded: Vec<EmbeddedEntry>,
}

impl Document {
    pub fn new(entity: EntityRef) -> Self {
        Self {
            entity,
            fields: Map::new(),
            embedded: Vec::new(),
        }
    }

    /// Whether this document embeds the given entity through any relation.
    pub fn embeds(&self, target: &EntityRef) -> bool {
        self.embedded.iter().any(|entry| &entry.target == target)
    }

    /// Entries embedded through one relation, in insertion order.
    pub fn embedded_in<'a>(&'a self, relation: &'a str) -> impl Iterator<Item = &'a EmbeddedEntry> {
        self.embedded
            .iter()
            .filter(move |entry| entry.relation == relation)
    }

    /// Drop every embedded entry pointing at `target`. Returns how many were removed.
    pub fn unlink(&mut self, target: &EntityRef) -> usize {
        let before = self.embedded.len();
        self.embedded.retain(|entry| &entry.target != target);
        before - self.embedded.len()
    }

    /// Text fed to the full-text index: own field values, then embedded ones.
    pub fn searchable_text(&self) -> String {
        let mut parts = Vec::new();
        for value in self.fields.values() {
            push_text(value, &mut parts);
        }
        for entry in &self.embedded {
            for value in entry.fields.values() {
                push_text(value, &mut parts);
            }
        }
        parts.join(" ")
    }
}

fn push_text(value: &Value, parts: &mut Vec<String>) {
    match value {
        Value::Null => {}
        Value::String(s) => {
            if !s.is_empty() {
                parts.push(s.clone());
            }
        }
        Value::Bool(_) | Value::Number(_) => parts.push(value.to_string()),
        Value::Array(items) => {
            for item in items {
                push_text(item, parts);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                push_text(item, parts);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub entity: EntityRef,
    /// BM25 based, higher is better.
    pub score: f64,
}

/// Statistics about the search index.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexStats {
    pub documents: usize,
    /// Documents per type label.
    pub by_type: BTreeMap<String, usize>,
}
