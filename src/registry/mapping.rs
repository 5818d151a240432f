use crate::model::{Entity, TypeLabel};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Describes how entities of one type become index documents.
///
/// ```toml
/// [[index.documents]]
/// type = "blog.Article"
/// fields = ["title", "body"]
///
/// [[index.documents.embeds]]
/// relation = "tags"
/// target = "blog.Tag"
/// fields = ["name"]
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DocumentMapping {
    #[serde(rename = "type")]
    pub type_label: TypeLabel,
    /// Own fields copied into the document. Empty means all of them.
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub embeds: Vec<EmbedMapping>,
}

/// A many-to-many relation whose targets are copied into the document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmbedMapping {
    pub relation: String,
    pub target: TypeLabel,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl DocumentMapping {
    pub fn new(type_label: TypeLabel, fields: &[&str]) -> Self {
        Self {
            type_label,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            embeds: Vec::new(),
        }
    }

    pub fn embed(mut self, relation: &str, target: TypeLabel, fields: &[&str]) -> Self {
        self.embeds.push(EmbedMapping {
            relation: relation.to_string(),
            target,
            fields: fields.iter().map(|f| f.to_string()).collect(),
        });
        self
    }

    /// Whether documents of this mapping copy fields from `type_label`.
    pub fn embeds_type(&self, type_label: &TypeLabel) -> bool {
        self.embeds.iter().any(|e| &e.target == type_label)
    }
}

/// Copy the selected fields of an entity. An empty selection copies everything.
pub(super) fn select_fields(entity: &Entity, selection: &[String]) -> Map<String, Value> {
    if selection.is_empty() {
        return entity.fields.clone();
    }
    selection
        .iter()
        .filter_map(|name| {
            entity
                .fields
                .get(name)
                .map(|value| (name.clone(), value.clone()))
        })
        .collect()
}
