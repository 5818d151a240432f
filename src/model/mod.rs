//! Entity identities and the propagation messages built from them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a type label cannot be parsed or is not known.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown type: {0}")]
pub struct UnknownType(pub String);

/// Identifies a data-model type as `app_label.model_name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeLabel {
    pub app_label: String,
    pub model_name: String,
}

impl TypeLabel {
    pub fn new(app_label: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            model_name: model_name.into(),
        }
    }
}

impl fmt::Display for TypeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.model_name)
    }
}

impl FromStr for TypeLabel {
    type Err = UnknownType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((app, model)) if !app.is_empty() && !model.is_empty() && !model.contains('.') => {
                Ok(TypeLabel::new(app, model))
            }
            _ => Err(UnknownType(s.to_string())),
        }
    }
}

impl Serialize for TypeLabel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TypeLabel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Opaque, string-encoded primary key.
///
/// Integer keys are kept in their decimal form, composite keys are encoded
/// by whoever owns the type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrimaryKey(pub String);

impl PrimaryKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrimaryKey {
    fn from(value: &str) -> Self {
        PrimaryKey(value.to_string())
    }
}

impl From<String> for PrimaryKey {
    fn from(value: String) -> Self {
        PrimaryKey(value)
    }
}

impl From<i64> for PrimaryKey {
    fn from(value: i64) -> Self {
        PrimaryKey(value.to_string())
    }
}

/// Reference to a data-model instance that does not hold the instance itself.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub type_label: TypeLabel,
    pub pk: PrimaryKey,
}

impl EntityRef {
    pub fn new(type_label: TypeLabel, pk: impl Into<PrimaryKey>) -> Self {
        Self {
            type_label,
            pk: pk.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_label, self.pk)
    }
}

/// A live data-model instance as read from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_ref: EntityRef,
    pub fields: serde_json::Map<String, serde_json::Value>,
    /// Many-to-many relations by name.
    #[serde(default)]
    pub relations: BTreeMap<String, Vec<EntityRef>>,
}

impl Entity {
    pub fn new(type_label: TypeLabel, pk: impl Into<PrimaryKey>) -> Self {
        Self {
            entity_ref: EntityRef::new(type_label, pk),
            fields: serde_json::Map::new(),
            relations: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn type_label(&self) -> &TypeLabel {
        &self.entity_ref.type_label
    }

    pub fn pk(&self) -> &PrimaryKey {
        &self.entity_ref.pk
    }

    pub fn related(&self, relation: &str) -> &[EntityRef] {
        self.relations
            .get(relation)
            .map(|targets| targets.as_slice())
            .unwrap_or(&[])
    }
}

/// What kind of index change a propagation request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropagationKind {
    Write,
    Unlink,
    Delete,
}

impl PropagationKind {
    /// Name of the job that applies this kind of request.
    pub fn job_name(&self) -> &'static str {
        match self {
            PropagationKind::Write => "apply-write",
            PropagationKind::Unlink => "unlink",
            PropagationKind::Delete => "apply-delete",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PropagationKind::Write => "write",
            PropagationKind::Unlink => "unlink",
            PropagationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for PropagationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationRequest {
    pub kind: PropagationKind,
    pub entity: EntityRef,
}

impl PropagationRequest {
    pub fn write(entity: EntityRef) -> Self {
        Self {
            kind: PropagationKind::Write,
            entity,
        }
    }

    pub fn unlink(entity: EntityRef) -> Self {
        Self {
            kind: PropagationKind::Unlink,
            entity,
        }
    }

    pub fn delete(entity: EntityRef) -> Self {
        Self {
            kind: PropagationKind::Delete,
            entity,
        }
    }
}

/// Which many-to-many change happened on a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationChange {
    Add,
    Remove,
    Clear,
}

impl fmt::Display for RelationChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationChange::Add => write!(f, "add"),
            RelationChange::Remove => write!(f, "remove"),
            RelationChange::Clear => write!(f, "clear"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_label_parse_and_display() {
        let label: TypeLabel = "blog.Article".parse().unwrap();
        assert_eq!(label.app_label, "blog");
        assert_eq!(label.model_name, "Article");
        assert_eq!(label.to_string(), "blog.Article");
    }

    #[test]
    fn test_type_label_rejects_malformed() {
        assert!("Article".parse::<TypeLabel>().is_err());
        assert!(".Article".parse::<TypeLabel>().is_err());
        assert!("blog.".parse::<TypeLabel>().is_err());
        assert!("a.b.c".parse::<TypeLabel>().is_err());
    }

    #[test]
    fn test_type_label_serializes_as_string() {
        let label = TypeLabel::new("blog", "Tag");
        let json = serde_json::to_string(&label).unwrap();
        assert_eq!(json, "\"blog.Tag\"");

        let back: TypeLabel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, label);
    }

    #[test]
    fn test_integer_primary_key_is_decimal() {
        let pk = PrimaryKey::from(42);
        assert_eq!(pk.as_str(), "42");
        assert_eq!(serde_json::to_string(&pk).unwrap(), "\"42\"");
    }

    #[test]
    fn test_job_names() {
        assert_eq!(PropagationKind::Write.job_name(), "apply-write");
        assert_eq!(PropagationKind::Unlink.job_name(), "unlink");
        assert_eq!(PropagationKind::Delete.job_name(), "apply-delete");
    }

    #[test]
    fn test_entity_related_defaults_to_empty() {
        let entity = Entity::new(TypeLabel::new("blog", "Article"), 1).with_field("title", "x");
        assert!(entity.related("tags").is_empty());
        assert_eq!(entity.entity_ref.to_string(), "blog.Article#1");
    }
}
