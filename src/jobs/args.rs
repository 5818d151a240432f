use super::job::JobError;
use crate::model::{EntityRef, PrimaryKey};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

/// Wire payload of the propagation jobs: `{"pk": "...", "type_label": "app.Model"}`.
///
/// The type label stays a plain string until the job resolves it, so an
/// unknown type surfaces as a job failure instead of a decode error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobArgs {
    #[serde(deserialize_with = "string_or_integer_pk")]
    pub pk: PrimaryKey,
    pub type_label: String,
}

impl JobArgs {
    pub fn for_entity(entity: &EntityRef) -> Self {
        Self {
            pk: entity.pk.clone(),
            type_label: entity.type_label.to_string(),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({
            "pk": self.pk.as_str(),
            "type_label": self.type_label,
        })
    }

    pub fn from_json(value: &JsonValue) -> Result<Self, JobError> {
        serde_json::from_value(value.clone()).map_err(|e| JobError::InvalidArguments(e.to_string()))
    }
}

/// Keys are opaque, producers may still send integer keys as JSON numbers.
fn string_or_integer_pk<'de, D>(deserializer: D) -> Result<PrimaryKey, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum WireKey {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(match WireKey::deserialize(deserializer)? {
        WireKey::Text(pk) => PrimaryKey(pk),
        WireKey::Signed(pk) => PrimaryKey(pk.to_string()),
        WireKey::Unsigned(pk) => PrimaryKey(pk.to_string()),
    })
}
