use super::client::TypeRegistry;
use crate::model::{TypeLabel, UnknownType};
use std::collections::BTreeSet;

/// The set of data-model types known to this process.
#[derive(Debug, Clone, Default)]
pub struct ModelTypes {
    known: BTreeSet<TypeLabel>,
}

impl ModelTypes {
    pub fn new(types: impl IntoIterator<Item = TypeLabel>) -> Self {
        Self {
            known: types.into_iter().collect(),
        }
    }

    pub fn register(&mut self, type_label: TypeLabel) {
        self.known.insert(type_label);
    }
}

impl TypeRegistry for ModelTypes {
    fn resolve(&self, type_label: &str) -> Result<TypeLabel, UnknownType> {
        let parsed: TypeLabel = type_label.parse()?;
        if self.known.contains(&parsed) {
            Ok(parsed)
        } else {
            Err(UnknownType(type_label.to_string()))
        }
    }
}
