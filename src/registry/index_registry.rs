use super::client::{RegistryClient, RegistryError};
use super::mapping::{select_fields, DocumentMapping};
use crate::model::{Entity, EntityRef, TypeLabel};
use crate::search::{Document, EmbeddedEntry, Fts5SearchIndex};
use crate::store::EntitySource;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Registry building documents from configured mappings.
///
/// Embedded entries are read from the store when the owning document is
/// built, so a document always reflects the related rows as committed at
/// that time.
pub struct IndexRegistry {
    mappings: BTreeMap<TypeLabel, DocumentMapping>,
    source: Arc<dyn EntitySource>,
    index: Arc<Fts5SearchIndex>,
}

impl IndexRegistry {
    pub fn new(
        mappings: Vec<DocumentMapping>,
        source: Arc<dyn EntitySource>,
        index: Arc<Fts5SearchIndex>,
    ) -> Self {
        let mappings: BTreeMap<_, _> = mappings
            .into_iter()
            .map(|m| (m.type_label.clone(), m))
            .collect();
        info!("Index registry with {} document types", mappings.len());
        Self {
            mappings,
            source,
            index,
        }
    }

    /// Types that own a document.
    pub fn document_types(&self) -> impl Iterator<Item = &TypeLabel> {
        self.mappings.keys()
    }

    pub fn index(&self) -> &Arc<Fts5SearchIndex> {
        &self.index
    }

    fn fetch(&self, entity: &EntityRef) -> Result<Option<Entity>, RegistryError> {
        self.source
            .fetch(entity)
            .map_err(|source| RegistryError::Source {
                entity: entity.clone(),
                source,
            })
    }

    fn build_document(
        &self,
        instance: &Entity,
        mapping: &DocumentMapping,
    ) -> Result<Document, RegistryError> {
        let mut document = Document::new(instance.entity_ref.clone());
        document.fields = select_fields(instance, &mapping.fields);

        for embed in &mapping.embeds {
            for target in instance.related(&embed.relation) {
                if target.type_label != embed.target {
                    continue;
                }
                // Gone targets are dropped, their own unlink cleans up
                let Some(related) = self.fetch(target)? else {
                    debug!("Skipping missing {} embedded in {}", target, instance.entity_ref);
                    continue;
                };
                document.embedded.push(EmbeddedEntry {
                    relation: embed.relation.clone(),
                    target: target.clone(),
                    fields: select_fields(&related, &embed.fields),
                });
            }
        }
        Ok(document)
    }
}

impl RegistryClient for IndexRegistry {
    fn tracked_types(&self) -> BTreeSet<TypeLabel> {
        let mut types = BTreeSet::new();
        for mapping in self.mappings.values() {
            types.insert(mapping.type_label.clone());
            for embed in &mapping.embeds {
                types.insert(embed.target.clone());
            }
        }
        types
    }

    fn upsert(&self, instance: &Entity) -> Result<(), RegistryError> {
        let Some(mapping) = self.mappings.get(instance.type_label()) else {
            return Ok(());
        };
        let document = self.build_document(instance, mapping)?;
        self.index.upsert_document(&document)?;
        Ok(())
    }

    fn upsert_related(&self, instance: &Entity) -> Result<(), RegistryError> {
        let target = &instance.entity_ref;
        // The store knows owners related before this entity existed, the
        // index knows owners whose documents still carry a stale copy
        let mut owners: BTreeSet<EntityRef> = self
            .source
            .owners_of(target)
            .map_err(|source| RegistryError::Source {
                entity: target.clone(),
                source,
            })?
            .into_iter()
            .filter(|owner| {
                self.mappings
                    .get(&owner.type_label)
                    .is_some_and(|mapping| mapping.embeds_type(&target.type_label))
            })
            .collect();
        owners.extend(self.index.documents_embedding(target)?);

        for owner in owners {
            match self.fetch(&owner)? {
                Some(owner_entity) => self.upsert(&owner_entity)?,
                None => debug!("Owner {} of {} is gone", owner, instance.entity_ref),
            }
        }
        Ok(())
    }

    fn remove(&self, entity: &EntityRef, raise_on_error: bool) -> Result<(), RegistryError> {
        if !self.mappings.contains_key(&entity.type_label) {
            return Ok(());
        }
        let removed = self.index.remove_document(entity)?;
        if !removed && raise_on_error {
            return Err(RegistryError::DocumentNotFound(entity.clone()));
        }
        Ok(())
    }

    fn remove_related(&self, entity: &EntityRef) -> Result<(), RegistryError> {
        let rewritten = self.index.remove_embedded(entity)?;
        if rewritten > 0 {
            debug!("Unlinked {} from {} documents", entity, rewritten);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use tempfile::TempDir;

    fn article() -> TypeLabel {
        TypeLabel::new("blog", "Article")
    }

    fn tag() -> TypeLabel {
        TypeLabel::new("blog", "Tag")
    }

    fn author() -> TypeLabel {
        TypeLabel::new("blog", "Author")
    }

    struct Fixture {
        _dir: TempDir,
        store: SqliteStore,
        registry: IndexRegistry,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("store.db"), 1).unwrap();
        let index = Arc::new(Fts5SearchIndex::new(&dir.path().join("index.db")).unwrap());
        let mappings = vec![
            DocumentMapping::new(article(), &["title"]).embed("tags", tag(), &["name"]),
            DocumentMapping::new(author(), &["name"]).embed("articles", article(), &["title"]),
        ];
        let registry = IndexRegistry::new(mappings, Arc::new(store.clone()), index);
        Fixture {
            _dir: dir,
            store,
            registry,
        }
    }

    #[test]
    fn test_tracked_types_include_embed_targets() {
        let f = fixture();
        let tracked = f.registry.tracked_types();
        assert_eq!(
            tracked,
            BTreeSet::from([article(), tag(), author()])
        );
    }

    #[test]
    fn test_upsert_builds_embedded_entries() {
        let f = fixture();
        f.store
            .save(
                &Entity::new(article(), 1)
                    .with_field("title", "Ownership")
                    .with_field("secret", "x"),
            )
            .unwrap();
        f.store.save(&Entity::new(tag(), "rust").with_field("name", "rust")).unwrap();
        f.store
            .add_relation(&EntityRef::new(article(), 1), "tags", &[EntityRef::new(tag(), "rust")])
            .unwrap();

        let instance = f.store.fetch(&EntityRef::new(article(), 1)).unwrap().unwrap();
        f.registry.upsert(&instance).unwrap();

        let doc = f
            .registry
            .index()
            .get_document(&EntityRef::new(article(), 1))
            .unwrap()
            .unwrap();
        assert_eq!(doc.fields.len(), 1);
        assert_eq!(doc.fields["title"], "Ownership");
        assert!(doc.embeds(&EntityRef::new(tag(), "rust")));
    }

    #[test]
    fn test_upsert_untracked_type_is_noop() {
        let f = fixture();
        let comment = Entity::new(TypeLabel::new("blog", "Comment"), 1);
        f.registry.upsert(&comment).unwrap();
        assert_eq!(f.registry.index().document_count().unwrap(), 0);
    }

    #[test]
    fn test_upsert_related_refreshes_owners() {
        let f = fixture();
        f.store.save(&Entity::new(article(), 1).with_field("title", "Old")).unwrap();
        f.store.save(&Entity::new(author(), 7).with_field("name", "Ada")).unwrap();
        f.store
            .add_relation(&EntityRef::new(author(), 7), "articles", &[EntityRef::new(article(), 1)])
            .unwrap();
        let ada = f.store.fetch(&EntityRef::new(author(), 7)).unwrap().unwrap();
        f.registry.upsert(&ada).unwrap();

        f.store.save(&Entity::new(article(), 1).with_field("title", "New")).unwrap();
        let updated = f.store.fetch(&EntityRef::new(article(), 1)).unwrap().unwrap();
        f.registry.upsert_related(&updated).unwrap();

        let doc = f
            .registry
            .index()
            .get_document(&EntityRef::new(author(), 7))
            .unwrap()
            .unwrap();
        let entry = doc.embedded_in("articles").next().unwrap();
        assert_eq!(entry.fields["title"], "New");
    }

    #[test]
    fn test_upsert_related_finds_owners_related_before_target_existed() {
        let f = fixture();
        f.store.save(&Entity::new(article(), 1).with_field("title", "Joins")).unwrap();
        f.store
            .add_relation(&EntityRef::new(article(), 1), "tags", &[EntityRef::new(tag(), "sql")])
            .unwrap();
        let instance = f.store.fetch(&EntityRef::new(article(), 1)).unwrap().unwrap();
        f.registry.upsert(&instance).unwrap();
        let doc = f
            .registry
            .index()
            .get_document(&EntityRef::new(article(), 1))
            .unwrap()
            .unwrap();
        assert!(doc.embedded.is_empty());

        f.store.save(&Entity::new(tag(), "sql").with_field("name", "sql")).unwrap();
        let sql = f.store.fetch(&EntityRef::new(tag(), "sql")).unwrap().unwrap();
        f.registry.upsert_related(&sql).unwrap();

        let doc = f
            .registry
            .index()
            .get_document(&EntityRef::new(article(), 1))
            .unwrap()
            .unwrap();
        assert!(doc.embeds(&EntityRef::new(tag(), "sql")));
    }

    #[test]
    fn test_remove_respects_raise_on_error() {
        let f = fixture();
        let missing = EntityRef::new(article(), 99);
        f.registry.remove(&missing, false).unwrap();
        assert!(matches!(
            f.registry.remove(&missing, true),
            Err(RegistryError::DocumentNotFound(_))
        ));
    }

    #[test]
    fn test_remove_related_unlinks() {
        let f = fixture();
        f.store.save(&Entity::new(article(), 1).with_field("title", "T")).unwrap();
        f.store.save(&Entity::new(tag(), "go").with_field("name", "go")).unwrap();
        f.store
            .add_relation(&EntityRef::new(article(), 1), "tags", &[EntityRef::new(tag(), "go")])
            .unwrap();
        let instance = f.store.fetch(&EntityRef::new(article(), 1)).unwrap().unwrap();
        f.registry.upsert(&instance).unwrap();

        f.registry.remove_related(&EntityRef::new(tag(), "go")).unwrap();
        let doc = f
            .registry
            .index()
            .get_document(&EntityRef::new(article(), 1))
            .unwrap()
            .unwrap();
        assert!(doc.embedded.is_empty());
    }
}
