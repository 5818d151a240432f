#![allow(dead_code)]

use super::fixtures::*;
use search_index_sync::jobs::{InMemoryDispatcher, JobContext, JobSet, SubmittedJob};
use search_index_sync::model::{Entity, EntityRef};
use search_index_sync::propagation::{propagation_jobs, SignalProcessor};
use search_index_sync::registry::{IndexRegistry, ModelTypes, RegistryClient};
use search_index_sync::search::{Document, Fts5SearchIndex};
use search_index_sync::store::{EntitySource, SqliteStore};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// A store, an index and an active signal processor feeding a recording
/// dispatcher. Jobs only run when the test asks for it.
pub struct TestHarness {
    _dir: TempDir,
    pub store: SqliteStore,
    pub index: Arc<Fts5SearchIndex>,
    pub registry: Arc<IndexRegistry>,
    pub queue: Arc<InMemoryDispatcher>,
    pub processor: SignalProcessor,
    pub jobs: JobSet,
    pub context: JobContext,
}

impl TestHarness {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = SqliteStore::new(dir.path().join("store.db"), 2).expect("Failed to open store");
        let index = Arc::new(
            Fts5SearchIndex::new(&dir.path().join("index.db")).expect("Failed to open index"),
        );
        let registry = Arc::new(IndexRegistry::new(
            blog_mappings(),
            Arc::new(store.clone()),
            Arc::clone(&index),
        ));
        let queue = Arc::new(InMemoryDispatcher::new());

        let processor = SignalProcessor::new(store.signals(), registry.as_ref(), queue.clone());
        processor.setup().expect("Failed to set up signal processor");

        let mut types = ModelTypes::new(registry.tracked_types());
        types.register(comment_type());
        let context = JobContext::new(
            CancellationToken::new(),
            registry.clone(),
            Arc::new(types),
            Arc::new(store.clone()),
        );

        Self {
            _dir: dir,
            store,
            index,
            registry,
            queue,
            processor,
            jobs: propagation_jobs(),
            context,
        }
    }

    pub fn create_tag(&self, pk: &str) {
        self.store
            .save(&Entity::new(tag_type(), pk).with_field("name", pk))
            .unwrap();
    }

    /// Create an article and attach its tags, each in its own transaction.
    pub fn create_article(&self, pk: i64, title: &str, tags: &[&str]) {
        self.store
            .save(
                &Entity::new(article_type(), pk)
                    .with_field("title", title)
                    .with_field("body", format!("Body of {}", title)),
            )
            .unwrap();
        if !tags.is_empty() {
            let targets: Vec<_> = tags.iter().map(|t| tag_ref(t)).collect();
            self.store
                .add_relation(&article_ref(pk), "tags", &targets)
                .unwrap();
        }
    }

    pub fn create_author(&self, pk: i64, name: &str, articles: &[i64]) {
        self.store
            .save(&Entity::new(author_type(), pk).with_field("name", name))
            .unwrap();
        if !articles.is_empty() {
            let targets: Vec<_> = articles.iter().map(|a| article_ref(*a)).collect();
            self.store
                .add_relation(&author_ref(pk), "articles", &targets)
                .unwrap();
        }
    }

    /// Run every pending job in submission order, asserting each succeeds.
    pub fn run_jobs(&self) -> usize {
        let outcomes = self.queue.run_pending(&self.jobs, &self.context);
        for (job, result) in &outcomes {
            assert!(
                result.is_ok(),
                "Job {} {} failed: {:?}",
                job.job_name(),
                job.args,
                result
            );
        }
        outcomes.len()
    }

    /// Run the given submissions in the given order.
    pub fn run_in_order(&self, jobs: &[SubmittedJob]) {
        for job in jobs {
            self.jobs
                .execute(job.job_name(), &self.context, &job.args)
                .unwrap();
        }
    }

    pub fn submitted_names(&self) -> Vec<String> {
        self.queue.submitted_names()
    }

    pub fn document(&self, entity: &EntityRef) -> Option<Document> {
        self.index.get_document(entity).unwrap()
    }

    pub fn fetch(&self, entity: &EntityRef) -> Option<Entity> {
        self.store.fetch(entity).unwrap()
    }
}
