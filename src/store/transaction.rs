use super::signals::MutationSignals;
use super::sqlite_store::{
    clear_relation_rows, delete_entity, delete_relation_rows, entity_exists, insert_relation_rows,
    load_entity, write_entity,
};
use super::trait_def::{CommitCallback, CommitHooks};
use crate::metrics;
use crate::model::{Entity, EntityRef, RelationChange};
use anyhow::{bail, Result};
use rusqlite::Connection;
use std::cell::RefCell;
use std::sync::{Arc, MutexGuard};
use tracing::{debug, error};

/// An open write transaction on the store.
///
/// Mutation signals fired from inside the transaction carry it as their
/// commit hooks. Callbacks registered there run once after `COMMIT`
/// succeeds, in registration order. Dropping the transaction without
/// calling [`StoreTransaction::commit`] rolls it back and drops them.
pub struct StoreTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    signals: Arc<MutationSignals>,
    on_commit: RefCell<Vec<CommitCallback>>,
    finished: bool,
}

impl<'a> StoreTransaction<'a> {
    pub(super) fn new(conn: MutexGuard<'a, Connection>, signals: Arc<MutationSignals>) -> Self {
        Self {
            conn,
            signals,
            on_commit: RefCell::new(Vec::new()),
            finished: false,
        }
    }

    /// Insert or update an entity's fields.
    pub fn save(&mut self, entity: &Entity) -> Result<()> {
        write_entity(&self.conn, entity)?;
        let signals = Arc::clone(&self.signals);
        signals.send_write(entity, Some(&*self))?;
        Ok(())
    }

    /// Delete an entity. Returns false, without signalling, if it does not exist.
    pub fn delete(&mut self, entity: &EntityRef) -> Result<bool> {
        let Some(instance) = load_entity(&self.conn, entity)? else {
            return Ok(false);
        };
        let signals = Arc::clone(&self.signals);

        signals.send_pre_delete(&instance, Some(&*self))?;
        delete_entity(&self.conn, entity)?;
        signals.send_post_delete(&instance, Some(&*self))?;
        Ok(true)
    }

    pub fn add_relation(
        &mut self,
        owner: &EntityRef,
        relation: &str,
        targets: &[EntityRef],
    ) -> Result<()> {
        self.ensure_exists(owner)?;
        insert_relation_rows(&self.conn, owner, relation, targets)?;
        self.relation_changed(owner, RelationChange::Add)
    }

    pub fn remove_relation(
        &mut self,
        owner: &EntityRef,
        relation: &str,
        targets: &[EntityRef],
    ) -> Result<()> {
        self.ensure_exists(owner)?;
        delete_relation_rows(&self.conn, owner, relation, targets)?;
        self.relation_changed(owner, RelationChange::Remove)
    }

    pub fn clear_relation(&mut self, owner: &EntityRef, relation: &str) -> Result<()> {
        self.ensure_exists(owner)?;
        clear_relation_rows(&self.conn, owner, relation)?;
        self.relation_changed(owner, RelationChange::Clear)
    }

    /// Read an entity as this transaction sees it.
    pub fn fetch(&self, entity: &EntityRef) -> Result<Option<Entity>> {
        load_entity(&self.conn, entity)
    }

    fn ensure_exists(&self, entity: &EntityRef) -> Result<()> {
        if !entity_exists(&self.conn, entity)? {
            bail!("Entity {} not found", entity);
        }
        Ok(())
    }

    fn relation_changed(&mut self, owner: &EntityRef, change: RelationChange) -> Result<()> {
        if let Some(instance) = load_entity(&self.conn, owner)? {
            let signals = Arc::clone(&self.signals);
            signals.send_relation_change(&instance, change, Some(&*self))?;
        }
        Ok(())
    }

    /// Number of callbacks waiting for commit.
    pub fn pending_callbacks(&self) -> usize {
        self.on_commit.borrow().len()
    }

    /// Commit, then run the registered commit callbacks.
    ///
    /// The write lock is released before the callbacks run.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        let callbacks = std::mem::take(self.on_commit.get_mut());

        if let Err(e) = self.conn.execute("COMMIT", []) {
            error!("Commit failed, rolling back: {}", e);
            let _ = self.conn.execute("ROLLBACK", []);
            metrics::record_discarded_commit_callbacks(callbacks.len());
            return Err(e.into());
        }
        drop(self);

        debug!("Committed, running {} commit callbacks", callbacks.len());
        for callback in callbacks {
            callback();
        }
        Ok(())
    }

    /// Roll back explicitly. Registered commit callbacks are dropped.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        let discarded = std::mem::take(self.on_commit.get_mut());
        metrics::record_discarded_commit_callbacks(discarded.len());
        self.conn.execute("ROLLBACK", [])?;
        debug!("Rolled back, discarded {} commit callbacks", discarded.len());
        Ok(())
    }
}

impl CommitHooks for StoreTransaction<'_> {
    fn on_commit(&self, callback: CommitCallback) {
        self.on_commit.borrow_mut().push(callback);
    }
}

impl Drop for StoreTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let discarded = self.on_commit.get_mut().len();
        metrics::record_discarded_commit_callbacks(discarded);
        if let Err(e) = self.conn.execute("ROLLBACK", []) {
            error!("Rollback of dropped transaction failed: {}", e);
        }
        debug!(
            "Transaction dropped without commit, discarded {} commit callbacks",
            discarded
        );
    }
}

#[cfg(test)]
mod tests {
    use super::super::{EntitySource, SqliteStore};
    use super::*;
    use crate::model::TypeLabel;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn article(pk: i64) -> Entity {
        Entity::new(TypeLabel::new("blog", "Article"), pk).with_field("title", "t")
    }

    fn counter_callback(counter: &Arc<AtomicUsize>) -> CommitCallback {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_callbacks_run_after_commit() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("store.db"), 1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut tx = store.transaction().unwrap();
        tx.save(&article(1)).unwrap();
        tx.on_commit(counter_callback(&counter));
        tx.on_commit(counter_callback(&counter));
        assert_eq!(tx.pending_callbacks(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        // Not visible to other connections before commit
        assert!(store
            .fetch(&article(1).entity_ref)
            .unwrap()
            .is_none());

        tx.commit().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(store.fetch(&article(1).entity_ref).unwrap().is_some());
    }

    #[test]
    fn test_callbacks_see_committed_rows() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("store.db"), 1).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));

        let mut tx = store.transaction().unwrap();
        tx.save(&article(7)).unwrap();
        let reader = store.clone();
        let seen_in_callback = Arc::clone(&seen);
        tx.on_commit(Box::new(move || {
            if reader.fetch(&article(7).entity_ref).unwrap().is_some() {
                seen_in_callback.fetch_add(1, Ordering::SeqCst);
            }
        }));
        tx.commit().unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rollback_discards_callbacks_and_writes() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("store.db"), 1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut tx = store.transaction().unwrap();
        tx.save(&article(1)).unwrap();
        tx.on_commit(counter_callback(&counter));
        tx.rollback().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(store.fetch(&article(1).entity_ref).unwrap().is_none());
    }

    #[test]
    fn test_drop_rolls_back() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("store.db"), 1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        {
            let mut tx = store.transaction().unwrap();
            tx.save(&article(1)).unwrap();
            tx.on_commit(counter_callback(&counter));
        }

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(store.fetch(&article(1).entity_ref).unwrap().is_none());

        // The write lock was released
        let tx = store.transaction().unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn test_transaction_reads_its_own_writes() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("store.db"), 1).unwrap();

        let mut tx = store.transaction().unwrap();
        tx.save(&article(3)).unwrap();
        assert!(tx.fetch(&article(3).entity_ref).unwrap().is_some());
        assert!(tx.delete(&article(3).entity_ref).unwrap());
        assert!(!tx.delete(&article(3).entity_ref).unwrap());
        tx.commit().unwrap();
    }
}
