//! SQLite-backed entity store.
//!
//! Writes go through a single connection, reads through a small pool of
//! read-only connections so a worker re-reading an entity never waits on an
//! open write transaction and only ever sees committed rows.

use super::schema::STORE_VERSIONED_SCHEMAS;
use super::signals::MutationSignals;
use super::trait_def::EntitySource;
use super::transaction::StoreTransaction;
use crate::model::{Entity, EntityRef, RelationChange, TypeLabel};
use crate::sqlite_persistence::ensure_schema;
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Clone)]
pub struct SqliteStore {
    write_conn: Arc<Mutex<Connection>>,
    read_pool: Vec<Arc<Mutex<Connection>>>,
    read_index: Arc<AtomicUsize>,
    signals: Arc<MutationSignals>,
}

impl SqliteStore {
    /// Open (or create) the store database.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    /// * `read_pool_size` - Number of connections for concurrent reads (at least 1)
    pub fn new<P: AsRef<Path>>(db_path: P, read_pool_size: usize) -> Result<Self> {
        let db_path = db_path.as_ref();

        let write_conn = Connection::open_with_flags(
            db_path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open store database")?;
        write_conn.pragma_update(None, "journal_mode", "WAL")?;
        ensure_schema(&write_conn, STORE_VERSIONED_SCHEMAS, "store")?;

        let entity_count: i64 = write_conn
            .query_row("SELECT COUNT(*) FROM entities", [], |r| r.get(0))
            .unwrap_or(0);
        info!("Opened store at {:?}: {} entities", db_path, entity_count);

        let read_pool_size = read_pool_size.max(1);
        let mut read_pool = Vec::with_capacity(read_pool_size);
        for _ in 0..read_pool_size {
            let read_conn = Connection::open_with_flags(
                db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            read_pool.push(Arc::new(Mutex::new(read_conn)));
        }

        Ok(SqliteStore {
            write_conn: Arc::new(Mutex::new(write_conn)),
            read_pool,
            read_index: Arc::new(AtomicUsize::new(0)),
            signals: Arc::new(MutationSignals::new()),
        })
    }

    /// The event source observers connect to.
    pub fn signals(&self) -> Arc<MutationSignals> {
        Arc::clone(&self.signals)
    }

    fn get_read_conn(&self) -> Arc<Mutex<Connection>> {
        let index = self.read_index.fetch_add(1, Ordering::SeqCst) % self.read_pool.len();
        self.read_pool[index].clone()
    }

    /// Begin a write transaction. Dropping it without committing rolls it back.
    pub fn transaction(&self) -> Result<StoreTransaction<'_>> {
        let conn = self.write_conn.lock().unwrap();
        conn.execute("BEGIN IMMEDIATE", [])?;
        Ok(StoreTransaction::new(conn, Arc::clone(&self.signals)))
    }

    // The autocommit helpers below commit before signalling with no
    // transaction attached, so deferred propagation is dispatched right away.

    /// Insert or update an entity's fields in its own transaction.
    pub fn save(&self, entity: &Entity) -> Result<()> {
        {
            let conn = self.write_conn.lock().unwrap();
            run_in_transaction(&conn, |conn| write_entity(conn, entity))?;
        }
        self.signals.send_write(entity, None)?;
        Ok(())
    }

    /// Delete an entity in its own transaction. Returns false if it did not exist.
    pub fn delete(&self, entity: &EntityRef) -> Result<bool> {
        let conn = self.write_conn.lock().unwrap();
        let Some(instance) = load_entity(&conn, entity)? else {
            return Ok(false);
        };

        self.signals.send_pre_delete(&instance, None)?;
        run_in_transaction(&conn, |conn| delete_entity(conn, entity))?;
        drop(conn);

        self.signals.send_post_delete(&instance, None)?;
        Ok(true)
    }

    pub fn add_relation(
        &self,
        owner: &EntityRef,
        relation: &str,
        targets: &[EntityRef],
    ) -> Result<()> {
        self.change_relation(owner, RelationChange::Add, |conn| {
            insert_relation_rows(conn, owner, relation, targets)
        })
    }

    pub fn remove_relation(
        &self,
        owner: &EntityRef,
        relation: &str,
        targets: &[EntityRef],
    ) -> Result<()> {
        self.change_relation(owner, RelationChange::Remove, |conn| {
            delete_relation_rows(conn, owner, relation, targets).map(|_| ())
        })
    }

    pub fn clear_relation(&self, owner: &EntityRef, relation: &str) -> Result<()> {
        self.change_relation(owner, RelationChange::Clear, |conn| {
            clear_relation_rows(conn, owner, relation).map(|_| ())
        })
    }

    fn change_relation<F>(&self, owner: &EntityRef, change: RelationChange, f: F) -> Result<()>
    where
        F: FnOnce(&Connection) -> Result<()>,
    {
        let instance = {
            let conn = self.write_conn.lock().unwrap();
            run_in_transaction(&conn, |conn| {
                if !entity_exists(conn, owner)? {
                    bail!("Entity {} not found", owner);
                }
                f(conn)
            })?;
            load_entity(&conn, owner)?
        };
        if let Some(instance) = instance {
            self.signals.send_relation_change(&instance, change, None)?;
        }
        Ok(())
    }

}

impl EntitySource for SqliteStore {
    fn fetch(&self, entity: &EntityRef) -> Result<Option<Entity>> {
        let conn = self.get_read_conn();
        let conn = conn.lock().unwrap();
        load_entity(&conn, entity)
    }

    fn list(&self, type_label: &TypeLabel) -> Result<Vec<Entity>> {
        let conn = self.get_read_conn();
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT pk, data FROM entities WHERE type_label = ?1 ORDER BY rowid",
        )?;
        let rows: Vec<(String, String)> = stmt
            .query_map(params![type_label.to_string()], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;

        let mut entities = Vec::with_capacity(rows.len());
        for (pk, data) in rows {
            let entity_ref = EntityRef::new(type_label.clone(), pk);
            let relations = load_relations(&conn, &entity_ref)?;
            entities.push(Entity {
                fields: parse_fields(&entity_ref, &data)?,
                relations,
                entity_ref,
            });
        }
        Ok(entities)
    }

    fn owners_of(&self, target: &EntityRef) -> Result<Vec<EntityRef>> {
        let conn = self.get_read_conn();
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT owner_type, owner_pk FROM relations
             WHERE target_type = ?1 AND target_pk = ?2
             ORDER BY owner_type, owner_pk",
        )?;
        let rows: Vec<(String, String)> = stmt
            .query_map(
                params![target.type_label.to_string(), target.pk.as_str()],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )?
            .collect::<rusqlite::Result<_>>()?;

        rows.into_iter()
            .map(|(owner_type, owner_pk)| {
                let owner_type: TypeLabel = owner_type
                    .parse()
                    .with_context(|| format!("Bad relation owner type for {}", target))?;
                Ok(EntityRef::new(owner_type, owner_pk))
            })
            .collect()
    }
}

/// Run `f` between `BEGIN IMMEDIATE` and `COMMIT`, rolling back on error.
fn run_in_transaction<T, F>(conn: &Connection, f: F) -> Result<T>
where
    F: FnOnce(&Connection) -> Result<T>,
{
    conn.execute("BEGIN IMMEDIATE", [])?;
    match f(conn) {
        Ok(value) => {
            conn.execute("COMMIT", [])?;
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute("ROLLBACK", []);
            Err(e)
        }
    }
}

fn parse_fields(
    entity: &EntityRef,
    data: &str,
) -> Result<serde_json::Map<String, serde_json::Value>> {
    serde_json::from_str(data).with_context(|| format!("Corrupted data for {}", entity))
}

pub(super) fn entity_exists(conn: &Connection, entity: &EntityRef) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM entities WHERE type_label = ?1 AND pk = ?2)",
        params![entity.type_label.to_string(), entity.pk.as_str()],
        |r| r.get(0),
    )?;
    Ok(exists)
}

fn load_relations(
    conn: &Connection,
    owner: &EntityRef,
) -> Result<BTreeMap<String, Vec<EntityRef>>> {
    let mut stmt = conn.prepare(
        "SELECT relation, target_type, target_pk FROM relations
         WHERE owner_type = ?1 AND owner_pk = ?2
         ORDER BY rowid",
    )?;
    let rows: Vec<(String, String, String)> = stmt
        .query_map(
            params![owner.type_label.to_string(), owner.pk.as_str()],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?
        .collect::<rusqlite::Result<_>>()?;

    let mut relations: BTreeMap<String, Vec<EntityRef>> = BTreeMap::new();
    for (relation, target_type, target_pk) in rows {
        let target_type: TypeLabel = target_type
            .parse()
            .with_context(|| format!("Bad relation target type on {}", owner))?;
        relations
            .entry(relation)
            .or_default()
            .push(EntityRef::new(target_type, target_pk));
    }
    Ok(relations)
}

pub(super) fn load_entity(conn: &Connection, entity: &EntityRef) -> Result<Option<Entity>> {
    let data: String = match conn.query_row(
        "SELECT data FROM entities WHERE type_label = ?1 AND pk = ?2",
        params![entity.type_label.to_string(), entity.pk.as_str()],
        |r| r.get(0),
    ) {
        Ok(data) => data,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    Ok(Some(Entity {
        entity_ref: entity.clone(),
        fields: parse_fields(entity, &data)?,
        relations: load_relations(conn, entity)?,
    }))
}

pub(super) fn write_entity(conn: &Connection, entity: &Entity) -> Result<()> {
    let data = serde_json::to_string(&entity.fields)?;
    conn.execute(
        "INSERT INTO entities (type_label, pk, data, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(type_label, pk)
         DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        params![
            entity.type_label().to_string(),
            entity.pk().as_str(),
            data,
            chrono::Utc::now().timestamp()
        ],
    )?;
    debug!("Wrote {}", entity.entity_ref);
    Ok(())
}

/// Delete an entity and every relation row that points to or from it.
pub(super) fn delete_entity(conn: &Connection, entity: &EntityRef) -> Result<()> {
    let type_label = entity.type_label.to_string();
    conn.execute(
        "DELETE FROM relations WHERE (owner_type = ?1 AND owner_pk = ?2)
            OR (target_type = ?1 AND target_pk = ?2)",
        params![type_label, entity.pk.as_str()],
    )?;
    conn.execute(
        "DELETE FROM entities WHERE type_label = ?1 AND pk = ?2",
        params![type_label, entity.pk.as_str()],
    )?;
    debug!("Deleted {}", entity);
    Ok(())
}

pub(super) fn insert_relation_rows(
    conn: &Connection,
    owner: &EntityRef,
    relation: &str,
    targets: &[EntityRef],
) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO relations (owner_type, owner_pk, relation, target_type, target_pk)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    let owner_type = owner.type_label.to_string();
    for target in targets {
        stmt.execute(params![
            owner_type,
            owner.pk.as_str(),
            relation,
            target.type_label.to_string(),
            target.pk.as_str()
        ])?;
    }
    Ok(())
}

pub(super) fn delete_relation_rows(
    conn: &Connection,
    owner: &EntityRef,
    relation: &str,
    targets: &[EntityRef],
) -> Result<usize> {
    let mut stmt = conn.prepare(
        "DELETE FROM relations WHERE owner_type = ?1 AND owner_pk = ?2 AND relation = ?3
         AND target_type = ?4 AND target_pk = ?5",
    )?;
    let owner_type = owner.type_label.to_string();
    let mut removed = 0;
    for target in targets {
        removed += stmt.execute(params![
            owner_type,
            owner.pk.as_str(),
            relation,
            target.type_label.to_string(),
            target.pk.as_str()
        ])?;
    }
    Ok(removed)
}

pub(super) fn clear_relation_rows(
    conn: &Connection,
    owner: &EntityRef,
    relation: &str,
) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM relations WHERE owner_type = ?1 AND owner_pk = ?2 AND relation = ?3",
        params![owner.type_label.to_string(), owner.pk.as_str(), relation],
    )?;
    Ok(removed)
}
