//! SQLite schema of the entity store.
//!
//! Entities of every type share one table keyed by `(type_label, pk)`, their
//! fields kept as a JSON object. Many-to-many relations live in their own
//! table so a delete can drop every row pointing at an entity.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP};

const ENTITIES_TABLE: Table = Table {
    name: "entities",
    columns: &[
        sqlite_column!("type_label", &SqlType::Text, non_null = true),
        sqlite_column!("pk", &SqlType::Text, non_null = true),
        sqlite_column!("data", &SqlType::Text, non_null = true), // JSON object
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    primary_key: &["type_label", "pk"],
    indices: &[],
};

const RELATIONS_TABLE: Table = Table {
    name: "relations",
    columns: &[
        sqlite_column!("owner_type", &SqlType::Text, non_null = true),
        sqlite_column!("owner_pk", &SqlType::Text, non_null = true),
        sqlite_column!("relation", &SqlType::Text, non_null = true),
        sqlite_column!("target_type", &SqlType::Text, non_null = true),
        sqlite_column!("target_pk", &SqlType::Text, non_null = true),
    ],
    primary_key: &[
        "owner_type",
        "owner_pk",
        "relation",
        "target_type",
        "target_pk",
    ],
    indices: &[("idx_relations_target", "target_type, target_pk")],
};

pub const STORE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[ENTITIES_TABLE, RELATIONS_TABLE],
    extra_sql: None,
}];
