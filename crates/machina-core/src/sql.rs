// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Named SQL statements for the persistence schema.
//!
//! The statement names and their positional parameter shapes are the
//! contract; the text is configurable. [`Sql::default`] targets SQLite.
//! Override individual statements with struct update syntax:
//!
//! ```
//! use machina_core::Sql;
//!
//! let sql = Sql {
//!     read_entity: "select bytes from entity_v2 where cls = ? and id = ?".to_string(),
//!     ..Sql::default()
//! };
//! # assert!(!sql.read_entity.is_empty());
//! ```

/// The catalog of statements the runtime executes.
///
/// Parameter positions matter and must be preserved by overrides.
#[derive(Debug, Clone)]
pub struct Sql {
    /// Insert one signal-queue row: (cls, id, event_cls, event_bytes).
    pub add_to_signal_queue: String,
    /// Probe a signal-queue row by sequence number: (seq).
    pub signal_exists: String,
    /// Delete a signal-queue row by sequence number: (seq).
    pub delete_signal: String,
    /// Select all signal-queue rows in ascending sequence order.
    pub select_signals: String,
    /// Insert one delayed row: (from_cls, from_id, cls, id, event_cls, event_bytes, times).
    pub add_delayed_signal: String,
    /// Delete a delayed row by cancellation key: (from_cls, from_id, cls, id).
    pub delete_delayed_signal: String,
    /// Probe a delayed row by sequence number: (seq).
    pub delayed_signal_exists: String,
    /// Delete a delayed row by sequence number: (seq).
    pub delete_numbered_delayed_signal: String,
    /// Select all delayed rows in ascending sequence order.
    pub select_delayed_signals: String,
    /// Read entity bytes and state: (cls, id).
    pub read_entity_and_state: String,
    /// Read entity bytes: (cls, id).
    pub read_entity: String,
    /// Read (id, bytes) for every entity of a class: (cls).
    pub read_all_entities: String,
    /// Update entity bytes and state: (bytes, state, cls, id).
    pub update_entity: String,
    /// Insert an entity row: (cls, id, bytes, state).
    pub insert_entity: String,
    /// Delete all property rows of one entity: (cls, id).
    pub delete_entity_properties: String,
    /// Insert one property row: (cls, id, name, value).
    pub insert_entity_property: String,
    /// Read (id, bytes) of entities matching one property: (cls, name, value).
    pub read_entities_by_property: String,
    /// Read (id, bytes) of entities matching one property and a numeric
    /// range on a second property: (cls, name, value, range_name,
    /// range_start, start_inclusive, range_end, end_inclusive, last_id,
    /// limit). Ordered by id; `last_id` is an exclusive lower bound.
    pub read_entities_by_property_range: String,
    /// Append one signal-store row: (cls, id, event_cls, event_bytes).
    pub add_to_signal_store: String,
}

impl Default for Sql {
    fn default() -> Self {
        Sql {
            add_to_signal_queue: "insert into signal_queue (cls, id, event_cls, event_bytes) \
                 values (?, ?, ?, ?)"
                .to_string(),
            signal_exists: "select seq from signal_queue where seq = ?".to_string(),
            delete_signal: "delete from signal_queue where seq = ?".to_string(),
            select_signals: "select seq, cls, id, event_cls, event_bytes from signal_queue \
                 order by seq"
                .to_string(),
            add_delayed_signal: "insert into delayed_signal_queue \
                 (from_cls, from_id, cls, id, event_cls, event_bytes, times) \
                 values (?, ?, ?, ?, ?, ?, ?)"
                .to_string(),
            delete_delayed_signal: "delete from delayed_signal_queue \
                 where from_cls = ? and from_id = ? and cls = ? and id = ?"
                .to_string(),
            delayed_signal_exists: "select seq from delayed_signal_queue where seq = ?".to_string(),
            delete_numbered_delayed_signal: "delete from delayed_signal_queue where seq = ?"
                .to_string(),
            select_delayed_signals: "select seq, cls, id, event_cls, event_bytes, times \
                 from delayed_signal_queue order by seq"
                .to_string(),
            read_entity_and_state: "select bytes, state from entity where cls = ? and id = ?"
                .to_string(),
            read_entity: "select bytes from entity where cls = ? and id = ?".to_string(),
            read_all_entities: "select id, bytes from entity where cls = ? order by id"
                .to_string(),
            update_entity: "update entity set bytes = ?, state = ? where cls = ? and id = ?"
                .to_string(),
            insert_entity: "insert into entity (cls, id, bytes, state) values (?, ?, ?, ?)"
                .to_string(),
            delete_entity_properties: "delete from entity_property where cls = ? and id = ?"
                .to_string(),
            insert_entity_property: "insert into entity_property (cls, id, name, value) \
                 values (?, ?, ?, ?)"
                .to_string(),
            read_entities_by_property: "select p.id, e.bytes from entity_property p \
                 join entity e on e.cls = p.cls and e.id = p.id \
                 where p.cls = ? and p.name = ? and p.value = ? \
                 order by p.id"
                .to_string(),
            read_entities_by_property_range: "select p.id, e.bytes from entity_property p \
                 join entity_property r on r.cls = p.cls and r.id = p.id \
                 join entity e on e.cls = p.cls and e.id = p.id \
                 where p.cls = ?1 and p.name = ?2 and p.value = ?3 \
                 and r.name = ?4 \
                 and (cast(r.value as integer) > ?5 \
                      or (?6 and cast(r.value as integer) = ?5)) \
                 and (cast(r.value as integer) < ?7 \
                      or (?8 and cast(r.value as integer) = ?7)) \
                 and (?9 is null or p.id > ?9) \
                 order by p.id \
                 limit ?10"
                .to_string(),
            add_to_signal_store: "insert into signal_store (cls, id, event_cls, event_bytes) \
                 values (?, ?, ?, ?)"
                .to_string(),
        }
    }
}

/// The schema bootstrap script bundled with the crate, SQLite dialect.
pub const CREATE_SQLITE: &str = include_str!("../sql/create-sqlite.sql");
