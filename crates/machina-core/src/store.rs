//! Statement execution over a live connection.
//!
//! Every function takes `&mut SqliteConnection` so callers choose the
//! transaction scope: the apply engine threads one transaction through all
//! of its writes, queries run on a plain pooled connection.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};

use crate::error::{Result, RuntimeError};
use crate::sql::Sql;

/// A non-delayed signal row read back from the queue.
#[derive(Debug, Clone)]
pub(crate) struct QueueRow {
    pub seq: i64,
    pub class: String,
    pub id: String,
    pub event_class: String,
    pub event_bytes: Vec<u8>,
}

/// A delayed signal row, fire-at in epoch milliseconds.
#[derive(Debug, Clone)]
pub(crate) struct DelayedRow {
    pub seq: i64,
    pub class: String,
    pub id: String,
    pub event_class: String,
    pub event_bytes: Vec<u8>,
    pub fire_at: i64,
}

fn fire_at_to_db(fire_at: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(fire_at)
        .ok_or(RuntimeError::Configuration("fire-at timestamp out of range"))
}

// --- entity store ---------------------------------------------------------

pub(crate) async fn read_entity(
    conn: &mut SqliteConnection,
    sql: &Sql,
    class: &str,
    id: &str,
) -> Result<Option<(Vec<u8>, String)>> {
    let row = sqlx::query(&sql.read_entity_and_state)
        .bind(class)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| RuntimeError::storage("read entity", e))?;

    match row {
        None => Ok(None),
        Some(row) => {
            let bytes: Vec<u8> = row.try_get("bytes")?;
            let state: String = row.try_get("state")?;
            Ok(Some((bytes, state)))
        }
    }
}

/// Update-if-exists-else-insert, idempotent on (class, id).
pub(crate) async fn save_entity(
    conn: &mut SqliteConnection,
    sql: &Sql,
    class: &str,
    id: &str,
    bytes: &[u8],
    state: &str,
) -> Result<()> {
    let updated = sqlx::query(&sql.update_entity)
        .bind(bytes)
        .bind(state)
        .bind(class)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| RuntimeError::storage("update entity", e))?
        .rows_affected();

    if updated == 0 {
        sqlx::query(&sql.insert_entity)
            .bind(class)
            .bind(id)
            .bind(bytes)
            .bind(state)
            .execute(&mut *conn)
            .await
            .map_err(|e| RuntimeError::storage("insert entity", e))?;
    }
    Ok(())
}

/// Rebuild the property rows for one entity: delete all, insert the map.
pub(crate) async fn save_properties(
    conn: &mut SqliteConnection,
    sql: &Sql,
    class: &str,
    id: &str,
    properties: &std::collections::BTreeMap<String, String>,
) -> Result<()> {
    sqlx::query(&sql.delete_entity_properties)
        .bind(class)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| RuntimeError::storage("delete entity properties", e))?;

    for (name, value) in properties {
        sqlx::query(&sql.insert_entity_property)
            .bind(class)
            .bind(id)
            .bind(name)
            .bind(value)
            .execute(&mut *conn)
            .await
            .map_err(|e| RuntimeError::storage("insert entity property", e))?;
    }
    Ok(())
}

// --- signal queue ---------------------------------------------------------

pub(crate) async fn enqueue_signal(
    conn: &mut SqliteConnection,
    sql: &Sql,
    class: &str,
    id: &str,
    event_class: &str,
    event_bytes: &[u8],
) -> Result<i64> {
    let result = sqlx::query(&sql.add_to_signal_queue)
        .bind(class)
        .bind(id)
        .bind(event_class)
        .bind(event_bytes)
        .execute(&mut *conn)
        .await
        .map_err(|e| RuntimeError::storage("enqueue signal", e))?;
    Ok(result.last_insert_rowid())
}

pub(crate) async fn signal_exists(
    conn: &mut SqliteConnection,
    sql: &Sql,
    seq: i64,
) -> Result<bool> {
    let row = sqlx::query(&sql.signal_exists)
        .bind(seq)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| RuntimeError::storage("probe signal", e))?;
    Ok(row.is_some())
}

pub(crate) async fn delete_signal(conn: &mut SqliteConnection, sql: &Sql, seq: i64) -> Result<()> {
    sqlx::query(&sql.delete_signal)
        .bind(seq)
        .execute(&mut *conn)
        .await
        .map_err(|e| RuntimeError::storage("delete signal", e))?;
    Ok(())
}

/// All undelivered non-delayed signals, ascending sequence order.
pub(crate) async fn select_signals(conn: &mut SqliteConnection, sql: &Sql) -> Result<Vec<QueueRow>> {
    let rows = sqlx::query(&sql.select_signals)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| RuntimeError::storage("select signals", e))?;

    rows.into_iter()
        .map(|row| {
            Ok(QueueRow {
                seq: row.try_get("seq")?,
                class: row.try_get("cls")?,
                id: row.try_get("id")?,
                event_class: row.try_get("event_cls")?,
                event_bytes: row.try_get("event_bytes")?,
            })
        })
        .collect()
}

// --- delayed signal queue -------------------------------------------------

/// Insert a delayed row, replacing any live row with the same cancellation
/// key (from_cls, from_id, cls, id).
pub(crate) async fn insert_delayed_signal(
    conn: &mut SqliteConnection,
    sql: &Sql,
    from_class: &str,
    from_id: &str,
    class: &str,
    id: &str,
    event_class: &str,
    event_bytes: &[u8],
    fire_at: i64,
) -> Result<i64> {
    delete_delayed_by_key(conn, sql, from_class, from_id, class, id).await?;

    let result = sqlx::query(&sql.add_delayed_signal)
        .bind(from_class)
        .bind(from_id)
        .bind(class)
        .bind(id)
        .bind(event_class)
        .bind(event_bytes)
        .bind(fire_at_to_db(fire_at)?)
        .execute(&mut *conn)
        .await
        .map_err(|e| RuntimeError::storage("insert delayed signal", e))?;
    Ok(result.last_insert_rowid())
}

pub(crate) async fn delete_delayed_by_key(
    conn: &mut SqliteConnection,
    sql: &Sql,
    from_class: &str,
    from_id: &str,
    class: &str,
    id: &str,
) -> Result<()> {
    sqlx::query(&sql.delete_delayed_signal)
        .bind(from_class)
        .bind(from_id)
        .bind(class)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| RuntimeError::storage("delete delayed signal by key", e))?;
    Ok(())
}

pub(crate) async fn delayed_signal_exists(
    conn: &mut SqliteConnection,
    sql: &Sql,
    seq: i64,
) -> Result<bool> {
    let row = sqlx::query(&sql.delayed_signal_exists)
        .bind(seq)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| RuntimeError::storage("probe delayed signal", e))?;
    Ok(row.is_some())
}

pub(crate) async fn delete_delayed_signal(
    conn: &mut SqliteConnection,
    sql: &Sql,
    seq: i64,
) -> Result<()> {
    sqlx::query(&sql.delete_numbered_delayed_signal)
        .bind(seq)
        .execute(&mut *conn)
        .await
        .map_err(|e| RuntimeError::storage("delete delayed signal", e))?;
    Ok(())
}

/// All delayed rows, ascending sequence order. Used on startup.
pub(crate) async fn select_delayed_signals(
    conn: &mut SqliteConnection,
    sql: &Sql,
) -> Result<Vec<DelayedRow>> {
    let rows = sqlx::query(&sql.select_delayed_signals)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| RuntimeError::storage("select delayed signals", e))?;

    rows.into_iter()
        .map(|row| {
            let times: DateTime<Utc> = row.try_get("times")?;
            Ok(DelayedRow {
                seq: row.try_get("seq")?,
                class: row.try_get("cls")?,
                id: row.try_get("id")?,
                event_class: row.try_get("event_cls")?,
                event_bytes: row.try_get("event_bytes")?,
                fire_at: times.timestamp_millis(),
            })
        })
        .collect()
}

// --- signal store ---------------------------------------------------------

/// Append one processed event to the audit log.
pub(crate) async fn append_signal_store(
    conn: &mut SqliteConnection,
    sql: &Sql,
    class: &str,
    id: &str,
    event_class: &str,
    event_bytes: &[u8],
) -> Result<()> {
    sqlx::query(&sql.add_to_signal_store)
        .bind(class)
        .bind(id)
        .bind(event_class)
        .bind(event_bytes)
        .execute(&mut *conn)
        .await
        .map_err(|e| RuntimeError::storage("append signal store", e))?;
    Ok(())
}
