// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read-only entity lookups.
//!
//! Queries run on a pooled connection with no transaction guarantees beyond
//! the single statement; they see the last committed apply.

use std::collections::BTreeMap;

use serde_json::Value;
use sqlx::Row;

use crate::error::{Result, RuntimeError};
use crate::runtime::Runtime;

/// How [`Runtime::get_by_properties`] combines its property predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combine {
    /// Entities matching every property.
    And,
    /// Entities matching at least one property.
    Or,
}

/// An entity snapshot paired with its id.
///
/// Equality and hashing use the id only; two query results for the same
/// entity compare equal even across saves.
#[derive(Debug, Clone)]
pub struct EntityWithId {
    /// Entity id.
    pub id: String,
    /// Entity snapshot.
    pub entity: Value,
}

impl PartialEq for EntityWithId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EntityWithId {}

impl std::hash::Hash for EntityWithId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Numeric range predicate on a second property for
/// [`Runtime::get_by_property_range`].
///
/// The named property's value is compared as a 64-bit integer.
#[derive(Debug, Clone)]
pub struct PropertyRange {
    /// Name of the property holding the numeric value.
    pub name: String,
    /// Lower bound.
    pub start: i64,
    /// Whether `start` itself matches.
    pub start_inclusive: bool,
    /// Upper bound.
    pub end: i64,
    /// Whether `end` itself matches.
    pub end_inclusive: bool,
}

impl Runtime {
    /// Look up one entity by id.
    pub async fn get(&self, class: &str, id: &str) -> Result<Option<Value>> {
        let row = sqlx::query(&self.inner.sql.read_entity)
            .bind(class)
            .bind(id)
            .fetch_optional(&self.inner.pool)
            .await
            .map_err(|e| RuntimeError::storage("read entity", e))?;

        match row {
            None => Ok(None),
            Some(row) => {
                let bytes: Vec<u8> = row.try_get("bytes")?;
                Ok(Some(self.inner.entity_serializer.deserialize(class, &bytes)?))
            }
        }
    }

    /// Look up one entity and its state name.
    ///
    /// The persisted state is validated through the class's behavior before
    /// it is returned, so a stale row with a renamed state surfaces as an
    /// error instead of leaking an unparseable name.
    pub async fn get_with_state(&self, class: &str, id: &str) -> Result<Option<(Value, String)>> {
        let row = sqlx::query(&self.inner.sql.read_entity_and_state)
            .bind(class)
            .bind(id)
            .fetch_optional(&self.inner.pool)
            .await
            .map_err(|e| RuntimeError::storage("read entity", e))?;

        match row {
            None => Ok(None),
            Some(row) => {
                let bytes: Vec<u8> = row.try_get("bytes")?;
                let state: String = row.try_get("state")?;
                let entity = self.inner.entity_serializer.deserialize(class, &bytes)?;
                let state = self.inner.behaviors.resolve(class)?.from_state(&state)?;
                Ok(Some((entity, state)))
            }
        }
    }

    /// All entities of a class, ordered by id.
    pub async fn list_all(&self, class: &str) -> Result<Vec<EntityWithId>> {
        let rows = sqlx::query(&self.inner.sql.read_all_entities)
            .bind(class)
            .fetch_all(&self.inner.pool)
            .await
            .map_err(|e| RuntimeError::storage("list entities", e))?;

        rows.into_iter()
            .map(|row| self.entity_from_row(class, &row))
            .collect()
    }

    /// Entities whose property `name` equals `value`, ordered by id.
    pub async fn get_by_property(
        &self,
        class: &str,
        name: &str,
        value: &str,
    ) -> Result<Vec<EntityWithId>> {
        let rows = sqlx::query(&self.inner.sql.read_entities_by_property)
            .bind(class)
            .bind(name)
            .bind(value)
            .fetch_all(&self.inner.pool)
            .await
            .map_err(|e| RuntimeError::storage("read entities by property", e))?;

        rows.into_iter()
            .map(|row| self.entity_from_row(class, &row))
            .collect()
    }

    /// Entities matching the given properties, combined with [`Combine`].
    ///
    /// An empty map matches nothing. Results are ordered by id.
    pub async fn get_by_properties(
        &self,
        class: &str,
        properties: &BTreeMap<String, String>,
        combine: Combine,
    ) -> Result<Vec<EntityWithId>> {
        let mut matched: Option<BTreeMap<String, Value>> = None;
        for (name, value) in properties {
            let page = self.get_by_property(class, name, value).await?;
            let ids: BTreeMap<String, Value> =
                page.into_iter().map(|e| (e.id, e.entity)).collect();
            matched = Some(match (matched, combine) {
                (None, _) => ids,
                (Some(mut acc), Combine::Or) => {
                    acc.extend(ids);
                    acc
                }
                (Some(acc), Combine::And) => acc
                    .into_iter()
                    .filter(|(id, _)| ids.contains_key(id))
                    .collect(),
            });
        }

        Ok(matched
            .unwrap_or_default()
            .into_iter()
            .map(|(id, entity)| EntityWithId { id, entity })
            .collect())
    }

    /// Entities whose property `name` equals `value`, restricted to a
    /// numeric range on a second property, paginated.
    ///
    /// Results are ordered by id ascending; pass the last id of the
    /// previous page as `last_id` (exclusive) to fetch the next one.
    pub async fn get_by_property_range(
        &self,
        class: &str,
        name: &str,
        value: &str,
        range: &PropertyRange,
        limit: i64,
        last_id: Option<&str>,
    ) -> Result<Vec<EntityWithId>> {
        let rows = sqlx::query(&self.inner.sql.read_entities_by_property_range)
            .bind(class)
            .bind(name)
            .bind(value)
            .bind(&range.name)
            .bind(range.start)
            .bind(range.start_inclusive)
            .bind(range.end)
            .bind(range.end_inclusive)
            .bind(last_id)
            .bind(limit)
            .fetch_all(&self.inner.pool)
            .await
            .map_err(|e| RuntimeError::storage("read entities by property range", e))?;

        rows.into_iter()
            .map(|row| self.entity_from_row(class, &row))
            .collect()
    }

    fn entity_from_row(&self, class: &str, row: &sqlx::sqlite::SqliteRow) -> Result<EntityWithId> {
        let id: String = row.try_get("id")?;
        let bytes: Vec<u8> = row.try_get("bytes")?;
        let entity = self.inner.entity_serializer.deserialize(class, &bytes)?;
        Ok(EntityWithId { id, entity })
    }
}
