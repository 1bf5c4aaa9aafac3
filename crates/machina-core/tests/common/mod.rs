// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for machina-core integration tests.
//!
//! Provides a TestContext wrapping a temporary SQLite database and a built
//! runtime, plus polling helpers for asserting on asynchronous drains.

#![allow(dead_code)]

pub mod basket;

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tempfile::TempDir;

use machina_core::{BehaviorRegistry, Runtime, RuntimeBuilder, sqlite_pool};

/// A runtime wired to a throwaway database file.
pub struct TestContext {
    pub runtime: Runtime,
    pub pool: SqlitePool,
    // Held so the database file outlives the test body.
    _dir: TempDir,
}

impl TestContext {
    /// Context with default runtime settings (fast retry for tests).
    pub async fn new(behaviors: BehaviorRegistry) -> Self {
        Self::with_builder(behaviors, |builder| builder).await
    }

    /// Context with extra builder customization.
    pub async fn with_builder(
        behaviors: BehaviorRegistry,
        customize: impl FnOnce(RuntimeBuilder) -> RuntimeBuilder,
    ) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let pool = sqlite_pool(dir.path().join("machina.db"))
            .await
            .expect("failed to open database");

        let builder = Runtime::builder()
            .pool(pool.clone())
            .behaviors(behaviors)
            .retry_interval_ms(100);
        let runtime = customize(builder).build().expect("failed to build runtime");
        runtime.create().await.expect("schema bootstrap failed");

        TestContext {
            runtime,
            pool,
            _dir: dir,
        }
    }
}

/// Poll until the entity reaches the given state; panic after ~2s.
pub async fn wait_for_state(runtime: &Runtime, class: &str, id: &str, state: &str) {
    for _ in 0..100 {
        if let Some((_, current)) = runtime
            .get_with_state(class, id)
            .await
            .expect("get_with_state failed")
            && current == state
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("entity {class}/{id} never reached state {state}");
}

/// Poll until the signal queue is empty; panic after ~2s.
pub async fn wait_for_empty_queue(pool: &SqlitePool) {
    for _ in 0..100 {
        if count_rows(pool, "signal_queue").await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("signal queue never drained");
}

/// Poll until the delayed queue holds exactly `expected` rows; panic after ~2s.
pub async fn wait_for_delayed_count(pool: &SqlitePool, expected: i64) {
    for _ in 0..100 {
        if count_rows(pool, "delayed_signal_queue").await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("delayed queue never reached {expected} rows");
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
    let row: (i64,) = sqlx::query_as(&format!("select count(*) from {table}"))
        .fetch_one(pool)
        .await
        .expect("count query failed");
    row.0
}

/// Event class names appended to the signal store, in processing order.
pub async fn signal_store_events(pool: &SqlitePool) -> Vec<String> {
    let rows: Vec<(String,)> =
        sqlx::query_as("select event_cls from signal_store order by seq")
            .fetch_all(pool)
            .await
            .expect("signal store query failed");
    rows.into_iter().map(|(cls,)| cls).collect()
}

/// A delayed-queue row as (seq, from_cls, from_id, cls, id, fire_at).
pub type DelayedRow = (i64, String, String, String, String, DateTime<Utc>);

pub async fn delayed_rows(pool: &SqlitePool) -> Vec<DelayedRow> {
    sqlx::query_as("select seq, from_cls, from_id, cls, id, times from delayed_signal_queue order by seq")
        .fetch_all(pool)
        .await
        .expect("delayed queue query failed")
}
