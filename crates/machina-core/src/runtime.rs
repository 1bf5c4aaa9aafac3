// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The embeddable runtime: configuration, publishing, and startup recovery.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use machina_core::{BehaviorRegistry, Event, Runtime};
//!
//! #[tokio::main]
//! async fn main() -> machina_core::Result<()> {
//!     let pool = machina_core::sqlite_pool(".data/machina.db").await?;
//!     let behaviors = BehaviorRegistry::new()
//!         .register("shop.Basket", Arc::new(BasketBehavior::default()));
//!
//!     let runtime = Runtime::builder()
//!         .pool(pool)
//!         .behaviors(behaviors)
//!         .build()?;
//!     runtime.create().await?;
//!     runtime.initialize().await?;
//!
//!     runtime.signal("shop.Basket", "42", Event::Create).await?;
//!     Ok(())
//! }
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::runtime::Handle;
use tracing::{debug, error, info};

use crate::behavior::BehaviorRegistry;
use crate::clock::{Clock, SystemClock};
use crate::drain;
use crate::error::{Result, RuntimeError};
use crate::serializer::{JsonSerializer, Serializer};
use crate::signal::{Event, NumberedSignal, Signal};
use crate::sql::{CREATE_SQLITE, Sql};
use crate::store;

/// Default retry interval after a failed apply, in milliseconds.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 30_000;

/// Callback invoked with every apply failure before a retry is scheduled.
pub type ErrorHandler = Arc<dyn Fn(&RuntimeError) + Send + Sync>;

/// Projects an entity snapshot to its indexable properties.
///
/// Arguments are the entity class name and the snapshot; the returned map
/// replaces the entity's property rows on every save.
pub type PropertiesFactory =
    Arc<dyn Fn(&str, &Value) -> BTreeMap<String, String> + Send + Sync>;

/// Shared state behind a [`Runtime`] handle.
pub(crate) struct Inner {
    pub(crate) pool: SqlitePool,
    pub(crate) sql: Sql,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) entity_serializer: Arc<dyn Serializer>,
    pub(crate) event_serializer: Arc<dyn Serializer>,
    pub(crate) behaviors: BehaviorRegistry,
    pub(crate) store_signals: bool,
    pub(crate) error_handler: ErrorHandler,
    pub(crate) retry_interval_ms: u64,
    pub(crate) properties_factory: PropertiesFactory,
    pub(crate) handle: Handle,
    pub(crate) queue: Mutex<VecDeque<NumberedSignal>>,
    pub(crate) wip: AtomicU64,
}

/// Durable, transactional runtime hosting persisted state machines.
///
/// Cloning is cheap; all clones share the same drain worker and queue.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<Inner>,
}

impl Runtime {
    /// Start configuring a runtime.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// The connection pool this runtime was built with.
    pub fn pool(&self) -> &SqlitePool {
        &self.inner.pool
    }

    /// Bootstrap the schema from the bundled SQLite script.
    ///
    /// Idempotent: the bundled statements all use `if not exists`.
    pub async fn create(&self) -> Result<()> {
        self.create_with(CREATE_SQLITE).await
    }

    /// Bootstrap the schema from a caller-supplied `;`-separated script.
    pub async fn create_with(&self, schema: &str) -> Result<()> {
        let mut conn = self
            .inner
            .pool
            .acquire()
            .await
            .map_err(|e| RuntimeError::storage("acquire connection", e))?;
        for statement in schema.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&mut *conn)
                .await
                .map_err(|e| RuntimeError::Schema {
                    statement: statement.chars().take(120).collect(),
                    source: e,
                })?;
        }
        info!("schema bootstrap complete");
        Ok(())
    }

    /// Publish a non-delayed signal to an entity.
    ///
    /// Once this returns, the event is durably enqueued; delivery happens on
    /// the drain worker. Returns the assigned sequence number.
    pub async fn signal(
        &self,
        class: impl Into<String>,
        id: impl Into<String>,
        event: Event,
    ) -> Result<i64> {
        self.send(Signal::to(class, id, event)).await
    }

    /// Publish a signal.
    ///
    /// Only non-delayed signals are supported here; delayed signals
    /// originate from state machine emissions. A `fire_at` is rejected with
    /// [`RuntimeError::Unsupported`].
    pub async fn send(&self, signal: Signal) -> Result<i64> {
        if signal.fire_at.is_some() {
            return Err(RuntimeError::Unsupported(
                "delayed signals can only be emitted by state machines",
            ));
        }
        let bytes = signal.event.encode(self.inner.event_serializer.as_ref())?;
        let mut conn = self
            .inner
            .pool
            .acquire()
            .await
            .map_err(|e| RuntimeError::storage("acquire connection", e))?;
        let seq = store::enqueue_signal(
            &mut conn,
            &self.inner.sql,
            &signal.class,
            &signal.id,
            signal.event.class(),
            &bytes,
        )
        .await?;
        drop(conn);

        debug!(seq, class = %signal.class, id = %signal.id, "signal enqueued");
        drain::offer(&self.inner, NumberedSignal { signal, number: seq });
        Ok(seq)
    }

    /// Recover persisted signals after a restart.
    ///
    /// Every delayed row is scheduled at `max(0, fire_at - now)`. Orphaned
    /// non-delayed rows are offered to the drain in ascending sequence
    /// order, so work interrupted by a crash resumes without waiting for
    /// the next publish.
    pub async fn initialize(&self) -> Result<()> {
        let mut conn = self
            .inner
            .pool
            .acquire()
            .await
            .map_err(|e| RuntimeError::storage("acquire connection", e))?;
        let delayed = store::select_delayed_signals(&mut conn, &self.inner.sql).await?;
        let queued = store::select_signals(&mut conn, &self.inner.sql).await?;
        drop(conn);

        info!(
            delayed = delayed.len(),
            queued = queued.len(),
            "recovering persisted signals"
        );

        for row in delayed {
            let event = Event::decode(
                &row.event_class,
                &row.event_bytes,
                self.inner.event_serializer.as_ref(),
            )?;
            drain::schedule(
                &self.inner,
                NumberedSignal {
                    signal: Signal::at(row.class, row.id, event, row.fire_at),
                    number: row.seq,
                },
            );
        }
        for row in queued {
            let event = Event::decode(
                &row.event_class,
                &row.event_bytes,
                self.inner.event_serializer.as_ref(),
            )?;
            drain::offer(
                &self.inner,
                NumberedSignal {
                    signal: Signal::to(row.class, row.id, event),
                    number: row.seq,
                },
            );
        }
        Ok(())
    }
}

/// Open (creating if needed) a SQLite database file and return a small pool.
///
/// Creates parent directories, connects with `mode=rwc`, and leaves schema
/// bootstrap to [`Runtime::create`].
pub async fn sqlite_pool(path: impl AsRef<Path>) -> Result<SqlitePool> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| RuntimeError::storage("create database directory", sqlx::Error::Io(e)))?;
    }

    let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .map_err(|e| RuntimeError::storage("connect", e))
}

/// Builder for a [`Runtime`].
pub struct RuntimeBuilder {
    pool: Option<SqlitePool>,
    behaviors: Option<BehaviorRegistry>,
    clock: Arc<dyn Clock>,
    entity_serializer: Arc<dyn Serializer>,
    event_serializer: Arc<dyn Serializer>,
    sql: Sql,
    store_signals: bool,
    error_handler: ErrorHandler,
    retry_interval_ms: u64,
    properties_factory: PropertiesFactory,
    handle: Option<Handle>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        RuntimeBuilder {
            pool: None,
            behaviors: None,
            clock: Arc::new(SystemClock),
            entity_serializer: Arc::new(JsonSerializer),
            event_serializer: Arc::new(JsonSerializer),
            sql: Sql::default(),
            store_signals: true,
            error_handler: Arc::new(|err: &RuntimeError| error!(error = %err, "apply failed")),
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            properties_factory: Arc::new(|_: &str, _: &Value| BTreeMap::new()),
            handle: None,
        }
    }
}

impl std::fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("pool", &self.pool.as_ref().map(|_| "..."))
            .field("behaviors", &self.behaviors)
            .field("store_signals", &self.store_signals)
            .field("retry_interval_ms", &self.retry_interval_ms)
            .finish()
    }
}

impl RuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection pool (required).
    pub fn pool(mut self, pool: SqlitePool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Set the behavior registry (required).
    pub fn behaviors(mut self, behaviors: BehaviorRegistry) -> Self {
        self.behaviors = Some(behaviors);
        self
    }

    /// Set the clock used for delayed-signal scheduling.
    ///
    /// Default: system time.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the entity codec. Default: JSON.
    pub fn entity_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.entity_serializer = serializer;
        self
    }

    /// Set the event codec. Default: JSON.
    pub fn event_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.event_serializer = serializer;
        self
    }

    /// Override statements of the SQL catalog.
    pub fn sql(mut self, sql: Sql) -> Self {
        self.sql = sql;
        self
    }

    /// Whether to append every processed event to the signal store.
    ///
    /// Default: true.
    pub fn store_signals(mut self, store_signals: bool) -> Self {
        self.store_signals = store_signals;
        self
    }

    /// Set the handler invoked on apply failures.
    ///
    /// The default logs the error and lets the retry timer take over.
    pub fn error_handler(mut self, error_handler: ErrorHandler) -> Self {
        self.error_handler = error_handler;
        self
    }

    /// Set the drain retry interval after a failed apply, in milliseconds.
    ///
    /// Zero disables the retry timer; the drain then only resumes on the
    /// next publish. Default: [`DEFAULT_RETRY_INTERVAL_MS`].
    pub fn retry_interval_ms(mut self, retry_interval_ms: u64) -> Self {
        self.retry_interval_ms = retry_interval_ms;
        self
    }

    /// Set the property projection used to rebuild the secondary index on
    /// every entity save. Default: no properties.
    pub fn properties_factory(mut self, properties_factory: PropertiesFactory) -> Self {
        self.properties_factory = properties_factory;
        self
    }

    /// Set the tokio runtime handle hosting the drain worker and timers.
    ///
    /// Default: the ambient runtime at build time.
    pub fn handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Build the runtime.
    ///
    /// Fails with [`RuntimeError::Configuration`] if a required field is
    /// missing or no tokio runtime is available.
    pub fn build(self) -> Result<Runtime> {
        let pool = self
            .pool
            .ok_or(RuntimeError::Configuration("pool is required"))?;
        let behaviors = self
            .behaviors
            .ok_or(RuntimeError::Configuration("behaviors are required"))?;
        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| {
                RuntimeError::Configuration("an executor handle is required outside a tokio runtime")
            })?,
        };

        Ok(Runtime {
            inner: Arc::new(Inner {
                pool,
                sql: self.sql,
                clock: self.clock,
                entity_serializer: self.entity_serializer,
                event_serializer: self.event_serializer,
                behaviors,
                store_signals: self.store_signals,
                error_handler: self.error_handler,
                retry_interval_ms: self.retry_interval_ms,
                properties_factory: self.properties_factory,
                handle,
                queue: Mutex::new(VecDeque::new()),
                wip: AtomicU64::new(0),
            }),
        })
    }
}
