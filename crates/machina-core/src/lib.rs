// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Machina Core - Durable State Machine Runtime
//!
//! This crate hosts many entity instances of many classes, each backed by a
//! finite-state machine. Signals drive transitions; transitions may emit
//! further signals to the same entity or to others, optionally delayed.
//! Pending and delayed signals live in a relational store, so an
//! acknowledged publish survives a crash and is redelivered on restart.
//!
//! # Architecture
//!
//! ```text
//!  publisher ──signal()──► signal_queue (SQLite) ──┐
//!                                                  │ numbered signal
//!                                                  ▼
//!                              ┌──────────────────────────────────┐
//!                              │          drain worker            │
//!                              │  (single task, FIFO, retry on    │
//!                              │   failure, timers for delayed)   │
//!                              └───────────────┬──────────────────┘
//!                                              │ one transaction per signal
//!                                              ▼
//!                              ┌──────────────────────────────────┐
//!                              │           apply cycle            │
//!                              │ read entity ► drive FSM cascade  │
//!                              │ ► write entity + properties      │
//!                              │ ► enqueue emitted signals        │
//!                              └──────────────────────────────────┘
//! ```
//!
//! Every apply is atomic: consuming the input signal row, saving the entity
//! and its property index, appending to the signal store, and inserting
//! emitted signals commit together or not at all. Self-signals cascade
//! inside the same transaction; signals to other entities are delivered
//! after commit, and delayed ones re-enter through a timer. A delayed
//! signal is cancellable by its (from-entity, to-entity) key; re-sending
//! with the same key replaces the outstanding one.
//!
//! # Modules
//!
//! - [`behavior`]: per-class FSM adapters and the registry resolving them
//! - [`clock`]: wall-clock source for delayed-signal scheduling
//! - [`error`]: error taxonomy for publishing, applying, and querying
//! - [`query`]: read-only lookups by id, property, and property range
//! - [`runtime`]: the builder, publishing, schema bootstrap, and recovery
//! - [`serializer`]: byte codecs for entity and event payloads
//! - [`signal`]: signals and the event taxonomy
//! - [`sql`]: the named-statement catalog (SQLite defaults)

#![deny(missing_docs)]

/// Per-class FSM adapters: behaviors, machines, and the registry.
pub mod behavior;

/// Wall-clock source for delayed-signal scheduling.
pub mod clock;

/// Error types for runtime operations.
pub mod error;

/// Read-only entity lookups.
pub mod query;

/// The embeddable runtime: configuration, publishing, recovery.
pub mod runtime;

/// Byte codecs for entity and event payloads.
pub mod serializer;

/// Signals and the event taxonomy.
pub mod signal;

/// Named SQL statements for the persistence schema.
pub mod sql;

mod apply;
mod drain;
mod store;

pub use behavior::{Behavior, BehaviorRegistry, Machine};
pub use clock::{Clock, SystemClock};
pub use error::{BehaviorError, Result, RuntimeError};
pub use query::{Combine, EntityWithId, PropertyRange};
pub use runtime::{
    DEFAULT_RETRY_INTERVAL_MS, ErrorHandler, PropertiesFactory, Runtime, RuntimeBuilder,
    sqlite_pool,
};
pub use serializer::{JsonSerializer, Serializer};
pub use signal::{CANCEL_TIMED_SIGNAL_CLASS, CREATE_CLASS, Event, Signal};
pub use sql::{CREATE_SQLITE, Sql};
