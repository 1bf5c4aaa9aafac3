// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the runtime.

use thiserror::Error;

/// Result type using [`RuntimeError`].
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors surfaced by the runtime: publishing, applying, querying, bootstrap.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// A statement failed while bootstrapping the schema.
    #[error("schema bootstrap failed executing `{statement}`: {source}")]
    Schema {
        /// The statement that failed (truncated for display).
        statement: String,
        /// The underlying database error.
        source: sqlx::Error,
    },

    /// The configured codec refused to produce or parse bytes.
    #[error("serialization of '{class}' failed: {message}")]
    Serialization {
        /// Class name of the value being encoded or decoded.
        class: String,
        /// Codec error detail.
        message: String,
    },

    /// The database reported an error during apply, publish, or query.
    #[error("storage error during '{operation}': {source}")]
    Storage {
        /// The operation that failed.
        operation: &'static str,
        /// The underlying database error.
        source: sqlx::Error,
    },

    /// No behavior is registered for an entity class.
    #[error("no behavior registered for entity class '{class}'")]
    BehaviorResolution {
        /// The unresolved class name.
        class: String,
    },

    /// A required builder field was not set.
    #[error("configuration error: {0}")]
    Configuration(&'static str),

    /// The caller attempted an operation this entrypoint does not support.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// A behavior or machine rejected its input.
    #[error(transparent)]
    Behavior(#[from] BehaviorError),
}

impl RuntimeError {
    pub(crate) fn storage(operation: &'static str, source: sqlx::Error) -> Self {
        RuntimeError::Storage { operation, source }
    }

    pub(crate) fn serialization(class: &str, message: impl Into<String>) -> Self {
        RuntimeError::Serialization {
            class: class.to_string(),
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for RuntimeError {
    fn from(source: sqlx::Error) -> Self {
        RuntimeError::Storage {
            operation: "query",
            source,
        }
    }
}

/// Errors raised by FSM adapters while rehydrating or driving a machine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BehaviorError {
    /// A persisted state name is not recognized by the behavior.
    #[error("unknown state '{state}' for entity class '{class}'")]
    UnknownState {
        /// Entity class name.
        class: String,
        /// The unrecognized state name.
        state: String,
    },

    /// An entity snapshot could not be converted to the behavior's type.
    #[error("invalid entity snapshot for class '{class}': {message}")]
    InvalidEntity {
        /// Entity class name.
        class: String,
        /// Conversion error detail.
        message: String,
    },

    /// An event body could not be converted to the behavior's event type.
    #[error("invalid event '{event}': {message}")]
    InvalidEvent {
        /// Event class name.
        event: String,
        /// Conversion error detail.
        message: String,
    },
}
