// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Byte codecs for entity and event payloads.
//!
//! The runtime stores entities and events as opaque byte columns. A
//! [`Serializer`] converts between those bytes and [`serde_json::Value`],
//! serde's self-describing data model, which is the interchange form used at
//! the behavior boundary. Two independent instances are configured on the
//! runtime: one for entities, one for events.

use serde_json::Value;

use crate::error::RuntimeError;

/// Converts values to and from the byte representation kept in the store.
pub trait Serializer: Send + Sync {
    /// Encode a value into bytes.
    fn serialize(&self, class: &str, value: &Value) -> Result<Vec<u8>, RuntimeError>;

    /// Decode bytes tagged with `class` back into a value.
    ///
    /// Self-describing formats may ignore `class`; formats that are not
    /// self-describing dispatch on it.
    fn deserialize(&self, class: &str, bytes: &[u8]) -> Result<Value, RuntimeError>;
}

/// JSON codec, the default for both entities and events.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, class: &str, value: &Value) -> Result<Vec<u8>, RuntimeError> {
        serde_json::to_vec(value).map_err(|e| RuntimeError::serialization(class, e.to_string()))
    }

    fn deserialize(&self, class: &str, bytes: &[u8]) -> Result<Value, RuntimeError> {
        serde_json::from_slice(bytes).map_err(|e| RuntimeError::serialization(class, e.to_string()))
    }
}
