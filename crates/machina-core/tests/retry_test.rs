// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Failure handling: a failed apply rolls back completely, invokes the
//! error handler, and succeeds on the retried attempt with no duplicated
//! effects.

mod common;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use common::basket::{self, BASKET_CLASS, BasketBehavior};
use common::*;
use machina_core::{
    BehaviorRegistry, Event, JsonSerializer, RuntimeError, Serializer,
};
use serde_json::Value;
use uuid::Uuid;

/// Entity codec that fails its first `serialize` call, then delegates.
struct FailOnceSerializer {
    armed: AtomicBool,
}

impl FailOnceSerializer {
    fn new() -> Self {
        FailOnceSerializer {
            armed: AtomicBool::new(true),
        }
    }
}

impl Serializer for FailOnceSerializer {
    fn serialize(&self, class: &str, value: &Value) -> Result<Vec<u8>, RuntimeError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            return Err(RuntimeError::Serialization {
                class: class.to_string(),
                message: "injected failure".to_string(),
            });
        }
        JsonSerializer.serialize(class, value)
    }

    fn deserialize(&self, class: &str, bytes: &[u8]) -> Result<Value, RuntimeError> {
        JsonSerializer.deserialize(class, bytes)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn failed_apply_retries_and_processes_exactly_once() {
    let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&errors);

    let behaviors = BehaviorRegistry::new()
        .register(BASKET_CLASS, Arc::new(BasketBehavior::default()));
    let ctx = TestContext::with_builder(behaviors, move |builder| {
        builder
            .entity_serializer(Arc::new(FailOnceSerializer::new()))
            .error_handler(Arc::new(move |err: &RuntimeError| {
                seen.lock().unwrap().push(err.to_string());
            }))
            .retry_interval_ms(100)
    })
    .await;

    let id = Uuid::new_v4().to_string();
    ctx.runtime
        .signal(BASKET_CLASS, &id, Event::Create)
        .await
        .unwrap();

    // First attempt fails on the entity save and rolls back; the retry
    // timer drives the second, successful attempt.
    wait_for_state(&ctx.runtime, BASKET_CLASS, &id, "Empty").await;
    wait_for_empty_queue(&ctx.pool).await;

    let recorded = errors.lock().unwrap().clone();
    assert_eq!(recorded.len(), 1, "handler sees the one failed attempt");
    assert!(recorded[0].contains("injected failure"));

    // The rollback must have covered the signal-store appends too: one
    // Create and one Clear, not two.
    assert_eq!(
        signal_store_events(&ctx.pool).await,
        vec!["Create".to_string(), basket::CLEAR.to_string()]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn retry_disabled_leaves_signal_queued() {
    let behaviors = BehaviorRegistry::new()
        .register(BASKET_CLASS, Arc::new(BasketBehavior::default()));
    let ctx = TestContext::with_builder(behaviors, |builder| {
        builder
            .entity_serializer(Arc::new(FailOnceSerializer::new()))
            .retry_interval_ms(0)
    })
    .await;

    let id = Uuid::new_v4().to_string();
    ctx.runtime
        .signal(BASKET_CLASS, &id, Event::Create)
        .await
        .unwrap();

    // No retry timer: the failed signal stays durably queued...
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert_eq!(count_rows(&ctx.pool, "signal_queue").await, 1);
    assert!(ctx.runtime.get(BASKET_CLASS, &id).await.unwrap().is_none());

    // ...and the next publish picks it up (the serializer is disarmed by
    // the earlier attempt, so both drains succeed in order).
    let other = Uuid::new_v4().to_string();
    ctx.runtime
        .signal(BASKET_CLASS, &other, Event::Create)
        .await
        .unwrap();
    wait_for_state(&ctx.runtime, BASKET_CLASS, &id, "Empty").await;
    wait_for_state(&ctx.runtime, BASKET_CLASS, &other, "Empty").await;
    wait_for_empty_queue(&ctx.pool).await;
}
