// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Single-worker drain over the in-memory signal queue.
//!
//! Publishers offer numbered signals from any task; a work-indicator
//! counter guarantees that exactly one drain task runs at a time and that a
//! publish racing a finishing drain is never lost. The worker applies
//! signals in FIFO order; on failure it stops with the failed signal still
//! at the head and a retry timer re-triggers the drain, so a persistent
//! fault (database down) does not spin.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{debug, warn};

use crate::runtime::Inner;
use crate::signal::NumberedSignal;

/// Enqueue a signal and trigger the drain. Non-blocking.
pub(crate) fn offer(inner: &Arc<Inner>, signal: NumberedSignal) {
    lock_queue(inner).push_back(signal);
    drain(inner);
}

/// Trigger the drain loop. Only the transition from zero pending work
/// spawns a worker; concurrent callers just bump the counter.
pub(crate) fn drain(inner: &Arc<Inner>) {
    if inner.wip.fetch_add(1, Ordering::SeqCst) == 0 {
        let inner = Arc::clone(inner);
        let handle = inner.handle.clone();
        handle.spawn(async move {
            drain_loop(inner).await;
        });
    }
}

async fn drain_loop(inner: Arc<Inner>) {
    let mut missed: u64 = 1;
    loop {
        loop {
            let Some(signal) = lock_queue(&inner).front().cloned() else {
                break;
            };
            match inner.apply(&signal).await {
                Ok(outcome) => {
                    lock_queue(&inner).pop_front();
                    for produced in outcome.to_offer {
                        offer(&inner, produced);
                    }
                    for produced in outcome.to_schedule {
                        schedule(&inner, produced);
                    }
                }
                Err(err) => {
                    warn!(seq = signal.number, error = %err, "apply failed, scheduling retry");
                    (inner.error_handler)(&err);
                    schedule_retry(&inner);
                    break;
                }
            }
        }
        // Absorb the offers observed this pass; leave if nothing new arrived.
        let remaining = inner.wip.fetch_sub(missed, Ordering::SeqCst) - missed;
        if remaining == 0 {
            return;
        }
        missed = remaining;
    }
}

/// Offer a delayed signal once its fire-at time is due.
pub(crate) fn schedule(inner: &Arc<Inner>, signal: NumberedSignal) {
    let Some(fire_at) = signal.signal.fire_at else {
        offer(inner, signal);
        return;
    };
    let delay = (fire_at - inner.clock.now()).max(0) as u64;
    debug!(seq = signal.number, delay_ms = delay, "scheduling delayed signal");
    let inner = Arc::clone(inner);
    let handle = inner.handle.clone();
    handle.spawn(async move {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        offer(&inner, signal);
    });
}

fn schedule_retry(inner: &Arc<Inner>) {
    if inner.retry_interval_ms == 0 {
        return;
    }
    let delay = Duration::from_millis(inner.retry_interval_ms);
    let inner = Arc::clone(inner);
    let handle = inner.handle.clone();
    handle.spawn(async move {
        tokio::time::sleep(delay).await;
        drain(&inner);
    });
}

fn lock_queue(inner: &Inner) -> std::sync::MutexGuard<'_, std::collections::VecDeque<NumberedSignal>> {
    // A poisoned lock only means a worker panicked mid-push; the queue
    // itself is still consistent.
    inner.queue.lock().unwrap_or_else(|e| e.into_inner())
}
