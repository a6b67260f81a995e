//! Application service: async driver for the [`Coalescer`].
//!
//! Consumes source signals, audits them, and emits a task whenever a
//! window closes. On cancellation or end of input, all open windows flush.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tether_common::{AuditRecord, CoalescedTask, WatchStatus};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::application::ports::{AuditSink, SourceSignal};
use crate::domain::Coalescer;

/// Far enough out that a disabled timer branch never fires.
const IDLE_WAKE: Duration = Duration::from_secs(24 * 60 * 60);

/// Run until `cancel` fires or `signals` closes, then flush.
pub async fn run_debouncer(
    mut signals: mpsc::Receiver<SourceSignal>,
    tasks: mpsc::Sender<CoalescedTask>,
    window: Duration,
    audit: Arc<dyn AuditSink>,
    cancel: CancellationToken,
) {
    let mut coalescer = Coalescer::new(window);

    loop {
        let deadline = coalescer.next_deadline().map(Instant::from_std);
        let wake = deadline.unwrap_or_else(|| Instant::now() + IDLE_WAKE);

        tokio::select! {
            () = cancel.cancelled() => break,
            signal = signals.recv() => {
                let Some(signal) = signal else { break };
                let closed = observe(&mut coalescer, signal, audit.as_ref());
                if !emit(&tasks, closed).await {
                    return;
                }
            }
            () = tokio::time::sleep_until(wake), if deadline.is_some() => {
                let due = coalescer.due(Instant::now().into_std());
                if !emit(&tasks, due).await {
                    return;
                }
            }
        }
    }

    while let Ok(signal) = signals.try_recv() {
        let closed = observe(&mut coalescer, signal, audit.as_ref());
        if !emit(&tasks, closed).await {
            return;
        }
    }
    let pending = coalescer.drain();
    if !pending.is_empty() {
        debug!(count = pending.len(), "flushing open windows");
    }
    emit(&tasks, pending).await;
}

fn observe(
    coalescer: &mut Coalescer,
    signal: SourceSignal,
    audit: &dyn AuditSink,
) -> Vec<CoalescedTask> {
    let (record, event) = match signal {
        SourceSignal::Change(event) => (AuditRecord::Change(event.clone()), Some(event)),
        SourceSignal::WatchLost { root } => (
            AuditRecord::Watch {
                root,
                status: WatchStatus::Lost,
                at: Utc::now(),
            },
            None,
        ),
        SourceSignal::WatchRestored { root } => (
            AuditRecord::Watch {
                root,
                status: WatchStatus::Restored,
                at: Utc::now(),
            },
            None,
        ),
    };
    if let Err(e) = audit.append(&record) {
        warn!(error = %e, "failed to write audit record");
    }
    match event {
        Some(event) => coalescer.observe(&event, Instant::now().into_std()),
        None => Vec::new(),
    }
}

/// Returns `false` once the task receiver is gone.
async fn emit(tasks: &mpsc::Sender<CoalescedTask>, batch: Vec<CoalescedTask>) -> bool {
    for task in batch {
        debug!(task = %task.id, path = %task.path.display(), kind = %task.kind, merges = task.merge_count, "window closed");
        if tasks.send(task).await.is_err() {
            warn!("task receiver dropped; stopping debouncer");
            return false;
        }
    }
    true
}
