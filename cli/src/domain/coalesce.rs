//! Per-path coalescing windows.
//!
//! A window opens at the first event for a path and closes `window` later,
//! regardless of further events, or as soon as the path is deleted. Pure
//! state machine; the caller supplies the clock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tether_common::{ChangeEvent, ChangeKind, CoalescedTask, TaskId};

#[derive(Debug)]
struct OpenWindow {
    task: CoalescedTask,
    deadline: Instant,
}

/// Collapses bursts of events on the same path into one task.
#[derive(Debug)]
pub struct Coalescer {
    window: Duration,
    open: HashMap<PathBuf, OpenWindow>,
    next_task: u64,
}

impl Coalescer {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            open: HashMap::new(),
            next_task: 1,
        }
    }

    /// Folds `event` into its path's window and returns any tasks it closed.
    ///
    /// A window that had already expired at `now` is returned first and the
    /// event opens a fresh one. A `deleted` event closes its window at once,
    /// so a later event on the same path starts a new task.
    pub fn observe(&mut self, event: &ChangeEvent, now: Instant) -> Vec<CoalescedTask> {
        let mut closed = Vec::new();
        if self
            .open
            .get(&event.path)
            .is_some_and(|open| open.deadline <= now)
        {
            closed.extend(self.open.remove(&event.path).map(|w| w.task));
        }

        if let Some(open) = self.open.get_mut(&event.path) {
            let task = &mut open.task;
            task.kind = event.kind;
            if event.from_path.is_some() {
                task.from_path.clone_from(&event.from_path);
            }
            task.last_seen = task.last_seen.max(event.observed_at);
            task.merge_count = task.merge_count.saturating_add(1);
        } else {
            let id = TaskId(self.next_task);
            self.next_task += 1;
            self.open.insert(
                event.path.clone(),
                OpenWindow {
                    task: CoalescedTask {
                        id,
                        path: event.path.clone(),
                        from_path: event.from_path.clone(),
                        kind: event.kind,
                        first_seen: event.observed_at,
                        last_seen: event.observed_at,
                        merge_count: 1,
                    },
                    deadline: now + self.window,
                },
            );
        }

        if event.kind == ChangeKind::Deleted {
            closed.extend(self.open.remove(&event.path).map(|w| w.task));
        }
        closed
    }

    /// Closes every window whose deadline is at or before `now`.
    pub fn due(&mut self, now: Instant) -> Vec<CoalescedTask> {
        let paths: Vec<PathBuf> = self
            .open
            .iter()
            .filter(|(_, w)| w.deadline <= now)
            .map(|(p, _)| p.clone())
            .collect();
        let mut tasks: Vec<CoalescedTask> = paths
            .iter()
            .filter_map(|p| self.open.remove(p).map(|w| w.task))
            .collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    /// Earliest deadline among open windows.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.open.values().map(|w| w.deadline).min()
    }

    /// Closes all windows immediately, e.g. on shutdown.
    pub fn drain(&mut self) -> Vec<CoalescedTask> {
        let mut tasks: Vec<CoalescedTask> = self.open.drain().map(|(_, w)| w.task).collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    #[must_use]
    pub fn open_windows(&self) -> usize {
        self.open.len()
    }
}
