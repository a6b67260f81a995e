//! notify-based implementation of the `EventSource` port.
//!
//! One `RecommendedWatcher` per root forwards raw notifications into the
//! tokio side, where [`Normalizer`] turns them into `ChangeEvent`s. A
//! periodic probe notices roots that vanished without an event and
//! re-establishes their watches.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tether_common::{ChangeEvent, ChangeKind, EventId};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::ports::{EventSource, LocalFs, SourceSignal};
use crate::domain::WatchError;
use crate::domain::config::{WatchRootConfig, WatcherConfig};
use crate::infra::fs::HostFs;

/// Identical `(path, kind)` notifications closer than this are dropped.
const DUPLICATE_WINDOW: Duration = Duration::from_millis(50);

type RawEvent = (usize, notify::Result<Event>);

// ── Normalization ─────────────────────────────────────────────────────────────

/// Maps raw notify events onto created/modified/deleted/moved.
///
/// Rename halves are held for `grace` waiting for their partner; an
/// unpaired `From` becomes `deleted` once the grace expires.
pub struct Normalizer {
    next_id: u64,
    grace: Duration,
    pending_from: HashMap<Option<usize>, (PathBuf, Instant)>,
    recent: HashMap<PathBuf, (ChangeKind, Instant)>,
}

impl Normalizer {
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self {
            next_id: 1,
            grace,
            pending_from: HashMap::new(),
            recent: HashMap::new(),
        }
    }

    /// Normalize one raw event. `fs` answers existence and directory queries.
    pub fn normalize(&mut self, event: &Event, now: Instant, fs: &impl LocalFs) -> Vec<ChangeEvent> {
        self.prune_recent(now);
        let mut out = Vec::new();
        match event.kind {
            EventKind::Create(CreateKind::Folder) => {}
            EventKind::Create(_) => {
                for path in &event.paths {
                    if !fs.is_dir(path) {
                        self.emit(&mut out, path, ChangeKind::Created, now);
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => {
                self.rename(&mut out, event, mode, now, fs);
            }
            EventKind::Modify(_) => {
                for path in &event.paths {
                    if !fs.is_dir(path) {
                        self.emit(&mut out, path, ChangeKind::Modified, now);
                    }
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    self.emit(&mut out, path, ChangeKind::Deleted, now);
                }
            }
            EventKind::Any | EventKind::Access(_) | EventKind::Other => {}
        }
        out
    }

    fn rename(
        &mut self,
        out: &mut Vec<ChangeEvent>,
        event: &Event,
        mode: RenameMode,
        now: Instant,
        fs: &impl LocalFs,
    ) {
        match mode {
            RenameMode::Both => {
                if let [from, to, ..] = event.paths.as_slice() {
                    self.emit_moved(out, from, to, now, fs);
                }
            }
            RenameMode::From => {
                if let Some(path) = event.paths.first() {
                    // A second untracked `From` flushes the first as deleted.
                    if let Some((stale, _)) = self
                        .pending_from
                        .insert(event.tracker(), (path.clone(), now))
                    {
                        self.emit(out, &stale, ChangeKind::Deleted, now);
                    }
                }
            }
            RenameMode::To => {
                let Some(path) = event.paths.first() else {
                    return;
                };
                match self.pending_from.remove(&event.tracker()) {
                    Some((from, _)) => self.emit_moved(out, &from, path, now, fs),
                    None if !fs.is_dir(path) => {
                        self.emit(out, path, ChangeKind::Created, now);
                    }
                    None => {}
                }
            }
            RenameMode::Any | RenameMode::Other => {
                for path in &event.paths {
                    if !fs.exists(path) {
                        self.emit(out, path, ChangeKind::Deleted, now);
                    } else if !fs.is_dir(path) {
                        self.emit(out, path, ChangeKind::Created, now);
                    }
                }
            }
        }
    }

    /// Flush rename halves whose partner never arrived.
    pub fn expire(&mut self, now: Instant) -> Vec<ChangeEvent> {
        let grace = self.grace;
        let due: Vec<Option<usize>> = self
            .pending_from
            .iter()
            .filter(|(_, (_, at))| now.duration_since(*at) >= grace)
            .map(|(tracker, _)| *tracker)
            .collect();
        let expired: Vec<PathBuf> = due
            .into_iter()
            .filter_map(|tracker| self.pending_from.remove(&tracker))
            .map(|(path, _)| path)
            .collect();
        self.prune_recent(now);

        let mut out = Vec::new();
        for path in expired {
            self.emit(&mut out, &path, ChangeKind::Deleted, now);
        }
        out
    }

    /// Earliest instant at which [`Normalizer::expire`] has work.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending_from
            .values()
            .map(|(_, at)| *at + self.grace)
            .min()
    }

    /// Forget emissions too old to suppress a duplicate.
    fn prune_recent(&mut self, now: Instant) {
        self.recent
            .retain(|_, (_, at)| now.duration_since(*at) < DUPLICATE_WINDOW);
    }

    fn emit_moved(
        &mut self,
        out: &mut Vec<ChangeEvent>,
        from: &Path,
        to: &Path,
        now: Instant,
        fs: &impl LocalFs,
    ) {
        if from == to || fs.is_dir(to) {
            return;
        }
        self.recent
            .insert(to.to_path_buf(), (ChangeKind::Moved, now));
        out.push(ChangeEvent::moved(self.take_id(), from, to));
    }

    fn emit(&mut self, out: &mut Vec<ChangeEvent>, path: &Path, kind: ChangeKind, now: Instant) {
        if let Some((last, at)) = self.recent.get(path) {
            if *last == kind && now.duration_since(*at) < DUPLICATE_WINDOW {
                return;
            }
        }
        self.recent.insert(path.to_path_buf(), (kind, now));
        out.push(ChangeEvent::new(self.take_id(), path, kind));
    }

    fn take_id(&mut self) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        id
    }
}

// ── Event source ──────────────────────────────────────────────────────────────

enum RootState {
    Active(RecommendedWatcher),
    Lost { since: Instant },
}

struct WatchedRoot {
    config: WatchRootConfig,
    state: RootState,
}

/// Watches every configured root until cancelled.
pub struct NotifyEventSource {
    roots: Vec<WatchRootConfig>,
    settings: WatcherConfig,
}

impl NotifyEventSource {
    #[must_use]
    pub fn new(roots: Vec<WatchRootConfig>, settings: WatcherConfig) -> Self {
        Self { roots, settings }
    }
}

fn start_watcher(
    index: usize,
    config: &WatchRootConfig,
    raw_tx: mpsc::UnboundedSender<RawEvent>,
) -> Result<RecommendedWatcher, WatchError> {
    let init_error = |e: notify::Error| WatchError::Init {
        root: config.root.clone(),
        message: e.to_string(),
    };
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = raw_tx.send((index, res));
    })
    .map_err(init_error)?;
    let mode = if config.recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher.watch(&config.root, mode).map_err(init_error)?;
    Ok(watcher)
}

/// Whether `event` reports the root directory itself going away.
fn removes_root(event: &Event, root: &Path, fs: &impl LocalFs) -> bool {
    matches!(
        event.kind,
        EventKind::Remove(_)
            | EventKind::Modify(ModifyKind::Name(RenameMode::From | RenameMode::Any))
    ) && event.paths.iter().any(|p| p == root)
        && !fs.is_dir(root)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

fn mark_lost(root: &mut WatchedRoot, signals: &mut Vec<SourceSignal>) {
    if matches!(root.state, RootState::Active(_)) {
        warn!(root = %root.config.root.display(), "watch lost");
        root.state = RootState::Lost {
            since: Instant::now(),
        };
        signals.push(SourceSignal::WatchLost {
            root: root.config.root.clone(),
        });
    }
}

impl EventSource for NotifyEventSource {
    async fn run(
        self,
        tx: mpsc::Sender<SourceSignal>,
        cancel: CancellationToken,
    ) -> Result<(), WatchError> {
        let fs = HostFs;
        let retry_interval = Duration::from_millis(self.settings.retry_interval_ms);
        let reappear_timeout = Duration::from_millis(self.settings.reappear_timeout_ms);
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<RawEvent>();

        let mut roots = Vec::with_capacity(self.roots.len());
        for (index, config) in self.roots.into_iter().enumerate() {
            let watcher = start_watcher(index, &config, raw_tx.clone())?;
            info!(root = %config.root.display(), recursive = config.recursive, "watching");
            roots.push(WatchedRoot {
                config,
                state: RootState::Active(watcher),
            });
        }

        let mut normalizer = Normalizer::new(Duration::from_millis(self.settings.rename_grace_ms));
        let mut probe = tokio::time::interval(retry_interval);
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let rename_deadline = normalizer.next_deadline();
            let mut signals = Vec::new();
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                Some((index, result)) = raw_rx.recv() => {
                    let Some(root) = roots.get_mut(index) else { continue };
                    if matches!(root.state, RootState::Lost { .. }) {
                        continue;
                    }
                    match result {
                        Ok(event) if removes_root(&event, &root.config.root, &fs) => {
                            mark_lost(root, &mut signals);
                        }
                        Ok(event) => {
                            signals.extend(
                                normalizer
                                    .normalize(&event, Instant::now(), &fs)
                                    .into_iter()
                                    .map(SourceSignal::Change),
                            );
                        }
                        Err(e) => {
                            debug!(root = %root.config.root.display(), error = %e, "notify error");
                            mark_lost(root, &mut signals);
                        }
                    }
                }
                () = sleep_until(rename_deadline) => {
                    signals.extend(
                        normalizer.expire(Instant::now()).into_iter().map(SourceSignal::Change),
                    );
                }
                _ = probe.tick() => {
                    for (index, root) in roots.iter_mut().enumerate() {
                        match root.state {
                            RootState::Active(_) => {
                                if !fs.is_dir(&root.config.root) {
                                    mark_lost(root, &mut signals);
                                }
                            }
                            RootState::Lost { since } => {
                                if fs.is_dir(&root.config.root) {
                                    match start_watcher(index, &root.config, raw_tx.clone()) {
                                        Ok(watcher) => {
                                            info!(root = %root.config.root.display(), "watch restored");
                                            root.state = RootState::Active(watcher);
                                            signals.push(SourceSignal::WatchRestored {
                                                root: root.config.root.clone(),
                                            });
                                            continue;
                                        }
                                        Err(e) => debug!(error = %e, "re-watch failed"),
                                    }
                                }
                                if since.elapsed() >= reappear_timeout {
                                    return Err(WatchError::RootVanished {
                                        root: root.config.root.clone(),
                                        seconds: reappear_timeout.as_secs(),
                                    });
                                }
                            }
                        }
                    }
                }
            }

            for signal in signals {
                if tx.send(signal).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}
