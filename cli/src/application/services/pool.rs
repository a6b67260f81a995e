//! Application service: pooled remote sessions.
//!
//! Sessions are keyed by `(host, user, port)`. Each key has a semaphore that
//! bounds concurrent leases, an idle list of reusable sessions and an
//! in-flight counter. Sessions are created lazily on first acquire.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tether_common::{AuditRecord, SessionEvent, SessionId};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::ports::{AuditSink, RemoteConnector, RemoteOutput};
use crate::domain::{PoolError, RemoteError, RemoteTarget, SessionState, TargetKey};

// ── Session ───────────────────────────────────────────────────────────────────

struct PooledSession<S> {
    id: SessionId,
    handle: S,
    state: Mutex<SessionState>,
    last_used: Mutex<Instant>,
}

impl<S> PooledSession<S> {
    fn connecting(id: SessionId, handle: S) -> Self {
        Self {
            id,
            handle,
            state: Mutex::new(SessionState::Connecting),
            last_used: Mutex::new(Instant::now()),
        }
    }

    fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn mark_connected(&self) {
        let mut state = self.state.lock();
        *state = state.connected();
    }

    /// Returns `true` if this call moved the session out of `Ready`.
    fn degrade(&self) -> bool {
        let mut state = self.state.lock();
        let was_ready = *state == SessionState::Ready;
        *state = state.degrade();
        was_ready
    }
}

struct TargetSlot<S> {
    key: TargetKey,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Arc<PooledSession<S>>>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct PoolShared<C: RemoteConnector> {
    connector: Arc<C>,
    audit: Arc<dyn AuditSink>,
    slots: Mutex<HashMap<TargetKey, Arc<TargetSlot<C::Session>>>>,
    max_per_target: usize,
    acquire_timeout: Duration,
    closed: AtomicBool,
    drained: Notify,
    next_session: AtomicU64,
}

impl<C: RemoteConnector> PoolShared<C> {
    fn record(&self, key: &TargetKey, id: SessionId, event: SessionEvent) {
        let record = AuditRecord::session(key.to_string(), id, event);
        if let Err(e) = self.audit.append(&record) {
            warn!(remote = %key, error = %e, "failed to write session audit record");
        }
    }

    fn total_in_flight(&self) -> usize {
        self.slots
            .lock()
            .values()
            .map(|s| s.in_flight.load(Ordering::SeqCst))
            .sum()
    }
}

/// Decrements the slot's in-flight count when dropped.
struct InFlight<C: RemoteConnector> {
    shared: Arc<PoolShared<C>>,
    slot: Arc<TargetSlot<C::Session>>,
}

impl<C: RemoteConnector> InFlight<C> {
    fn enter(shared: Arc<PoolShared<C>>, slot: Arc<TargetSlot<C::Session>>) -> Self {
        let now = slot.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        slot.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { shared, slot }
    }
}

impl<C: RemoteConnector> Drop for InFlight<C> {
    fn drop(&mut self) {
        self.slot.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.shared.drained.notify_waiters();
    }
}

// ── Pool ──────────────────────────────────────────────────────────────────────

/// Bounded pool of remote sessions shared by all dispatched tasks.
pub struct SessionPool<C: RemoteConnector> {
    shared: Arc<PoolShared<C>>,
}

impl<C: RemoteConnector> Clone for SessionPool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: RemoteConnector> SessionPool<C> {
    #[must_use]
    pub fn new(
        connector: Arc<C>,
        audit: Arc<dyn AuditSink>,
        max_per_target: usize,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                connector,
                audit,
                slots: Mutex::new(HashMap::new()),
                max_per_target: max_per_target.max(1),
                acquire_timeout,
                closed: AtomicBool::new(false),
                drained: Notify::new(),
                next_session: AtomicU64::new(1),
            }),
        }
    }

    fn slot(&self, key: &TargetKey) -> Arc<TargetSlot<C::Session>> {
        let mut slots = self.shared.slots.lock();
        Arc::clone(slots.entry(key.clone()).or_insert_with(|| {
            Arc::new(TargetSlot {
                key: key.clone(),
                permits: Arc::new(Semaphore::new(self.shared.max_per_target)),
                idle: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            })
        }))
    }

    /// Lease a session to `target`, reusing an idle ready one when possible.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Exhausted`] if no permit frees up within the
    /// acquire timeout, [`PoolError::Closed`] after shutdown began, or the
    /// connector's error when a new session cannot be established.
    pub async fn acquire(&self, target: &RemoteTarget) -> Result<SessionLease<C>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        let key = target.key();
        let slot = self.slot(&key);
        let started = Instant::now();

        let permit = match tokio::time::timeout(
            self.shared.acquire_timeout,
            Arc::clone(&slot.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                return Err(PoolError::Exhausted {
                    target: key.to_string(),
                    waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
            }
        };
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        let in_flight = InFlight::enter(Arc::clone(&self.shared), Arc::clone(&slot));

        let session = match self.take_idle(&slot).await {
            Some(session) => {
                debug!(remote = %key, session = %session.id, "reusing session");
                self.shared.record(&key, session.id, SessionEvent::Reused);
                session
            }
            None => {
                let handle = self.shared.connector.connect(target).await?;
                let id = SessionId(self.shared.next_session.fetch_add(1, Ordering::SeqCst));
                let session = Arc::new(PooledSession::connecting(id, handle));
                session.mark_connected();
                info!(remote = %key, session = %id, "session connected");
                self.shared.record(&key, id, SessionEvent::Connected);
                session
            }
        };

        Ok(SessionLease {
            session: Some(session),
            in_flight,
            _permit: permit,
        })
    }

    /// Pops the most recently used ready session, evicting stale ones.
    async fn take_idle(
        &self,
        slot: &TargetSlot<C::Session>,
    ) -> Option<Arc<PooledSession<C::Session>>> {
        loop {
            let candidate = slot.idle.lock().pop()?;
            let state = candidate.state();
            if state.is_reusable() {
                return Some(candidate);
            }
            debug!(remote = %slot.key, session = %candidate.id, ?state, "evicting session");
            self.shared
                .record(&slot.key, candidate.id, SessionEvent::Evicted);
            self.shared.connector.close(&candidate.handle).await;
        }
    }

    /// Ping idle ready sessions concurrently; failures are marked degraded.
    ///
    /// Returns the number of sessions degraded by this pass.
    pub async fn health_check(&self) -> usize {
        let mut probes = JoinSet::new();
        let slots: Vec<_> = self.shared.slots.lock().values().cloned().collect();
        for slot in slots {
            let idle: Vec<_> = slot
                .idle
                .lock()
                .iter()
                .filter(|s| s.state().is_reusable())
                .cloned()
                .collect();
            for session in idle {
                let connector = Arc::clone(&self.shared.connector);
                let key = slot.key.clone();
                probes.spawn(async move {
                    let alive = connector.check(&session.handle).await;
                    (key, session, alive)
                });
            }
        }

        let mut degraded = 0;
        while let Some(joined) = probes.join_next().await {
            let Ok((key, session, alive)) = joined else {
                continue;
            };
            if !alive && session.degrade() {
                warn!(remote = %key, session = %session.id, "health check failed");
                self.shared.record(&key, session.id, SessionEvent::Degraded);
                degraded += 1;
            }
        }
        degraded
    }

    /// Run [`Self::health_check`] every `interval` until `cancel` fires.
    pub fn spawn_health_checker(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        let degraded = pool.health_check().await;
                        if degraded > 0 {
                            debug!(degraded, "health check pass complete");
                        }
                    }
                }
            }
        })
    }

    /// Reject new acquires, wait up to `grace` for in-flight leases, then
    /// close idle sessions. Leases returned later are closed on return.
    pub async fn shutdown(&self, grace: Duration) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let slots: Vec<_> = self.shared.slots.lock().values().cloned().collect();
        for slot in &slots {
            slot.permits.close();
        }

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let notified = self.shared.drained.notified();
            let remaining = self.shared.total_in_flight();
            if remaining == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!(remaining, "drain grace expired with leases still in flight");
                break;
            }
        }

        for slot in &slots {
            let idle: Vec<_> = slot.idle.lock().drain(..).collect();
            for session in idle {
                self.shared.connector.close(&session.handle).await;
                self.shared
                    .record(&slot.key, session.id, SessionEvent::Closed);
            }
        }
        info!("session pool closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Leases currently held for `key`.
    #[must_use]
    pub fn in_flight(&self, key: &TargetKey) -> usize {
        self.shared
            .slots
            .lock()
            .get(key)
            .map_or(0, |s| s.in_flight.load(Ordering::SeqCst))
    }

    /// Highest number of simultaneous leases ever held for `key`.
    #[must_use]
    pub fn peak_in_flight(&self, key: &TargetKey) -> usize {
        self.shared
            .slots
            .lock()
            .get(key)
            .map_or(0, |s| s.peak_in_flight.load(Ordering::SeqCst))
    }

    /// States of the idle sessions held for `key`, oldest first.
    #[must_use]
    pub fn idle_states(&self, key: &TargetKey) -> Vec<SessionState> {
        self.shared.slots.lock().get(key).map_or_else(Vec::new, |s| {
            s.idle.lock().iter().map(|session| session.state()).collect()
        })
    }

    #[must_use]
    pub fn idle_count(&self, key: &TargetKey) -> usize {
        self.shared
            .slots
            .lock()
            .get(key)
            .map_or(0, |s| s.idle.lock().len())
    }
}

// ── Lease ─────────────────────────────────────────────────────────────────────

/// Exclusive use of one session for one action. Returned to the pool on drop.
pub struct SessionLease<C: RemoteConnector> {
    session: Option<Arc<PooledSession<C::Session>>>,
    // Field order matters: the in-flight count drops before the permit.
    in_flight: InFlight<C>,
    _permit: OwnedSemaphorePermit,
}

impl<C: RemoteConnector> SessionLease<C> {
    fn session(&self) -> Option<&Arc<PooledSession<C::Session>>> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.session().map(|s| s.id)
    }

    /// Run a remote command, degrading the session on transport failures.
    ///
    /// # Errors
    ///
    /// Returns the connector's [`RemoteError`].
    pub async fn exec(&self, command: &str) -> Result<RemoteOutput, RemoteError> {
        let Some(session) = self.session() else {
            return Err(self.gone());
        };
        let result = self
            .in_flight
            .shared
            .connector
            .exec(&session.handle, command)
            .await;
        self.note(&result);
        result
    }

    /// Upload a file, degrading the session on transport failures.
    ///
    /// # Errors
    ///
    /// Returns the connector's [`RemoteError`].
    pub async fn push(
        &self,
        local: &Path,
        front_matter: Option<&str>,
        remote_path: &str,
    ) -> Result<RemoteOutput, RemoteError> {
        let Some(session) = self.session() else {
            return Err(self.gone());
        };
        let result = self
            .in_flight
            .shared
            .connector
            .push(&session.handle, local, front_matter, remote_path)
            .await;
        self.note(&result);
        result
    }

    fn note(&self, result: &Result<RemoteOutput, RemoteError>) {
        if result.as_ref().is_err_and(RemoteError::degrades_session) {
            self.mark_degraded();
        }
    }

    fn gone(&self) -> RemoteError {
        RemoteError::Disconnected {
            target: self.in_flight.slot.key.to_string(),
            message: "session already released".to_string(),
        }
    }

    /// Keep the session out of rotation; it is evicted on the next acquire.
    pub fn mark_degraded(&self) {
        let Some(session) = self.session() else {
            return;
        };
        if session.degrade() {
            warn!(remote = %self.in_flight.slot.key, session = %session.id, "session degraded");
            self.in_flight
                .shared
                .record(&self.in_flight.slot.key, session.id, SessionEvent::Degraded);
        }
    }

    /// Return the session to the pool now.
    pub fn release(self) {
        drop(self);
    }
}

impl<C: RemoteConnector> Drop for SessionLease<C> {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        *session.last_used.lock() = Instant::now();
        let shared = &self.in_flight.shared;
        let slot = &self.in_flight.slot;

        {
            // `closed` is read under the idle lock so shutdown's drain sees this push.
            let mut idle = slot.idle.lock();
            if !shared.closed.load(Ordering::SeqCst) {
                idle.push(session);
                return;
            }
        }

        shared.record(&slot.key, session.id, SessionEvent::Closed);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let connector = Arc::clone(&shared.connector);
                handle.spawn(async move {
                    connector.close(&session.handle).await;
                });
            }
            Err(_) => {
                warn!(remote = %slot.key, session = %session.id, "no runtime to close returned session");
            }
        }
    }
}
