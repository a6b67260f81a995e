//! Unit tests for the session pool service.
//!
//! Drive `SessionPool` against the scripted connector and check reuse,
//! per-target bounds, eviction of degraded sessions and the drain sequence.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use tether_cli::application::services::SessionPool;
use tether_cli::domain::{PoolError, RemoteTarget, SessionState};
use tether_cli::infra::audit::MemoryAuditLog;
use tether_common::{AuditRecord, SessionEvent};

use crate::mocks::{FakeConnector, Reply};

fn pool(
    connector: FakeConnector,
    max_per_target: usize,
    acquire_timeout: Duration,
) -> (SessionPool<FakeConnector>, Arc<FakeConnector>, Arc<MemoryAuditLog>) {
    let connector = Arc::new(connector);
    let audit = Arc::new(MemoryAuditLog::new());
    let pool = SessionPool::new(
        Arc::clone(&connector),
        audit.clone(),
        max_per_target,
        acquire_timeout,
    );
    (pool, connector, audit)
}

fn target() -> RemoteTarget {
    RemoteTarget::new("web.example.com", "deploy")
}

fn session_events(audit: &MemoryAuditLog) -> Vec<SessionEvent> {
    audit
        .records()
        .into_iter()
        .filter_map(|r| match r {
            AuditRecord::Session { event, .. } => Some(event),
            _ => None,
        })
        .collect()
}

// ── Reuse ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_acquire_reuses_released_session() {
    let (pool, connector, audit) = pool(FakeConnector::new(), 2, Duration::from_secs(1));

    let first = pool.acquire(&target()).await.expect("first lease");
    let first_id = first.session_id();
    first.release();
    let second = pool.acquire(&target()).await.expect("second lease");

    assert_eq!(second.session_id(), first_id);
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(
        session_events(&audit),
        vec![SessionEvent::Connected, SessionEvent::Reused]
    );
}

#[tokio::test]
async fn test_connected_session_is_parked_ready() {
    let (pool, _connector, _audit) = pool(FakeConnector::new(), 1, Duration::from_secs(1));

    pool.acquire(&target()).await.expect("lease").release();

    assert_eq!(pool.idle_states(&target().key()), vec![SessionState::Ready]);
}

#[tokio::test]
async fn test_targets_with_different_ports_get_separate_sessions() {
    let (pool, connector, _audit) = pool(FakeConnector::new(), 1, Duration::from_secs(1));
    let mut other = target();
    other.port = 2222;

    let a = pool.acquire(&target()).await.expect("lease a");
    let b = pool.acquire(&other).await.expect("lease b");

    assert_ne!(a.session_id(), b.session_id());
    assert_eq!(connector.connect_count(), 2);
    assert_eq!(pool.in_flight(&target().key()), 1);
    assert_eq!(pool.in_flight(&other.key()), 1);
}

// ── Bounds ───────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_concurrent_leases_never_exceed_max_per_target() {
    let connector = FakeConnector::new().with_delay(Duration::from_millis(50));
    let (pool, connector, _audit) = pool(connector, 2, Duration::from_secs(5));

    let mut handles = Vec::new();
    for n in 0..6 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let lease = pool.acquire(&target()).await.expect("lease");
            lease.exec(&format!("job {n}")).await.expect("exec")
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().exit_code, 0);
    }

    assert_eq!(pool.peak_in_flight(&target().key()), 2);
    assert!(connector.peak_in_flight.load(std::sync::atomic::Ordering::SeqCst) <= 2);
    assert_eq!(connector.connect_count(), 2);
    assert_eq!(pool.in_flight(&target().key()), 0);
    assert_eq!(pool.idle_count(&target().key()), 2);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_times_out_with_pool_exhausted() {
    let (pool, _connector, _audit) = pool(FakeConnector::new(), 1, Duration::from_millis(100));

    let _held = pool.acquire(&target()).await.expect("first lease");
    let err = pool.acquire(&target()).await.err().expect("exhausted");

    assert!(matches!(err, PoolError::Exhausted { .. }), "got: {err}");
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_failed_connect_releases_its_permit() {
    let connector = FakeConnector::new().failing_connects(1);
    let (pool, connector, _audit) = pool(connector, 1, Duration::from_millis(200));

    let err = pool.acquire(&target()).await.err().expect("connect error");
    assert!(matches!(err, PoolError::Remote(_)), "got: {err}");
    assert_eq!(pool.in_flight(&target().key()), 0);

    let lease = pool.acquire(&target()).await.expect("second try connects");
    assert!(lease.session_id().is_some());
    assert_eq!(connector.connect_count(), 1);
}

// ── Health ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_dropped_session_is_evicted_on_next_acquire() {
    let connector = FakeConnector::with_replies([Reply::Dropped]);
    let (pool, connector, audit) = pool(connector, 1, Duration::from_secs(1));

    let lease = pool.acquire(&target()).await.expect("lease");
    assert!(lease.exec("true").await.is_err());
    drop(lease);

    let lease = pool.acquire(&target()).await.expect("fresh lease");
    assert_eq!(lease.session_id().map(|s| s.0), Some(2));
    assert_eq!(connector.connect_count(), 2);
    assert_eq!(connector.close_count(), 1);
    assert_eq!(
        session_events(&audit),
        vec![
            SessionEvent::Connected,
            SessionEvent::Degraded,
            SessionEvent::Evicted,
            SessionEvent::Connected,
        ]
    );
}

#[tokio::test]
async fn test_non_zero_exit_keeps_session_reusable() {
    let connector = FakeConnector::with_replies([Reply::Exit(3)]);
    let (pool, connector, _audit) = pool(connector, 1, Duration::from_secs(1));

    let lease = pool.acquire(&target()).await.expect("lease");
    assert_eq!(lease.exec("false").await.expect("exec").exit_code, 3);
    drop(lease);
    let _again = pool.acquire(&target()).await.expect("reused");

    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test]
async fn test_health_check_degrades_dead_idle_sessions() {
    let (pool, connector, audit) = pool(FakeConnector::new(), 2, Duration::from_secs(1));
    pool.acquire(&target()).await.expect("lease").release();

    assert_eq!(pool.health_check().await, 0);
    connector.set_healthy(false);
    assert_eq!(pool.health_check().await, 1);
    // Already degraded sessions are not probed again.
    assert_eq!(pool.health_check().await, 0);

    connector.set_healthy(true);
    let _lease = pool.acquire(&target()).await.expect("fresh lease");
    assert_eq!(connector.connect_count(), 2);
    assert!(session_events(&audit).contains(&SessionEvent::Evicted));
}

// ── Shutdown ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_shutdown_closes_idle_sessions_and_rejects_acquire() {
    let (pool, connector, audit) = pool(FakeConnector::new(), 2, Duration::from_secs(1));
    pool.acquire(&target()).await.expect("lease").release();

    pool.shutdown(Duration::from_millis(100)).await;

    assert!(pool.is_closed());
    assert_eq!(connector.close_count(), 1);
    assert_eq!(session_events(&audit).last(), Some(&SessionEvent::Closed));
    let err = pool.acquire(&target()).await.err().expect("closed");
    assert!(matches!(err, PoolError::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_in_flight_lease() {
    let (pool, connector, audit) = pool(FakeConnector::new(), 2, Duration::from_secs(1));
    let lease = pool.acquire(&target()).await.expect("lease");
    let holder = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(lease);
    });

    pool.shutdown(Duration::from_secs(5)).await;
    holder.await.unwrap();
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }

    assert_eq!(pool.in_flight(&target().key()), 0);
    assert_eq!(pool.idle_count(&target().key()), 0);
    assert_eq!(connector.close_count(), 1);
    assert_eq!(session_events(&audit).last(), Some(&SessionEvent::Closed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lease_dropped_during_shutdown_is_always_closed() {
    for _ in 0..200 {
        let (pool, connector, _audit) = pool(FakeConnector::new(), 1, Duration::from_secs(1));
        let lease = pool.acquire(&target()).await.expect("lease");
        let holder = tokio::spawn(async move { drop(lease) });

        pool.shutdown(Duration::ZERO).await;
        holder.await.unwrap();

        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            while connector.close_count() < connector.connect_count() {
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(closed.is_ok(), "returned lease leaked past shutdown");
        assert_eq!(pool.idle_count(&target().key()), 0);
    }
}
