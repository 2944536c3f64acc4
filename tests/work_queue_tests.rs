//! Integration tests for the keyed work queue
//!
//! The reconciler assumes invocations for one Tenant never overlap. These
//! tests check that the in-process queue upholds that while still running
//! different keys concurrently, and that it redelivers failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use tenant_operator::controllers::queue::{QueueConfig, WorkQueue};
use tenant_operator::crd::{Tenant, TenantSpec};
use tenant_operator::reconcilers::TenantReconciler;
use tenant_operator::store::memory::{MemoryStore, Verb};
use tenant_operator::store::ObjectKey;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Default)]
struct Tracker {
    active: Mutex<HashMap<String, usize>>,
    overlaps: AtomicUsize,
    peak_total: AtomicUsize,
    calls: AtomicUsize,
}

impl Tracker {
    fn enter(&self, key: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut active = self.active.lock().unwrap();
        let count = active.entry(key.to_string()).or_insert(0);
        *count += 1;
        if *count > 1 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let total: usize = active.values().sum();
        self.peak_total.fetch_max(total, Ordering::SeqCst);
    }

    fn exit(&self, key: &str) {
        let mut active = self.active.lock().unwrap();
        if let Some(count) = active.get_mut(key) {
            *count -= 1;
        }
    }
}

fn fast_retries(max_attempts: u32) -> QueueConfig {
    QueueConfig {
        max_attempts,
        retry_backoff: Duration::from_millis(5),
    }
}

// ============================================================================
// Delivery Semantics
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_key_never_runs_concurrently() {
    let tracker = Arc::new(Tracker::default());
    let (sender, queue) = WorkQueue::new(QueueConfig::default());

    for _ in 0..20 {
        assert!(sender.enqueue("t1"));
    }
    drop(sender);

    let t = tracker.clone();
    let stats = queue
        .run(move |key| {
            let t = t.clone();
            async move {
                t.enter(&key);
                tokio::time::sleep(Duration::from_millis(10)).await;
                t.exit(&key);
                Ok::<(), String>(())
            }
        })
        .await;

    assert_eq!(tracker.overlaps.load(Ordering::SeqCst), 0);
    assert!(stats.succeeded >= 1);
    // Redeliveries while running are coalesced.
    assert!(stats.succeeded < 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_keys_run_concurrently() {
    let tracker = Arc::new(Tracker::default());
    let (sender, queue) = WorkQueue::new(QueueConfig::default());

    for key in ["t1", "t2", "t3", "t4"] {
        sender.enqueue(key);
    }
    drop(sender);

    let t = tracker.clone();
    let stats = queue
        .run(move |key| {
            let t = t.clone();
            async move {
                t.enter(&key);
                tokio::time::sleep(Duration::from_millis(50)).await;
                t.exit(&key);
                Ok::<(), String>(())
            }
        })
        .await;

    assert_eq!(stats.succeeded, 4);
    assert!(tracker.peak_total.load(Ordering::SeqCst) > 1);
}

#[tokio::test]
async fn failures_are_redelivered_until_they_succeed() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (sender, queue) = WorkQueue::new(fast_retries(5));
    sender.enqueue("t1");
    drop(sender);

    let c = calls.clone();
    let stats = queue
        .run(move |_key| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(())
                }
            }
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.succeeded, 1);
    assert!(stats.dropped.is_empty());
}

#[tokio::test]
async fn keys_are_dropped_after_max_attempts() {
    let (sender, queue) = WorkQueue::new(fast_retries(3));
    sender.enqueue("t1");
    drop(sender);

    let stats = queue
        .run(|_key| async { Err::<(), _>("permanent".to_string()) })
        .await;

    assert_eq!(stats.failed, 3);
    assert_eq!(stats.dropped, vec!["t1".to_string()]);
}

// ============================================================================
// Driving the Reconciler
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queue_converges_tenants_despite_transient_store_errors() {
    let store = Arc::new(MemoryStore::new());
    for name in ["t1", "t2"] {
        store
            .insert(Tenant::new(
                name,
                TenantSpec {
                    namespaces: vec![format!("{}-ns", name)],
                    admin_email: format!("{}@x.com", name),
                    admin_groups: vec!["admins".to_string()],
                    user_groups: vec!["users".to_string()],
                },
            ))
            .unwrap();
    }
    store.inject_failure(Verb::Create, "Namespace", Some("t1-ns"), Some(2));

    let reconciler = TenantReconciler::new(store.clone());
    let token = CancellationToken::new();
    let (sender, queue) = WorkQueue::new(fast_retries(5));
    for key in ["t1", "t2", "t1", "t2"] {
        sender.enqueue(key);
    }
    drop(sender);

    let stats = queue
        .run(move |key| {
            let reconciler = reconciler.clone();
            let token = token.clone();
            async move { reconciler.reconcile(&key, &token).await.map(|_| ()) }
        })
        .await;

    assert!(stats.dropped.is_empty());
    assert!(stats.failed >= 2);
    for name in ["t1", "t2"] {
        assert!(store.contains::<Namespace>(&ObjectKey::cluster(format!("{}-ns", name))));
        let tenant: Tenant = store.object(&ObjectKey::cluster(name)).unwrap();
        assert_eq!(tenant.status.unwrap().namespace_count, 1);
    }
}
