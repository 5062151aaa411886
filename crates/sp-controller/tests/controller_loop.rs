//! Work-queue controller and service wiring

use sp_audit::MemorySink;
use sp_controller::{ControllerConfig, InMemoryStore, Services, SignalProcessingStore};
use sp_test_utils::{crashloop_signal, fast_config, prod_payment_cluster, write_policies};
use sp_types::{ObjectKey, Phase, Priority, SignalProcessing};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Fixture {
    services: Services,
    store: Arc<InMemoryStore>,
    cluster: Arc<sp_enrichment::InMemoryCluster>,
    sink: Arc<MemorySink>,
}

fn fixture(config: ControllerConfig) -> Fixture {
    fixture_with_store(config, InMemoryStore::new())
}

fn fixture_with_store(config: ControllerConfig, store: InMemoryStore) -> Fixture {
    let store = Arc::new(store);
    let cluster = Arc::new(prod_payment_cluster());
    let sink = Arc::new(MemorySink::new());
    let services = Services::build_with_sink(config, cluster.clone(), store.clone(), sink.clone());
    Fixture {
        services,
        store,
        cluster,
        sink,
    }
}

async fn submit(store: &InMemoryStore, name: &str) -> ObjectKey {
    let key = ObjectKey::new("kubernaut-system", name);
    store
        .create(SignalProcessing::new(key.clone(), name, crashloop_signal()))
        .await
        .unwrap();
    key
}

async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn all_terminal(store: &InMemoryStore, keys: &[ObjectKey]) -> bool {
    for key in keys {
        match store.get(key).await.unwrap() {
            Some(obj) if obj.phase().is_terminal() => {}
            _ => return false,
        }
    }
    true
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bounded_concurrency_processes_everything() {
    let mut config = fast_config();
    config.reconcile = config.reconcile.with_max_concurrent(2);
    let mut f = fixture(config);
    f.cluster.set_latency(Duration::from_millis(20));
    f.services.start().await;

    let mut keys = Vec::new();
    for i in 0..12 {
        let key = submit(&f.store, &format!("sp-{i}")).await;
        f.services.controller.enqueue(key.clone());
        keys.push(key);
    }
    wait_until("all objects terminal", || all_terminal(&f.store, &keys)).await;

    for key in &keys {
        let obj = f.store.get(key).await.unwrap().unwrap();
        assert_eq!(obj.phase(), Phase::Completed);
        assert_eq!(obj.status.priority.unwrap().value, Priority::P0);
    }
    let peak = f.services.controller.peak_in_flight();
    assert!(peak >= 1 && peak <= 2, "peak in flight was {peak}");
    f.services.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missed_store_events_are_recovered_by_relisting() {
    let mut f = fixture_with_store(fast_config(), InMemoryStore::with_event_capacity(4));
    f.services.start().await;
    let events = f.store.watch();

    // Nobody reads the notifications yet, so the watcher falls behind
    let mut keys = Vec::new();
    for i in 0..20 {
        keys.push(submit(&f.store, &format!("burst-{i}")).await);
    }
    let feed = CancellationToken::new();
    let follower = tokio::spawn(Arc::clone(&f.services.controller).follow(
        f.store.clone(),
        events,
        feed.clone(),
    ));

    wait_until("burst terminal", || all_terminal(&f.store, &keys)).await;
    for key in &keys {
        assert_eq!(f.store.get(key).await.unwrap().unwrap().phase(), Phase::Completed);
    }
    feed.cancel();
    follower.await.unwrap();
    f.services.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resync_skips_terminal_objects() {
    let mut f = fixture(fast_config());
    f.services.start().await;
    let done = submit(&f.store, "done").await;
    f.services.controller.enqueue(done.clone());
    wait_until("object terminal", || all_terminal(&f.store, std::slice::from_ref(&done))).await;

    let pending = submit(&f.store, "pending").await;
    let queued = f.services.controller.resync(f.store.as_ref()).await.unwrap();
    assert_eq!(queued, 1);
    wait_until("object terminal", || all_terminal(&f.store, std::slice::from_ref(&pending))).await;
    f.services.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_enqueues_do_not_duplicate_work() {
    let mut f = fixture(fast_config());
    f.services.start().await;

    let key = submit(&f.store, "dup").await;
    for _ in 0..5 {
        f.services.controller.enqueue(key.clone());
    }
    wait_until("object terminal", || all_terminal(&f.store, std::slice::from_ref(&key))).await;
    let sink = f.sink.clone();
    f.services.shutdown().await;

    let transitions = sink
        .events()
        .iter()
        .filter(|e| e.kind.name() == "phase_transition")
        .count();
    assert_eq!(transitions, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_abandons_the_running_pass() {
    let mut config = fast_config();
    config.enrichment = config.enrichment.with_timeout(Duration::from_secs(3));
    config.reconcile = config.reconcile.with_pass_timeout(Duration::from_secs(5));
    let mut f = fixture(config);
    f.cluster.set_latency(Duration::from_secs(2));
    f.services.start().await;

    let key = submit(&f.store, "slow").await;
    f.services.controller.enqueue(key.clone());

    let controller = Arc::clone(&f.services.controller);
    let store = f.store.clone();
    let k = key.clone();
    wait_until("enrichment pass running", || {
        let controller = Arc::clone(&controller);
        let store = store.clone();
        let k = k.clone();
        async move {
            let phase = store.get(&k).await.unwrap().map(|o| o.phase());
            phase == Some(Phase::Enriching) && controller.in_flight() == 1
        }
    })
    .await;

    controller.cancel(&key);
    wait_until("pass abandoned", || {
        let controller = Arc::clone(&controller);
        async move { controller.in_flight() == 0 }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let obj = f.store.get(&key).await.unwrap().unwrap();
    assert_eq!(obj.phase(), Phase::Enriching);
    assert!(obj.status.enrichment.is_none());
    f.services.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn readiness_follows_lifecycle() {
    let mut f = fixture(fast_config());
    let readiness = Arc::clone(&f.services.readiness);
    assert!(!readiness.is_ready());

    f.services.start().await;
    let r = Arc::clone(&readiness);
    wait_until("ready", || {
        let r = Arc::clone(&r);
        async move { r.is_ready() }
    })
    .await;
    assert!(readiness.is_live());

    f.services.shutdown().await;
    let report = readiness.report();
    assert!(!report.controller_running);
    assert!(!report.audit_running);
    assert!(!report.live);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn policy_directory_is_loaded_and_audited() {
    let policies = write_policies(&[(
        "priority.yaml",
        "rules:\n  - name: everything-p3\n    then: {value: P3}\n",
    )]);
    let mut config = fast_config();
    config.policy.directory = Some(policies.path().to_path_buf());
    let mut f = fixture(config);
    f.services.start().await;
    assert_eq!(f.services.policy_store.version(), 1);
    assert!(f.services.readiness.report().policy_attempted);

    let key = submit(&f.store, "ruled").await;
    f.services.controller.enqueue(key.clone());
    wait_until("object terminal", || all_terminal(&f.store, std::slice::from_ref(&key))).await;

    let obj = f.store.get(&key).await.unwrap().unwrap();
    assert_eq!(obj.status.priority.unwrap().value, Priority::P3);
    assert_eq!(obj.status.policy_version, Some(1));

    let sink = f.sink.clone();
    f.services.shutdown().await;
    let reloads: Vec<_> = sink
        .events()
        .into_iter()
        .filter(|e| e.kind.name() == "policy_reloaded")
        .collect();
    assert_eq!(reloads.len(), 1);
    assert!(reloads[0].resource.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_policy_directory_falls_back() {
    let mut config = fast_config();
    config.policy.directory = Some(std::env::temp_dir().join("sp-controller-no-such-policies"));
    let mut f = fixture(config);
    f.services.start().await;
    assert_eq!(f.services.policy_store.version(), 0);
    assert!(f.services.readiness.report().policy_attempted);

    let key = submit(&f.store, "fallback").await;
    f.services.controller.enqueue(key.clone());
    wait_until("object terminal", || all_terminal(&f.store, std::slice::from_ref(&key))).await;
    let obj = f.store.get(&key).await.unwrap().unwrap();
    assert_eq!(obj.phase(), Phase::Completed);
    assert_eq!(obj.status.priority.unwrap().value, Priority::P0);
    assert_eq!(obj.status.policy_version, None);

    let sink = f.sink.clone();
    f.services.shutdown().await;
    assert!(sink.events().iter().any(|e| e.kind.name() == "policy_rejected"));
}
