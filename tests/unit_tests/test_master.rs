// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use caracal_net::{
    cache::{Cache, MemoryStore},
    master::{MsHandler, MsOptions, MsService},
    timewheel::TimeWheel,
};
use parking_lot::Mutex;

const SIGN_A: [u8; 8] = *b"srv-a   ";
const SIGN_B: [u8; 8] = *b"srv-b   ";

#[derive(Default)]
struct RecordingHandler {
    events: Mutex<Vec<String>>,
    promotions: AtomicUsize,
    custom: Mutex<Vec<(i32, String)>>,
}

impl RecordingHandler {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl MsHandler<String> for RecordingHandler {
    fn on_be_main_service(&self) -> anyhow::Result<()> {
        self.promotions.fetch_add(1, Ordering::AcqRel);
        self.events.lock().push("be_main".to_string());
        Ok(())
    }

    fn on_be_main_service_failed(&self) {
        self.events.lock().push("be_main_failed".to_string());
    }

    fn on_leave_main_service(&self) {
        self.events.lock().push("leave_main".to_string());
    }

    fn on_task_data(&self, data_type: i32, data: String) {
        self.custom.lock().push((data_type, data));
    }

    fn on_keep_tick(&self) {}
}

struct Fixture {
    wheel: TimeWheel,
    cache: Arc<Cache>,
}

fn fixture() -> Fixture {
    let wheel = TimeWheel::new(Duration::from_millis(100), 16).expect("wheel");
    wheel.start();
    let cache = Cache::new(Arc::new(MemoryStore::new()), wheel.clone());
    Fixture { wheel, cache }
}

fn new_service(
    fixture: &Fixture,
    service_id: &str,
    signature: [u8; 8],
) -> (Arc<MsService<String, RecordingHandler>>, Arc<RecordingHandler>) {
    let handler = Arc::new(RecordingHandler::default());
    let service = MsService::new(MsOptions {
        srv_name: format!("test-{service_id}"),
        tick_interval_sec: 1,
        distribution_cache_key: "cluster:main".to_string(),
        service_id: service_id.to_string(),
        distribution_cache_signature: signature,
        distribution_cache_expire_sec: 2,
        tw_timer: fixture.wheel.clone(),
        cache: Arc::clone(&fixture.cache),
        handler: Arc::clone(&handler),
    })
    .expect("service");
    (service, handler)
}

async fn wait_until<F: Fn() -> bool>(timeout: Duration, predicate: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    predicate()
}

#[tokio::test]
async fn test_first_replica_becomes_main() {
    let fx = fixture();
    let (service, handler) = new_service(&fx, "inst-a", SIGN_A);
    service.start().await.expect("start");

    assert!(
        wait_until(Duration::from_secs(2), || service.is_main_service()).await,
        "first replica must win the empty lease"
    );
    assert_eq!(handler.promotions.load(Ordering::Acquire), 1);
    assert_eq!(service.get_main_service_id().await, "inst-a");

    service.stop().await.expect("stop");
    // yielding leadership deletes the lease
    assert!(fx.cache.get("cluster:main").await.expect("get").is_none());
}

#[tokio::test]
async fn test_follower_never_promotes_while_lease_held() {
    let fx = fixture();
    let (service_a, _) = new_service(&fx, "inst-a", SIGN_A);
    service_a.start().await.expect("start a");
    assert!(wait_until(Duration::from_secs(2), || service_a.is_main_service()).await);

    let (service_b, handler_b) = new_service(&fx, "inst-b", SIGN_B);
    service_b.start().await.expect("start b");

    // several keep ticks pass; B observes the foreign lease and stays
    // follower
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!service_b.is_main_service());
    assert_eq!(handler_b.promotions.load(Ordering::Acquire), 0);
    assert_eq!(service_b.get_main_service_id().await, "inst-a");

    service_a.stop().await.expect("stop a");
    service_b.stop().await.expect("stop b");
}

#[tokio::test]
async fn test_failover_after_leader_stop() {
    let fx = fixture();
    let (service_a, handler_a) = new_service(&fx, "inst-a", SIGN_A);
    service_a.start().await.expect("start a");
    assert!(wait_until(Duration::from_secs(2), || service_a.is_main_service()).await);

    let (service_b, _) = new_service(&fx, "inst-b", SIGN_B);
    service_b.start().await.expect("start b");
    assert!(!service_b.is_main_service());

    // graceful stop releases the lease, B takes over on its next tick
    service_a.stop().await.expect("stop a");
    assert!(
        wait_until(Duration::from_secs(3), || service_b.is_main_service()).await,
        "follower must take over the released lease"
    );
    assert_eq!(service_b.get_main_service_id().await, "inst-b");
    assert!(handler_a.events().contains(&"be_main".to_string()));

    service_b.stop().await.expect("stop b");
}

#[tokio::test]
async fn test_failover_after_lease_expiry() {
    let fx = fixture();
    // a crashed leader left a 1s lease behind
    fx.cache
        .add_or_update("cluster:main", "inst-dead", SIGN_A, 1, 0, 0, 0, None)
        .await
        .expect("plant lease");

    let (service_b, handler_b) = new_service(&fx, "inst-b", SIGN_B);
    service_b.start().await.expect("start b");
    assert!(!service_b.is_main_service());
    assert_eq!(service_b.get_main_service_id().await, "inst-dead");

    // once the TTL lapses the follower branch finds the key absent and
    // promotes itself
    assert!(
        wait_until(Duration::from_secs(4), || service_b.is_main_service()).await,
        "follower must take over the expired lease"
    );
    assert_eq!(handler_b.promotions.load(Ordering::Acquire), 1);

    service_b.stop().await.expect("stop b");
}

#[tokio::test]
async fn test_custom_tasks_run_serially() {
    let fx = fixture();
    let (service, handler) = new_service(&fx, "inst-a", SIGN_A);
    service.start().await.expect("start");

    assert!(service.add_task(1, "first".to_string(), true).await);
    assert!(service.add_task(2, "second".to_string(), true).await);

    assert!(
        wait_until(Duration::from_secs(2), || handler.custom.lock().len() == 2).await
    );
    assert_eq!(
        handler.custom.lock().clone(),
        vec![(1, "first".to_string()), (2, "second".to_string())]
    );

    service.stop().await.expect("stop");
    // a closed coordinator refuses new tasks
    assert!(!service.add_task(3, "third".to_string(), false).await);
}
