// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Arc, mpsc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use caracal_net::{
    errors::NetError,
    worker::{FixedWorkerPool, SimpleWorkerPool},
};

async fn wait_for(counter: &Arc<AtomicUsize>, expected: usize) {
    for _ in 0..200 {
        if counter.load(Ordering::Acquire) >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "counter stuck at {} waiting for {expected}",
        counter.load(Ordering::Acquire)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queue_full_refusal() {
    let pool = FixedWorkerPool::new(5, 2, false).expect("pool");

    // occupy slot 0 with a gated job
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    pool.try_submit(0, Box::new(move |_| {
        let _ = gate_rx.recv();
    }))
    .expect("submit blocked job");
    // give the worker a moment to pick it up
    tokio::time::sleep(Duration::from_millis(50)).await;

    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let counter = Arc::clone(&done);
        pool.try_submit(0, Box::new(move |_| {
            counter.fetch_add(1, Ordering::AcqRel);
        }))
        .expect("queue has room");
    }
    // queue of slot 0 is full now
    let err = pool
        .try_submit(0, Box::new(|_| {}))
        .expect_err("queue must be full");
    assert!(matches!(err, NetError::WorkerPoolQueueIsFull));

    // other slots still accept
    let other = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&other);
    pool.try_submit(1, Box::new(move |_| {
        counter.fetch_add(1, Ordering::AcqRel);
    }))
    .expect("other slot accepts");
    wait_for(&other, 1).await;

    // release the gate, the queue drains, submissions succeed again
    gate_tx.send(()).expect("release gate");
    wait_for(&done, 2).await;
    pool.try_submit(0, Box::new(|_| {})).expect("drained queue accepts");

    pool.shutdown(Duration::from_secs(1)).await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_group_routing_shares_local() {
    let pool = FixedWorkerPool::new(4, 8, true).expect("pool");

    pool.submit(3, Box::new(|local| {
        local.set("visits", 1usize);
    }))
    .await
    .expect("submit");

    // same group key lands on the same worker and sees its local state
    let (tx, rx) = mpsc::channel::<usize>();
    pool.submit(3, Box::new(move |local| {
        let visits = local.get::<usize>("visits").copied().unwrap_or(0);
        let _ = tx.send(visits);
    }))
    .await
    .expect("submit");
    let visits = rx.recv_timeout(Duration::from_secs(2)).expect("job ran");
    assert_eq!(visits, 1);

    pool.shutdown(Duration::from_secs(1)).await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_rejects_submissions() {
    let pool = FixedWorkerPool::new(2, 2, false).expect("pool");
    pool.shutdown(Duration::from_secs(1)).await.expect("shutdown");

    let err = pool.try_submit(0, Box::new(|_| {})).expect_err("closed pool");
    assert!(matches!(err, NetError::WorkerPoolClosed));

    let err = pool
        .shutdown(Duration::from_secs(1))
        .await
        .expect_err("double shutdown");
    assert!(matches!(err, NetError::WorkerPoolClosed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_survives_panicking_job() {
    let pool = FixedWorkerPool::new(1, 4, false).expect("pool");

    pool.try_submit(0, Box::new(|_| panic!("boom"))).expect("submit");
    tokio::time::sleep(Duration::from_millis(100)).await;

    // the slot respawned and keeps processing
    let done = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&done);
    pool.try_submit(0, Box::new(move |_| {
        counter.fetch_add(1, Ordering::AcqRel);
    }))
    .expect("submit after panic");
    wait_for(&done, 1).await;

    pool.shutdown(Duration::from_secs(1)).await.expect("shutdown");
}

#[test]
fn test_simple_pool_runs_inline() {
    let pool = SimpleWorkerPool::new();
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    pool.submit(0, Box::new(move |local| {
        local.set("key", 7u32);
        counter.fetch_add(1, Ordering::AcqRel);
    }))
    .expect("submit");
    assert_eq!(ran.load(Ordering::Acquire), 1);

    // a panicking job is contained
    pool.submit(0, Box::new(|_| panic!("boom"))).expect("submit");
    pool.submit(0, Box::new(|_| {})).expect("still usable");

    pool.shutdown().expect("shutdown");
    let err = pool.submit(0, Box::new(|_| {})).expect_err("closed");
    assert!(matches!(err, NetError::WorkerPoolClosed));
}
