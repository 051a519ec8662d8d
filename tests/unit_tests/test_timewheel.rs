// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use caracal_net::timewheel::TimeWheel;

#[tokio::test(start_paused = true)]
async fn test_one_shot_task_fires_once() {
    let wheel = TimeWheel::new(Duration::from_millis(50), 8).expect("wheel");
    wheel.start();

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    wheel.add(
        Duration::from_millis(100),
        Arc::new(move || {
            counter.fetch_add(1, Ordering::AcqRel);
        }),
    );

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(fired.load(Ordering::Acquire), 1);
    wheel.stop();
}

#[tokio::test(start_paused = true)]
async fn test_cron_task_repeats() {
    let wheel = TimeWheel::new(Duration::from_millis(50), 8).expect("wheel");
    wheel.start();

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let task = wheel.add_cron(
        Duration::from_millis(100),
        Arc::new(move || {
            counter.fetch_add(1, Ordering::AcqRel);
        }),
    );

    tokio::time::sleep(Duration::from_millis(600)).await;
    let count = fired.load(Ordering::Acquire);
    assert!(count >= 3, "cron task fired {count} times");

    wheel.remove(&task);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let after_remove = fired.load(Ordering::Acquire);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(fired.load(Ordering::Acquire), after_remove);
    wheel.stop();
}

#[tokio::test(start_paused = true)]
async fn test_removed_task_never_fires() {
    let wheel = TimeWheel::new(Duration::from_millis(50), 8).expect("wheel");
    wheel.start();

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let task = wheel.add(
        Duration::from_millis(200),
        Arc::new(move || {
            counter.fetch_add(1, Ordering::AcqRel);
        }),
    );
    wheel.remove(&task);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(fired.load(Ordering::Acquire), 0);
    wheel.stop();
}

#[tokio::test(start_paused = true)]
async fn test_multi_round_delay() {
    // 4 buckets x 50ms per revolution; 450ms needs two full rounds
    let wheel = TimeWheel::new(Duration::from_millis(50), 4).expect("wheel");
    wheel.start();

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    wheel.add(
        Duration::from_millis(450),
        Arc::new(move || {
            counter.fetch_add(1, Ordering::AcqRel);
        }),
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(fired.load(Ordering::Acquire), 0, "fired too early");
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(fired.load(Ordering::Acquire), 1);
    wheel.stop();
}

#[tokio::test(start_paused = true)]
async fn test_after_signal() {
    let wheel = TimeWheel::new(Duration::from_millis(50), 8).expect("wheel");
    wheel.start();

    let rx = wheel.after(Duration::from_millis(150));
    tokio::time::timeout(Duration::from_secs(2), rx)
        .await
        .expect("after deadline")
        .expect("after signal");
    wheel.stop();
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    let wheel = TimeWheel::new(Duration::from_millis(50), 8).expect("wheel");
    wheel.start();
    wheel.stop();
    wheel.stop();
}
