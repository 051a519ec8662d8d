// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use caracal_net::{errors::NetError, utils::safechan::SafeChannel};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_put_get() {
    let chan = SafeChannel::new(2);
    chan.put(1u32).expect("put");
    chan.put(2u32).expect("put");
    let err = chan.put(3u32).expect_err("full");
    assert!(matches!(err, NetError::FullChan));

    assert_eq!(chan.get().await.expect("get"), 1);
    assert_eq!(chan.get().await.expect("get"), 2);
    let err = chan.get().await.expect_err("empty");
    assert!(matches!(err, NetError::EmptyChan));
    assert_eq!(chan.capacity(), 2);
}

#[tokio::test]
async fn test_blocking_get_unblocks_on_put() {
    let chan = Arc::new(SafeChannel::new(1));
    let getter = Arc::clone(&chan);
    let handle =
        tokio::spawn(async move { getter.blocking_get(None).await.expect("value") });
    tokio::time::sleep(Duration::from_millis(20)).await;
    chan.put(42u32).expect("put");
    assert_eq!(handle.await.expect("join"), 42);
}

#[tokio::test]
async fn test_blocking_get_context_done() {
    let chan: SafeChannel<u32> = SafeChannel::new(1);
    let ctx = CancellationToken::new();
    let cancel = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });
    let err = chan.blocking_get(Some(&ctx)).await.expect_err("cancelled");
    assert!(matches!(err, NetError::ChanContextDone));
}

#[tokio::test]
async fn test_close_unblocks_waiters() {
    let chan: Arc<SafeChannel<u32>> = Arc::new(SafeChannel::new(1));
    let getter = Arc::clone(&chan);
    let handle = tokio::spawn(async move { getter.blocking_get(None).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    chan.close();
    let err = handle.await.expect("join").expect_err("closed");
    assert!(matches!(err, NetError::ClosedChan));

    assert!(chan.is_closed());
    let err = chan.put(1).expect_err("closed");
    assert!(matches!(err, NetError::ClosedChan));
    // close is idempotent
    chan.close();
}

#[tokio::test]
async fn test_blocking_put_context_done() {
    let chan: SafeChannel<u32> = SafeChannel::new(1);
    chan.put(1).expect("put");
    let ctx = CancellationToken::new();
    let cancel = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });
    let err = chan
        .blocking_put(Some(&ctx), 2)
        .await
        .expect_err("cancelled");
    assert!(matches!(err, NetError::ChanContextDone));
}

#[tokio::test]
async fn test_listen_consumes_until_false() {
    let chan: Arc<SafeChannel<u32>> = Arc::new(SafeChannel::new(4));
    chan.put(1).expect("put");
    chan.put(2).expect("put");
    chan.put(3).expect("put");

    let mut seen = Vec::new();
    chan.listen(|value| {
        seen.push(value);
        value != 2
    })
    .await
    .expect("listen");
    assert_eq!(seen, vec![1, 2]);
}
