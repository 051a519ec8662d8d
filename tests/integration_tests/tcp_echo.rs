// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use caracal_net::{
    session::Session,
    tcp::{Client, ClientOptions, Server, ServerOptions},
};
use serial_test::serial;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::integration_tests::common::{
    EchoListener, Recorder, RecordingListener, new_length_codec, wait_until,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_tcp_echo() {
    let server_recorder = Arc::new(Recorder::default());
    let server = Server::new(
        "echo-server",
        "tcp://127.0.0.1:0",
        new_length_codec(),
        EchoListener { recorder: Arc::clone(&server_recorder) },
        ServerOptions::default(),
    )
    .expect("server");
    server.start().await.expect("server start");
    let addr = server.local_addr().expect("bound address");

    let client_recorder = Arc::new(Recorder::default());
    let client = Client::new(
        new_length_codec(),
        RecordingListener { recorder: Arc::clone(&client_recorder) },
        ClientOptions::default().with_name("echo-client"),
    );
    client
        .dial(&addr.to_string(), Duration::from_secs(3))
        .await
        .expect("dial");

    client.send_message("123".to_string());
    client.send_message("456".to_string());
    client.send_message("789".to_string());

    assert!(
        wait_until(Duration::from_secs(5), || client_recorder.message_count() == 3)
            .await,
        "client received {:?}",
        client_recorder.messages()
    );
    assert_eq!(server_recorder.messages(), vec!["123", "456", "789"]);
    assert_eq!(client_recorder.messages(), vec!["123", "456", "789"]);
    // three frames of magic(2) + len(2) + body(3) each
    assert_eq!(
        server_recorder
            .total_bytes
            .load(std::sync::atomic::Ordering::Acquire),
        21
    );

    client.close().expect("client close");
    assert!(wait_until(Duration::from_secs(3), || client_recorder.is_closed()).await);
    server.stop().await.expect("server stop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_malformed_magic_closes_connection() {
    let server_recorder = Arc::new(Recorder::default());
    let server = Server::new(
        "strict-server",
        "tcp://127.0.0.1:0",
        new_length_codec(),
        RecordingListener { recorder: Arc::clone(&server_recorder) },
        ServerOptions::default(),
    )
    .expect("server");
    server.start().await.expect("server start");
    let addr = server.local_addr().expect("bound address");

    let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    stream
        .write_all(&[0xFF, 0xFF, 0x03, 0x00, b'A', b'B', b'C'])
        .await
        .expect("write garbage");

    // the server closes the connection with the decode error as reason
    assert!(wait_until(Duration::from_secs(5), || server_recorder.is_closed()).await);
    let reason = server_recorder.close_reason.lock().clone();
    assert_eq!(reason.as_deref(), Some("invalid magic"));

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(3), stream.read(&mut buf))
        .await
        .expect("peer close deadline")
        .expect("read");
    assert_eq!(read, 0, "expected EOF from the server");

    server.stop().await.expect("server stop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_dial_rejects_wrong_status() {
    let client_recorder = Arc::new(Recorder::default());
    let client = Client::new(
        new_length_codec(),
        RecordingListener { recorder: client_recorder },
        ClientOptions::default(),
    );
    // nobody listens here
    client
        .dial("127.0.0.1:1", Duration::from_secs(1))
        .await
        .expect_err("dial must fail");
    // a failed dial reverts to Initial and may be retried
    client
        .dial("127.0.0.1:1", Duration::from_secs(1))
        .await
        .expect_err("second dial must fail");
}
