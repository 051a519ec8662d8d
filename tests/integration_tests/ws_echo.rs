// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use caracal_net::{
    codec::message::TextCodec,
    session::Session,
    tcp::{ClientOptions, ServerOptions},
    ws::{
        WsClient, WsServer,
        frame::{self, FrameHeader, Opcode},
        handshake,
    },
};
use serial_test::serial;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::integration_tests::common::{EchoListener, Recorder, RecordingListener, wait_until};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_ws_echo() {
    let server_recorder = Arc::new(Recorder::default());
    let server = WsServer::new_ws(
        "ws-echo-server",
        "ws://127.0.0.1:0",
        TextCodec,
        EchoListener { recorder: Arc::clone(&server_recorder) },
        ServerOptions::default(),
    )
    .expect("server");
    server.start().await.expect("server start");
    let addr = server.local_addr().expect("bound address");

    let client_recorder = Arc::new(Recorder::default());
    let client = WsClient::new_ws(
        TextCodec,
        RecordingListener { recorder: Arc::clone(&client_recorder) },
        ClientOptions::default().with_name("ws-echo-client"),
    );
    client
        .dial_ws(&format!("ws://{addr}/"), Duration::from_secs(3))
        .await
        .expect("dial");

    client.send_message("hello over ws".to_string());
    assert!(
        wait_until(Duration::from_secs(5), || client_recorder.message_count() == 1)
            .await,
        "client received {:?}",
        client_recorder.messages()
    );
    assert_eq!(client_recorder.messages(), vec!["hello over ws"]);
    assert_eq!(server_recorder.messages(), vec!["hello over ws"]);

    client.close().expect("client close");
    server.stop().await.expect("server stop");
}

/// Drive the server with a raw socket: handshake, fragmented message,
/// ping.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_ws_fragmentation_and_ping() {
    let server_recorder = Arc::new(Recorder::default());
    let server = WsServer::new_ws(
        "ws-frag-server",
        "ws://127.0.0.1:0",
        TextCodec,
        EchoListener { recorder: Arc::clone(&server_recorder) },
        ServerOptions::default(),
    )
    .expect("server");
    server.start().await.expect("server start");
    let addr = server.local_addr().expect("bound address");

    let mut stream = TcpStream::connect(addr).await.expect("connect");

    // upgrade by hand
    let key = handshake::generate_key();
    let request =
        handshake::build_upgrade_request(&addr.to_string(), "/", &key);
    stream.write_all(request.as_bytes()).await.expect("send upgrade");
    let mut response = Vec::new();
    let mut chunk = [0u8; 512];
    let leftover = loop {
        let read = stream.read(&mut chunk).await.expect("read upgrade");
        assert!(read > 0, "server closed during handshake");
        response.extend_from_slice(&chunk[..read]);
        if let Some(consumed) =
            handshake::parse_upgrade_response(&response, &key).expect("valid response")
        {
            break response[consumed..].to_vec();
        }
    };
    assert!(leftover.is_empty());

    // a text message split over two frames
    let mask = handshake::generate_mask();
    let first = frame::encode_frame(Opcode::Text, b"he", false, Some(mask));
    stream.write_all(&first).await.expect("send first fragment");
    let mask = handshake::generate_mask();
    let second = frame::encode_frame(Opcode::Continuation, b"llo", true, Some(mask));
    stream.write_all(&second).await.expect("send final fragment");

    // the reassembled message is echoed as one binary frame
    let (header, payload) = read_frame(&mut stream).await;
    assert_eq!(header.opcode, Opcode::Binary);
    assert!(header.fin);
    assert_eq!(payload, b"hello");
    assert!(
        wait_until(Duration::from_secs(3), || {
            server_recorder.messages() == vec!["hello".to_string()]
        })
        .await
    );

    // ping is answered with a pong carrying the same payload
    let mask = handshake::generate_mask();
    let ping = frame::encode_frame(Opcode::Ping, b"p1", true, Some(mask));
    stream.write_all(&ping).await.expect("send ping");
    let (header, payload) = read_frame(&mut stream).await;
    assert_eq!(header.opcode, Opcode::Pong);
    assert_eq!(payload, b"p1");

    server.stop().await.expect("server stop");
}

async fn read_frame(stream: &mut TcpStream) -> (FrameHeader, Vec<u8>) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        if let Some((header, header_len)) =
            frame::decode_header(&buffer).expect("valid frame header")
        {
            let total = header_len + header.payload_len as usize;
            if buffer.len() >= total {
                let mut payload = buffer[header_len..total].to_vec();
                if let Some(key) = header.mask {
                    frame::apply_mask(&mut payload, key);
                }
                return (header, payload);
            }
        }
        let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk))
            .await
            .expect("frame deadline")
            .expect("read frame");
        assert!(read > 0, "peer closed while reading a frame");
        buffer.extend_from_slice(&chunk[..read]);
    }
}
