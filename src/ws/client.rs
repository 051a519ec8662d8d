// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::{
    codec::message::MessageCodec,
    errors::NetError,
    session::listener::Listener,
    tcp::{client::Client, options::ClientOptions},
    utils::network::{PROTO_WEBSOCKET, split_proto_address},
    ws::{codec::WsClientCodec, handshake},
};

const MAX_HANDSHAKE_RESPONSE: usize = 8 * 1024;

/// WebSocket client: the TCP client with masked framing and an HTTP
/// upgrade performed during dial.
pub type WsClient<M, MC, L> = Client<M, WsClientCodec<M, MC>, L>;

impl<M, MC, L> Client<M, WsClientCodec<M, MC>, L>
where
    M: Send + Sync + 'static,
    MC: MessageCodec<M>,
    L: Listener<M>,
{
    pub fn new_ws(msg_codec: MC, listener: L, options: ClientOptions) -> Arc<Self> {
        Self::new(WsClientCodec::new(msg_codec), listener, options)
    }

    /// Dial `ws://host:port/path`, run the upgrade handshake, then start
    /// the event loop over the framed stream.
    pub async fn dial_ws(&self, url: &str, timeout: Duration) -> Result<(), NetError> {
        self.begin_dial()?;
        match self.dial_ws_inner(url, timeout).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.fail_dial();
                Err(err)
            },
        }
    }

    async fn dial_ws_inner(&self, url: &str, timeout: Duration) -> Result<(), NetError> {
        let (proto, rest) = split_proto_address(url)?;
        if proto != PROTO_WEBSOCKET {
            return Err(NetError::other(format!("invalid websocket url: {url}")));
        }
        let (host, path) = match rest.find('/') {
            Some(index) => (&rest[..index], &rest[index..]),
            None => (rest, "/"),
        };
        let (stream, preload) = tokio::time::timeout(timeout, async {
            let mut stream = TcpStream::connect(host).await?;
            let preload = upgrade(&mut stream, host, path).await?;
            Ok::<_, NetError>((stream, preload))
        })
        .await
        .map_err(|_| NetError::other("ws dial timeout"))??;
        self.attach_stream(stream, Some(preload))
    }
}

/// Send the upgrade request and read + validate the 101 response. Bytes
/// past the response already belong to the frame stream and are returned
/// as preload.
async fn upgrade(
    stream: &mut TcpStream,
    host: &str,
    path: &str,
) -> Result<Bytes, NetError> {
    let key = handshake::generate_key();
    let request = handshake::build_upgrade_request(host, path, &key);
    stream.write_all(request.as_bytes()).await?;

    let mut response = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(NetError::other("connection closed during ws handshake"));
        }
        response.extend_from_slice(&chunk[..n]);
        if let Some(consumed) = handshake::parse_upgrade_response(&response, &key)? {
            return Ok(Bytes::copy_from_slice(&response[consumed..]));
        }
        if response.len() > MAX_HANDSHAKE_RESPONSE {
            return Err(NetError::other("oversized ws handshake response"));
        }
    }
}
