// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use tracing::{debug, error, warn};

use crate::{
    codec::{Decoded, FrameReader, TransportCodec, message::MessageCodec},
    errors::NetError,
    session::conn::Conn,
    tcp::conn::TcpConn,
    ws::{
        frame::{self, FrameHeader, Opcode},
        handshake,
    },
};

pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 8 * 1024;

/// Per-connection WebSocket decoder state.
///
/// `cached` accumulates the payloads of non-FIN fragments until the FIN
/// frame completes the message.
#[derive(Default)]
pub struct WsConnState {
    upgraded: bool,
    cur_header: Option<FrameHeader>,
    cached: BytesMut,
}

/// Walk every complete frame buffered on the connection.
///
/// Text/Binary payloads are reassembled and decoded; Ping gets a queued
/// Pong; Close gets a queued Close and asks the owner to close; Pong is
/// ignored; unknown opcodes are logged.
fn walk_frames<M, MC>(
    msg_codec: &MC,
    conn: &TcpConn,
    state: &mut WsConnState,
    max_payload_len: usize,
    mask_replies: bool,
) -> Result<Decoded<M>, NetError>
where
    MC: MessageCodec<M>,
{
    let mut decoded = Decoded::empty();
    loop {
        if state.cur_header.is_none() {
            let mut inbound = conn.inbound_lock();
            let buffered = inbound.buffered();
            if buffered < frame::MIN_HEADER_SIZE {
                break;
            }
            let parsed = match inbound.peek(buffered) {
                Some(buf) => frame::decode_header(buf)?,
                None => break,
            };
            match parsed {
                Some((header, header_len)) => {
                    inbound.discard(header_len)?;
                    state.cur_header = Some(header);
                },
                None => break,
            }
        }
        let Some(header) = state.cur_header else { break };
        if header.payload_len > max_payload_len as u64 {
            return Err(NetError::MessageTooLarge);
        }
        let payload_len = header.payload_len as usize;
        let mut payload = {
            let mut inbound = conn.inbound_lock();
            if inbound.buffered() < payload_len {
                // wait for the rest of the payload
                break;
            }
            if payload_len > 0 {
                let data = match inbound.peek(payload_len) {
                    Some(buf) => buf.to_vec(),
                    None => break,
                };
                inbound.discard(payload_len)?;
                data
            } else {
                Vec::new()
            }
        };
        if let Some(key) = header.mask {
            frame::apply_mask(&mut payload, key);
        }
        let reply_mask = || if mask_replies { Some(handshake::generate_mask()) } else { None };
        match header.opcode {
            Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                state.cached.extend_from_slice(&payload);
                if header.fin {
                    let body = state.cached.split().freeze();
                    decoded.total_len += body.len();
                    match msg_codec.decode(&body) {
                        Ok(msg) => decoded.messages.push(msg),
                        Err(err) => {
                            error!(conn = conn.hash(), error = %err, "decode message error");
                        },
                    }
                } else {
                    debug!(conn = conn.hash(), "data is split into multiple frames");
                }
            },
            Opcode::Close => {
                let reply = frame::encode_frame(Opcode::Close, &[], true, reply_mask());
                let _ = conn.async_write(Bytes::from(reply), None);
                decoded.close = true;
            },
            Opcode::Ping => {
                let reply =
                    frame::encode_frame(Opcode::Pong, &payload, true, reply_mask());
                conn.async_write(Bytes::from(reply), None)?;
            },
            Opcode::Pong => {},
            Opcode::Other(op) => {
                warn!(opcode = op, "unknown ws opcode");
            },
        }
        state.cur_header = None;
        if decoded.close {
            break;
        }
    }
    Ok(decoded)
}

/// Server-side WebSocket transport codec: upgrades on first traffic, then
/// frames binary messages.
pub struct WsServerCodec<M, MC> {
    msg_codec: MC,
    max_payload_len: usize,
    _marker: PhantomData<fn() -> M>,
}

impl<M, MC> WsServerCodec<M, MC>
where MC: MessageCodec<M>
{
    pub fn new(msg_codec: MC) -> Self {
        Self {
            msg_codec,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            _marker: PhantomData,
        }
    }

    pub fn with_max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = len;
        self
    }

    /// Attempt the HTTP upgrade against the currently buffered bytes.
    /// Incomplete requests are deferred, the attempt repeats on the next
    /// traffic event.
    fn try_upgrade(&self, conn: &TcpConn, state: &mut WsConnState) -> Result<bool, NetError> {
        let key = {
            let mut inbound = conn.inbound_lock();
            let buffered = inbound.buffered();
            if buffered == 0 {
                return Ok(false);
            }
            let parsed = match inbound.peek(buffered) {
                Some(buf) => handshake::parse_upgrade_request(buf)?,
                None => return Ok(false),
            };
            match parsed {
                Some((consumed, key)) => {
                    inbound.discard(consumed)?;
                    key
                },
                None => return Ok(false),
            }
        };
        let response = handshake::build_upgrade_response(&key);
        conn.async_write(Bytes::from(response), None)?;
        state.upgraded = true;
        debug!(conn = conn.hash(), "upgraded websocket protocol");
        Ok(true)
    }
}

impl<M, MC> TransportCodec<M> for WsServerCodec<M, MC>
where
    M: Send + 'static,
    MC: MessageCodec<M>,
{
    type ConnState = WsConnState;

    fn encode(&self, msg: &M) -> Result<Vec<u8>, NetError> {
        let body = self.msg_codec.encode(msg)?;
        Ok(frame::encode_frame(Opcode::Binary, &body, true, None))
    }

    fn decode(
        &self,
        conn: &TcpConn,
        state: &mut Self::ConnState,
    ) -> Result<Decoded<M>, NetError> {
        if !state.upgraded && !self.try_upgrade(conn, state)? {
            return Ok(Decoded::empty());
        }
        if conn.inbound_buffered() == 0 {
            return Ok(Decoded::empty());
        }
        walk_frames(&self.msg_codec, conn, state, self.max_payload_len, false)
    }
}

/// Client-side WebSocket transport codec; outbound frames are masked, the
/// upgrade already happened during dial.
pub struct WsClientCodec<M, MC> {
    msg_codec: MC,
    max_payload_len: usize,
    _marker: PhantomData<fn() -> M>,
}

impl<M, MC> WsClientCodec<M, MC>
where MC: MessageCodec<M>
{
    pub fn new(msg_codec: MC) -> Self {
        Self {
            msg_codec,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            _marker: PhantomData,
        }
    }

    pub fn with_max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = len;
        self
    }
}

impl<M, MC> TransportCodec<M> for WsClientCodec<M, MC>
where
    M: Send + 'static,
    MC: MessageCodec<M>,
{
    type ConnState = WsConnState;

    fn encode(&self, msg: &M) -> Result<Vec<u8>, NetError> {
        let body = self.msg_codec.encode(msg)?;
        Ok(frame::encode_frame(
            Opcode::Binary,
            &body,
            true,
            Some(handshake::generate_mask()),
        ))
    }

    fn decode(
        &self,
        conn: &TcpConn,
        state: &mut Self::ConnState,
    ) -> Result<Decoded<M>, NetError> {
        walk_frames(&self.msg_codec, conn, state, self.max_payload_len, true)
    }
}
