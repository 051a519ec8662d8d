// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// WebSocket client constructor and handshake dial.
pub mod client;
/// Transport codecs walking the RFC 6455 frame stream.
pub mod codec;
/// RFC 6455 frame header encode/decode and masking.
pub mod frame;
/// HTTP upgrade handshake pieces.
pub mod handshake;
/// WebSocket server constructor.
pub mod server;

pub use client::WsClient;
pub use codec::{WsClientCodec, WsServerCodec};
pub use server::WsServer;
