// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// TCP client.
pub mod client;
/// Connection state and buffers.
pub mod conn;
/// Per-connection event loop.
pub mod eventloop;
/// Loop handler binding codec, listener and session together.
pub(crate) mod handler;
/// Client and server tuning knobs.
pub mod options;
/// TCP server.
pub mod server;
/// Server-side session envelope.
pub mod session;

pub use client::{
    Client, STATUS_CLOSED, STATUS_CONNECTED, STATUS_CONNECTING, STATUS_INITIAL,
};
pub use conn::TcpConn;
pub use options::{ClientOptions, ServerOptions, SocketOptions};
pub use server::Server;
pub use session::ServerSession;
