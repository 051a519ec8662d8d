// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use crate::{
    codec::message::MessageCodec,
    errors::NetError,
    session::listener::Listener,
    tcp::{options::ServerOptions, server::Server},
    utils::network::PROTO_WEBSOCKET,
    ws::codec::WsServerCodec,
};

/// WebSocket server: the TCP server with the upgrade-aware frame codec.
pub type WsServer<M, MC, L> = Server<M, WsServerCodec<M, MC>, L>;

impl<M, MC, L> Server<M, WsServerCodec<M, MC>, L>
where
    M: Send + Sync + 'static,
    MC: MessageCodec<M>,
    L: Listener<M>,
{
    /// `proto_addr` is `ws://host:port` (the prefix may be omitted).
    pub fn new_ws(
        name: &str,
        proto_addr: &str,
        msg_codec: MC,
        listener: L,
        options: ServerOptions,
    ) -> Result<Arc<Self>, NetError> {
        Self::with_proto(
            PROTO_WEBSOCKET,
            name,
            proto_addr,
            WsServerCodec::new(msg_codec),
            listener,
            options,
        )
    }
}
