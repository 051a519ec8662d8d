// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::error;

use crate::{
    codec::TransportCodec,
    errors::{NetError, SharedError},
    session::{listener::Listener, session::Session},
    tcp::{
        conn::TcpConn,
        eventloop::{Action, LoopHandler},
    },
};

/// Which object holds the authoritative closed flag of a loop.
///
/// Server-side it is the connection; client-side the client status word,
/// which also mirrors into the connection flag.
pub(crate) trait LoopOwner: Send + Sync + 'static {
    fn owner_to_closed(&self, reason: Option<SharedError>) -> bool;
    fn is_owner_closed(&self) -> bool;
}

impl LoopOwner for TcpConn {
    fn owner_to_closed(&self, reason: Option<SharedError>) -> bool {
        crate::session::conn::Conn::to_closed(self, reason)
    }

    fn is_owner_closed(&self) -> bool {
        crate::session::conn::Conn::is_closed(self).0
    }
}

type CloseHook<M> =
    Box<dyn Fn(&Arc<dyn Session<M>>, Option<SharedError>) + Send + Sync>;

/// Binds codec, listener and session to one connection's event loop.
pub(crate) struct SessionLoopHandler<M, TC, L>
where
    TC: TransportCodec<M>,
    L: Listener<M>,
{
    conn: Arc<TcpConn>,
    codec: Arc<TC>,
    listener: Arc<L>,
    owner: Arc<dyn LoopOwner>,
    session: OnceCell<Arc<dyn Session<M>>>,
    state: Mutex<TC::ConnState>,
    /// Notify `on_opened` from the loop itself (client side); servers
    /// already did it at accept time.
    notify_open: bool,
    close_hook: Option<CloseHook<M>>,
}

impl<M, TC, L> SessionLoopHandler<M, TC, L>
where
    M: Send + 'static,
    TC: TransportCodec<M>,
    L: Listener<M>,
{
    pub(crate) fn new(
        conn: Arc<TcpConn>,
        codec: Arc<TC>,
        listener: Arc<L>,
        owner: Arc<dyn LoopOwner>,
        notify_open: bool,
        close_hook: Option<CloseHook<M>>,
    ) -> Self {
        Self {
            conn,
            codec,
            listener,
            owner,
            session: OnceCell::new(),
            state: Mutex::new(TC::ConnState::default()),
            notify_open,
            close_hook,
        }
    }

    pub(crate) fn set_session(&self, session: Arc<dyn Session<M>>) {
        let _ = self.session.set(session);
    }
}

impl<M, TC, L> LoopHandler for SessionLoopHandler<M, TC, L>
where
    M: Send + 'static,
    TC: TransportCodec<M>,
    L: Listener<M>,
{
    fn on_open(&self) -> Action {
        if self.notify_open
            && let Some(session) = self.session.get()
        {
            self.listener.on_opened(session.as_ref());
        }
        Action::None
    }

    fn on_traffic(&self) -> Result<Action, NetError> {
        let decoded = {
            let mut state = self.state.lock();
            self.codec.decode(&self.conn, &mut state)?
        };
        let Some(session) = self.session.get() else {
            return Ok(Action::None);
        };
        let msg_num = decoded.messages.len();
        if msg_num > 1 {
            if let Err(err) = self.listener.on_receive_multi(
                session.as_ref(),
                decoded.messages,
                decoded.total_len,
            ) {
                error!(error = %err, "on receive multi error");
            }
        } else if msg_num == 1 {
            let mut messages = decoded.messages;
            if let Some(msg) = messages.pop()
                && let Err(err) =
                    self.listener
                        .on_receive(session.as_ref(), msg, decoded.total_len)
            {
                error!(error = %err, "on receive error");
            }
        }
        Ok(if decoded.close { Action::Close } else { Action::None })
    }

    fn on_close(&self, reason: Option<SharedError>) {
        if let Some(session) = self.session.get() {
            if let Some(hook) = &self.close_hook {
                hook(session, reason);
            }
            self.listener.on_closed(session.as_ref());
        }
    }

    fn owner_to_closed(&self, reason: Option<SharedError>) -> bool {
        self.owner.owner_to_closed(reason)
    }

    fn is_owner_closed(&self) -> bool {
        self.owner.is_owner_closed()
    }
}
