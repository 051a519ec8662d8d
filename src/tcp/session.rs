// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{Arc, Weak};

use bytes::Bytes;
use once_cell::sync::OnceCell;
use tracing::{debug, error};

use crate::{
    codec::TransportCodec,
    errors::NetError,
    session::{
        conn::{Conn, WriteCallback},
        context::SessionContext,
        listener::Listener,
        manager::Manager,
        session::{BaseSession, Session},
    },
    tcp::conn::TcpConn,
};

/// Server-side session envelope over an accepted connection.
pub struct ServerSession<M, TC, L>
where
    TC: TransportCodec<M>,
    L: Listener<M>,
{
    base: BaseSession,
    conn: Arc<TcpConn>,
    codec: Arc<TC>,
    listener: Arc<L>,
    manager: Arc<Manager<M>>,
    self_ref: OnceCell<Weak<Self>>,
}

impl<M, TC, L> ServerSession<M, TC, L>
where
    M: Send + Sync + 'static,
    TC: TransportCodec<M>,
    L: Listener<M>,
{
    pub(crate) fn create(
        conn: Arc<TcpConn>,
        codec: Arc<TC>,
        listener: Arc<L>,
        manager: Arc<Manager<M>>,
    ) -> Result<Arc<Self>, NetError> {
        if conn.is_closed().0 {
            return Err(NetError::ClosedConn);
        }
        let session = Arc::new(Self {
            base: BaseSession::new(),
            conn,
            codec,
            listener,
            manager,
            self_ref: OnceCell::new(),
        });
        let _ = session.self_ref.set(Arc::downgrade(&session));
        Ok(session)
    }

    fn self_dyn(&self) -> Option<Arc<dyn Session<M>>> {
        self.self_ref
            .get()
            .and_then(Weak::upgrade)
            .map(|session| session as Arc<dyn Session<M>>)
    }

    fn on_sending_error(&self, tip: &str, err: &NetError) {
        error!(error = %err, conn = self.conn.hash(), "{tip}");
        // unrecoverable send state, drop the connection
        if let Err(close_err) = self.conn.close() {
            error!(error = %close_err, "close conn error");
        }
    }
}

impl<M, TC, L> Session<M> for ServerSession<M, TC, L>
where
    M: Send + Sync + 'static,
    TC: TransportCodec<M>,
    L: Listener<M>,
{
    fn id(&self) -> u64 {
        self.base.id()
    }

    fn context(&self) -> Option<Arc<dyn SessionContext>> {
        self.base.context()
    }

    fn register(&self, context: Arc<dyn SessionContext>) -> Result<(), NetError> {
        let Some(session) = self.self_dyn() else {
            return Err(NetError::NilValue);
        };
        self.manager.register_session(&session, context)
    }

    fn connection(&self) -> Option<Arc<dyn Conn>> {
        Some(Arc::clone(&self.conn) as Arc<dyn Conn>)
    }

    fn close(&self) -> Result<(), NetError> {
        self.conn.close()
    }

    fn is_closed(&self) -> bool {
        self.conn.is_closed().0
    }

    fn send_message(&self, msg: M) {
        if self.conn.is_closed().0 {
            debug!("cant send to closed conn");
            return;
        }
        let data = match self.codec.encode(&msg) {
            Ok(data) => data,
            Err(err) => {
                self.on_sending_error("encode message error", &err);
                return;
            },
        };
        let data_len = data.len();
        let Some(session) = self.self_ref.get().and_then(Weak::upgrade) else {
            return;
        };
        let callback: WriteCallback = Box::new(move |result| match result {
            Err(err) => session.on_sending_error("write message error", &err),
            Ok(()) => {
                if let Err(err) = session.listener.on_send(
                    session.as_ref() as &dyn Session<M>,
                    msg,
                    data_len,
                ) {
                    error!(error = %err, "on send error");
                }
            },
        });
        if let Err(err) = self.conn.async_write(Bytes::from(data), Some(callback)) {
            self.on_sending_error("async write error", &err);
        }
    }

    fn send_messages(&self, msgs: Vec<M>) {
        if self.conn.is_closed().0 {
            debug!("cant send to closed conn");
            return;
        }
        let mut total_len = 0;
        let mut data_arr = Vec::with_capacity(msgs.len());
        for msg in &msgs {
            let data = match self.codec.encode(msg) {
                Ok(data) => data,
                Err(err) => {
                    self.on_sending_error("encode message error", &err);
                    return;
                },
            };
            total_len += data.len();
            data_arr.push(Bytes::from(data));
        }
        let Some(session) = self.self_ref.get().and_then(Weak::upgrade) else {
            return;
        };
        let callback: WriteCallback = Box::new(move |result| match result {
            Err(err) => session.on_sending_error("write messages error", &err),
            Ok(()) => {
                if let Err(err) = session.listener.on_send_multi(
                    session.as_ref() as &dyn Session<M>,
                    msgs,
                    total_len,
                ) {
                    error!(error = %err, "on send multi error");
                }
            },
        });
        if let Err(err) = self.conn.async_writev(data_arr, Some(callback)) {
            self.on_sending_error("async writev error", &err);
        }
    }

    fn serial(&self) -> u64 {
        self.base.serial()
    }

    fn set_context(&self, context: Option<Arc<dyn SessionContext>>) {
        self.base.set_context(context);
    }
}
