// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tracing::{debug, error};

use crate::{
    codec::TransportCodec,
    errors::{NetError, SharedError},
    session::{
        conn::{Conn, WriteCallback},
        context::SessionContext,
        listener::Listener,
        session::{BaseSession, Session},
    },
    tcp::{
        conn::TcpConn,
        eventloop::EventLoop,
        handler::{LoopOwner, SessionLoopHandler},
        options::ClientOptions,
    },
};

pub const STATUS_INITIAL: u32 = 0;
pub const STATUS_CONNECTING: u32 = 1;
pub const STATUS_CONNECTED: u32 = 2;
pub const STATUS_CLOSED: u32 = 3;

/// TCP client; also the client-side session envelope of its single
/// connection.
pub struct Client<M, TC, L>
where
    TC: TransportCodec<M>,
    L: Listener<M>,
{
    options: ClientOptions,
    base: BaseSession,
    status: AtomicU32,
    codec: Arc<TC>,
    listener: Arc<L>,
    conn: RwLock<Option<Arc<TcpConn>>>,
    event_loop: RwLock<Option<Arc<EventLoop>>>,
    self_ref: OnceCell<Weak<Self>>,
}

impl<M, TC, L> Client<M, TC, L>
where
    M: Send + Sync + 'static,
    TC: TransportCodec<M>,
    L: Listener<M>,
{
    pub fn new(codec: TC, listener: L, options: ClientOptions) -> Arc<Self> {
        let client = Arc::new(Self {
            options,
            base: BaseSession::new(),
            status: AtomicU32::new(STATUS_INITIAL),
            codec: Arc::new(codec),
            listener: Arc::new(listener),
            conn: RwLock::new(None),
            event_loop: RwLock::new(None),
            self_ref: OnceCell::new(),
        });
        let _ = client.self_ref.set(Arc::downgrade(&client));
        client
    }

    pub fn status(&self) -> u32 {
        self.status.load(Ordering::Acquire)
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn connection(&self) -> Option<Arc<TcpConn>> {
        self.conn.read().clone()
    }

    /// Connect to `host:port` and start the event loop.
    pub async fn dial(&self, address: &str, timeout: Duration) -> Result<(), NetError> {
        self.begin_dial()?;
        match self.dial_inner(address, timeout).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.fail_dial();
                Err(err)
            },
        }
    }

    async fn dial_inner(&self, address: &str, timeout: Duration) -> Result<(), NetError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| NetError::other("dial timeout"))??;
        self.attach_stream(stream, None)
    }

    /// CAS Initial -> Connecting; any dial failure reverts with
    /// `fail_dial`.
    pub(crate) fn begin_dial(&self) -> Result<(), NetError> {
        self.status
            .compare_exchange(
                STATUS_INITIAL,
                STATUS_CONNECTING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|_| NetError::InvalidStatus)
    }

    pub(crate) fn fail_dial(&self) {
        *self.conn.write() = None;
        *self.event_loop.write() = None;
        self.status.store(STATUS_INITIAL, Ordering::Release);
    }

    /// Wrap an established stream into the connection + event loop pair.
    /// `preload` carries bytes that arrived together with a handshake
    /// response and belong to the byte stream proper.
    pub(crate) fn attach_stream(
        &self,
        stream: TcpStream,
        preload: Option<Bytes>,
    ) -> Result<(), NetError> {
        let Some(self_arc) = self.self_ref.get().and_then(Weak::upgrade) else {
            return Err(NetError::NilValue);
        };
        let (conn, read_half, write_half) = TcpConn::init(
            stream,
            &self.options.socket,
            self.options.write_buffer_cap,
            true,
        )?;
        if let Some(preload) = preload
            && !preload.is_empty()
        {
            conn.inbound_lock().write(&preload);
        }
        conn.set_context(Some(
            Arc::clone(&self_arc) as Arc<dyn std::any::Any + Send + Sync>
        ));
        *self.conn.write() = Some(Arc::clone(&conn));
        self.status.store(STATUS_CONNECTED, Ordering::Release);

        let handler = SessionLoopHandler::new(
            Arc::clone(&conn),
            Arc::clone(&self.codec),
            Arc::clone(&self.listener),
            Arc::clone(&self_arc) as Arc<dyn LoopOwner>,
            true,
            None,
        );
        handler.set_session(self_arc as Arc<dyn Session<M>>);
        let event_loop = EventLoop::start(
            conn,
            read_half,
            write_half,
            Arc::new(handler),
            self.options.read_buffer_cap,
            self.options.write_queue_cap,
        );
        *self.event_loop.write() = Some(event_loop);
        Ok(())
    }

    /// Graceful close bounded by `timeout`; the orderly path runs on the
    /// loop task.
    pub async fn close_with_deadline(&self, timeout: Duration) -> Result<(), NetError> {
        if self.status() == STATUS_CLOSED {
            return Err(NetError::ClosedClient);
        }
        let event_loop = self.event_loop.read().clone();
        match event_loop {
            Some(event_loop) => {
                match tokio::time::timeout(timeout, event_loop.stop(None)).await {
                    Ok(res) => res,
                    Err(_) => Ok(()),
                }
            },
            None => Err(NetError::ClosedClient),
        }
    }

    fn on_sending_error(&self, tip: &str, err: &NetError) {
        error!(name = %self.options.name, error = %err, "{tip}");
        // unrecoverable send state, drop the connection
        if let Err(close_err) = Session::close(self) {
            error!(error = %close_err, "close conn error");
        }
    }
}

impl<M, TC, L> LoopOwner for Client<M, TC, L>
where
    M: Send + Sync + 'static,
    TC: TransportCodec<M>,
    L: Listener<M>,
{
    fn owner_to_closed(&self, reason: Option<SharedError>) -> bool {
        if self
            .status
            .compare_exchange(
                STATUS_CONNECTED,
                STATUS_CLOSED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            match &reason {
                Some(err) => {
                    error!(name = %self.options.name, reason = %err, "close client");
                },
                None => debug!(name = %self.options.name, "close client"),
            }
            if let Some(conn) = self.conn.read().as_ref() {
                conn.to_closed(reason);
            }
            // the loop keeps itself alive until its tasks exit; dropping
            // our handle breaks the ownership cycle through the handler
            *self.event_loop.write() = None;
            true
        } else {
            false
        }
    }

    fn is_owner_closed(&self) -> bool {
        self.status.load(Ordering::Acquire) != STATUS_CONNECTED
    }
}

impl<M, TC, L> Session<M> for Client<M, TC, L>
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
        if self.base.context().is_some() {
            return Err(NetError::RegisteredSession);
        }
        self.base.set_context(Some(context));
        Ok(())
    }

    fn connection(&self) -> Option<Arc<dyn Conn>> {
        self.conn
            .read()
            .as_ref()
            .map(|conn| Arc::clone(conn) as Arc<dyn Conn>)
    }

    fn close(&self) -> Result<(), NetError> {
        if self.status() == STATUS_CLOSED {
            return Err(NetError::ClosedClient);
        }
        match self.conn.read().as_ref() {
            Some(conn) => conn.close(),
            None => Err(NetError::ClosedClient),
        }
    }

    fn is_closed(&self) -> bool {
        self.status.load(Ordering::Acquire) != STATUS_CONNECTED
    }

    fn send_message(&self, msg: M) {
        if self.status() != STATUS_CONNECTED {
            error!(name = %self.options.name, "connect first");
            return;
        }
        let data = match self.codec.encode(&msg) {
            Ok(data) => data,
            Err(err) => {
                error!(error = %err, "encode message error");
                return;
            },
        };
        let data_len = data.len();
        let Some(client) = self.self_ref.get().and_then(Weak::upgrade) else {
            return;
        };
        let conn = self.conn.read().clone();
        let Some(conn) = conn else { return };
        let callback: WriteCallback = Box::new(move |result| match result {
            Err(err) => client.on_sending_error("write message error", &err),
            Ok(()) => {
                if let Err(err) = client.listener.on_send(
                    client.as_ref() as &dyn Session<M>,
                    msg,
                    data_len,
                ) {
                    error!(error = %err, "on send error");
                }
            },
        });
        if let Err(err) = conn.async_write(Bytes::from(data), Some(callback)) {
            error!(error = %err, "async write error");
        }
    }

    fn send_messages(&self, msgs: Vec<M>) {
        if self.status() != STATUS_CONNECTED {
            error!(name = %self.options.name, "connect first");
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
        let Some(client) = self.self_ref.get().and_then(Weak::upgrade) else {
            return;
        };
        let conn = self.conn.read().clone();
        let Some(conn) = conn else { return };
        let callback: WriteCallback = Box::new(move |result| match result {
            Err(err) => client.on_sending_error("write messages error", &err),
            Ok(()) => {
                if let Err(err) = client.listener.on_send_multi(
                    client.as_ref() as &dyn Session<M>,
                    msgs,
                    total_len,
                ) {
                    error!(error = %err, "on send multi error");
                }
            },
        });
        if let Err(err) = conn.async_writev(data_arr, Some(callback)) {
            error!(error = %err, "async writev error");
        }
    }

    fn serial(&self) -> u64 {
        self.base.serial()
    }

    fn set_context(&self, context: Option<Arc<dyn SessionContext>>) {
        self.base.set_context(context);
    }
}
