// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    net::SocketAddr,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use once_cell::sync::OnceCell;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{
    codec::TransportCodec,
    errors::NetError,
    session::{conn::Conn, listener::Listener, manager::Manager, session::Session},
    tcp::{
        conn::TcpConn,
        eventloop::EventLoop,
        handler::{LoopOwner, SessionLoopHandler},
        options::ServerOptions,
        session::ServerSession,
    },
    utils::network::{PROTO_TCP, complete_address, split_proto_address},
};

/// Session-oriented server over an accept loop.
///
/// Every accepted connection gets wrapped in a [`ServerSession`], tracked
/// by the manager as unregistered, and pumped by its own event loop. A
/// ticker runs the manager sweep on `check_session_interval_secs`.
pub struct Server<M, TC, L>
where
    TC: TransportCodec<M>,
    L: Listener<M>,
{
    name: String,
    proto_addr: String,
    options: ServerOptions,
    codec: Arc<TC>,
    listener: Arc<L>,
    manager: Arc<Manager<M>>,
    cancel: CancellationToken,
    started: AtomicBool,
    closed: AtomicBool,
    local_addr: OnceCell<SocketAddr>,
    self_ref: OnceCell<Weak<Self>>,
}

impl<M, TC, L> Server<M, TC, L>
where
    M: Send + Sync + 'static,
    TC: TransportCodec<M>,
    L: Listener<M>,
{
    pub fn new(
        name: &str,
        proto_addr: &str,
        codec: TC,
        listener: L,
        options: ServerOptions,
    ) -> Result<Arc<Self>, NetError> {
        Self::with_proto(PROTO_TCP, name, proto_addr, codec, listener, options)
    }

    pub(crate) fn with_proto(
        proto: &str,
        name: &str,
        proto_addr: &str,
        codec: TC,
        listener: L,
        options: ServerOptions,
    ) -> Result<Arc<Self>, NetError> {
        let proto_addr = complete_address(proto_addr, proto)?;
        let manager = Manager::new(name, options.unregister_session_life)?;
        let server = Arc::new(Self {
            name: name.to_string(),
            proto_addr,
            options,
            codec: Arc::new(codec),
            listener: Arc::new(listener),
            manager: Arc::new(manager),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            local_addr: OnceCell::new(),
            self_ref: OnceCell::new(),
        });
        let _ = server.self_ref.set(Arc::downgrade(&server));
        Ok(server)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manager(&self) -> &Arc<Manager<M>> {
        &self.manager
    }

    /// Bound address, available after a successful `start`. Useful when
    /// the configured port was 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Launch the accept engine; returns once it reports ready or the
    /// start timeout elapses.
    pub async fn start(&self) -> Result<(), NetError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(NetError::InvalidStatus);
        }
        let Some(server) = self.self_ref.get().and_then(Weak::upgrade) else {
            return Err(NetError::NilValue);
        };
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(async move {
            server.run_engine(ready_tx).await;
        });
        let start_timeout = Duration::from_secs(self.options.start_timeout_secs.max(1));
        match tokio::time::timeout(start_timeout, ready_rx).await {
            Ok(Ok(Ok(addr))) => {
                let _ = self.local_addr.set(addr);
                Ok(())
            },
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(NetError::other("server engine dropped before ready")),
            Err(_) => Err(NetError::other("server start timeout")),
        }
    }

    /// Idempotent shutdown: stops accepting and closes every tracked
    /// session.
    pub async fn stop(&self) -> Result<(), NetError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();
        self.manager.close_all();
        Ok(())
    }

    async fn run_engine(
        self: Arc<Self>,
        ready_tx: oneshot::Sender<Result<SocketAddr, NetError>>,
    ) {
        let bind_addr = match split_proto_address(&self.proto_addr) {
            Ok((_, addr)) => addr.to_string(),
            Err(err) => {
                let _ = ready_tx.send(Err(err));
                return;
            },
        };
        let tcp_listener = match TcpListener::bind(&bind_addr).await {
            Ok(tcp_listener) => tcp_listener,
            Err(err) => {
                let _ = ready_tx.send(Err(NetError::Io(err)));
                return;
            },
        };
        let local_addr = match tcp_listener.local_addr() {
            Ok(addr) => addr,
            Err(err) => {
                let _ = ready_tx.send(Err(NetError::Io(err)));
                return;
            },
        };
        let _ = ready_tx.send(Ok(local_addr));

        let ticker = Arc::clone(&self);
        tokio::spawn(async move {
            ticker.run_ticker().await;
        });

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                accepted = tcp_listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        if let Err(err) = self.on_open(stream) {
                            error!(server = %self.name, error = %err, "open connection error");
                        }
                    },
                    Err(err) => {
                        error!(server = %self.name, error = %err, "accept error");
                    },
                },
            }
        }
    }

    fn on_open(&self, stream: TcpStream) -> Result<(), NetError> {
        let (conn, read_half, write_half) = TcpConn::init(
            stream,
            &self.options.socket,
            self.options.write_buffer_cap,
            false,
        )?;
        let session = ServerSession::create(
            Arc::clone(&conn),
            Arc::clone(&self.codec),
            Arc::clone(&self.listener),
            Arc::clone(&self.manager),
        )?;
        conn.set_context(Some(
            Arc::clone(&session) as Arc<dyn std::any::Any + Send + Sync>
        ));
        let session_dyn: Arc<dyn Session<M>> = session;
        debug!(server = %self.name, conn = conn.hash(), "open connecting");
        self.manager.add_session(Arc::clone(&session_dyn))?;
        self.listener.on_opened(session_dyn.as_ref());

        let manager = Arc::clone(&self.manager);
        let server_name = self.name.clone();
        let conn_hash = conn.hash();
        let handler = SessionLoopHandler::new(
            Arc::clone(&conn),
            Arc::clone(&self.codec),
            Arc::clone(&self.listener),
            Arc::clone(&conn) as Arc<dyn LoopOwner>,
            false,
            Some(Box::new(move |session, _reason| {
                manager.remove_session(session.as_ref());
                debug!(server = %server_name, conn = conn_hash, "close connecting");
            })),
        );
        handler.set_session(session_dyn);
        EventLoop::start(
            conn,
            read_half,
            write_half,
            Arc::new(handler),
            self.options.read_buffer_cap,
            self.options.write_queue_cap,
        );
        Ok(())
    }

    async fn run_ticker(self: Arc<Self>) {
        let interval =
            Duration::from_secs(self.options.check_session_interval_secs.max(1));
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => self.manager.check_sessions(),
            }
        }
    }
}
