// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::RwLock;
use tracing::error;

use crate::{
    errors::NetError,
    session::{conn::Conn, context::SessionContext},
};

/// Id of every session without a registered context.
pub const INVALID_SESSION_ID: u64 = 0;

static SESSION_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique session serial. The serial is the identity
/// key of the unregistered table; the context id only exists after
/// registration.
pub(crate) fn next_session_serial() -> u64 {
    SESSION_SERIAL.fetch_add(1, Ordering::Relaxed)
}

/// An identity envelope over a connection.
///
/// A session is registered iff it carries a context with a non-zero id;
/// unregistered sessions have a bounded lifetime enforced by the manager.
pub trait Session<M>: Send + Sync {
    /// `INVALID_SESSION_ID` unless a context is registered.
    fn id(&self) -> u64;

    fn context(&self) -> Option<Arc<dyn SessionContext>>;

    /// Associate a domain context; fails with
    /// [`NetError::RegisteredSession`] when one is already attached.
    fn register(&self, context: Arc<dyn SessionContext>) -> Result<(), NetError>;

    /// `None` only for client-side sessions that have not dialed yet.
    fn connection(&self) -> Option<Arc<dyn Conn>>;

    fn close(&self) -> Result<(), NetError>;

    fn is_closed(&self) -> bool;

    fn send_message(&self, msg: M);

    fn send_messages(&self, msgs: Vec<M>);

    /// Process-unique identity used as the unregistered-table key.
    #[doc(hidden)]
    fn serial(&self) -> u64;

    /// Manager-internal context mutation.
    #[doc(hidden)]
    fn set_context(&self, context: Option<Arc<dyn SessionContext>>);
}

/// Shared context slot of every session implementation.
pub struct BaseSession {
    serial: u64,
    context: RwLock<Option<Arc<dyn SessionContext>>>,
}

impl Default for BaseSession {
    fn default() -> Self {
        Self::new()
    }
}

impl BaseSession {
    pub fn new() -> Self {
        Self { serial: next_session_serial(), context: RwLock::new(None) }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn id(&self) -> u64 {
        self.context
            .read()
            .as_ref()
            .map_or(INVALID_SESSION_ID, |ctx| ctx.id())
    }

    pub fn context(&self) -> Option<Arc<dyn SessionContext>> {
        self.context.read().clone()
    }

    pub fn set_context(&self, context: Option<Arc<dyn SessionContext>>) {
        let mut slot = self.context.write();
        if context.is_some() && slot.is_some() {
            error!("set session context again?");
            return;
        }
        *slot = context;
    }
}
