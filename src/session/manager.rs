// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, error, warn};

use crate::{
    errors::NetError,
    session::session::{INVALID_SESSION_ID, Session},
};

/// Tracks the live sessions of one server.
///
/// Two disjoint tables: unregistered sessions keyed by their serial with an
/// absolute expiration, registered sessions keyed by their context id. A
/// session appears in at most one table at a time.
pub struct Manager<M> {
    name: String,
    unregister_session_life: i64,

    unregister_sessions: DashMap<u64, (Arc<dyn Session<M>>, i64)>,
    register_sessions: DashMap<u64, Arc<dyn Session<M>>>,
}

impl<M> Manager<M> {
    pub fn new(name: &str, unregister_session_life: i64) -> Result<Self, NetError> {
        if unregister_session_life <= 0 {
            return Err(NetError::InvalidParams);
        }
        Ok(Self {
            name: name.to_string(),
            unregister_session_life,
            unregister_sessions: DashMap::new(),
            register_sessions: DashMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a freshly opened session to the unregistered table.
    ///
    /// A new session arriving with a context is an anomalous path: stale
    /// contexts are cleared, fully registered sessions are left alone.
    pub fn add_session(&self, session: Arc<dyn Session<M>>) -> Result<(), NetError> {
        if session.context().is_some() {
            warn!("a new session has one context???");
            let session_id = session.id();
            if session_id == INVALID_SESSION_ID {
                warn!("id of session with context is invalid");
                session.set_context(None);
            } else if !self.register_sessions.contains_key(&session_id) {
                warn!("session with context is not in register sessions");
                session.set_context(None);
            } else {
                warn!("session with context is already in register sessions");
                return Ok(());
            }
        }
        let expire_at = Utc::now().timestamp() + self.unregister_session_life;
        self.unregister_sessions
            .insert(session.serial(), (session, expire_at));
        Ok(())
    }

    /// Remove a session from whichever table currently holds it.
    ///
    /// Removal by id is identity-guarded: the close event of a session
    /// replaced under its id must not evict the replacement.
    pub fn remove_session(&self, session: &dyn Session<M>) {
        if session.context().is_none() {
            self.unregister_sessions.remove(&session.serial());
        } else {
            let session_id = session.id();
            if session_id != INVALID_SESSION_ID {
                self.register_sessions.remove_if(&session_id, |_, current| {
                    current.serial() == session.serial()
                });
            }
        }
    }

    /// Promote a session to the registered table under its context id.
    ///
    /// A prior session occupying the same id is closed first; it leaves the
    /// table when its connection close event fires.
    pub fn register_session(
        &self,
        session: &Arc<dyn Session<M>>,
        context: Arc<dyn crate::session::context::SessionContext>,
    ) -> Result<(), NetError> {
        if session.context().is_some() {
            return Err(NetError::RegisteredSession);
        }
        session.set_context(Some(context));
        if self.unregister_sessions.remove(&session.serial()).is_none() {
            error!("cant find session in unregister sessions");
        }
        let session_id = session.id();
        if session_id == INVALID_SESSION_ID {
            return Err(NetError::InvalidSessionId);
        }
        if let Some(old_session) = self
            .register_sessions
            .insert(session_id, Arc::clone(session))
        {
            if let Err(err) = old_session.close() {
                error!(error = %err, "close session error");
            }
        }
        Ok(())
    }

    /// Look up a registered session; unregistered sessions are invisible.
    pub fn get_session(&self, session_id: u64) -> Option<Arc<dyn Session<M>>> {
        self.register_sessions
            .get(&session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn unregistered_len(&self) -> usize {
        self.unregister_sessions.len()
    }

    pub fn registered_len(&self) -> usize {
        self.register_sessions.len()
    }

    /// Evict expired unregistered sessions and dead registered ones.
    /// Invoked on the server tick cadence.
    pub fn check_sessions(&self) {
        self.check_unregistered_sessions();
        self.check_registered_sessions();
    }

    fn check_unregistered_sessions(&self) {
        let now = Utc::now().timestamp();
        let mut expired = Vec::new();
        self.unregister_sessions.retain(|_, (session, expire_at)| {
            if *expire_at <= now {
                expired.push(Arc::clone(session));
                false
            } else {
                true
            }
        });
        for session in expired {
            debug!(
                manager = %self.name,
                conn = session.connection().map_or(0, |conn| conn.hash()),
                "unregistered session has expired"
            );
            if let Err(err) = session.close() {
                error!(error = %err, "close session error");
            }
        }
    }

    fn check_registered_sessions(&self) {
        let now = Utc::now().timestamp();
        let mut dead = Vec::new();
        for entry in self.register_sessions.iter() {
            let session = entry.value();
            let ctx = session.context();
            if ctx.is_none() {
                error!("nil context in registered sessions");
            }
            if ctx.is_none_or(|ctx| now >= ctx.deadline()) {
                dead.push((*entry.key(), Arc::clone(session)));
            }
        }
        for (session_id, session) in dead {
            debug!(manager = %self.name, id = session_id, "registered session has expired");
            if session.is_closed() {
                self.register_sessions.remove(&session_id);
            } else if let Err(err) = session.close() {
                // removal happens on the connection close callback
                error!(error = %err, "close deadline session error");
            }
        }
    }

    /// Close every tracked session; used by server shutdown.
    pub fn close_all(&self) {
        for entry in self.unregister_sessions.iter() {
            let (session, _) = entry.value();
            let _ = session.close();
        }
        for entry in self.register_sessions.iter() {
            let _ = entry.value().close();
        }
    }
}
