// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::{errors::NetError, session::session::Session};

/// Session event listener.
///
/// For a single connection `on_receive` calls are strictly serial;
/// `on_opened` happens-before the first receive and `on_closed`
/// happens-after the last one. Returned errors are logged by the caller
/// and do not by themselves close the connection.
pub trait Listener<M>: Send + Sync + 'static {
    fn on_opened(&self, session: &dyn Session<M>);

    fn on_closed(&self, session: &dyn Session<M>);

    fn on_receive(
        &self,
        session: &dyn Session<M>,
        msg: M,
        msg_len: usize,
    ) -> Result<(), NetError>;

    fn on_receive_multi(
        &self,
        session: &dyn Session<M>,
        msgs: Vec<M>,
        total_len: usize,
    ) -> Result<(), NetError>;

    fn on_send(
        &self,
        session: &dyn Session<M>,
        msg: M,
        msg_len: usize,
    ) -> Result<(), NetError>;

    fn on_send_multi(
        &self,
        session: &dyn Session<M>,
        msgs: Vec<M>,
        total_len: usize,
    ) -> Result<(), NetError>;
}

/// No-op listener, handy as a base for partial implementations in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyListener;

impl<M> Listener<M> for EmptyListener {
    fn on_opened(&self, _session: &dyn Session<M>) {}

    fn on_closed(&self, _session: &dyn Session<M>) {}

    fn on_receive(
        &self,
        _session: &dyn Session<M>,
        _msg: M,
        _msg_len: usize,
    ) -> Result<(), NetError> {
        Ok(())
    }

    fn on_receive_multi(
        &self,
        _session: &dyn Session<M>,
        _msgs: Vec<M>,
        _total_len: usize,
    ) -> Result<(), NetError> {
        Ok(())
    }

    fn on_send(
        &self,
        _session: &dyn Session<M>,
        _msg: M,
        _msg_len: usize,
    ) -> Result<(), NetError> {
        Ok(())
    }

    fn on_send_multi(
        &self,
        _session: &dyn Session<M>,
        _msgs: Vec<M>,
        _total_len: usize,
    ) -> Result<(), NetError> {
        Ok(())
    }
}
