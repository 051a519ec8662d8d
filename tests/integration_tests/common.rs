// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use caracal_net::{
    codec::{
        length::{LengthFieldCodec, LengthOptions},
        message::TextCodec,
    },
    errors::NetError,
    session::{Listener, Session},
};
use parking_lot::Mutex;

pub const MAGIC: [u8; 2] = [0xAB, 0xCD];

pub fn new_length_codec() -> LengthFieldCodec<String, TextCodec> {
    LengthFieldCodec::new(LengthOptions::default().with_magic(&MAGIC), TextCodec)
        .expect("codec")
}

/// Shared observation point for listener callbacks.
#[derive(Default)]
pub struct Recorder {
    pub messages: Mutex<Vec<String>>,
    pub total_bytes: AtomicUsize,
    pub opened: AtomicBool,
    pub closed: AtomicBool,
    pub close_reason: Mutex<Option<String>>,
}

impl Recorder {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn record_close(&self, session: &dyn Session<String>) {
        self.closed.store(true, Ordering::Release);
        if let Some(conn) = session.connection() {
            let (_, reason) = conn.is_closed();
            *self.close_reason.lock() = reason.map(|err| err.to_string());
        }
    }
}

/// Records every event without reacting.
pub struct RecordingListener {
    pub recorder: Arc<Recorder>,
}

impl Listener<String> for RecordingListener {
    fn on_opened(&self, _session: &dyn Session<String>) {
        self.recorder.opened.store(true, Ordering::Release);
    }

    fn on_closed(&self, session: &dyn Session<String>) {
        self.recorder.record_close(session);
    }

    fn on_receive(
        &self,
        _session: &dyn Session<String>,
        msg: String,
        msg_len: usize,
    ) -> Result<(), NetError> {
        self.recorder.messages.lock().push(msg);
        self.recorder.total_bytes.fetch_add(msg_len, Ordering::AcqRel);
        Ok(())
    }

    fn on_receive_multi(
        &self,
        _session: &dyn Session<String>,
        msgs: Vec<String>,
        total_len: usize,
    ) -> Result<(), NetError> {
        self.recorder.messages.lock().extend(msgs);
        self.recorder
            .total_bytes
            .fetch_add(total_len, Ordering::AcqRel);
        Ok(())
    }

    fn on_send(
        &self,
        _session: &dyn Session<String>,
        _msg: String,
        _msg_len: usize,
    ) -> Result<(), NetError> {
        Ok(())
    }

    fn on_send_multi(
        &self,
        _session: &dyn Session<String>,
        _msgs: Vec<String>,
        _total_len: usize,
    ) -> Result<(), NetError> {
        Ok(())
    }
}

/// Echoes every message back and records it.
pub struct EchoListener {
    pub recorder: Arc<Recorder>,
}

impl Listener<String> for EchoListener {
    fn on_opened(&self, _session: &dyn Session<String>) {
        self.recorder.opened.store(true, Ordering::Release);
    }

    fn on_closed(&self, session: &dyn Session<String>) {
        self.recorder.record_close(session);
    }

    fn on_receive(
        &self,
        session: &dyn Session<String>,
        msg: String,
        msg_len: usize,
    ) -> Result<(), NetError> {
        self.recorder.messages.lock().push(msg.clone());
        self.recorder.total_bytes.fetch_add(msg_len, Ordering::AcqRel);
        session.send_message(msg);
        Ok(())
    }

    fn on_receive_multi(
        &self,
        session: &dyn Session<String>,
        msgs: Vec<String>,
        total_len: usize,
    ) -> Result<(), NetError> {
        self.recorder
            .total_bytes
            .fetch_add(total_len, Ordering::AcqRel);
        for msg in msgs {
            self.recorder.messages.lock().push(msg.clone());
            session.send_message(msg);
        }
        Ok(())
    }

    fn on_send(
        &self,
        _session: &dyn Session<String>,
        _msg: String,
        _msg_len: usize,
    ) -> Result<(), NetError> {
        Ok(())
    }

    fn on_send_multi(
        &self,
        _session: &dyn Session<String>,
        _msgs: Vec<String>,
        _total_len: usize,
    ) -> Result<(), NetError> {
        Ok(())
    }
}

pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, predicate: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    predicate()
}
