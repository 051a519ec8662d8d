// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use caracal_net::{
    session::{BaseContext, Listener, Session},
    tcp::{Client, ClientOptions, Server, ServerOptions},
};
use chrono::Utc;
use serial_test::serial;

use crate::integration_tests::common::{
    Recorder, RecordingListener, new_length_codec, wait_until,
};

/// Registers every session under the id carried in its first message.
struct RegisteringListener {
    recorder: Arc<Recorder>,
}

impl Listener<String> for RegisteringListener {
    fn on_opened(&self, _session: &dyn Session<String>) {
        self.recorder.opened.store(true, Ordering::Release);
    }

    fn on_closed(&self, _session: &dyn Session<String>) {
        self.recorder.closed.store(true, Ordering::Release);
    }

    fn on_receive(
        &self,
        session: &dyn Session<String>,
        msg: String,
        _msg_len: usize,
    ) -> Result<(), caracal_net::errors::NetError> {
        let id: u64 = msg.trim().parse().unwrap_or(0);
        let deadline = Utc::now().timestamp() + 60;
        if let Err(err) = session.register(Arc::new(BaseContext::new(id, deadline))) {
            self.recorder
                .messages
                .lock()
                .push(format!("register error: {err}"));
        } else {
            self.recorder.messages.lock().push(format!("registered {id}"));
        }
        Ok(())
    }

    fn on_receive_multi(
        &self,
        session: &dyn Session<String>,
        msgs: Vec<String>,
        total_len: usize,
    ) -> Result<(), caracal_net::errors::NetError> {
        for msg in msgs {
            self.on_receive(session, msg, total_len)?;
        }
        Ok(())
    }

    fn on_send(
        &self,
        _session: &dyn Session<String>,
        _msg: String,
        _msg_len: usize,
    ) -> Result<(), caracal_net::errors::NetError> {
        Ok(())
    }

    fn on_send_multi(
        &self,
        _session: &dyn Session<String>,
        _msgs: Vec<String>,
        _total_len: usize,
    ) -> Result<(), caracal_net::errors::NetError> {
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_registration_and_replacement() {
    let server_recorder = Arc::new(Recorder::default());
    let server = Server::new(
        "register-server",
        "tcp://127.0.0.1:0",
        new_length_codec(),
        RegisteringListener { recorder: Arc::clone(&server_recorder) },
        ServerOptions::default(),
    )
    .expect("server");
    server.start().await.expect("server start");
    let addr = server.local_addr().expect("bound address");

    let recorder_a = Arc::new(Recorder::default());
    let client_a = Client::new(
        new_length_codec(),
        RecordingListener { recorder: Arc::clone(&recorder_a) },
        ClientOptions::default().with_name("client-a"),
    );
    client_a
        .dial(&addr.to_string(), Duration::from_secs(3))
        .await
        .expect("dial a");
    client_a.send_message("7".to_string());
    assert!(
        wait_until(Duration::from_secs(5), || {
            server.manager().get_session(7).is_some()
        })
        .await
    );
    let first = server.manager().get_session(7).expect("registered");
    assert_eq!(server.manager().unregistered_len(), 0);

    // a second connection claiming the same id replaces the first one
    let recorder_b = Arc::new(Recorder::default());
    let client_b = Client::new(
        new_length_codec(),
        RecordingListener { recorder: Arc::clone(&recorder_b) },
        ClientOptions::default().with_name("client-b"),
    );
    client_b
        .dial(&addr.to_string(), Duration::from_secs(3))
        .await
        .expect("dial b");
    client_b.send_message("7".to_string());

    assert!(
        wait_until(Duration::from_secs(5), || recorder_a.is_closed()).await,
        "the replaced session's connection must close"
    );
    assert!(wait_until(Duration::from_secs(5), || {
        server
            .manager()
            .get_session(7)
            .is_some_and(|current| current.serial() != first.serial())
    })
    .await);
    assert_eq!(server.manager().registered_len(), 1);
    assert!(!recorder_b.is_closed());

    client_b.close().expect("close b");
    server.stop().await.expect("server stop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_unregistered_session_evicted() {
    let server_recorder = Arc::new(Recorder::default());
    let server = Server::new(
        "evicting-server",
        "tcp://127.0.0.1:0",
        new_length_codec(),
        RegisteringListener { recorder: server_recorder },
        ServerOptions::default()
            .with_unregister_session_life(1)
            .with_check_session_interval_secs(1),
    )
    .expect("server");
    server.start().await.expect("server start");
    let addr = server.local_addr().expect("bound address");

    let recorder = Arc::new(Recorder::default());
    let client = Client::new(
        new_length_codec(),
        RecordingListener { recorder: Arc::clone(&recorder) },
        ClientOptions::default(),
    );
    client
        .dial(&addr.to_string(), Duration::from_secs(3))
        .await
        .expect("dial");

    // not evicted right away
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!recorder.is_closed());

    // the sweep closes the never-registered session after its lifetime
    assert!(
        wait_until(Duration::from_secs(5), || recorder.is_closed()).await,
        "unregistered session must be evicted"
    );
    assert_eq!(server.manager().unregistered_len(), 0);

    server.stop().await.expect("server stop");
}
