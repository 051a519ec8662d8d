// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use serde::{Deserialize, Serialize};

/// Socket knobs applied when a connection is initialised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketOptions {
    /// Disable Nagle's algorithm.
    pub tcp_no_delay: bool,
    /// TCP keepalive period in seconds; 0 leaves the OS default.
    pub tcp_keep_alive_secs: u64,
    /// Kernel receive buffer size; 0 leaves the OS default.
    pub socket_recv_buffer: usize,
    /// Kernel send buffer size; 0 leaves the OS default.
    pub socket_send_buffer: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            tcp_no_delay: true,
            tcp_keep_alive_secs: 5 * 60,
            socket_recv_buffer: 16 * 1024,
            socket_send_buffer: 32 * 1024,
        }
    }
}

/// TCP/WebSocket client options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientOptions {
    #[serde(default)]
    pub name: String,
    /// Inbound buffer high-water mark; exceeding it closes the connection.
    pub read_buffer_cap: usize,
    /// Outbound buffer high-water mark; writes past it are rejected.
    pub write_buffer_cap: usize,
    /// Pending async-write queue depth; a full queue rejects the submit.
    pub write_queue_cap: usize,
    #[serde(default)]
    pub socket: SocketOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            read_buffer_cap: 16 * 1024,
            write_buffer_cap: 32 * 1024,
            write_queue_cap: 100,
            socket: SocketOptions::default(),
        }
    }
}

impl ClientOptions {
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_read_buffer_cap(mut self, cap: usize) -> Self {
        self.read_buffer_cap = cap;
        self
    }

    pub fn with_write_buffer_cap(mut self, cap: usize) -> Self {
        self.write_buffer_cap = cap;
        self
    }

    pub fn with_write_queue_cap(mut self, cap: usize) -> Self {
        self.write_queue_cap = cap;
        self
    }

    pub fn with_socket(mut self, socket: SocketOptions) -> Self {
        self.socket = socket;
        self
    }
}

/// TCP/WebSocket server options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerOptions {
    /// Lifetime of a session that never registers, in seconds.
    pub unregister_session_life: i64,
    /// Cadence of the session sweep, in seconds.
    pub check_session_interval_secs: u64,
    /// How long `start` waits for the engine to report readiness.
    pub start_timeout_secs: u64,
    pub read_buffer_cap: usize,
    pub write_buffer_cap: usize,
    pub write_queue_cap: usize,
    #[serde(default)]
    pub socket: SocketOptions,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            unregister_session_life: 60,
            check_session_interval_secs: 30,
            start_timeout_secs: 5,
            read_buffer_cap: 16 * 1024,
            write_buffer_cap: 32 * 1024,
            write_queue_cap: 100,
            socket: SocketOptions::default(),
        }
    }
}

impl ServerOptions {
    pub fn with_unregister_session_life(mut self, secs: i64) -> Self {
        self.unregister_session_life = secs;
        self
    }

    pub fn with_check_session_interval_secs(mut self, secs: u64) -> Self {
        self.check_session_interval_secs = secs;
        self
    }

    pub fn with_start_timeout_secs(mut self, secs: u64) -> Self {
        self.start_timeout_secs = secs;
        self
    }

    pub fn with_read_buffer_cap(mut self, cap: usize) -> Self {
        self.read_buffer_cap = cap;
        self
    }

    pub fn with_write_buffer_cap(mut self, cap: usize) -> Self {
        self.write_buffer_cap = cap;
        self
    }

    pub fn with_write_queue_cap(mut self, cap: usize) -> Self {
        self.write_queue_cap = cap;
        self
    }

    pub fn with_socket(mut self, socket: SocketOptions) -> Self {
        self.socket = socket;
        self
    }
}
