// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use thiserror::Error;

/// Error taxonomy of the framework.
///
/// Protocol and resource errors oblige the event loop to close the
/// connection; transient errors are reported to the submitter and the
/// connection stays up; lifecycle errors reject the offending operation.
#[derive(Debug, Error)]
pub enum NetError {
    // protocol
    #[error("nil message")]
    NilMessage,
    #[error("encoded buffer length is 0")]
    EmptyEncodeBuffer,
    #[error("invalid magic")]
    InvalidMagic,
    #[error("message is too large")]
    MessageTooLarge,
    #[error("invalid length field size")]
    InvalidLengthSize,

    // resource
    #[error("out of read capacity")]
    OutOfReadCap,
    #[error("out of write capacity")]
    OutOfWriteCap,

    // transient
    #[error("write queue is full")]
    WriteQueueFull,

    // lifecycle
    #[error("connection is closed")]
    ClosedConn,
    #[error("client is closed")]
    ClosedClient,
    #[error("invalid client status")]
    InvalidStatus,
    #[error("session is registered")]
    RegisteredSession,
    #[error("invalid session id")]
    InvalidSessionId,

    // programming
    #[error("invalid params")]
    InvalidParams,
    #[error("nil value")]
    NilValue,
    #[error("unsupported operation")]
    UnsupportedOp,

    // worker pool
    #[error("queue of worker pool is full")]
    WorkerPoolQueueIsFull,
    #[error("worker pool is closed")]
    WorkerPoolClosed,

    // safe channel
    #[error("channel has been closed")]
    ClosedChan,
    #[error("channel is empty")]
    EmptyChan,
    #[error("channel is full")]
    FullChan,
    #[error("channel context is done")]
    ChanContextDone,

    // distributed cache
    #[error("cache exist")]
    CacheExist,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl NetError {
    pub fn other(msg: impl Into<String>) -> Self {
        NetError::Other(msg.into())
    }
}

/// Close reasons travel between tasks and callbacks, so they are shared.
pub type SharedError = Arc<NetError>;

pub type Result<T, E = NetError> = std::result::Result<T, E>;
