// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::errors::NetError;

/// Serialize application messages to and from opaque frame bodies.
///
/// The transport never inspects the payload; the message type is a generic
/// parameter all the way up through codec, session and listener.
pub trait MessageCodec<M>: Send + Sync + 'static {
    fn encode(&self, msg: &M) -> Result<Vec<u8>, NetError>;
    fn decode(&self, buf: &[u8]) -> Result<M, NetError>;
}

/// UTF-8 text bodies.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextCodec;

impl MessageCodec<String> for TextCodec {
    fn encode(&self, msg: &String) -> Result<Vec<u8>, NetError> {
        Ok(msg.as_bytes().to_vec())
    }

    fn decode(&self, buf: &[u8]) -> Result<String, NetError> {
        String::from_utf8(buf.to_vec())
            .map_err(|err| NetError::other(format!("invalid utf-8 body: {err}")))
    }
}

/// Raw byte bodies.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesCodec;

impl MessageCodec<Vec<u8>> for BytesCodec {
    fn encode(&self, msg: &Vec<u8>) -> Result<Vec<u8>, NetError> {
        Ok(msg.clone())
    }

    fn decode(&self, buf: &[u8]) -> Result<Vec<u8>, NetError> {
        Ok(buf.to_vec())
    }
}
