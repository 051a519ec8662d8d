// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fmt, marker::PhantomData, sync::Arc};

use tracing::warn;

use crate::{
    codec::{ByteOrder, Decoded, FrameReader, TransportCodec, message::MessageCodec},
    errors::NetError,
    tcp::conn::TcpConn,
};

pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 8 * 1024;
pub const DEFAULT_WARNING_ENCODED_LENGTH: usize = 4 * 1024;
pub const DEFAULT_LENGTH_SIZE: usize = 2;

/// Fallback for bodies over `max_encoded_length`: receives the message and
/// the oversized body and may produce a replacement body.
pub type LargeMessageHandler<M> =
    Arc<dyn Fn(&M, &[u8]) -> Result<Vec<u8>, NetError> + Send + Sync>;

/// Options of the length-prefixed codec.
///
/// The length field is unsigned on the wire; its width bounds the frame
/// body at `2^(L*8-1) - 1` so the value also fits a same-width signed
/// reader on the other end.
#[derive(Clone, Debug)]
pub struct LengthOptions {
    /// Frame preamble, compared byte-for-byte on decode. May be empty.
    pub magic: Vec<u8>,
    pub byte_order: ByteOrder,
    /// Width of the body-length field; one of 1, 2 or 4.
    pub length_size: usize,
    pub max_decoded_length: usize,
    pub max_encoded_length: usize,
    pub warning_encoded_length: usize,
}

impl Default for LengthOptions {
    fn default() -> Self {
        Self {
            magic: Vec::new(),
            byte_order: ByteOrder::LittleEndian,
            length_size: DEFAULT_LENGTH_SIZE,
            max_decoded_length: DEFAULT_MAX_MESSAGE_LENGTH,
            max_encoded_length: DEFAULT_MAX_MESSAGE_LENGTH,
            warning_encoded_length: DEFAULT_WARNING_ENCODED_LENGTH,
        }
    }
}

impl LengthOptions {
    pub fn with_magic(mut self, magic: &[u8]) -> Self {
        self.magic = magic.to_vec();
        self
    }

    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    pub fn with_length_size(mut self, size: usize) -> Self {
        self.length_size = size;
        self
    }

    pub fn with_max_decoded_length(mut self, len: usize) -> Self {
        self.max_decoded_length = len;
        self
    }

    pub fn with_max_encoded_length(mut self, len: usize) -> Self {
        self.max_encoded_length = len;
        self
    }

    pub fn with_warning_encoded_length(mut self, len: usize) -> Self {
        self.warning_encoded_length = len;
        self
    }

    fn complete(mut self) -> Result<Self, NetError> {
        if !matches!(self.length_size, 1 | 2 | 4) {
            return Err(NetError::InvalidLengthSize);
        }
        let max_msg_len = (1usize << (self.length_size * 8 - 1)) - 1;
        self.max_decoded_length = self.max_decoded_length.min(max_msg_len);
        self.max_encoded_length = self.max_encoded_length.min(max_msg_len);
        self.warning_encoded_length = self.warning_encoded_length.min(max_msg_len);
        Ok(self)
    }
}

/// Length-prefixed framing codec.
///
/// ```text
/// 0       magic_size              length_size
/// +-----------+-----------------------+
/// |   magic   |       body len        |
/// +-----------+-----------+-----------+
/// |                                   |
/// +           body bytes              +
/// |            ... ...                |
/// +-----------------------------------+
/// ```
pub struct LengthFieldCodec<M, MC> {
    options: LengthOptions,
    message_codec: MC,
    large_message_handler: Option<LargeMessageHandler<M>>,
    _marker: PhantomData<fn() -> M>,
}

impl<M, MC> fmt::Debug for LengthFieldCodec<M, MC>
where MC: fmt::Debug
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LengthFieldCodec")
            .field("options", &self.options)
            .field("message_codec", &self.message_codec)
            .field("large_message_handler", &self.large_message_handler.is_some())
            .finish()
    }
}

impl<M, MC> LengthFieldCodec<M, MC>
where MC: MessageCodec<M>
{
    pub fn new(options: LengthOptions, message_codec: MC) -> Result<Self, NetError> {
        Ok(Self {
            options: options.complete()?,
            message_codec,
            large_message_handler: None,
            _marker: PhantomData,
        })
    }

    pub fn with_large_message_handler(
        mut self,
        handler: LargeMessageHandler<M>,
    ) -> Self {
        self.large_message_handler = Some(handler);
        self
    }

    pub fn options(&self) -> &LengthOptions {
        &self.options
    }

    /// Serialize one message into a full frame.
    pub fn encode_frame(&self, msg: &M) -> Result<Vec<u8>, NetError> {
        let mut body = self.message_codec.encode(msg)?;
        if body.is_empty() {
            return Err(NetError::EmptyEncodeBuffer);
        }
        if body.len() > self.options.max_encoded_length {
            match &self.large_message_handler {
                Some(handler) => {
                    body = handler(msg, &body)?;
                    if body.len() > self.options.max_encoded_length {
                        return Err(NetError::MessageTooLarge);
                    }
                },
                None => return Err(NetError::MessageTooLarge),
            }
        }
        if body.len() > self.options.warning_encoded_length {
            warn!(body_len = body.len(), "encoded message is too long");
        }
        let magic_size = self.options.magic.len();
        let body_offset = magic_size + self.options.length_size;
        let mut out = vec![0u8; body_offset + body.len()];
        out[..magic_size].copy_from_slice(&self.options.magic);
        self.options.byte_order.put_uint(
            &mut out[magic_size..body_offset],
            self.options.length_size,
            body.len() as u32,
        );
        out[body_offset..].copy_from_slice(&body);
        Ok(out)
    }

    /// Streaming decode: drains every complete frame buffered in `reader`.
    ///
    /// Insufficient bytes are not an error; the call returns what was
    /// decoded so far and the caller retries once more data arrives. Any
    /// returned error obliges the caller to close the connection.
    pub fn decode_stream(
        &self,
        reader: &mut dyn FrameReader,
    ) -> Result<(Vec<M>, usize), NetError> {
        let mut result = Vec::new();
        let mut total_len = 0;
        loop {
            match self.decode_one(reader)? {
                Some((msg, msg_len)) => {
                    result.push(msg);
                    total_len += msg_len;
                },
                None => break,
            }
            if reader.inbound_buffered() == 0 {
                break;
            }
        }
        Ok((result, total_len))
    }

    fn decode_one(
        &self,
        reader: &mut dyn FrameReader,
    ) -> Result<Option<(M, usize)>, NetError> {
        let magic_size = self.options.magic.len();
        let body_offset = magic_size + self.options.length_size;
        let body_len = {
            let Some(header) = reader.peek(body_offset) else {
                return Ok(None);
            };
            if header[..magic_size] != self.options.magic[..] {
                return Err(NetError::InvalidMagic);
            }
            self.options.byte_order.get_uint(&header[magic_size..], self.options.length_size)
                as usize
        };
        if body_len > self.options.max_decoded_length {
            return Err(NetError::MessageTooLarge);
        }
        let msg_len = body_offset + body_len;
        let msg = {
            let Some(frame) = reader.peek(msg_len) else {
                return Ok(None);
            };
            self.message_codec.decode(&frame[body_offset..])?
        };
        reader.discard(msg_len)?;
        Ok(Some((msg, msg_len)))
    }
}

impl<M, MC> TransportCodec<M> for LengthFieldCodec<M, MC>
where
    M: Send + 'static,
    MC: MessageCodec<M>,
{
    type ConnState = ();

    fn encode(&self, msg: &M) -> Result<Vec<u8>, NetError> {
        self.encode_frame(msg)
    }

    fn decode(
        &self,
        conn: &TcpConn,
        _state: &mut Self::ConnState,
    ) -> Result<Decoded<M>, NetError> {
        let mut inbound = conn.inbound_lock();
        let (messages, total_len) = self.decode_stream(&mut *inbound)?;
        Ok(Decoded { messages, total_len, close: false })
    }
}
