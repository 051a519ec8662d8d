// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::RngExt;
use sha1::{Digest, Sha1};

use crate::errors::NetError;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_HEADERS: usize = 32;

/// `Sec-WebSocket-Accept` for a given `Sec-WebSocket-Key`.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Random 16-byte client key, base64-encoded.
pub fn generate_key() -> String {
    let mut raw = [0u8; 16];
    rand::rng().fill(&mut raw);
    BASE64.encode(raw)
}

/// Random masking key for client frames.
pub fn generate_mask() -> [u8; 4] {
    let mut key = [0u8; 4];
    rand::rng().fill(&mut key);
    key
}

/// Try to parse a client upgrade request from the front of `buf`.
///
/// `Ok(None)` means the request is not complete yet. On success returns
/// the number of consumed bytes and the client's `Sec-WebSocket-Key`.
pub fn parse_upgrade_request(buf: &[u8]) -> Result<Option<(usize, String)>, NetError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);
    let consumed = match request.parse(buf) {
        Ok(httparse::Status::Complete(consumed)) => consumed,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(err) => {
            return Err(NetError::other(format!("invalid upgrade request: {err}")));
        },
    };
    let mut key = None;
    let mut upgrade_ok = false;
    for header in request.headers.iter() {
        if header.name.eq_ignore_ascii_case("sec-websocket-key") {
            key = Some(String::from_utf8_lossy(header.value).trim().to_string());
        } else if header.name.eq_ignore_ascii_case("upgrade") {
            upgrade_ok = String::from_utf8_lossy(header.value)
                .trim()
                .eq_ignore_ascii_case("websocket");
        }
    }
    if !upgrade_ok {
        return Err(NetError::other("missing websocket upgrade header"));
    }
    match key {
        Some(key) if !key.is_empty() => Ok(Some((consumed, key))),
        _ => Err(NetError::other("missing sec-websocket-key header")),
    }
}

/// 101 response accepting an upgrade.
pub fn build_upgrade_response(key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: \
         Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(key)
    )
}

/// Client upgrade request for `host` + `path`.
pub fn build_upgrade_request(host: &str, path: &str, key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\nHost: {host}\r\nUpgrade: websocket\r\nConnection: \
         Upgrade\r\nSec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: 13\r\n\r\n"
    )
}

/// Validate the server's 101 response against the sent key.
///
/// Returns the number of consumed bytes; anything after them already
/// belongs to the frame stream.
pub fn parse_upgrade_response(buf: &[u8], sent_key: &str) -> Result<Option<usize>, NetError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    let consumed = match response.parse(buf) {
        Ok(httparse::Status::Complete(consumed)) => consumed,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(err) => {
            return Err(NetError::other(format!("invalid upgrade response: {err}")));
        },
    };
    if response.code != Some(101) {
        return Err(NetError::other(format!(
            "unexpected upgrade status: {:?}",
            response.code
        )));
    }
    let expected = accept_key(sent_key);
    let accepted = response.headers.iter().any(|header| {
        header.name.eq_ignore_ascii_case("sec-websocket-accept")
            && String::from_utf8_lossy(header.value).trim() == expected
    });
    if !accepted {
        return Err(NetError::other("sec-websocket-accept mismatch"));
    }
    Ok(Some(consumed))
}
