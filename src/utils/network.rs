// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::errors::NetError;

pub const PROTO_TCP: &str = "tcp";
pub const PROTO_WEBSOCKET: &str = "ws";

/// Complete a bare `host:port` address with the given protocol prefix.
///
/// `192.168.0.10:9851` becomes `tcp://192.168.0.10:9851`; an address that
/// already carries a different protocol is rejected.
pub fn complete_address(address: &str, proto: &str) -> Result<String, NetError> {
    let address = address.to_lowercase();
    match address.find("://") {
        Some(index) => {
            let addr_proto = &address[..index];
            if addr_proto != proto {
                return Err(NetError::other(format!(
                    "protocol({addr_proto}) not match protocol({proto})"
                )));
            }
            Ok(address)
        },
        None => Ok(format!("{proto}://{address}")),
    }
}

/// Strip the protocol prefix from a completed address, returning
/// `(proto, host:port)`.
pub fn split_proto_address(address: &str) -> Result<(&str, &str), NetError> {
    match address.find("://") {
        Some(index) => Ok((&address[..index], &address[index + 3..])),
        None => Err(NetError::InvalidParams),
    }
}
