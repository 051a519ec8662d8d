// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    codec::{ByteOrder, length::LengthOptions},
    tcp::options::{ClientOptions, ServerOptions},
};

/// Framework configuration loadable from YAML.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub client: ClientOptions,
    #[serde(default)]
    pub server: ServerOptions,
    #[serde(default)]
    pub codec: CodecConfig,
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

/// Length-codec section of the config file.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CodecConfig {
    /// Magic bytes, hex-encoded ("abcd" for `0xAB 0xCD`).
    #[serde(default)]
    pub magic_hex: String,
    pub length_size: usize,
    /// "little" or "big".
    pub byte_order: String,
    pub max_decoded_length: usize,
    pub max_encoded_length: usize,
    pub warning_encoded_length: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        let defaults = LengthOptions::default();
        Self {
            magic_hex: String::new(),
            length_size: defaults.length_size,
            byte_order: "little".to_string(),
            max_decoded_length: defaults.max_decoded_length,
            max_encoded_length: defaults.max_encoded_length,
            warning_encoded_length: defaults.warning_encoded_length,
        }
    }
}

impl CodecConfig {
    pub fn to_length_options(&self) -> Result<LengthOptions> {
        let magic = decode_hex(&self.magic_hex)
            .with_context(|| format!("invalid magic_hex: {}", self.magic_hex))?;
        let byte_order = match self.byte_order.as_str() {
            "little" | "" => ByteOrder::LittleEndian,
            "big" => ByteOrder::BigEndian,
            other => anyhow::bail!("invalid byte_order: {other}"),
        };
        Ok(LengthOptions::default()
            .with_magic(&magic)
            .with_byte_order(byte_order)
            .with_length_size(self.length_size)
            .with_max_decoded_length(self.max_decoded_length)
            .with_max_encoded_length(self.max_encoded_length)
            .with_warning_encoded_length(self.warning_encoded_length))
    }
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    let cleaned: String = value.chars().filter(|ch| !ch.is_whitespace()).collect();
    anyhow::ensure!(cleaned.len() % 2 == 0, "odd hex length");
    (0..cleaned.len())
        .step_by(2)
        .map(|index| {
            u8::from_str_radix(&cleaned[index..index + 2], 16).context("invalid hex digit")
        })
        .collect()
}
