// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! File-backed server configuration.
//!
//! Only the knobs that make sense outside code live here: address, port
//! and the transport limits. Codecs, middleware, routers and hooks are
//! code-level concerns supplied through [`TransportOptions`].

use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    codec::{PacketCodec, PayloadCodec},
    transport::{DEFAULT_MAX_MESSAGE_SIZE, TransportOptions},
};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_addr", rename = "Addr")]
    pub addr: String,

    #[serde(default = "default_port", rename = "Port")]
    pub port: u16,

    #[serde(default, rename = "Limits")]
    pub limits: Limits,
}

/// Transport admission and message-size limits.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Limits {
    #[serde(default = "default_max_channels", rename = "MaxChannels")]
    pub max_channels: u32,

    #[serde(default = "default_message_size", rename = "MaxSendMessageSize")]
    pub max_send_message_size: u32,

    #[serde(default = "default_message_size", rename = "MaxReceiveMessageSize")]
    pub max_receive_message_size: u32,
}

fn default_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8888
}

fn default_max_channels() -> u32 {
    u32::MAX
}

fn default_message_size() -> u32 {
    DEFAULT_MAX_MESSAGE_SIZE
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_channels: default_max_channels(),
            max_send_message_size: default_message_size(),
            max_receive_message_size: default_message_size(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            port: default_port(),
            limits: Limits::default(),
        }
    }
}

impl ServerConfig {
    pub fn load_from_file<Q: AsRef<Path>>(path: Q) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// The `host:port` string the server binds.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }

    /// Applies the file-backed limits onto code-built transport options.
    pub fn apply<C: PacketCodec, P: PayloadCodec>(
        &self,
        options: TransportOptions<C, P>,
    ) -> TransportOptions<C, P> {
        options
            .max_channels(self.limits.max_channels)
            .max_send_message_size(self.limits.max_send_message_size)
            .max_receive_message_size(self.limits.max_receive_message_size)
    }
}
