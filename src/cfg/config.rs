// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::codec::envelope::ENVELOPE_HEADER_LEN;

/// Upper bound on a declared frame length when the config omits one.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Threading and framing limits shared by servers and clients.
pub struct RuntimeConfig {
    /// Number of reactor event loops (one OS thread each).
    pub io_service_number: usize,
    /// Number of worker threads executing user handlers.
    pub worker_threads: usize,
    /// Largest frame a peer may declare, in bytes.
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,
}

fn default_max_frame_length() -> usize {
    DEFAULT_MAX_FRAME_LENGTH
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            io_service_number: 1,
            worker_threads: 1,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.io_service_number >= 1, "io_service_number must be >= 1");
        ensure!(self.worker_threads >= 1, "worker_threads must be >= 1");
        ensure!(
            self.max_frame_length > ENVELOPE_HEADER_LEN,
            "max_frame_length must exceed the {ENVELOPE_HEADER_LEN}-byte envelope \
             header"
        );
        Ok(())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ServerConfig {
    pub runtime: RuntimeConfig,
    /// Every address the server binds at startup.
    pub listen: Vec<ListenConfig>,
}

impl ServerConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path:?}"))?;
        let config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.runtime.validate()?;
        ensure!(!self.listen.is_empty(), "at least one listen address required");
        Ok(())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ClientConfig {
    /// Server host name or address; resolution may yield several
    /// candidate endpoints, tried in order.
    pub server: String,
    pub port: u16,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl ClientConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path:?}"))?;
        let config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.server.is_empty(), "server must not be empty");
        self.runtime.validate()
    }
}
