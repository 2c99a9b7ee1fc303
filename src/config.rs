// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Layered configuration defaults
//!
//! The configuration system itself (file discovery, env overrides,
//! layering) lives outside this crate; resolution only needs the merged
//! result, carried here as [`Defaults`]. A YAML loader is provided for
//! convenience.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::forwarding::ForwardingConfig;

/// Merged default values consulted by endpoint resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    /// Default login user. `None` falls back to the local login name.
    #[serde(default)]
    pub user: Option<String>,

    /// Default SSH port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Default agent-forwarding behavior.
    #[serde(default)]
    pub forward_agent: bool,

    /// Default handshake timeout in seconds. `None` waits indefinitely.
    #[serde(default)]
    pub connect_timeout: Option<u64>,

    /// Default gateway applied when neither the caller nor the SSH config
    /// supplies one.
    #[serde(default)]
    pub gateway: Option<GatewayDefault>,

    /// Forwarding engine tuning.
    #[serde(default)]
    pub forwarding: ForwardingDefaults,
}

fn default_port() -> u16 {
    22
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            user: None,
            port: default_port(),
            forward_agent: false,
            connect_timeout: None,
            gateway: None,
            forwarding: ForwardingDefaults::default(),
        }
    }
}

impl Defaults {
    /// The default user, falling back to the local login name.
    pub fn effective_user(&self) -> String {
        self.user.clone().unwrap_or_else(|| {
            whoami::fallible::username().unwrap_or_else(|_| "root".to_string())
        })
    }

    /// Forwarding configuration with unset knobs filled from the
    /// engine defaults.
    pub fn forwarding_config(&self) -> ForwardingConfig {
        self.forwarding.to_config()
    }

    /// Load defaults from a YAML file. A missing file yields the builtin
    /// defaults rather than an error.
    pub async fn load(path: &Path) -> Result<Self> {
        let expanded = expand_tilde(path);

        if !expanded.exists() {
            tracing::debug!("defaults file not found at {:?}, using builtins", expanded);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(&expanded)
            .await
            .with_context(|| format!("Failed to read defaults file at {}", expanded.display()))?;

        let defaults: Defaults = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML defaults at {}", expanded.display()))?;

        Ok(defaults)
    }
}

/// A default gateway, as configuration expresses it.
///
/// Either a `[user@]host[:port]` jump specification (resolved like any
/// other host) or an explicit proxy command. `#[serde(untagged)]` lets
/// YAML carry a bare string for the common jump case; the object variant
/// must be listed first so serde tries it before the string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GatewayDefault {
    Command { command: String },
    Jump(String),
}

/// Optional overrides for the forwarding engine defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForwardingDefaults {
    /// Read chunk size for the socket side of each tunnel, bytes.
    #[serde(default)]
    pub socket_chunk_size: Option<usize>,
    /// Read chunk size for the channel side of each tunnel, bytes.
    #[serde(default)]
    pub channel_chunk_size: Option<usize>,
    /// Liveness poll bound in milliseconds (accept-retry pause and the
    /// upper bound on stop-signal observation).
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

impl ForwardingDefaults {
    pub fn to_config(&self) -> ForwardingConfig {
        let base = ForwardingConfig::default();
        ForwardingConfig {
            socket_chunk_size: self.socket_chunk_size.unwrap_or(base.socket_chunk_size),
            channel_chunk_size: self.channel_chunk_size.unwrap_or(base.channel_chunk_size),
            poll_interval: self
                .poll_interval_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or(base.poll_interval),
        }
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    if let Some(rest) = path_str.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(format!("{home}{rest}"));
        }
    }
    path.to_path_buf()
}
