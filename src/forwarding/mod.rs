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

//! Port forwarding over an open transport
//!
//! One forwarding session owns one supervisor task and any number of
//! tunnel workers, one per forwarded TCP connection:
//!
//! - **Local forward** (`-L` style): a local listener accepts
//!   connections and pairs each with a `direct-tcpip` channel toward the
//!   remote destination.
//! - **Remote forward** (`-R` style): the remote side listens and hands
//!   channels back; each is paired with a TCP connection to the local
//!   destination.
//!
//! Worker failures are captured, never propagated at the point of
//! occurrence; stopping a session joins every worker and raises the
//! failures together as one [`SessionFailure`].

pub mod manager;
pub mod tunnel;

pub use manager::{ForwardHandle, SessionFailure};
pub use tunnel::{Tunnel, TunnelError, TunnelStats};

use std::fmt;
use std::time::Duration;

/// Tuning knobs for the forwarding engine.
#[derive(Debug, Clone)]
pub struct ForwardingConfig {
    /// Read chunk size on the TCP socket side of each tunnel.
    pub socket_chunk_size: usize,
    /// Read chunk size on the channel side of each tunnel.
    pub channel_chunk_size: usize,
    /// Upper bound on how long a session takes to observe its stop
    /// signal, also used as the pause after a failed accept.
    pub poll_interval: Duration,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            socket_chunk_size: 8192,
            channel_chunk_size: 8192,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// One side of a forwarding request: a host and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    pub host: String,
    pub port: u16,
}

impl ForwardTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ForwardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<(&str, u16)> for ForwardTarget {
    fn from((host, port): (&str, u16)) -> Self {
        Self::new(host, port)
    }
}

impl From<(String, u16)> for ForwardTarget {
    fn from((host, port): (String, u16)) -> Self {
        Self::new(host, port)
    }
}
