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

//! Endpoint descriptors and resolution
//!
//! An [`EndpointSpec`] is the fully-resolved description of one SSH
//! destination: host, user, port, optional gateway chain, and connection
//! options. Specs are produced by [`resolver::resolve`], which merges host
//! shorthand, explicit overrides, SSH config directives, and layered
//! defaults under a strict precedence order.

pub mod hosts;
pub mod resolver;
pub mod shorthand;

pub use hosts::HostEntry;
pub use resolver::{resolve, Overrides};
pub use shorthand::{derive_shorthand, Shorthand};

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// A fully-resolved connection descriptor.
///
/// Immutable after construction. `host` differs from `original_host` when
/// an SSH config `HostName` directive rewrote the alias the caller gave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    /// The host string exactly as supplied by the caller (including any
    /// shorthand that was stripped during resolution).
    pub original_host: String,
    /// The resolved hostname to actually connect to. Never empty.
    pub host: String,
    /// The login user.
    pub user: String,
    /// The remote port, 1-65535.
    pub port: u16,
    /// Gateway to tunnel the connection through, if any.
    pub gateway: Option<Gateway>,
    /// Whether to request SSH agent forwarding on the session.
    pub forward_agent: bool,
    /// Handshake timeout. `None` means wait indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Opaque options handed through to the transport layer verbatim.
    pub connect_options: HashMap<String, String>,
}

impl EndpointSpec {
    /// `host:port` form for dialing.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Number of gateway hops between us and this endpoint.
    pub fn gateway_depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.gateway.as_ref();
        while let Some(Gateway::Endpoint(inner)) = current {
            depth += 1;
            current = inner.gateway.as_ref();
        }
        if matches!(current, Some(Gateway::Command(_))) {
            depth += 1;
        }
        depth
    }
}

impl fmt::Display for EndpointSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// How to reach an endpoint that is not directly routable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gateway {
    /// ProxyJump style: a nested SSH connection whose `direct-tcpip`
    /// channel carries the outer handshake.
    Endpoint(Box<EndpointSpec>),
    /// ProxyCommand style: a subprocess whose stdin/stdout carry the
    /// outer handshake.
    Command(String),
}

impl fmt::Display for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gateway::Endpoint(spec) => write!(f, "jump:{spec}"),
            Gateway::Command(cmd) => write!(f, "command:{cmd}"),
        }
    }
}

/// Caller-supplied gateway override for one resolution.
///
/// `Disable` always wins and forces a gateway-less connection, letting a
/// caller cancel a configured gateway per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOverride {
    Endpoint(EndpointSpec),
    Command(String),
    Disable,
}
