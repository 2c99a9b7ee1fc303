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

//! Connection lifecycle
//!
//! A [`Connection`] owns one endpoint's transport and walks the
//! `Closed → Open → Closed` lifecycle. `open()` is idempotent: only the
//! first call performs the (gateway-first, depth-first) establishment
//! and handshake. Every network-performing operation goes through
//! `ensure_open()`, so the first such call on a closed connection blocks
//! until the handshake completes. `close()` releases the memoized SFTP
//! session first, then the transport, then any gateway connections, and
//! is safe to call redundantly.

use anyhow::{Context, Result};
use russh_sftp::client::SftpSession;
use std::sync::Arc;
use tracing::{debug, info};

use crate::endpoint::EndpointSpec;
use crate::forwarding::manager::{start_local_forward, start_remote_forward};
use crate::forwarding::{ForwardHandle, ForwardTarget, ForwardingConfig};
use crate::gateway;
use crate::transport::ssh::{connect_direct, connect_over_stream};
use crate::transport::{AuthMethod, ServerCheckMethod, Transport};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
}

/// A connection to one resolved endpoint.
pub struct Connection {
    spec: EndpointSpec,
    auth: AuthMethod,
    server_check: ServerCheckMethod,
    forwarding: ForwardingConfig,
    state: ConnectionState,
    transport: Option<Arc<dyn Transport>>,
    gateway_conn: Option<Box<Connection>>,
    sftp: Option<SftpSession>,
}

impl Connection {
    /// Imprint connection parameters without touching the network.
    pub fn new(spec: EndpointSpec, auth: AuthMethod) -> Self {
        Self {
            spec,
            auth,
            server_check: ServerCheckMethod::DefaultKnownHostsFile,
            forwarding: ForwardingConfig::default(),
            state: ConnectionState::Closed,
            transport: None,
            gateway_conn: None,
            sftp: None,
        }
    }

    pub fn with_server_check(mut self, server_check: ServerCheckMethod) -> Self {
        self.server_check = server_check;
        self
    }

    pub fn with_forwarding_config(mut self, config: ForwardingConfig) -> Self {
        self.forwarding = config;
        self
    }

    /// Wrap an already-open transport. Used by embedders that establish
    /// transports themselves and by tests.
    pub fn from_parts(spec: EndpointSpec, transport: Arc<dyn Transport>) -> Self {
        Self {
            spec,
            auth: AuthMethod::with_password(""),
            server_check: ServerCheckMethod::NoCheck,
            forwarding: ForwardingConfig::default(),
            state: ConnectionState::Open,
            transport: Some(transport),
            gateway_conn: None,
            sftp: None,
        }
    }

    pub fn spec(&self) -> &EndpointSpec {
        &self.spec
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, ConnectionState::Open)
            && self.transport.as_ref().is_some_and(|t| !t.is_closed())
    }

    /// The live transport, if the connection is open.
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.clone()
    }

    /// Open the transport to this endpoint.
    ///
    /// A no-op when already open. When a gateway is configured, the
    /// gateway chain is opened depth-first before the outer handshake
    /// runs over the innermost channel; a gateway failure is this
    /// connection's failure.
    pub async fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }

        info!("opening connection to {}", self.spec);
        let transport: Arc<dyn Transport> = match &self.spec.gateway {
            None => Arc::new(
                connect_direct(&self.spec, self.auth.clone(), self.server_check.clone())
                    .await
                    .with_context(|| format!("Failed to connect to {}", self.spec))?,
            ),
            Some(gw) => {
                let (stream, inner) =
                    gateway::establish(&self.spec, gw, &self.auth, &self.server_check).await?;
                self.gateway_conn = inner;
                Arc::new(
                    connect_over_stream(
                        stream,
                        &self.spec,
                        self.auth.clone(),
                        self.server_check.clone(),
                    )
                    .await
                    .with_context(|| {
                        format!("Failed to connect to {} through its gateway", self.spec)
                    })?,
                )
            }
        };

        self.transport = Some(transport);
        self.state = ConnectionState::Open;
        Ok(())
    }

    /// Guard for network-performing operations: open if needed, return
    /// the transport.
    pub async fn ensure_open(&mut self) -> Result<Arc<dyn Transport>> {
        if !self.is_open() {
            self.open().await?;
        }
        self.transport
            .clone()
            .context("connection reports open but has no transport")
    }

    /// Close the transport and everything attached to it.
    ///
    /// Auxiliary sessions go first, then the transport, then gateway
    /// connections innermost-last. A no-op when already closed; safe to
    /// call once explicitly and again on scope exit.
    pub async fn close(&mut self) -> Result<()> {
        if matches!(self.state, ConnectionState::Closed) {
            return Ok(());
        }

        if let Some(sftp) = self.sftp.take() {
            if let Err(e) = sftp.close().await {
                debug!("sftp session close failed: {e}");
            }
        }

        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                debug!("transport close failed: {e}");
            }
        }

        if let Some(mut inner) = self.gateway_conn.take() {
            Box::pin(inner.close()).await?;
        }

        self.state = ConnectionState::Closed;
        info!("closed connection to {}", self.spec);
        Ok(())
    }

    /// The memoized SFTP session for this connection.
    ///
    /// Opened lazily on first use and reused afterwards, so per-session
    /// state (like a working directory) is preserved across calls. The
    /// session is invalidated by `close()`.
    pub async fn sftp(&mut self) -> Result<&SftpSession> {
        let transport = self.ensure_open().await?;
        if self.sftp.is_none() {
            self.sftp = Some(
                transport
                    .open_sftp()
                    .await
                    .with_context(|| format!("Failed to open sftp session on {}", self.spec))?,
            );
        }
        self.sftp
            .as_ref()
            .context("sftp session vanished after initialization")
    }

    /// Forward a locally-listening address to `remote` on the far side
    /// (`-L` style). The returned handle reports the bound local address
    /// and stops the session.
    pub async fn forward_local(
        &mut self,
        listen: impl Into<ForwardTarget>,
        remote: impl Into<ForwardTarget>,
    ) -> Result<ForwardHandle> {
        let transport = self.ensure_open().await?;
        start_local_forward(transport, listen.into(), remote.into(), self.forwarding.clone()).await
    }

    /// Forward a remotely-listening address back to `local` here
    /// (`-R` style).
    pub async fn forward_remote(
        &mut self,
        remote: impl Into<ForwardTarget>,
        local: impl Into<ForwardTarget>,
    ) -> Result<ForwardHandle> {
        let transport = self.ensure_open().await?;
        start_remote_forward(transport, remote.into(), local.into(), self.forwarding.clone()).await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if matches!(self.state, ConnectionState::Open) {
            // The transport closes when its last handle drops; an
            // explicit close() is still the reliable path.
            debug!("connection to {} dropped while open", self.spec);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("spec", &self.spec)
            .field("state", &self.state)
            .field("gateway_depth", &self.spec.gateway_depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn spec(host: &str) -> EndpointSpec {
        EndpointSpec {
            original_host: host.to_string(),
            host: host.to_string(),
            user: "deploy".to_string(),
            port: 22,
            gateway: None,
            forward_agent: false,
            connect_timeout: None,
            connect_options: HashMap::new(),
        }
    }

    #[test]
    fn test_new_connection_starts_closed() {
        let conn = Connection::new(spec("web"), AuthMethod::with_password("pw"));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.is_open());
        assert!(conn.transport().is_none());
    }

    #[tokio::test]
    async fn test_close_when_closed_is_noop() {
        let mut conn = Connection::new(spec("web"), AuthMethod::with_password("pw"));
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}
