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

//! Transport boundary
//!
//! The SSH wire protocol is owned by the transport implementation; this
//! crate only requires the operations named here: opening `direct-tcpip`
//! channels, requesting/cancelling remote port forwards with an accept
//! queue for inbound channels, and closing the session. Channels are
//! plain duplex byte streams.
//!
//! [`ssh::SshTransport`] is the production implementation. Anything else
//! satisfying [`Transport`] (e.g. an in-memory pipe transport in tests)
//! can drive the forwarding engine unchanged.

pub mod ssh;

pub use ssh::{AuthMethod, ServerCheckMethod, SshTransport};

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// A duplex byte stream: one multiplexed channel of a transport.
pub trait ChannelIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ChannelIo for T {}

/// An owned, boxed channel stream.
pub type BoxedChannel = Box<dyn ChannelIo>;

/// An inbound connection delivered through a remote port forward.
pub struct ForwardedChannel {
    pub stream: BoxedChannel,
    /// Address and port of the peer that connected on the remote side.
    pub originator: (String, u16),
}

impl std::fmt::Debug for ForwardedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardedChannel")
            .field("originator", &self.originator)
            .finish()
    }
}

/// Handle for one active remote port forward.
///
/// Holds the accept queue the transport pushes inbound channels into.
/// Dropping the handle drops the queue; channels arriving afterwards are
/// discarded by the transport.
pub struct RemoteForward {
    /// The port the remote side actually bound. Differs from the
    /// requested port when 0 was requested.
    pub bound_port: u16,
    pub(crate) incoming: mpsc::UnboundedReceiver<ForwardedChannel>,
}

impl RemoteForward {
    pub fn new(bound_port: u16, incoming: mpsc::UnboundedReceiver<ForwardedChannel>) -> Self {
        Self {
            bound_port,
            incoming,
        }
    }

    /// Wait for the next inbound connection. `None` means the transport
    /// side of the queue is gone (session closed or forward cancelled).
    pub async fn accept(&mut self) -> Option<ForwardedChannel> {
        self.incoming.recv().await
    }
}

/// Errors surfaced at the transport boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not resolve '{address}': {source}")]
    AddressInvalid {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("connection timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error(transparent)]
    Ssh(#[from] russh::Error),

    #[error("server host key rejected")]
    ServerCheckFailed,

    #[error("password authentication failed")]
    PasswordWrong,

    #[error("private key is invalid: {0}")]
    KeyInvalid(#[source] russh::keys::Error),

    #[error("key authentication failed")]
    KeyAuthFailed,

    #[error("could not reach the SSH agent")]
    AgentConnectionFailed,

    #[error("SSH agent offered no usable identity")]
    AgentAuthFailed,

    #[error("remote forward for {host}:{port} was denied")]
    RemoteForwardDenied { host: String, port: u16 },

    #[error("auxiliary session failed: {0}")]
    Sftp(#[source] russh_sftp::client::error::Error),

    #[error("auxiliary sessions are not supported by this transport")]
    AuxiliaryUnsupported,

    #[error("transport is closed")]
    Closed,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// An already-authenticated, multiplexing SSH session.
///
/// Channel opening is an internally-synchronized mutating operation; a
/// transport is shared freely across tunnel workers and gateway
/// establishment, and every channel or socket opened through it is
/// exclusively owned by exactly one consumer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a `direct-tcpip` channel toward `host:port` on the far side.
    /// `originator` identifies the local peer on whose behalf the channel
    /// is opened, when one exists.
    async fn open_direct_channel(
        &self,
        host: &str,
        port: u16,
        originator: Option<SocketAddr>,
    ) -> Result<BoxedChannel, TransportError>;

    /// Ask the remote side to listen on `host:port` and hand inbound
    /// connections back as channels. Requesting port 0 lets the server
    /// pick; the chosen port is reported on the returned handle.
    async fn request_remote_forward(
        &self,
        host: &str,
        port: u16,
    ) -> Result<RemoteForward, TransportError>;

    /// Release a remote listener obtained via
    /// [`request_remote_forward`](Transport::request_remote_forward).
    async fn cancel_remote_forward(&self, host: &str, port: u16) -> Result<(), TransportError>;

    /// Open the auxiliary SFTP session. Transports without SFTP support
    /// report [`TransportError::AuxiliaryUnsupported`].
    async fn open_sftp(&self) -> Result<russh_sftp::client::SftpSession, TransportError> {
        Err(TransportError::AuxiliaryUnsupported)
    }

    /// Terminate the session.
    async fn close(&self) -> Result<(), TransportError>;

    fn is_closed(&self) -> bool;
}
