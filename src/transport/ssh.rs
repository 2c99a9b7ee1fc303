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

//! russh-backed transport
//!
//! Wraps an authenticated `russh::client::Handle` behind the
//! [`Transport`](super::Transport) trait. Two handshake entry points
//! exist: [`connect_direct`] dials a plain TCP socket, and
//! [`connect_over_stream`] runs the handshake over an arbitrary duplex
//! stream (a gateway channel or a proxy subprocess's pipes).
//!
//! Inbound `forwarded-tcpip` channels are routed from the protocol
//! handler into per-forward accept queues keyed by the bound address.

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::Channel;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use zeroize::Zeroizing;

use super::{BoxedChannel, ForwardedChannel, RemoteForward, Transport, TransportError};
use crate::endpoint::EndpointSpec;

/// An authentication token used when opening a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthMethod {
    Password(Zeroizing<String>),
    PrivateKeyFile {
        key_file_path: PathBuf,
        key_pass: Option<Zeroizing<String>>,
    },
    #[cfg(not(target_os = "windows"))]
    Agent,
}

impl AuthMethod {
    pub fn with_password(password: &str) -> Self {
        Self::Password(Zeroizing::new(password.to_string()))
    }

    pub fn with_key_file<T: AsRef<Path>>(key_file_path: T, passphrase: Option<&str>) -> Self {
        Self::PrivateKeyFile {
            key_file_path: key_file_path.as_ref().to_path_buf(),
            key_pass: passphrase.map(|p| Zeroizing::new(p.to_string())),
        }
    }

    /// Authenticate with every identity the SSH agent offers, in order.
    /// Requires a running agent and `SSH_AUTH_SOCK`.
    #[cfg(not(target_os = "windows"))]
    pub fn with_agent() -> Self {
        Self::Agent
    }
}

/// Server host key verification policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ServerCheckMethod {
    /// Accept any host key. For testing only.
    NoCheck,
    /// base64 encoded key without the type prefix or hostname suffix.
    PublicKey(String),
    /// `~/.ssh/known_hosts`
    DefaultKnownHostsFile,
    /// A specific known_hosts file path.
    KnownHostsFile(String),
}

type ForwardTable = Arc<Mutex<HashMap<(String, u32), mpsc::UnboundedSender<ForwardedChannel>>>>;

/// SSH client handler: host key verification plus forwarded-tcpip
/// channel routing.
#[derive(Clone)]
pub struct ClientHandler {
    hostname: String,
    port: u16,
    server_check: ServerCheckMethod,
    forwards: ForwardTable,
}

impl ClientHandler {
    fn new(
        hostname: String,
        port: u16,
        server_check: ServerCheckMethod,
        forwards: ForwardTable,
    ) -> Self {
        Self {
            hostname,
            port,
            server_check,
            forwards,
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = TransportError;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        match &self.server_check {
            ServerCheckMethod::NoCheck => Ok(true),
            ServerCheckMethod::PublicKey(key) => {
                let pk = russh::keys::parse_public_key_base64(key)
                    .map_err(|_| TransportError::ServerCheckFailed)?;
                Ok(pk == *server_public_key)
            }
            ServerCheckMethod::DefaultKnownHostsFile => {
                russh::keys::check_known_hosts(&self.hostname, self.port, server_public_key)
                    .map_err(|_| TransportError::ServerCheckFailed)
            }
            ServerCheckMethod::KnownHostsFile(known_hosts_path) => {
                russh::keys::check_known_hosts_path(
                    &self.hostname,
                    self.port,
                    server_public_key,
                    known_hosts_path,
                )
                .map_err(|_| TransportError::ServerCheckFailed)
            }
        }
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let table = self.forwards.lock().await;
        // Port-0 requests are registered before the server reports the
        // chosen port; fall back to that entry until it is re-keyed.
        let sender = table
            .get(&(connected_address.to_string(), connected_port))
            .or_else(|| table.get(&(connected_address.to_string(), 0)));

        match sender {
            Some(tx) => {
                let forwarded = ForwardedChannel {
                    stream: Box::new(channel.into_stream()),
                    originator: (originator_address.to_string(), originator_port as u16),
                };
                if tx.send(forwarded).is_err() {
                    tracing::debug!(
                        "forward for {}:{} is gone, dropping inbound channel",
                        connected_address,
                        connected_port
                    );
                }
            }
            None => {
                tracing::warn!(
                    "no active forward for {}:{}, dropping inbound channel from {}:{}",
                    connected_address,
                    connected_port,
                    originator_address,
                    originator_port
                );
            }
        }
        Ok(())
    }
}

/// An open, authenticated SSH session.
#[derive(Clone)]
pub struct SshTransport {
    handle: Arc<Handle<ClientHandler>>,
    forwards: ForwardTable,
}

impl std::fmt::Debug for SshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTransport")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Dial the endpoint over TCP, perform the handshake, and authenticate.
///
/// If the name resolves to multiple addresses each is attempted in turn;
/// authentication runs once on the first successful connection.
pub async fn connect_direct(
    spec: &EndpointSpec,
    auth: AuthMethod,
    server_check: ServerCheckMethod,
) -> Result<SshTransport, TransportError> {
    let (host, port) = (spec.host.as_str(), spec.port);
    let (username, connect_timeout) = (spec.user.as_str(), spec.connect_timeout);
    let config = Arc::new(build_client_config(&spec.connect_options));
    let forwards: ForwardTable = Arc::new(Mutex::new(HashMap::new()));

    let address = format!("{host}:{port}");
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(&address)
        .await
        .map_err(|source| TransportError::AddressInvalid {
            address: address.clone(),
            source,
        })?
        .collect();

    let mut connect_res: Result<Handle<ClientHandler>, TransportError> =
        Err(TransportError::AddressInvalid {
            address: address.clone(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "could not resolve to any addresses"),
        });
    for addr in addrs {
        let handler = ClientHandler::new(
            host.to_string(),
            port,
            server_check.clone(),
            Arc::clone(&forwards),
        );
        match with_timeout(connect_timeout, client::connect(config.clone(), addr, handler)).await {
            Ok(handle) => {
                connect_res = Ok(handle);
                break;
            }
            Err(e) => connect_res = Err(e),
        }
    }
    let mut handle = connect_res?;

    authenticate(&mut handle, username, auth).await?;

    Ok(SshTransport {
        handle: Arc::new(handle),
        forwards,
    })
}

/// Perform the handshake over an already-established duplex stream and
/// authenticate. Used when a gateway supplies the byte stream instead of
/// a raw socket; the endpoint's host/port name the logical destination
/// for host key verification.
pub async fn connect_over_stream<S>(
    stream: S,
    spec: &EndpointSpec,
    auth: AuthMethod,
    server_check: ServerCheckMethod,
) -> Result<SshTransport, TransportError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let config = Arc::new(build_client_config(&spec.connect_options));
    let forwards: ForwardTable = Arc::new(Mutex::new(HashMap::new()));
    let handler = ClientHandler::new(
        spec.host.clone(),
        spec.port,
        server_check,
        Arc::clone(&forwards),
    );

    let mut handle = with_timeout(
        spec.connect_timeout,
        client::connect_stream(config, stream, handler),
    )
    .await?;

    authenticate(&mut handle, &spec.user, auth).await?;

    Ok(SshTransport {
        handle: Arc::new(handle),
        forwards,
    })
}

/// Build the transport configuration, applying recognized
/// `connect_options`. Unrecognized options are logged and skipped.
fn build_client_config(options: &HashMap<String, String>) -> client::Config {
    let mut config = client::Config::default();
    for (key, value) in options {
        let secs = value.parse::<u64>().ok();
        match (key.as_str(), secs) {
            ("keepalive_interval", Some(secs)) => {
                config.keepalive_interval = Some(Duration::from_secs(secs));
            }
            ("inactivity_timeout", Some(secs)) => {
                config.inactivity_timeout = Some(Duration::from_secs(secs));
            }
            _ => tracing::warn!("ignoring connect option '{key}={value}'"),
        }
    }
    config
}

async fn with_timeout<T, E, F>(limit: Option<Duration>, fut: F) -> Result<T, TransportError>
where
    E: Into<TransportError>,
    F: Future<Output = Result<T, E>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TransportError::ConnectTimeout(limit))?
            .map_err(Into::into),
        None => fut.await.map_err(Into::into),
    }
}

async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    username: &str,
    auth: AuthMethod,
) -> Result<(), TransportError> {
    match auth {
        AuthMethod::Password(password) => {
            let result = handle.authenticate_password(username, &**password).await?;
            if !result.success() {
                return Err(TransportError::PasswordWrong);
            }
        }
        AuthMethod::PrivateKeyFile {
            key_file_path,
            key_pass,
        } => {
            let key = russh::keys::load_secret_key(key_file_path, key_pass.as_ref().map(|p| &***p))
                .map_err(TransportError::KeyInvalid)?;
            let result = handle
                .authenticate_publickey(
                    username,
                    russh::keys::PrivateKeyWithHashAlg::new(
                        Arc::new(key),
                        handle.best_supported_rsa_hash().await?.flatten(),
                    ),
                )
                .await?;
            if !result.success() {
                return Err(TransportError::KeyAuthFailed);
            }
        }
        #[cfg(not(target_os = "windows"))]
        AuthMethod::Agent => {
            let mut agent = russh::keys::agent::client::AgentClient::connect_env()
                .await
                .map_err(|_| TransportError::AgentConnectionFailed)?;
            let identities = agent
                .request_identities()
                .await
                .map_err(|_| TransportError::AgentConnectionFailed)?;
            if identities.is_empty() {
                return Err(TransportError::AgentAuthFailed);
            }

            let mut authenticated = false;
            for identity in identities {
                let result = handle
                    .authenticate_publickey_with(
                        username,
                        identity,
                        handle.best_supported_rsa_hash().await?.flatten(),
                        &mut agent,
                    )
                    .await;
                if matches!(result, Ok(r) if r.success()) {
                    authenticated = true;
                    break;
                }
            }
            if !authenticated {
                return Err(TransportError::AgentAuthFailed);
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Transport for SshTransport {
    async fn open_direct_channel(
        &self,
        host: &str,
        port: u16,
        originator: Option<SocketAddr>,
    ) -> Result<BoxedChannel, TransportError> {
        let (orig_addr, orig_port) = originator
            .map(|addr| (addr.ip().to_string(), u32::from(addr.port())))
            .unwrap_or_else(|| ("127.0.0.1".to_string(), 0));

        let channel = self
            .handle
            .channel_open_direct_tcpip(host, u32::from(port), orig_addr, orig_port)
            .await?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn request_remote_forward(
        &self,
        host: &str,
        port: u16,
    ) -> Result<RemoteForward, TransportError> {
        let key = (host.to_string(), u32::from(port));
        let (tx, rx) = mpsc::unbounded_channel();
        self.forwards.lock().await.insert(key.clone(), tx);

        let bound = match self.handle.tcpip_forward(host, u32::from(port)).await {
            Ok(bound) => bound,
            Err(russh::Error::RequestDenied) => {
                self.forwards.lock().await.remove(&key);
                return Err(TransportError::RemoteForwardDenied {
                    host: host.to_string(),
                    port,
                });
            }
            Err(e) => {
                self.forwards.lock().await.remove(&key);
                return Err(e.into());
            }
        };

        let bound_port = if port == 0 { bound as u16 } else { port };
        if u32::from(bound_port) != key.1 {
            let mut table = self.forwards.lock().await;
            if let Some(tx) = table.remove(&key) {
                table.insert((host.to_string(), u32::from(bound_port)), tx);
            }
        }

        tracing::info!("remote forward bound on {host}:{bound_port}");
        Ok(RemoteForward::new(bound_port, rx))
    }

    async fn cancel_remote_forward(&self, host: &str, port: u16) -> Result<(), TransportError> {
        self.forwards
            .lock()
            .await
            .remove(&(host.to_string(), u32::from(port)));
        self.handle
            .cancel_tcpip_forward(host, u32::from(port))
            .await?;
        Ok(())
    }

    async fn open_sftp(&self) -> Result<russh_sftp::client::SftpSession, TransportError> {
        let channel = self.handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        russh_sftp::client::SftpSession::new(channel.into_stream())
            .await
            .map_err(TransportError::Sftp)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}
