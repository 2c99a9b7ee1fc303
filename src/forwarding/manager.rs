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

//! Forwarding session supervision
//!
//! One supervisor task owns one forwarding session: it accepts new work
//! (local connections or inbound remote channels), spawns one tunnel
//! worker per connection, and on stop joins every worker before
//! reporting. Worker failures are collected along the way and raised
//! together from [`ForwardHandle::stop`] as one [`SessionFailure`], so
//! the caller sees every concurrent error instead of just the first.

use anyhow::{Context, Result};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::tunnel::{Tunnel, TunnelError, TunnelStats};
use super::{ForwardTarget, ForwardingConfig};
use crate::transport::{RemoteForward, Transport};

/// Aggregate failure of a forwarding session.
///
/// Carries every worker error captured during the session's lifetime,
/// in the order they occurred.
#[derive(Debug)]
pub struct SessionFailure {
    pub errors: Vec<TunnelError>,
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "forwarding session ended with {} worker failure(s)",
            self.errors.len()
        )?;
        for (i, error) in self.errors.iter().enumerate() {
            write!(f, "\n  [{}] {error}", i + 1)?;
        }
        Ok(())
    }
}

impl std::error::Error for SessionFailure {}

/// Handle to one running forwarding session.
///
/// Dropping the handle signals the session to stop (best effort);
/// calling [`stop`](Self::stop) additionally joins every worker and
/// returns the aggregated failures.
#[derive(Debug)]
pub struct ForwardHandle {
    id: Uuid,
    local_addr: Option<SocketAddr>,
    bound_port: Option<u16>,
    cancel: CancellationToken,
    supervisor: Option<JoinHandle<Result<(), SessionFailure>>>,
}

impl ForwardHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The address the local listener actually bound (local forwards
    /// only). Useful when port 0 was requested.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// The port the remote side bound (remote forwards only).
    pub fn bound_port(&self) -> Option<u16> {
        self.bound_port
    }

    /// Stop the session: signal every worker, join them all, release the
    /// listener or remote forward, and raise the collected worker
    /// failures, if any.
    pub async fn stop(mut self) -> Result<(), SessionFailure> {
        self.cancel.cancel();
        let Some(task) = self.supervisor.take() else {
            return Ok(());
        };
        match task.await {
            Ok(result) => result,
            Err(e) => Err(SessionFailure {
                errors: vec![TunnelError::Worker(format!("supervisor failed: {e}"))],
            }),
        }
    }
}

impl Drop for ForwardHandle {
    fn drop(&mut self) {
        if self.supervisor.is_some() {
            self.cancel.cancel();
        }
    }
}

/// Start a local-forward session: listen on `listen`, tunnel each
/// accepted connection toward `target` on the remote side.
pub async fn start_local_forward(
    transport: Arc<dyn Transport>,
    listen: ForwardTarget,
    target: ForwardTarget,
    config: ForwardingConfig,
) -> Result<ForwardHandle> {
    let listener = TcpListener::bind((listen.host.as_str(), listen.port))
        .await
        .with_context(|| format!("Failed to bind local forward listener on {listen}"))?;
    let local_addr = listener
        .local_addr()
        .context("Failed to read bound listener address")?;

    let id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    info!("local forward {id}: {local_addr} → {target}");

    let supervisor = tokio::spawn(run_local(
        listener,
        transport,
        target,
        config,
        cancel.clone(),
    ));

    Ok(ForwardHandle {
        id,
        local_addr: Some(local_addr),
        bound_port: None,
        cancel,
        supervisor: Some(supervisor),
    })
}

/// Start a remote-forward session: the remote side listens on `remote`,
/// each inbound channel is tunneled to `local` here.
pub async fn start_remote_forward(
    transport: Arc<dyn Transport>,
    remote: ForwardTarget,
    local: ForwardTarget,
    config: ForwardingConfig,
) -> Result<ForwardHandle> {
    let forward = transport
        .request_remote_forward(&remote.host, remote.port)
        .await
        .with_context(|| format!("Failed to request remote forward on {remote}"))?;
    let bound = ForwardTarget::new(remote.host.clone(), forward.bound_port);

    let id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    info!("remote forward {id}: {bound} ← {local}");

    let bound_port = bound.port;
    let supervisor = tokio::spawn(run_remote(
        transport,
        forward,
        bound,
        local,
        config,
        cancel.clone(),
    ));

    Ok(ForwardHandle {
        id,
        local_addr: None,
        bound_port: Some(bound_port),
        cancel,
        supervisor: Some(supervisor),
    })
}

async fn run_local(
    listener: TcpListener,
    transport: Arc<dyn Transport>,
    target: ForwardTarget,
    config: ForwardingConfig,
    cancel: CancellationToken,
) -> Result<(), SessionFailure> {
    let mut workers: Vec<JoinHandle<Result<TunnelStats, TunnelError>>> = Vec::new();
    let mut errors: Vec<TunnelError> = Vec::new();

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((socket, peer)) => {
                    trace!("accepted connection from {peer}");
                    match transport
                        .open_direct_channel(&target.host, target.port, Some(peer))
                        .await
                    {
                        Ok(channel) => {
                            workers.push(tokio::spawn(Tunnel::run(
                                socket,
                                channel,
                                config.clone(),
                                cancel.clone(),
                            )));
                        }
                        Err(e) => {
                            warn!("channel open toward {target} failed: {e}");
                            errors.push(TunnelError::ChannelOpen {
                                target: target.to_string(),
                                source: e,
                            });
                        }
                    }
                }
                Err(e) => {
                    warn!("accept failed: {e}");
                    // Pause so a persistent accept error cannot spin.
                    tokio::select! {
                        _ = tokio::time::sleep(config.poll_interval) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
            },
            _ = cancel.cancelled() => break,
        }
    }

    drop(listener);
    debug!("local forward listener released");
    join_workers(workers, errors).await
}

async fn run_remote(
    transport: Arc<dyn Transport>,
    mut forward: RemoteForward,
    remote: ForwardTarget,
    local: ForwardTarget,
    config: ForwardingConfig,
    cancel: CancellationToken,
) -> Result<(), SessionFailure> {
    let mut workers: Vec<JoinHandle<Result<TunnelStats, TunnelError>>> = Vec::new();
    let mut errors: Vec<TunnelError> = Vec::new();

    loop {
        tokio::select! {
            inbound = forward.accept() => match inbound {
                Some(channel) => {
                    trace!(
                        "inbound remote connection from {}:{}",
                        channel.originator.0,
                        channel.originator.1
                    );
                    match TcpStream::connect((local.host.as_str(), local.port)).await {
                        Ok(socket) => {
                            workers.push(tokio::spawn(Tunnel::run(
                                socket,
                                channel.stream,
                                config.clone(),
                                cancel.clone(),
                            )));
                        }
                        Err(e) => {
                            warn!("local dial toward {local} failed: {e}");
                            errors.push(TunnelError::LocalConnect {
                                target: local.to_string(),
                                source: e,
                            });
                        }
                    }
                }
                None => {
                    debug!("remote forward accept queue closed");
                    break;
                }
            },
            _ = cancel.cancelled() => break,
        }
    }

    // Release the remote listener before joining the workers.
    if let Err(e) = transport
        .cancel_remote_forward(&remote.host, remote.port)
        .await
    {
        warn!("failed to cancel remote forward {remote}: {e}");
    }

    join_workers(workers, errors).await
}

async fn join_workers(
    workers: Vec<JoinHandle<Result<TunnelStats, TunnelError>>>,
    mut errors: Vec<TunnelError>,
) -> Result<(), SessionFailure> {
    for worker in workers {
        match worker.await {
            Ok(Ok(stats)) => trace!("worker finished, {} bytes", stats.total_bytes()),
            Ok(Err(e)) => errors.push(e),
            Err(e) => errors.push(TunnelError::Worker(e.to_string())),
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(SessionFailure { errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_session_failure_display_lists_every_error() {
        let failure = SessionFailure {
            errors: vec![
                TunnelError::Worker("first".to_string()),
                TunnelError::Worker("second".to_string()),
            ],
        };
        let rendered = failure.to_string();
        assert!(rendered.contains("2 worker failure(s)"));
        assert!(rendered.contains("first"));
        assert!(rendered.contains("second"));
    }

    #[tokio::test]
    async fn test_dropping_handle_cancels_session() {
        let cancel = CancellationToken::new();
        let observed = cancel.clone();
        let supervisor = tokio::spawn(async move {
            observed.cancelled().await;
            Ok(())
        });

        let handle = ForwardHandle {
            id: Uuid::new_v4(),
            local_addr: None,
            bound_port: None,
            cancel: cancel.clone(),
            supervisor: Some(supervisor),
        };

        drop(handle);
        tokio::time::timeout(Duration::from_secs(1), cancel.cancelled())
            .await
            .expect("drop should cancel the session");
    }
}
