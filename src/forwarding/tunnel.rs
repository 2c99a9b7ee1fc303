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

//! Bidirectional tunnel worker
//!
//! Copies bytes between one socket and one channel until either side
//! closes, an I/O error occurs, or the owning session signals stop. Both
//! directions run in a single `select!` loop, so a stop signal is
//! observed without waiting on either endpoint to produce data.

use std::io;
use std::time::Instant;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::ForwardingConfig;
use crate::transport::TransportError;

/// Byte counters for one tunnel.
#[derive(Debug)]
pub struct TunnelStats {
    /// Bytes copied socket → channel.
    pub bytes_outbound: u64,
    /// Bytes copied channel → socket.
    pub bytes_inbound: u64,
    pub started_at: Instant,
}

impl TunnelStats {
    fn new() -> Self {
        Self {
            bytes_outbound: 0,
            bytes_inbound: 0,
            started_at: Instant::now(),
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_outbound + self.bytes_inbound
    }

    pub fn duration(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

/// Why a tunnel worker failed. Captured by the owning session and
/// reported in aggregate; a single worker failure never takes the
/// session down.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("socket read failed: {0}")]
    SocketRead(#[source] io::Error),

    #[error("socket write failed: {0}")]
    SocketWrite(#[source] io::Error),

    #[error("channel read failed: {0}")]
    ChannelRead(#[source] io::Error),

    #[error("channel write failed: {0}")]
    ChannelWrite(#[source] io::Error),

    #[error("could not open channel to {target}: {source}")]
    ChannelOpen {
        target: String,
        #[source]
        source: TransportError,
    },

    #[error("could not connect to local destination {target}: {source}")]
    LocalConnect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("worker task failed: {0}")]
    Worker(String),
}

/// Bidirectional tunnel between a socket and a channel.
pub struct Tunnel;

impl Tunnel {
    /// Pump bytes both ways until one side closes, errors, or `cancel`
    /// fires. Peer disconnects (zero-byte read, reset, broken pipe) end
    /// the tunnel cleanly; other I/O errors are reported.
    pub async fn run<S, C>(
        mut socket: S,
        mut channel: C,
        config: ForwardingConfig,
        cancel: CancellationToken,
    ) -> Result<TunnelStats, TunnelError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
        C: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let mut stats = TunnelStats::new();
        let mut socket_buf = vec![0u8; config.socket_chunk_size];
        let mut channel_buf = vec![0u8; config.channel_chunk_size];

        tracing::debug!("tunnel started");

        loop {
            tokio::select! {
                result = socket.read(&mut socket_buf) => match result {
                    Ok(0) => {
                        tracing::trace!("socket closed, ending tunnel");
                        break;
                    }
                    Ok(n) => {
                        channel
                            .write_all(&socket_buf[..n])
                            .await
                            .map_err(TunnelError::ChannelWrite)?;
                        stats.bytes_outbound += n as u64;
                    }
                    Err(e) if is_disconnect(&e) => {
                        tracing::trace!("socket disconnected: {e}");
                        break;
                    }
                    Err(e) => return Err(TunnelError::SocketRead(e)),
                },
                result = channel.read(&mut channel_buf) => match result {
                    Ok(0) => {
                        tracing::trace!("channel closed, ending tunnel");
                        break;
                    }
                    Ok(n) => {
                        socket
                            .write_all(&channel_buf[..n])
                            .await
                            .map_err(TunnelError::SocketWrite)?;
                        stats.bytes_inbound += n as u64;
                    }
                    Err(e) if is_disconnect(&e) => {
                        tracing::trace!("channel disconnected: {e}");
                        break;
                    }
                    Err(e) => return Err(TunnelError::ChannelRead(e)),
                },
                _ = cancel.cancelled() => {
                    tracing::trace!("tunnel cancelled");
                    break;
                }
            }
        }

        let _ = channel.shutdown().await;
        let _ = socket.shutdown().await;

        tracing::debug!(
            "tunnel done: {} bytes out, {} bytes in, {:?}",
            stats.bytes_outbound,
            stats.bytes_inbound,
            stats.duration()
        );
        Ok(stats)
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}
