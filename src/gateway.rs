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

//! Gateway establishment
//!
//! Produces the duplex byte stream a gatewayed connection hands to its
//! transport handshake instead of a raw socket:
//!
//! - ProxyJump: the gateway endpoint is opened as a full nested
//!   connection (depth-first through its own gateway chain), then a
//!   `direct-tcpip` channel toward the target is the stream. The nested
//!   connection must outlive the outer one, so it is returned to the
//!   caller for ownership.
//! - ProxyCommand: the command is spawned under `sh -c` with OpenSSH
//!   `%h`/`%p` tokens expanded; the child's stdin/stdout are the stream.
//!
//! A gateway failure is the outer connection's failure. There is no
//! fallback to a direct connection.

use anyhow::{Context, Result};
use std::pin::Pin;
use std::process::Stdio;
use std::task::{self, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

use crate::connection::Connection;
use crate::endpoint::{EndpointSpec, Gateway};
use crate::transport::{AuthMethod, BoxedChannel, ServerCheckMethod, Transport};

/// Establish the stream carrying the outer handshake for `target`.
///
/// Returns the stream and, for ProxyJump gateways, the opened inner
/// connection which the caller must keep alive for the stream's
/// lifetime and close when done.
pub(crate) async fn establish(
    target: &EndpointSpec,
    gateway: &Gateway,
    auth: &AuthMethod,
    server_check: &ServerCheckMethod,
) -> Result<(BoxedChannel, Option<Box<Connection>>)> {
    match gateway {
        Gateway::Endpoint(spec) => {
            debug!("opening gateway {} for {}", spec, target);
            let mut inner =
                Connection::new((**spec).clone(), auth.clone()).with_server_check(server_check.clone());
            Box::pin(inner.open())
                .await
                .with_context(|| format!("Failed to open gateway connection to {spec}"))?;

            let transport = inner
                .transport()
                .context("gateway connection is missing its transport")?;
            let channel = transport
                .open_direct_channel(&target.host, target.port, None)
                .await
                .with_context(|| {
                    format!(
                        "Failed to open gateway channel from {} toward {}:{}",
                        spec, target.host, target.port
                    )
                })?;

            Ok((channel, Some(Box::new(inner))))
        }
        Gateway::Command(template) => {
            let command = expand_tokens(template, &target.host, target.port);
            debug!("spawning gateway command: {command}");
            let stream = CommandStream::spawn(&command)
                .with_context(|| format!("Failed to spawn gateway command '{command}'"))?;
            Ok((Box::new(stream), None))
        }
    }
}

/// Expand the OpenSSH tokens a proxy command may carry: `%h` (resolved
/// target host), `%p` (target port), `%%` (a literal `%`).
fn expand_tokens(template: &str, host: &str, port: u16) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('h') => out.push_str(host),
            Some('p') => out.push_str(&port.to_string()),
            Some('%') => out.push('%'),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

/// A proxy subprocess's stdin/stdout as one duplex stream.
///
/// The child is killed when the stream is dropped; stderr is inherited
/// so diagnostics from the proxy reach the user.
pub struct CommandStream {
    _child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl CommandStream {
    fn spawn(command: &str) -> std::io::Result<Self> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "child stdin unavailable")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "child stdout unavailable")
        })?;

        Ok(Self {
            _child: child,
            stdin,
            stdout,
        })
    }
}

impl AsyncRead for CommandStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for CommandStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stdin).poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdin).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdin).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_expand_tokens() {
        assert_eq!(
            expand_tokens("ssh -W %h:%p relay", "db01", 2222),
            "ssh -W db01:2222 relay"
        );
        assert_eq!(expand_tokens("nc %h %p", "web", 22), "nc web 22");
        assert_eq!(expand_tokens("100%% %h", "h", 1), "100% h");
        assert_eq!(expand_tokens("no tokens", "h", 1), "no tokens");
        assert_eq!(expand_tokens("trailing %", "h", 1), "trailing %");
        assert_eq!(expand_tokens("unknown %z", "h", 1), "unknown %z");
    }

    #[tokio::test]
    async fn test_command_stream_round_trip() {
        // cat bridges stdin to stdout, the simplest possible proxy.
        let mut stream = CommandStream::spawn("cat").unwrap();
        stream.write_all(b"through the pipe").await.unwrap();
        stream.flush().await.unwrap();

        let mut buf = [0u8; 16];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"through the pipe");
    }

    #[tokio::test]
    async fn test_command_stream_eof_on_exit() {
        let mut stream = CommandStream::spawn("true").unwrap();
        let mut buf = Vec::new();
        let n = stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }
}
