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

//! Shared test fixtures: an in-memory transport built on duplex pipes.

#![allow(dead_code)]

use async_trait::async_trait;
use hawser::endpoint::EndpointSpec;
use hawser::transport::{
    BoxedChannel, ForwardedChannel, RemoteForward, Transport, TransportError,
};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

/// The far side of a direct channel opened through [`MemoryTransport`],
/// as the remote peer would see it.
pub struct RemoteEnd {
    pub target: (String, u16),
    pub stream: DuplexStream,
}

/// An in-memory [`Transport`]: direct channels are duplex pipes whose
/// far ends are handed to the test, remote forwards are injectable
/// queues.
pub struct MemoryTransport {
    direct_opened: AtomicUsize,
    close_calls: AtomicUsize,
    closed: AtomicBool,
    fail_direct: AtomicBool,
    direct_tx: mpsc::UnboundedSender<RemoteEnd>,
    remote_forwards: Mutex<HashMap<(String, u16), mpsc::UnboundedSender<ForwardedChannel>>>,
    cancelled: Mutex<Vec<(String, u16)>>,
}

impl MemoryTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (direct_tx, direct_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            direct_opened: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            fail_direct: AtomicBool::new(false),
            direct_tx,
            remote_forwards: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(Vec::new()),
        });
        (transport, direct_rx)
    }

    /// Make every subsequent direct channel open fail.
    pub fn fail_direct_channels(&self, fail: bool) {
        self.fail_direct.store(fail, Ordering::SeqCst);
    }

    pub fn direct_opened(&self) -> usize {
        self.direct_opened.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// The injection side of an active remote forward's accept queue.
    pub fn remote_sender(
        &self,
        host: &str,
        port: u16,
    ) -> Option<mpsc::UnboundedSender<ForwardedChannel>> {
        self.remote_forwards
            .lock()
            .unwrap()
            .get(&(host.to_string(), port))
            .cloned()
    }

    pub fn cancelled_forwards(&self) -> Vec<(String, u16)> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open_direct_channel(
        &self,
        host: &str,
        port: u16,
        _originator: Option<SocketAddr>,
    ) -> Result<BoxedChannel, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.fail_direct.load(Ordering::SeqCst) {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected channel failure",
            )));
        }

        let (near, far) = tokio::io::duplex(64 * 1024);
        self.direct_opened.fetch_add(1, Ordering::SeqCst);
        let _ = self.direct_tx.send(RemoteEnd {
            target: (host.to_string(), port),
            stream: far,
        });
        Ok(Box::new(near))
    }

    async fn request_remote_forward(
        &self,
        host: &str,
        port: u16,
    ) -> Result<RemoteForward, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        // Mimic a server picking a port for 0 requests.
        let bound_port = if port == 0 { 45022 } else { port };
        let (tx, rx) = mpsc::unbounded_channel();
        self.remote_forwards
            .lock()
            .unwrap()
            .insert((host.to_string(), bound_port), tx);
        Ok(RemoteForward::new(bound_port, rx))
    }

    async fn cancel_remote_forward(&self, host: &str, port: u16) -> Result<(), TransportError> {
        self.remote_forwards
            .lock()
            .unwrap()
            .remove(&(host.to_string(), port));
        self.cancelled
            .lock()
            .unwrap()
            .push((host.to_string(), port));
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Echo every byte back on each direct channel's far end. Returns a
/// counter of channels served.
pub fn spawn_echo(mut direct_rx: mpsc::UnboundedReceiver<RemoteEnd>) -> Arc<AtomicUsize> {
    let served = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&served);
    tokio::spawn(async move {
        while let Some(end) = direct_rx.recv().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let (mut reader, mut writer) = tokio::io::split(end.stream);
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    served
}

/// A minimal spec for tests that never dial a real host.
pub fn test_spec(host: &str) -> EndpointSpec {
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
