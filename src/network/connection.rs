// Copyright 2025 jonefeewang@gmail.com
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

use std::io::{self, ErrorKind};
use std::net::{IpAddr, Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use socket2::SockRef;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::pool::{ReadContext, WriteContext};
use crate::service::ServerResources;
use crate::{AppError, AppResult};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One accepted client socket.
///
/// Reads and writes go through the shared stream by reference: the receive
/// task waits on readiness while senders write, so neither side needs to own
/// a split half. `close` shuts the socket down at once; the descriptor itself
/// is released when the last `Arc<Connection>` is dropped.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    identity: String,
    remote_addr: SocketAddr,
    stream: TcpStream,
    alive: AtomicBool,
    unit_of_order: usize,
    last_active: Mutex<DateTime<Utc>>,
    cancel: CancellationToken,
    // serializes overlapping sends so payloads never interleave on the wire
    send_order: tokio::sync::Mutex<()>,
    owner: Weak<ServerResources>,
}

impl Connection {
    pub(crate) fn new(
        stream: TcpStream,
        remote_addr: SocketAddr,
        unit_of_order: usize,
        cancel: CancellationToken,
        owner: Weak<ServerResources>,
    ) -> Self {
        Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            identity: remote_addr.to_string(),
            remote_addr,
            stream,
            alive: AtomicBool::new(true),
            unit_of_order,
            last_active: Mutex::new(Utc::now()),
            cancel,
            send_order: tokio::sync::Mutex::new(()),
            owner,
        }
    }

    /// Process-wide unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// `ip:port` of the peer.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn remote_ip_address(&self) -> IpAddr {
        self.remote_addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.remote_addr.port()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// The ordering lane this connection was assigned at accept time.
    pub fn unit_of_order(&self) -> usize {
        self.unit_of_order
    }

    /// Last time data moved in either direction. Advisory only.
    pub fn last_active(&self) -> DateTime<Utc> {
        *self.last_active.lock()
    }

    /// Alive and the transport still has a peer.
    pub fn is_connected(&self) -> bool {
        self.is_alive() && self.stream.peer_addr().is_ok()
    }

    /// Sends `data` through the owning server.
    ///
    /// The payload is written in `buffer_size` chunks; sends on one connection
    /// are written one after another in call order. A transport error closes
    /// the connection and is returned.
    pub async fn send(self: &Arc<Self>, data: impl Into<Bytes>) -> AppResult<()> {
        match self.owner.upgrade() {
            Some(owner) => owner.send(self, data.into()).await,
            None => Err(AppError::NotConnected(self.identity.clone())),
        }
    }

    /// Closes the connection. Only the first call has any effect.
    ///
    /// The socket is shut down in both directions, the unit of order is given
    /// back and the receive task is woken so it can hand back its pooled
    /// resources and report the disconnect.
    pub fn close(&self) {
        if self
            .alive
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        // the peer may already be gone
        if let Err(err) = SockRef::from(&self.stream).shutdown(Shutdown::Both) {
            trace!("shutdown of {} failed: {}", self.identity, err);
        }
        self.cancel.cancel();
        if let Some(owner) = self.owner.upgrade() {
            owner.release_connection(self);
        }
        debug!("connection {} closed", self.identity);
    }

    fn touch(&self) {
        *self.last_active.lock() = Utc::now();
    }

    /// Reads once into the context's buffer slot.
    ///
    /// Returns `Ok(0)` when the peer closed the stream or the connection was
    /// closed locally.
    pub(crate) async fn receive(&self, context: &mut ReadContext) -> io::Result<usize> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(0),
                ready = self.stream.readable() => ready?,
            }
            match self.stream.try_read(context.buffer_mut()) {
                Ok(n) => {
                    context.set_count(n);
                    if n > 0 {
                        self.touch();
                    }
                    return Ok(n);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(err),
            }
        }
    }

    pub(crate) async fn lock_send_order(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.send_order.lock().await
    }

    /// Writes the context's pending request, one buffer slot at a time.
    /// Returns the number of transport writes it took.
    pub(crate) async fn transmit(&self, context: &mut WriteContext) -> io::Result<usize> {
        let mut request = context.take_user_token().ok_or_else(|| {
            io::Error::new(ErrorKind::InvalidInput, "write context has no request")
        })?;

        let mut writes = 0;
        let mut result = Ok(());
        while !request.is_complete() {
            let len = {
                let chunk = request.next_chunk(context.capacity());
                context.buffer_mut()[..chunk.len()].copy_from_slice(chunk);
                chunk.len()
            };
            match self.write_some(&context.buffer()[..len]).await {
                Ok(0) => {
                    result = Err(io::Error::from(ErrorKind::WriteZero));
                    break;
                }
                Ok(sent) => {
                    writes += 1;
                    context.set_count(sent);
                    request.advance(sent);
                    self.touch();
                }
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        context.set_user_token(request);
        result.map(|()| writes)
    }

    async fn write_some(&self, buf: &[u8]) -> io::Result<usize> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(io::Error::from(ErrorKind::NotConnected)),
                ready = self.stream.writable() => ready?,
            }
            match self.stream.try_write(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(err),
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        trace!("connection {} dropped", self.identity);
    }
}
