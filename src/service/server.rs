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

use std::fmt;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument, Span};

use crate::network::{guarded, socket, Connection, Consumer, WriteRequest};
use crate::pool::{BufferManager, ContextPool, ReadContext, WriteContext};
use crate::utils::UnitOfOrderAllocator;
use crate::{AppError, AppResult, ServerSettings};

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// State shared by the server and every connection it accepted.
///
/// Nothing in here is generic over the consumer, so a [`Connection`] can hold
/// a weak reference to it to send and to give back its resources on close.
#[derive(Debug)]
pub(crate) struct ServerResources {
    settings: ServerSettings,
    state: Mutex<ServerState>,
    read_pool: ContextPool<ReadContext>,
    write_pool: ContextPool<WriteContext>,
    // bounds live connections
    accept_gate: Arc<Semaphore>,
    // bounds in-flight sends server-wide
    write_gate: Semaphore,
    unit_of_order: UnitOfOrderAllocator,
    connections: DashMap<u64, Arc<Connection>>,
    live_connections: AtomicUsize,
    active_writes: AtomicUsize,
    peak_writes: AtomicUsize,
}

impl ServerResources {
    fn new(settings: ServerSettings) -> Self {
        ServerResources {
            read_pool: ContextPool::new("read", settings.max_connections),
            write_pool: ContextPool::new("write", settings.num_simultaneous_write_operations),
            accept_gate: Arc::new(Semaphore::new(0)),
            write_gate: Semaphore::new(0),
            unit_of_order: UnitOfOrderAllocator::new(settings.max_unit_of_order),
            connections: DashMap::new(),
            live_connections: AtomicUsize::new(0),
            active_writes: AtomicUsize::new(0),
            peak_writes: AtomicUsize::new(0),
            state: Mutex::new(ServerState::Created),
            settings,
        }
    }

    fn state(&self) -> ServerState {
        *self.state.lock()
    }

    fn set_state(&self, state: ServerState) {
        *self.state.lock() = state;
    }

    /// Binds one buffer slot to every read and write context and fills both
    /// pools.
    fn populate_pools(&self) -> AppResult<()> {
        let settings = &self.settings;
        let mut buffers = BufferManager::new(
            settings.buffer_size,
            settings.max_connections + settings.num_simultaneous_write_operations,
        );
        buffers.init();

        for _ in 0..settings.max_connections {
            let mut context = ReadContext::new();
            buffers.assign(&mut context)?;
            self.read_pool.push(context)?;
        }
        for _ in 0..settings.num_simultaneous_write_operations {
            let mut context = WriteContext::new();
            buffers.assign(&mut context)?;
            self.write_pool.push(context)?;
        }
        debug!(
            "pooled {} read and {} write contexts of {} bytes",
            self.read_pool.len(),
            self.write_pool.len(),
            buffers.buffer_size()
        );
        Ok(())
    }

    fn open_gates(&self) {
        self.accept_gate.add_permits(self.settings.max_connections);
        self.write_gate
            .add_permits(self.settings.num_simultaneous_write_operations);
    }

    fn register(&self, connection: &Arc<Connection>) {
        self.connections.insert(connection.id(), connection.clone());
        self.live_connections.fetch_add(1, Ordering::AcqRel);
    }

    /// Called exactly once per connection, from its first `close`.
    pub(crate) fn release_connection(&self, connection: &Connection) {
        self.unit_of_order.free(connection.unit_of_order());
        if self.connections.remove(&connection.id()).is_some() {
            self.live_connections.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Writes `data` to `connection` through a pooled write context.
    ///
    /// While the server is not running the payload is dropped and `Ok` is
    /// returned, so a late send never holds up shutdown.
    pub(crate) async fn send(&self, connection: &Arc<Connection>, data: Bytes) -> AppResult<()> {
        if self.state() != ServerState::Running {
            debug!(
                "server is not running, dropping {} bytes for {}",
                data.len(),
                connection.identity()
            );
            return Ok(());
        }
        if !connection.is_connected() {
            connection.close();
            return Err(AppError::NotConnected(connection.identity().to_string()));
        }

        let _send_order = connection.lock_send_order().await;
        let permit = self
            .write_gate
            .acquire()
            .await
            .map_err(|_| AppError::IllegalStateError("write gate closed".into()))?;
        let mut context = self.write_pool.pop()?;
        context.set_user_token(WriteRequest::new(data, connection));

        let active = self.active_writes.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_writes.fetch_max(active, Ordering::AcqRel);
        let result = connection.transmit(&mut context).await;
        self.active_writes.fetch_sub(1, Ordering::AcqRel);

        context.reset();
        if let Err(err) = self.write_pool.push(context) {
            error!("failed to return write context: {}", err);
        }
        drop(permit);

        match result {
            Ok(writes) => {
                trace!("sent to {} in {} write(s)", connection.identity(), writes);
                Ok(())
            }
            Err(err) => {
                debug!("send to {} failed: {}", connection.identity(), err);
                connection.close();
                Err(AppError::from(err))
            }
        }
    }
}

struct Shared<C> {
    resources: Arc<ServerResources>,
    consumer: Arc<C>,
    cancel: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    span: Span,
}

impl<C: Consumer> Shared<C> {
    async fn startup(self: &Arc<Self>) -> AppResult<SocketAddr> {
        let listener = self.bind_with_retry().await?;
        let local_addr = listener.local_addr()?;

        self.resources.populate_pools()?;
        self.resources.open_gates();
        *self.local_addr.lock() = Some(local_addr);

        self.resources.set_state(ServerState::Running);
        info!("server listening on {}", local_addr);

        let consumer = self.consumer.clone();
        guarded("on_start", async move { consumer.on_start().await }).await;

        let handle = tokio::spawn(
            self.clone()
                .accept_loop(listener)
                .instrument(self.span.clone()),
        );
        *self.accept_task.lock() = Some(handle);
        Ok(local_addr)
    }

    /// Tries the first bind plus `retries` more, sleeping `retry_interval`
    /// between attempts.
    async fn bind_with_retry(&self) -> AppResult<TcpListener> {
        let settings = &self.resources.settings;
        let attempts = settings.retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.try_bind().await {
                Ok(listener) => return Ok(listener),
                Err(err) => {
                    warn!(
                        "failed to bind {} (attempt {}/{}): {}",
                        settings.address, attempt, attempts, err
                    );
                    last_error = err.to_string();
                }
            }
            if attempt < attempts {
                time::sleep(settings.retry_interval()).await;
            }
        }
        Err(AppError::BindExhausted {
            address: settings.address.clone(),
            attempts,
            cause: last_error,
        })
    }

    async fn try_bind(&self) -> io::Result<TcpListener> {
        let settings = &self.resources.settings;
        let addr = tokio::net::lookup_host(settings.address.as_str())
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("{} resolves to no address", settings.address),
                )
            })?;
        socket::bind_listener(addr, &settings.socket)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("accept loop started");
        let mut backoff = ACCEPT_BACKOFF_MIN;
        loop {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = self.resources.accept_gate.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let accepted = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, remote_addr)) => {
                    backoff = ACCEPT_BACKOFF_MIN;
                    self.on_accepted(stream, remote_addr, permit);
                }
                Err(err) => {
                    error!("accept failed: {}", err);
                    drop(permit);
                    // e.g. out of descriptors; the next accept would fail the same way
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                }
            }
        }
        drop(listener);
        debug!("accept loop stopped");
    }

    fn on_accepted(
        self: &Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
        permit: OwnedSemaphorePermit,
    ) {
        socket::apply_stream_settings(&stream, &self.resources.settings.socket);

        let context = match self.resources.read_pool.pop() {
            Ok(context) => context,
            Err(err) => {
                error!("dropping connection from {}: {}", remote_addr, err);
                return;
            }
        };
        let lane = self.resources.unit_of_order.claim();
        let connection = Arc::new(Connection::new(
            stream,
            remote_addr,
            lane,
            CancellationToken::new(),
            Arc::downgrade(&self.resources),
        ));
        self.resources.register(&connection);
        debug!(
            "accepted {} as connection {} on unit of order {}",
            remote_addr,
            connection.id(),
            lane
        );

        let span = info_span!("connection", peer = %connection.identity(), id = connection.id());
        tokio::spawn(
            self.clone()
                .serve(connection, context, permit)
                .instrument(span),
        );
    }

    /// Drives one connection: connect notification, the receive loop, and the
    /// hand-back of its pooled resources.
    async fn serve(
        self: Arc<Self>,
        connection: Arc<Connection>,
        mut context: ReadContext,
        permit: OwnedSemaphorePermit,
    ) {
        let consumer = self.consumer.clone();
        let conn = connection.clone();
        guarded("on_client_connected", async move {
            consumer.on_client_connected(conn).await
        })
        .await;

        context.set_user_token(connection.clone());
        while connection.is_alive() {
            match connection.receive(&mut context).await {
                Ok(0) => {
                    debug!("connection closed by peer or locally");
                    break;
                }
                Ok(n) => {
                    // owned copy, the slot takes the next read right away
                    let data = Bytes::copy_from_slice(context.transferred());
                    trace!("received {} bytes", n);
                    let consumer = self.consumer.clone();
                    let conn = connection.clone();
                    guarded("on_received_data", async move {
                        consumer.on_received_data(conn, data).await
                    })
                    .await;
                }
                Err(err) => {
                    debug!("receive failed: {}", err);
                    break;
                }
            }
        }
        connection.close();

        // the context goes back before the permit so a new accept always finds one
        context.reset();
        if let Err(err) = self.resources.read_pool.push(context) {
            error!("failed to return read context: {}", err);
        }
        drop(permit);

        let consumer = self.consumer.clone();
        let conn = connection.clone();
        guarded("on_client_disconnected", async move {
            consumer.on_client_disconnected(conn).await
        })
        .await;
    }

    async fn shutdown(&self) {
        info!("server stopping");
        self.cancel.cancel();

        let accept_task = self.accept_task.lock().take();
        if let Some(handle) = accept_task {
            let timeout = self.resources.settings.stop_timeout();
            match time::timeout(timeout, handle).await {
                Ok(Ok(())) => debug!("accept loop joined"),
                Ok(Err(err)) => error!("accept loop ended abnormally: {}", err),
                Err(_) => error!("accept loop did not stop within {:?}", timeout),
            }
        }
        self.resources.set_state(ServerState::Stopped);

        let consumer = self.consumer.clone();
        guarded("on_stop", async move { consumer.on_stop().await }).await;
        info!(
            "server stopped, {} connection(s) still open",
            self.resources.live_connections.load(Ordering::Acquire)
        );
    }
}

impl<C> Drop for Shared<C> {
    fn drop(&mut self) {
        debug!(parent: &self.span, "tcp server dropped");
    }
}

/// Asynchronous TCP server with pooled buffers and a bounded connection count.
///
/// Lifecycle: `Created → Starting → Running → Stopping → Stopped`. A server is
/// started once; a failed start or a stop ends in `Stopped` for good.
///
/// `stop` only stops accepting. Connections that are open at that point keep
/// running until they close on their own or [`close_all`](Self::close_all) is
/// called.
pub struct AsyncServer<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for AsyncServer<C> {
    fn clone(&self) -> Self {
        AsyncServer {
            shared: self.shared.clone(),
        }
    }
}

impl<C> fmt::Debug for AsyncServer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncServer")
            .field("identity", &self.shared.resources.settings.identity)
            .field("state", &self.shared.resources.state())
            .field("local_addr", &*self.shared.local_addr.lock())
            .finish()
    }
}

impl<C: Consumer> AsyncServer<C> {
    /// Creates a server from a private copy of `settings`.
    pub fn new(settings: &ServerSettings, consumer: C) -> AppResult<Self> {
        settings.validate()?;
        let settings = settings.clone();
        let span = info_span!("server", identity = %settings.identity);
        Ok(AsyncServer {
            shared: Arc::new(Shared {
                resources: Arc::new(ServerResources::new(settings)),
                consumer: Arc::new(consumer),
                cancel: CancellationToken::new(),
                accept_task: Mutex::new(None),
                local_addr: Mutex::new(None),
                span,
            }),
        })
    }

    /// Binds, fills the pools and starts accepting. Returns the bound address.
    ///
    /// Fails when the server was started before or when every bind attempt
    /// failed; in the latter case the server ends in `Stopped`.
    pub async fn start(&self) -> AppResult<SocketAddr> {
        let shared = &self.shared;
        {
            let mut state = shared.resources.state.lock();
            if *state != ServerState::Created {
                return Err(AppError::IllegalStateError(format!(
                    "server cannot start from state {:?}",
                    *state
                )));
            }
            *state = ServerState::Starting;
        }

        match shared.startup().instrument(shared.span.clone()).await {
            Ok(local_addr) => Ok(local_addr),
            Err(err) => {
                shared.resources.set_state(ServerState::Stopped);
                error!(parent: &shared.span, "server failed to start: {}", err);
                Err(err)
            }
        }
    }

    /// Stops accepting, waits up to `stop_timeout` for the accept loop and
    /// calls `on_stop`. Does nothing unless the server is running.
    pub async fn stop(&self) {
        let shared = &self.shared;
        {
            let mut state = shared.resources.state.lock();
            if *state != ServerState::Running {
                debug!(parent: &shared.span, "stop ignored in state {:?}", *state);
                return;
            }
            *state = ServerState::Stopping;
        }
        shared.shutdown().instrument(shared.span.clone()).await;
    }

    /// Same as [`Connection::send`].
    pub async fn send(
        &self,
        connection: &Arc<Connection>,
        data: impl Into<Bytes>,
    ) -> AppResult<()> {
        self.shared
            .resources
            .send(connection, data.into())
            .instrument(self.shared.span.clone())
            .await
    }

    /// Sends `data` to every live connection concurrently and returns how many
    /// sends completed. A failed send closes only its own connection.
    pub async fn broadcast(&self, data: impl Into<Bytes>) -> usize {
        let data = data.into();
        let mut sends = JoinSet::new();
        for connection in self.connections() {
            let resources = self.shared.resources.clone();
            let data = data.clone();
            sends.spawn(
                async move { resources.send(&connection, data).await }
                    .instrument(self.shared.span.clone()),
            );
        }

        let mut delivered = 0;
        while let Some(result) = sends.join_next().await {
            match result {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => debug!(parent: &self.shared.span, "broadcast send failed: {}", err),
                Err(err) => error!(parent: &self.shared.span, "broadcast task failed: {}", err),
            }
        }
        delivered
    }

    /// Closes every live connection.
    pub fn close_all(&self) {
        for connection in self.connections() {
            connection.close();
        }
    }

    pub fn state(&self) -> ServerState {
        self.shared.resources.state()
    }

    /// The bound address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock()
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.shared.resources.settings
    }

    pub fn consumer(&self) -> &Arc<C> {
        &self.shared.consumer
    }

    pub fn connection_count(&self) -> usize {
        self.shared.resources.live_connections.load(Ordering::Acquire)
    }

    /// Snapshot of the live connections.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.shared.resources.snapshot()
    }

    /// Connections per unit of order.
    pub fn unit_of_order_load(&self) -> Vec<usize> {
        self.shared.resources.unit_of_order.load()
    }

    pub fn available_read_contexts(&self) -> usize {
        self.shared.resources.read_pool.len()
    }

    pub fn available_write_contexts(&self) -> usize {
        self.shared.resources.write_pool.len()
    }

    /// Sends holding a write context right now.
    pub fn active_writes(&self) -> usize {
        self.shared.resources.active_writes.load(Ordering::Acquire)
    }

    /// Most sends ever seen holding a write context at the same time.
    pub fn peak_concurrent_writes(&self) -> usize {
        self.shared.resources.peak_writes.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Consumer for Noop {
        async fn on_received_data(&self, _connection: Arc<Connection>, _data: Bytes) {}
    }

    fn settings() -> ServerSettings {
        ServerSettings {
            address: "127.0.0.1:0".into(),
            max_connections: 3,
            num_simultaneous_write_operations: 2,
            buffer_size: 16,
            max_unit_of_order: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_populate_pools_fills_to_capacity() {
        let resources = ServerResources::new(settings());
        resources.populate_pools().unwrap();
        assert_eq!(resources.read_pool.len(), 3);
        assert_eq!(resources.write_pool.len(), 2);

        let mut offsets: Vec<usize> = Vec::new();
        while let Ok(context) = resources.read_pool.pop() {
            assert_eq!(context.capacity(), 16);
            offsets.push(context.offset());
        }
        while let Ok(context) = resources.write_pool.pop() {
            offsets.push(context.offset());
        }
        offsets.sort_unstable();
        assert_eq!(offsets, vec![0, 16, 32, 48, 64]);
    }

    #[test]
    fn test_gates_start_closed() {
        let resources = ServerResources::new(settings());
        assert_eq!(resources.accept_gate.available_permits(), 0);
        resources.open_gates();
        assert_eq!(resources.accept_gate.available_permits(), 3);
        assert_eq!(resources.write_gate.available_permits(), 2);
    }

    #[test]
    fn test_new_rejects_invalid_settings() {
        let invalid = ServerSettings {
            buffer_size: 0,
            ..settings()
        };
        assert!(AsyncServer::new(&invalid, Noop).is_err());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let server = AsyncServer::new(&settings(), Noop).unwrap();
        assert_eq!(server.state(), ServerState::Created);
        server.start().await.unwrap();
        assert_eq!(server.state(), ServerState::Running);
        assert!(matches!(
            server.start().await,
            Err(AppError::IllegalStateError(_))
        ));
        server.stop().await;
        assert_eq!(server.state(), ServerState::Stopped);
        // a second stop is a no-op
        server.stop().await;
        assert_eq!(server.state(), ServerState::Stopped);
    }
}
