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


//! Asynchronous TCP server core.
//!
//! An [`AsyncServer`] accepts up to `max_connections` clients, reads each one
//! into a slot of a preallocated buffer region and hands every received chunk
//! to a [`Consumer`]. Sends are chunked through a bounded pool of write
//! contexts. Each connection is assigned a unit of order so a consumer can
//! process connections on a fixed set of ordered workers; [`OrderedConsumer`]
//! does this with one [`LaneWorkerPool`] lane per unit of order.

mod network;
mod pool;
mod service;
mod utils;

pub use network::{Connection, ConnectionEvent, Consumer, OrderedConsumer, WriteRequest};
pub use pool::{BufferManager, ContextPool, IoContext, ReadContext, WriteContext};
pub use service::{
    setup_local_tracing, AppError, AppResult, AsyncServer, ServerSettings, ServerState,
    SocketOption, SocketSettings, ENV_PREFIX,
};
pub use utils::{LaneHandler, LanePoolConfig, LaneWorkerPool, UnitOfOrderAllocator};
