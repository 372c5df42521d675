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


//! Network Module Implementation
//!
//! Everything that touches a socket: the per-connection handle, the progress
//! record of an outbound payload, socket option application and the consumer
//! contract the server dispatches to.

pub use connection::Connection;
pub use consumer::Consumer;
pub(crate) use consumer::guarded;
pub use ordered_consumer::{ConnectionEvent, OrderedConsumer};
pub use write_request::WriteRequest;

mod connection;
mod consumer;
mod ordered_consumer;
pub(crate) mod socket;
mod write_request;
