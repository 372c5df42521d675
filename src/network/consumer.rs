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

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{error, Instrument};

use crate::network::Connection;
use crate::utils::log_panic;

/// Receives the events of an [`AsyncServer`](crate::AsyncServer).
///
/// Every callback runs in its own task. A panic inside a callback is logged
/// and swallowed; the server and the connection carry on.
///
/// Events of one connection are delivered in order: `on_client_connected`,
/// then every `on_received_data`, then exactly one `on_client_disconnected`.
/// `data` holds exactly the bytes of one receive, no framing is applied.
pub trait Consumer: Send + Sync + 'static {
    /// Called once before the first connection is accepted.
    fn on_start(&self) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn on_client_connected(&self, connection: Arc<Connection>) -> impl Future<Output = ()> + Send {
        let _ = connection;
        async {}
    }

    fn on_received_data(
        &self,
        connection: Arc<Connection>,
        data: Bytes,
    ) -> impl Future<Output = ()> + Send;

    fn on_client_disconnected(
        &self,
        connection: Arc<Connection>,
    ) -> impl Future<Output = ()> + Send {
        let _ = connection;
        async {}
    }

    /// Called once after the server stopped accepting.
    fn on_stop(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Runs one consumer callback on its own task and waits for it.
///
/// Returns `false` when the callback panicked or was cancelled.
pub(crate) async fn guarded<F>(callback: &str, fut: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::spawn(fut.in_current_span()).await {
        Ok(()) => true,
        Err(err) if err.is_panic() => {
            log_panic(&format!("consumer callback {callback}"), err.into_panic());
            false
        }
        Err(err) => {
            error!("consumer callback {} did not complete: {}", callback, err);
            false
        }
    }
}
