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


use std::sync::Arc;

use bytes::Bytes;
use tracing::warn;

use crate::network::{Connection, Consumer};
use crate::utils::{LaneHandler, LanePoolConfig, LaneWorkerPool};
use crate::ServerSettings;

/// One event of one connection, as handed to a lane worker.
#[derive(Debug)]
pub enum ConnectionEvent {
    Connected(Arc<Connection>),
    Received(Arc<Connection>, Bytes),
    Disconnected(Arc<Connection>),
}

impl ConnectionEvent {
    pub fn connection(&self) -> &Arc<Connection> {
        match self {
            ConnectionEvent::Connected(connection)
            | ConnectionEvent::Received(connection, _)
            | ConnectionEvent::Disconnected(connection) => connection,
        }
    }
}

/// A [`Consumer`] that runs every event on the lane of the connection's unit
/// of order.
///
/// Events of connections sharing a lane are handled one at a time in arrival
/// order, events on different lanes concurrently. A full lane holds up the
/// receive loop of the connection feeding it.
#[derive(Debug)]
pub struct OrderedConsumer {
    lanes: LaneWorkerPool<ConnectionEvent>,
}

impl OrderedConsumer {
    /// One lane per `settings.max_unit_of_order`. Must be called inside a
    /// tokio runtime.
    pub fn new<H: LaneHandler<ConnectionEvent>>(handler: H, settings: &ServerSettings) -> Self {
        let config = LanePoolConfig {
            num_lanes: settings.max_unit_of_order,
            ..Default::default()
        };
        OrderedConsumer {
            lanes: LaneWorkerPool::new(handler, &config),
        }
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.lane_count()
    }

    async fn dispatch(&self, event: ConnectionEvent) {
        let lane = event.connection().unit_of_order();
        let identity = event.connection().identity().to_string();
        if let Err(err) = self.lanes.submit(event, lane).await {
            warn!("dropping event of {}: {}", identity, err);
        }
    }
}

impl Consumer for OrderedConsumer {
    async fn on_client_connected(&self, connection: Arc<Connection>) {
        self.dispatch(ConnectionEvent::Connected(connection)).await
    }

    async fn on_received_data(&self, connection: Arc<Connection>, data: Bytes) {
        self.dispatch(ConnectionEvent::Received(connection, data)).await
    }

    async fn on_client_disconnected(&self, connection: Arc<Connection>) {
        self.dispatch(ConnectionEvent::Disconnected(connection)).await
    }
}
