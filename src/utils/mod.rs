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


use std::any::Any;

use tracing::error;

pub use lane_worker_pool::{LaneHandler, LanePoolConfig, LaneWorkerPool};
pub use unit_of_order::UnitOfOrderAllocator;

mod lane_worker_pool;
mod unit_of_order;

/// Logs the payload of a panicked task.
pub(crate) fn log_panic(what: &str, payload: Box<dyn Any + Send>) {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        error!("{what} panicked with message: {message}");
    } else if let Some(message) = payload.downcast_ref::<String>() {
        error!("{what} panicked with message: {message}");
    } else {
        error!("{what} panicked with an unknown payload type");
    }
}
