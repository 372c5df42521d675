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

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// general errors
    #[error("illegal state: {0}")]
    IllegalStateError(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    /// startup errors
    #[error("failed to bind {address} after {attempts} attempt(s): {cause}")]
    BindExhausted {
        address: String,
        attempts: usize,
        cause: String,
    },

    /// connection errors
    #[error("connection {0} is not connected")]
    NotConnected(String),

    /// resource errors
    #[error("pool exhausted: {0}")]
    PoolExhausted(&'static str),

    #[error("pool overflow: {0}")]
    PoolOverflow(&'static str),

    #[error("buffer exhausted: requested slot {requested}, capacity {capacity}")]
    BufferExhausted { requested: usize, capacity: usize },
}
