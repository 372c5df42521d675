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

extern crate config as _;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

/// Prefix of the environment variables that override file settings,
/// e.g. `STONENET_MAX_CONNECTIONS=64` or `STONENET_SOCKET__BACKLOG=512`.
pub const ENV_PREFIX: &str = "STONENET";

/// A raw OS-level socket option, handed to `setsockopt` verbatim.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketOption {
    pub level: i32,
    pub name: i32,
    pub value: i32,
}

/// Socket options applied to the listening socket and to every accepted stream.
///
/// Each option is applied on its own; one that the platform rejects is logged
/// and skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketSettings {
    /// listen backlog
    pub backlog: i32,
    pub receive_buffer_size: Option<usize>,
    pub send_buffer_size: Option<usize>,
    pub receive_timeout_ms: Option<u64>,
    pub send_timeout_ms: Option<u64>,
    pub no_delay: bool,
    /// `Some(0)` resets the connection on close, `None` keeps the OS default.
    pub linger_secs: Option<u64>,
    pub ttl: Option<u32>,
    /// Accept IPv4 peers on an IPv6 listener. Ignored for IPv4 addresses.
    pub dual_mode: Option<bool>,
    pub reuse_address: bool,
    pub keep_alive: bool,
    pub options: Vec<SocketOption>,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            backlog: 1024,
            receive_buffer_size: None,
            send_buffer_size: None,
            receive_timeout_ms: None,
            send_timeout_ms: None,
            no_delay: true,
            linger_secs: None,
            ttl: None,
            dual_mode: None,
            reuse_address: false,
            keep_alive: false,
            options: Vec::new(),
        }
    }
}

/// Server configuration.
///
/// The engine keeps its own clone, so mutating a `ServerSettings` after
/// handing it to [`AsyncServer::new`](crate::AsyncServer::new) has no effect
/// on the running server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// attached to every log line of the server
    pub identity: String,
    /// listen address, port 0 picks an ephemeral port
    pub address: String,
    pub max_connections: usize,
    pub num_simultaneous_write_operations: usize,
    /// bytes per receive and per send chunk
    pub buffer_size: usize,
    /// bind attempts after the first failed one
    pub retries: usize,
    pub retry_interval_ms: u64,
    pub max_unit_of_order: usize,
    pub stop_timeout_ms: u64,
    pub socket: SocketSettings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            identity: "stonenet".to_string(),
            address: "0.0.0.0:0".to_string(),
            max_connections: 1024,
            num_simultaneous_write_operations: 256,
            buffer_size: 8 * 1024,
            retries: 3,
            retry_interval_ms: 60 * 1000,
            max_unit_of_order: num_cpus::get(),
            stop_timeout_ms: 1000,
            socket: SocketSettings::default(),
        }
    }
}

impl ServerSettings {
    /// Loads settings from a file (format picked from its extension) and
    /// overlays `STONENET_*` environment variables.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<ServerSettings> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: ServerSettings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.max_connections == 0 {
            return Err(AppError::InvalidValue(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.num_simultaneous_write_operations == 0 {
            return Err(AppError::InvalidValue(
                "num_simultaneous_write_operations must be greater than 0".into(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(AppError::InvalidValue(
                "buffer_size must be greater than 0".into(),
            ));
        }
        if self.max_unit_of_order == 0 {
            return Err(AppError::InvalidValue(
                "max_unit_of_order must be greater than 0".into(),
            ));
        }
        if self.socket.backlog <= 0 {
            return Err(AppError::InvalidValue(format!(
                "socket backlog {} must be greater than 0",
                self.socket.backlog
            )));
        }
        Ok(())
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Total bytes the shared buffer region needs: one slot per read context
    /// and one per write context.
    pub fn total_buffer_bytes(&self) -> usize {
        self.buffer_size * (self.max_connections + self.num_simultaneous_write_operations)
    }
}
