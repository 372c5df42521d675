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

//! Applying [`SocketSettings`] to listening and accepted sockets.
//!
//! Every option is set on its own. A platform that rejects one option (an
//! IPv4-only knob on an IPv6 socket, a value outside kernel limits) gets a
//! debug line and the next option is tried.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, trace};

use crate::service::{SocketOption, SocketSettings};

fn best_effort(option: &str, result: io::Result<()>) {
    match result {
        Ok(()) => trace!("socket option {} applied", option),
        Err(err) => debug!("failed to set socket option {}: {}", option, err),
    }
}

/// Creates, configures, binds and listens a socket for `addr`.
pub(crate) fn bind_listener(
    addr: SocketAddr,
    settings: &SocketSettings,
) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    best_effort(
        "SO_REUSEADDR",
        socket.set_reuse_address(settings.reuse_address),
    );
    if addr.is_ipv6() {
        if let Some(dual_mode) = settings.dual_mode {
            best_effort("IPV6_V6ONLY", socket.set_only_v6(!dual_mode));
        }
    }
    apply_common(&socket, settings);

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(settings.backlog)?;

    let listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(listener)
}

/// Applies the per-connection options to an accepted stream.
pub(crate) fn apply_stream_settings(stream: &TcpStream, settings: &SocketSettings) {
    let socket = SockRef::from(stream);
    best_effort("TCP_NODELAY", socket.set_nodelay(settings.no_delay));
    best_effort("SO_KEEPALIVE", socket.set_keepalive(settings.keep_alive));
    if let Some(secs) = settings.linger_secs {
        best_effort(
            "SO_LINGER",
            socket.set_linger(Some(Duration::from_secs(secs))),
        );
    }
    if let Some(ttl) = settings.ttl {
        best_effort("IP_TTL", socket.set_ttl(ttl));
    }
    apply_common(&socket, settings);
}

fn apply_common(socket: &Socket, settings: &SocketSettings) {
    if let Some(size) = settings.receive_buffer_size {
        best_effort("SO_RCVBUF", socket.set_recv_buffer_size(size));
    }
    if let Some(size) = settings.send_buffer_size {
        best_effort("SO_SNDBUF", socket.set_send_buffer_size(size));
    }
    if let Some(ms) = settings.receive_timeout_ms {
        best_effort(
            "SO_RCVTIMEO",
            socket.set_read_timeout(Some(Duration::from_millis(ms))),
        );
    }
    if let Some(ms) = settings.send_timeout_ms {
        best_effort(
            "SO_SNDTIMEO",
            socket.set_write_timeout(Some(Duration::from_millis(ms))),
        );
    }
    for option in &settings.options {
        best_effort(
            &format!("({}, {})", option.level, option.name),
            set_raw_option(socket, option),
        );
    }
}

#[cfg(unix)]
fn set_raw_option(socket: &Socket, option: &SocketOption) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let value: libc::c_int = option.value;
    // SAFETY: the descriptor is borrowed from a live socket for the duration of
    // the call and `value` outlives it; the kernel validates level and name.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            option.level,
            option.name,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn set_raw_option(_socket: &Socket, _option: &SocketOption) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "raw socket options are only supported on unix",
    ))
}
