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

use bytes::BytesMut;

use crate::network::{Connection, WriteRequest};

/// Context of a receive: its token is the connection being read.
pub type ReadContext = IoContext<Arc<Connection>>;
/// Context of a send: its token is the write request being transferred.
pub type WriteContext = IoContext<WriteRequest>;

/// A reusable I/O record: one slot of the shared buffer region plus the state
/// of the operation currently using it.
///
/// A context lives either in its pool or inside exactly one in-flight
/// operation; it is moved, never shared.
#[derive(Debug)]
pub struct IoContext<T> {
    buffer: BytesMut,
    offset: usize,
    count: usize,
    user_token: Option<T>,
}

impl<T> Default for IoContext<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IoContext<T> {
    pub fn new() -> Self {
        IoContext {
            buffer: BytesMut::new(),
            offset: 0,
            count: 0,
            user_token: None,
        }
    }

    pub(crate) fn bind_buffer(&mut self, buffer: BytesMut, offset: usize) {
        self.buffer = buffer;
        self.offset = offset;
        self.count = 0;
    }

    /// Offset of this context's slot inside the shared region.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer[..]
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..]
    }

    /// Bytes moved by the last completed operation.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn set_count(&mut self, count: usize) {
        self.count = count.min(self.buffer.len());
    }

    /// The bytes moved by the last completed operation.
    pub fn transferred(&self) -> &[u8] {
        &self.buffer[..self.count]
    }

    pub fn user_token(&self) -> Option<&T> {
        self.user_token.as_ref()
    }

    pub fn user_token_mut(&mut self) -> Option<&mut T> {
        self.user_token.as_mut()
    }

    pub fn set_user_token(&mut self, token: T) {
        self.user_token = Some(token);
    }

    pub fn take_user_token(&mut self) -> Option<T> {
        self.user_token.take()
    }

    /// Clears the operation state; the buffer slot stays bound.
    pub fn reset(&mut self) {
        self.count = 0;
        self.user_token = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_keeps_buffer_binding() {
        let mut context: IoContext<u32> = IoContext::new();
        context.bind_buffer(BytesMut::zeroed(8), 24);
        context.buffer_mut()[..3].copy_from_slice(b"abc");
        context.set_count(3);
        context.set_user_token(7);
        assert_eq!(context.transferred(), b"abc");
        assert_eq!(context.user_token(), Some(&7));

        context.reset();
        assert_eq!(context.count(), 0);
        assert!(context.user_token().is_none());
        assert_eq!(context.capacity(), 8);
        assert_eq!(context.offset(), 24);
    }

    #[test]
    fn test_count_is_clamped_to_capacity() {
        let mut context: IoContext<()> = IoContext::new();
        context.bind_buffer(BytesMut::zeroed(4), 0);
        context.set_count(10);
        assert_eq!(context.count(), 4);
    }
}
