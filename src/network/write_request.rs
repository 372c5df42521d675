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

use std::sync::{Arc, Weak};

use bytes::Bytes;

use crate::network::Connection;

/// Progress of one outbound payload.
///
/// `transferred_count() + outstanding_count() == data().len()` holds at every
/// point; chunks are taken from the front in order.
#[derive(Debug)]
pub struct WriteRequest {
    data: Bytes,
    transferred: usize,
    client: Weak<Connection>,
}

impl WriteRequest {
    pub fn new(data: Bytes, client: &Arc<Connection>) -> Self {
        WriteRequest {
            data,
            transferred: 0,
            client: Arc::downgrade(client),
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn transferred_count(&self) -> usize {
        self.transferred
    }

    pub fn outstanding_count(&self) -> usize {
        self.data.len() - self.transferred
    }

    pub fn is_complete(&self) -> bool {
        self.outstanding_count() == 0
    }

    /// The next at most `max_len` bytes still to be sent.
    pub fn next_chunk(&self, max_len: usize) -> &[u8] {
        let end = self.data.len().min(self.transferred + max_len);
        &self.data[self.transferred..end]
    }

    /// Records `sent` bytes of the current chunk as transferred.
    pub fn advance(&mut self, sent: usize) {
        self.transferred = (self.transferred + sent).min(self.data.len());
    }

    /// The connection being written to, if it is still around.
    pub fn client(&self) -> Option<Arc<Connection>> {
        self.client.upgrade()
    }

    #[cfg(test)]
    pub(crate) fn detached(data: Bytes) -> Self {
        WriteRequest {
            data,
            transferred: 0,
            client: Weak::new(),
        }
    }
}
