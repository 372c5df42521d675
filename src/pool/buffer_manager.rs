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

use bytes::BytesMut;
use tracing::debug;

use crate::pool::IoContext;
use crate::{AppError, AppResult};

/// Hands out fixed-size slots of one preallocated region.
///
/// `init` allocates `buffer_size * slots` bytes once. Every `assign` splits the
/// next `buffer_size` bytes off the front of the region and binds them to a
/// context for the rest of its life. The slots share the single allocation but
/// never overlap, so they can be written concurrently without coordination.
#[derive(Debug)]
pub struct BufferManager {
    region: BytesMut,
    buffer_size: usize,
    slots: usize,
    assigned: usize,
}

impl BufferManager {
    pub fn new(buffer_size: usize, slots: usize) -> Self {
        BufferManager {
            region: BytesMut::new(),
            buffer_size,
            slots,
            assigned: 0,
        }
    }

    pub fn init(&mut self) {
        let total_size = self.buffer_size * self.slots;
        self.region = BytesMut::zeroed(total_size);
        self.assigned = 0;
        debug!(
            "buffer manager reserved {} bytes for {} slots of {} bytes",
            total_size, self.slots, self.buffer_size
        );
    }

    /// Binds the next free slot to `context`.
    ///
    /// Asking for more slots than were reserved is a sizing bug in the caller
    /// and is reported as [`AppError::BufferExhausted`].
    pub fn assign<T>(&mut self, context: &mut IoContext<T>) -> AppResult<()> {
        if self.assigned >= self.slots || self.region.len() < self.buffer_size {
            return Err(AppError::BufferExhausted {
                requested: self.assigned + 1,
                capacity: self.slots,
            });
        }
        let offset = self.assigned * self.buffer_size;
        let slot = self.region.split_to(self.buffer_size);
        context.bind_buffer(slot, offset);
        self.assigned += 1;
        Ok(())
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn assigned(&self) -> usize {
        self.assigned
    }

    pub fn capacity(&self) -> usize {
        self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_hands_out_disjoint_slots() {
        let mut manager = BufferManager::new(16, 3);
        manager.init();

        let mut contexts: Vec<IoContext<()>> = (0..3).map(|_| IoContext::new()).collect();
        for context in contexts.iter_mut() {
            manager.assign(context).unwrap();
        }
        assert_eq!(manager.assigned(), 3);

        let offsets: Vec<usize> = contexts.iter().map(|c| c.offset()).collect();
        assert_eq!(offsets, vec![0, 16, 32]);

        for (i, context) in contexts.iter_mut().enumerate() {
            assert_eq!(context.capacity(), 16);
            context.buffer_mut().fill(i as u8 + 1);
        }
        // writing one slot never bleeds into the next
        for (i, context) in contexts.iter().enumerate() {
            assert!(context.buffer().iter().all(|b| *b == i as u8 + 1));
        }
    }

    #[test]
    fn test_assign_beyond_capacity_fails() {
        let mut manager = BufferManager::new(8, 1);
        manager.init();

        let mut first: IoContext<()> = IoContext::new();
        let mut second: IoContext<()> = IoContext::new();
        manager.assign(&mut first).unwrap();
        let err = manager.assign(&mut second).unwrap_err();
        assert!(matches!(
            err,
            AppError::BufferExhausted {
                requested: 2,
                capacity: 1
            }
        ));
    }

    #[test]
    fn test_assign_before_init_fails() {
        let mut manager = BufferManager::new(8, 1);
        let mut context: IoContext<()> = IoContext::new();
        assert!(manager.assign(&mut context).is_err());
    }
}
