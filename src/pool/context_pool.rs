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

use parking_lot::Mutex;

use crate::{AppError, AppResult};

/// A bounded stack of reusable items shared between tasks.
///
/// `pop` does not wait. Callers hold a semaphore permit sized to the pool's
/// capacity before popping, so in correct usage the stack is never empty when
/// popped.
#[derive(Debug)]
pub struct ContextPool<T> {
    name: &'static str,
    items: Mutex<Vec<T>>,
    capacity: usize,
}

impl<T> ContextPool<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        ContextPool {
            name,
            items: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Returns an item to the pool. Pushing past capacity means an item was
    /// returned twice and is rejected.
    pub fn push(&self, item: T) -> AppResult<()> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(AppError::PoolOverflow(self.name));
        }
        items.push(item);
        Ok(())
    }

    pub fn pop(&self) -> AppResult<T> {
        self.items
            .lock()
            .pop()
            .ok_or(AppError::PoolExhausted(self.name))
    }

    /// Number of items currently available.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tokio::sync::Semaphore;

    #[test]
    fn test_push_pop() {
        let pool = ContextPool::new("test", 2);
        assert!(pool.is_empty());
        pool.push(1).unwrap();
        pool.push(2).unwrap();
        assert_eq!(pool.len(), 2);
        assert!(matches!(pool.push(3), Err(AppError::PoolOverflow("test"))));

        assert_eq!(pool.pop().unwrap(), 2);
        assert_eq!(pool.pop().unwrap(), 1);
        assert!(matches!(pool.pop(), Err(AppError::PoolExhausted("test"))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_holders_never_share_an_item() {
        const CAPACITY: usize = 4;
        let pool = Arc::new(ContextPool::new("exclusive", CAPACITY));
        for i in 0..CAPACITY {
            pool.push(i).unwrap();
        }
        let permits = Arc::new(Semaphore::new(CAPACITY));
        let held = Arc::new(parking_lot::Mutex::new(HashSet::new()));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let pool = pool.clone();
            let permits = permits.clone();
            let held = held.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let _permit = permits.acquire().await.unwrap();
                    let item = pool.pop().unwrap();
                    assert!(held.lock().insert(item), "item {item} held twice");
                    tokio::task::yield_now().await;
                    assert!(held.lock().remove(&item));
                    pool.push(item).unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(pool.len(), CAPACITY);
    }
}
