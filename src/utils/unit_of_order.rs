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
use tracing::warn;

/// Spreads connections over a fixed number of ordering lanes.
///
/// Each lane keeps a count of the connections assigned to it. `claim` picks the
/// least loaded lane, lowest index first on ties, so a consumer running one
/// ordered worker per lane gets an even share of connections per worker.
#[derive(Debug)]
pub struct UnitOfOrderAllocator {
    lanes: Mutex<Vec<usize>>,
}

impl UnitOfOrderAllocator {
    pub fn new(lanes: usize) -> Self {
        UnitOfOrderAllocator {
            lanes: Mutex::new(vec![0; lanes.max(1)]),
        }
    }

    pub fn claim(&self) -> usize {
        let mut lanes = self.lanes.lock();
        let mut selected = 0;
        for (lane, count) in lanes.iter().enumerate().skip(1) {
            if *count < lanes[selected] {
                selected = lane;
            }
        }
        lanes[selected] += 1;
        selected
    }

    pub fn free(&self, lane: usize) {
        let mut lanes = self.lanes.lock();
        match lanes.get_mut(lane) {
            Some(count) if *count > 0 => *count -= 1,
            Some(_) => warn!("unit of order {} freed more often than claimed", lane),
            None => warn!("unit of order {} is out of range", lane),
        }
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.lock().len()
    }

    /// Current number of connections per lane.
    pub fn load(&self) -> Vec<usize> {
        self.lanes.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(8)]
    fn test_claims_are_balanced(#[case] lanes: usize) {
        let allocator = UnitOfOrderAllocator::new(lanes);
        for _ in 0..2 * lanes {
            allocator.claim();
        }
        assert!(allocator.load().iter().all(|count| *count == 2));
    }

    #[test]
    fn test_ties_pick_lowest_lane() {
        let allocator = UnitOfOrderAllocator::new(3);
        assert_eq!(allocator.claim(), 0);
        assert_eq!(allocator.claim(), 1);
        assert_eq!(allocator.claim(), 2);
        assert_eq!(allocator.claim(), 0);
    }

    #[test]
    fn test_free_makes_lane_preferred_again() {
        let allocator = UnitOfOrderAllocator::new(3);
        for _ in 0..3 {
            allocator.claim();
        }
        allocator.free(1);
        assert_eq!(allocator.claim(), 1);
        assert_eq!(allocator.load(), vec![1, 1, 1]);
    }

    #[test]
    fn test_free_never_underflows() {
        let allocator = UnitOfOrderAllocator::new(2);
        allocator.free(0);
        allocator.free(5);
        assert_eq!(allocator.load(), vec![0, 0]);
        assert_eq!(allocator.lane_count(), 2);
    }
}
