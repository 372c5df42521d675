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


use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::utils::log_panic;
use crate::{AppError, AppResult};

/// Runs the tasks of one lane.
pub trait LaneHandler<T>: Send + Sync + 'static {
    fn handle(&self, task: T) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone)]
pub struct LanePoolConfig {
    /// normally `ServerSettings::max_unit_of_order`
    pub num_lanes: usize,
    /// tasks a lane buffers before `submit` waits
    pub channel_capacity: usize,
}

impl Default for LanePoolConfig {
    fn default() -> Self {
        Self {
            num_lanes: num_cpus::get(),
            channel_capacity: 1024,
        }
    }
}

/// One worker per unit of order.
///
/// Tasks submitted to the same lane run one after another in submission
/// order; different lanes run concurrently. A handler panic costs only the
/// task that raised it: the lane's supervisor logs the panic and starts a new
/// worker on the same queue.
#[derive(Debug)]
pub struct LaneWorkerPool<T> {
    lanes: Vec<async_channel::Sender<T>>,
    cancel: CancellationToken,
}

impl<T: Send + 'static> LaneWorkerPool<T> {
    /// Spawns the lane supervisors. Must be called inside a tokio runtime.
    pub fn new<H: LaneHandler<T>>(handler: H, config: &LanePoolConfig) -> Self {
        let handler = Arc::new(handler);
        let cancel = CancellationToken::new();
        let lanes = (0..config.num_lanes.max(1))
            .map(|lane| {
                let (sender, receiver) = async_channel::bounded(config.channel_capacity.max(1));
                tokio::spawn(supervise(lane, handler.clone(), receiver, cancel.clone()));
                sender
            })
            .collect();
        LaneWorkerPool { lanes, cancel }
    }

    /// Queues `task` on `lane`, waiting while that lane is full.
    pub async fn submit(&self, task: T, lane: usize) -> AppResult<()> {
        let sender = self.lanes.get(lane).ok_or_else(|| {
            AppError::InvalidValue(format!("lane {} out of {}", lane, self.lanes.len()))
        })?;
        if self.cancel.is_cancelled() {
            return Err(AppError::IllegalStateError(format!("lane {} is shut down", lane)));
        }
        sender
            .send(task)
            .await
            .map_err(|_| AppError::IllegalStateError(format!("lane {} is closed", lane)))
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Stops every lane. Tasks still queued are dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl<T> Drop for LaneWorkerPool<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Keeps one worker alive on `receiver` until the pool shuts down.
async fn supervise<T, H>(
    lane: usize,
    handler: Arc<H>,
    receiver: async_channel::Receiver<T>,
    cancel: CancellationToken,
) where
    T: Send + 'static,
    H: LaneHandler<T>,
{
    loop {
        let worker = tokio::spawn(drain(handler.clone(), receiver.clone(), cancel.clone()));
        match worker.await {
            Ok(()) => break,
            Err(err) if err.is_panic() => {
                log_panic(&format!("lane {lane} handler"), err.into_panic());
                if cancel.is_cancelled() {
                    break;
                }
                warn!("lane {} worker replaced after panic", lane);
            }
            Err(err) => {
                error!("lane {} worker aborted: {}", lane, err);
                break;
            }
        }
    }
    debug!("lane {} stopped", lane);
}

async fn drain<T, H>(
    handler: Arc<H>,
    receiver: async_channel::Receiver<T>,
    cancel: CancellationToken,
) where
    T: Send + 'static,
    H: LaneHandler<T>,
{
    loop {
        let task = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            task = receiver.recv() => match task {
                Ok(task) => task,
                Err(_) => break,
            },
        };
        handler.handle(task).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Journal {
        seen: Mutex<Vec<(usize, u32)>>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[derive(Clone, Default)]
    struct JournalHandler(Arc<Journal>);

    impl LaneHandler<(usize, u32)> for JournalHandler {
        async fn handle(&self, (lane, seq): (usize, u32)) {
            let running = self.0.running.fetch_add(1, Ordering::AcqRel) + 1;
            self.0.peak.fetch_max(running, Ordering::AcqRel);
            if seq == 13 {
                panic!("unlucky task");
            }
            // later tasks of the lane must still wait for this one
            if seq % 3 == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            self.0.seen.lock().push((lane, seq));
            self.0.running.fetch_sub(1, Ordering::AcqRel);
        }
    }

    async fn wait_for(journal: &Journal, len: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while journal.seen.lock().len() < len {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("lane tasks did not finish");
    }

    fn lane_order(journal: &Journal, lane: usize) -> Vec<u32> {
        journal
            .seen
            .lock()
            .iter()
            .filter(|(l, _)| *l == lane)
            .map(|(_, seq)| *seq)
            .collect()
    }

    fn config(num_lanes: usize) -> LanePoolConfig {
        LanePoolConfig {
            num_lanes,
            channel_capacity: 8,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_tasks_on_one_lane_run_in_order() {
        let handler = JournalHandler::default();
        let pool = LaneWorkerPool::new(handler.clone(), &config(2));

        for seq in 0..12 {
            pool.submit((0, seq), 0).await.unwrap();
            pool.submit((1, seq), 1).await.unwrap();
        }
        wait_for(&handler.0, 24).await;

        for lane in 0..2 {
            assert_eq!(lane_order(&handler.0, lane), (0..12).collect::<Vec<_>>());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_lane_never_overlaps() {
        let handler = JournalHandler::default();
        let pool = LaneWorkerPool::new(handler.clone(), &config(1));
        for seq in 0..9 {
            pool.submit((0, seq), 0).await.unwrap();
        }
        wait_for(&handler.0, 9).await;
        assert_eq!(handler.0.peak.load(Ordering::Acquire), 1);
    }

    #[tokio::test]
    async fn test_submit_to_unknown_lane_fails() {
        let pool = LaneWorkerPool::new(JournalHandler::default(), &config(1));
        assert!(matches!(
            pool.submit((3, 0), 3).await,
            Err(AppError::InvalidValue(_))
        ));
        assert_eq!(pool.lane_count(), 1);

        pool.shutdown();
        assert!(matches!(
            pool.submit((0, 0), 0).await,
            Err(AppError::IllegalStateError(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_task_is_skipped() {
        let handler = JournalHandler::default();
        let pool = LaneWorkerPool::new(handler.clone(), &config(1));

        for seq in [12, 13, 14, 15] {
            pool.submit((0, seq), 0).await.unwrap();
        }
        wait_for(&handler.0, 3).await;
        assert_eq!(lane_order(&handler.0, 0), vec![12, 14, 15]);
    }
}
