/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Rolling-window limit on job starts.
//!
//! Independent of worker concurrency: with three idle workers and a limit of
//! five per minute, the sixth start inside any sixty second span waits.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
pub struct RateLimiter {
    max_starts: usize,
    window: Duration,
    starts: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_starts: usize, window: Duration) -> Self {
        Self {
            max_starts: max_starts.max(1),
            window,
            starts: Mutex::new(VecDeque::new()),
        }
    }

    fn prune(&self, starts: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = starts.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                starts.pop_front();
            } else {
                break;
            }
        }
    }

    /// How long until a start would be permitted at `now`, without recording
    /// one. `None` when there is room.
    pub fn wait_time_at(&self, now: Instant) -> Option<Duration> {
        let mut starts = self.starts.lock();
        self.prune(&mut starts, now);
        if starts.len() < self.max_starts {
            return None;
        }
        starts
            .front()
            .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)))
    }

    pub fn wait_time(&self) -> Option<Duration> {
        self.wait_time_at(Instant::now())
    }

    /// Records a start at `now` if the window has room, otherwise returns how
    /// long until the oldest start leaves the window.
    pub fn try_acquire_at(&self, now: Instant) -> Result<(), Duration> {
        let mut starts = self.starts.lock();
        self.prune(&mut starts, now);

        if starts.len() < self.max_starts {
            starts.push_back(now);
            return Ok(());
        }

        let wait = starts
            .front()
            .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)))
            .unwrap_or_default();
        Err(wait)
    }

    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.try_acquire_at(Instant::now())
    }

    /// Records a start that already happened, even past the limit.
    pub fn record_at(&self, now: Instant) {
        let mut starts = self.starts.lock();
        self.prune(&mut starts, now);
        starts.push_back(now);
    }

    pub fn record(&self) {
        self.record_at(Instant::now())
    }

    /// Waits until a start is permitted and records it.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(wait) => {
                    debug!("Rate limit reached, waiting {:?}", wait);
                    tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                }
            }
        }
    }

    /// Starts recorded inside the current window.
    pub fn in_window(&self) -> usize {
        let now = Instant::now();
        self.starts
            .lock()
            .iter()
            .filter(|start| now.saturating_duration_since(**start) < self.window)
            .count()
    }
}
