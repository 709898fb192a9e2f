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

//! # Retry Policies
//!
//! Controls how often a failed queue job is attempted again and how long the
//! queue waits between attempts.
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use steward::queue::{BackoffStrategy, RetryPolicy};
//!
//! let policy = RetryPolicy::builder()
//!     .max_attempts(5)
//!     .initial_delay(Duration::from_secs(10))
//!     .backoff_strategy(BackoffStrategy::Linear { multiplier: 1.0 })
//!     .build();
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How the delay grows from one attempt to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// The same delay every time.
    Fixed,
    /// `initial_delay * attempt * multiplier`.
    Linear { multiplier: f64 },
    /// `initial_delay * multiplier * base^(attempt - 1)`.
    Exponential { base: f64, multiplier: f64 },
}

/// Retry settings for queued jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_strategy: BackoffStrategy,
    /// Adds up to 10% random jitter to every delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
            backoff_strategy: BackoffStrategy::Exponential {
                base: 2.0,
                multiplier: 1.0,
            },
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Delay before the attempt that follows attempt number `attempt`
    /// (1-based), capped at `max_delay`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let initial = self.initial_delay.as_secs_f64();
        let secs = match &self.backoff_strategy {
            BackoffStrategy::Fixed => initial,
            BackoffStrategy::Linear { multiplier } => initial * f64::from(attempt) * multiplier,
            BackoffStrategy::Exponential { base, multiplier } => {
                initial * multiplier * base.powi(attempt as i32 - 1)
            }
        };

        let capped = secs.clamp(0.0, self.max_delay.as_secs_f64());
        let delay = Duration::from_secs_f64(capped);
        if self.jitter {
            self.add_jitter(delay)
        } else {
            delay
        }
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    fn add_jitter(&self, delay: Duration) -> Duration {
        let spread = delay.as_secs_f64() * 0.1;
        if spread <= 0.0 {
            return delay;
        }
        let offset = rand::thread_rng().gen_range(0.0..spread);
        Duration::from_secs_f64(delay.as_secs_f64() + offset)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.policy.max_attempts = max_attempts;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn backoff_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.policy.backoff_strategy = strategy;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.policy.jitter = jitter;
        self
    }

    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}
