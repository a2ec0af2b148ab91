// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Bounded exponential backoff for durable-store operations

use std::thread;
use std::time::Duration;

use log::debug;

/// Retry policy applied to every durable-layer call.
///
/// The delay before retry `n` (0-based) is `min(base_delay * 2^n, max_delay)`.
/// No delay follows the final attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Run `op` until it succeeds or the attempts are exhausted.
    ///
    /// Blocks the calling thread while backing off. Returns the last error
    /// together with the number of attempts made.
    pub fn run<T, E, F>(&self, what: &str, mut op: F) -> Result<T, (u32, E)>
    where
        F: FnMut() -> Result<T, E>,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= attempts {
                        return Err((attempt, err));
                    }
                    let delay = self.delay_for(attempt - 1);
                    debug!(
                        "{} failed (attempt {}/{}): {}, retrying in {:?}",
                        what, attempt, attempts, err, delay
                    );
                    thread::sleep(delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_run_retries_until_success() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let mut calls = 0;
        let result: Result<u16, (u32, String)> = policy.run("test", || {
            calls += 1;
            if calls < 3 {
                Err("transient".to_string())
            } else {
                Ok(42)
            }
        });
        assert_eq!(result, Ok(42));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_run_gives_up() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        let mut calls = 0;
        let result: Result<(), (u32, &str)> = policy.run("test", || {
            calls += 1;
            Err("down")
        });
        assert_eq!(result, Err((2, "down")));
        assert_eq!(calls, 2);
    }
}
