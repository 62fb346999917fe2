use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BACKOFF_MS: [u64; 5] = [5_000, 15_000, 30_000, 60_000, 120_000];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackoffError {
    #[error("backoff table must contain at least one delay")]
    Empty,
    #[error("backoff delays must be non-decreasing (entry {index} is shorter than the one before it)")]
    Decreasing { index: usize },
}

/// Retry delays indexed by attempt number. Attempts past the end of the
/// table reuse the last entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffTable {
    delays: Vec<Duration>,
}

impl BackoffTable {
    pub fn new(delays: Vec<Duration>) -> Result<Self, BackoffError> {
        if delays.is_empty() {
            return Err(BackoffError::Empty);
        }
        if let Some(index) = delays.windows(2).position(|pair| pair[1] < pair[0]) {
            return Err(BackoffError::Decreasing { index: index + 1 });
        }
        Ok(Self { delays })
    }

    pub fn from_millis(delays: &[u64]) -> Result<Self, BackoffError> {
        Self::new(delays.iter().copied().map(Duration::from_millis).collect())
    }

    /// Delay before reconnect attempt `attempt` (1-based). Attempt 0 is
    /// treated as the first attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = (attempt.saturating_sub(1) as usize).min(self.delays.len() - 1);
        self.delays[index]
    }

    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }
}

impl Default for BackoffTable {
    fn default() -> Self {
        Self {
            delays: DEFAULT_BACKOFF_MS
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
        }
    }
}

#[cfg(test)]
#[path = "tests/backoff_tests.rs"]
mod tests;
