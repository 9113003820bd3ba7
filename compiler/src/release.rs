// release.rs — Release of round results
//
// A release manager receives values a driver decides to publish, for
// example the output of each evaluated round, keyed by round number.
//
// Preconditions: none.
// Postconditions: a successful release has been handed to the sink.
// Failure modes: `ReleaseError::NegativeKey`.
// Side effects: `LoggingReleaseManager` writes one `info!` record per value.

use log::info;
use thiserror::Error;

use crate::eval::Value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReleaseError {
    #[error("release key must be non-negative, found {0}")]
    NegativeKey(i64),
}

/// Sink for released values.
pub trait ReleaseManager {
    fn release(&mut self, value: &Value, key: Option<i64>) -> Result<(), ReleaseError>;
}

/// Releases values to the `log` facade.
#[derive(Debug, Default)]
pub struct LoggingReleaseManager {
    released: usize,
}

impl LoggingReleaseManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of values released so far.
    pub fn released(&self) -> usize {
        self.released
    }
}

impl ReleaseManager for LoggingReleaseManager {
    fn release(&mut self, value: &Value, key: Option<i64>) -> Result<(), ReleaseError> {
        match key {
            Some(k) if k < 0 => return Err(ReleaseError::NegativeKey(k)),
            Some(k) => info!("released [{k}]: {value}"),
            None => info!("released: {value}"),
        }
        self.released += 1;
        Ok(())
    }
}
