use thiserror::Error;

use crate::ModelError;

/// Errors that end a simulation run.
#[derive(Debug, Error)]
pub enum ForestError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("lineages in populations {first} and {second} can never meet; add migration between them")]
    DisconnectedLineages { first: usize, second: usize },
    #[error("population {0} has negative growth, so its lineages might never coalesce")]
    NegativeGrowth(usize),
    #[error("circular pulse migration into population {population} at time {time}")]
    CircularMigration { population: usize, time: f64 },
}

/// A [`TimeIntervalIterator`](crate::TimeIntervalIterator) was advanced past its last interval.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
#[error("no time interval left")]
pub struct IntervalsExhausted;
