use std::fmt;

/// Failure modes of a `Bulletin` operation (spec §4.3).
#[derive(Debug)]
pub enum DiscoveryError {
    /// The backing store could not be reached at all.
    Unavailable(String),
    /// A read observed a value known to be out of date (reserved for a
    /// future quorum-read bulletin; the two implementations here never
    /// return it today).
    StaleRead,
    /// A conditional write lost a race with a concurrent writer.
    ConflictingWrite,
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryError::Unavailable(msg) => write!(f, "discovery bulletin unavailable: {}", msg),
            DiscoveryError::StaleRead => write!(f, "discovery bulletin read returned a stale value"),
            DiscoveryError::ConflictingWrite => write!(f, "discovery bulletin write lost a race"),
        }
    }
}

impl std::error::Error for DiscoveryError {}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
