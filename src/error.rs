use thiserror::Error;

/// The error taxonomy for the hub core (§7).
///
/// Every fallible operation across the forensic ledger, the filter, the
/// kriging engine, the decision engine, the valve dispatcher and the sync
/// component returns this type rather than leaking a storage- or
/// transport-specific error.
#[derive(Error, Debug)]
pub enum HubError {
    /// Bad coordinates, NaN VWC, depth not in a sensor's installed set.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// A required field was missing during canonicalisation.
    #[error("invalid canonicalisation: {message}")]
    InvalidCanonicalisation { message: String },

    /// A measurement or grid cell with this own-hash already exists.
    #[error("already stored: {message}")]
    AlreadyStored { message: String },

    /// previous-hash did not match the chain predecessor's own-hash.
    #[error("chain broken: {message}")]
    ChainBroken { message: String },

    /// A stored hash did not match its recomputed value.
    #[error("integrity lost: {message}")]
    IntegrityLost { message: String },

    /// Mirror link down, valve timeout, or other retryable condition.
    #[error("transient failure: {message}")]
    Transient { message: String },

    /// A deadline elapsed before the operation completed.
    #[error("cancelled: {message}")]
    Cancelled { message: String },

    /// The deep-percolation interlock fired.
    #[error("interlock triggered: {message}")]
    Interlock { message: String },

    /// A precondition for the requested transition did not hold.
    #[error("precondition failed: {message}")]
    PreconditionFailed { message: String },

    /// The embedded database returned an error.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// A filesystem operation (archival, log rotation) failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialisation failed outside of canonicalisation.
    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

impl HubError {
    pub fn invalid_input<T: Into<String>>(message: T) -> Self {
        Self::InvalidInput { message: message.into() }
    }

    pub fn invalid_canonicalisation<T: Into<String>>(message: T) -> Self {
        Self::InvalidCanonicalisation { message: message.into() }
    }

    pub fn already_stored<T: Into<String>>(message: T) -> Self {
        Self::AlreadyStored { message: message.into() }
    }

    pub fn chain_broken<T: Into<String>>(message: T) -> Self {
        Self::ChainBroken { message: message.into() }
    }

    pub fn integrity_lost<T: Into<String>>(message: T) -> Self {
        Self::IntegrityLost { message: message.into() }
    }

    pub fn transient<T: Into<String>>(message: T) -> Self {
        Self::Transient { message: message.into() }
    }

    pub fn cancelled<T: Into<String>>(message: T) -> Self {
        Self::Cancelled { message: message.into() }
    }

    pub fn interlock<T: Into<String>>(message: T) -> Self {
        Self::Interlock { message: message.into() }
    }

    pub fn precondition_failed<T: Into<String>>(message: T) -> Self {
        Self::PreconditionFailed { message: message.into() }
    }

    /// True for errors the propagation policy in §7 allows a cycle to retry
    /// with backoff before downgrading to `Cancelled`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// True for errors that are fatal to the affected stream per §7.
    pub fn is_fatal_to_stream(&self) -> bool {
        matches!(self, Self::ChainBroken { .. } | Self::IntegrityLost { .. })
    }
}

/// Result type alias used throughout the crate.
pub type HubResult<T> = Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification_matches_propagation_policy() {
        assert!(HubError::transient("mirror link down").is_retryable());
        assert!(!HubError::invalid_input("nan vwc").is_retryable());
    }

    #[test]
    fn fatal_to_stream_classification() {
        assert!(HubError::chain_broken("x").is_fatal_to_stream());
        assert!(HubError::integrity_lost("x").is_fatal_to_stream());
        assert!(!HubError::transient("x").is_fatal_to_stream());
    }

    #[test]
    fn constructors_carry_message() {
        match HubError::precondition_failed("valve in FAULT") {
            HubError::PreconditionFailed { message } => assert_eq!(message, "valve in FAULT"),
            _ => panic!("wrong variant"),
        }
    }
}
