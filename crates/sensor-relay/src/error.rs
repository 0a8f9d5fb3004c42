// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay error taxonomy.
//!
//! Only [`RelayError::StorageFault`] ever needs an operator. Sink trouble is
//! absorbed by the reconciler and shows up as a link state change instead.

use crate::config::ConfigError;
use crate::sink::SinkError;
use thiserror::Error;

/// Errors surfaced by the relay core.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Local durable buffer could not be read or written.
    #[error("Storage fault: {0}")]
    StorageFault(String),

    /// Sink could not be reached or refused the write.
    #[error("Sink unavailable: {0}")]
    SinkUnavailable(String),

    /// Sink acknowledged only part of a bulk write.
    #[error("Partial batch failure: {accepted}/{total} accepted")]
    PartialBatchFailure { accepted: usize, total: usize },

    /// Record payload cannot be turned into the sink's wire form.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// A sink call ran past its deadline.
    #[error("Sink call timed out after {0} ms")]
    Timeout(u64),

    /// A reconciliation pass is already running.
    #[error("Sync pass already in flight")]
    PassInFlight,

    /// The service is stopping and no longer accepts work.
    #[error("Relay is shutting down")]
    ShuttingDown,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RelayError {
    /// True for the only error class that means a record may be lost.
    pub fn is_storage_fault(&self) -> bool {
        matches!(self, Self::StorageFault(_))
    }
}

impl From<rusqlite::Error> for RelayError {
    fn from(e: rusqlite::Error) -> Self {
        Self::StorageFault(e.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedRecord(e.to_string())
    }
}

impl From<SinkError> for RelayError {
    fn from(e: SinkError) -> Self {
        match e {
            SinkError::Partial { accepted, total } => {
                Self::PartialBatchFailure { accepted, total }
            }
            SinkError::Malformed(msg) => Self::MalformedRecord(msg),
            other => Self::SinkUnavailable(other.to_string()),
        }
    }
}

/// Result alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_error_mapping() {
        let e: RelayError = SinkError::Partial {
            accepted: 2,
            total: 3,
        }
        .into();
        assert!(matches!(
            e,
            RelayError::PartialBatchFailure {
                accepted: 2,
                total: 3
            }
        ));

        let e: RelayError = SinkError::Unavailable("refused".into()).into();
        assert!(matches!(e, RelayError::SinkUnavailable(_)));
        assert!(!e.is_storage_fault());
    }

    #[test]
    fn test_storage_fault_from_sqlite() {
        let e: RelayError = rusqlite::Error::InvalidQuery.into();
        assert!(e.is_storage_fault());
    }
}
