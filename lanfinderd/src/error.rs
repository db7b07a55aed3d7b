//! Error types for the discovery engine.

use std::io;
use serde::Serialize;
use shared::types::Protocol;
use thiserror::Error;

/// Fatal failure of one probe. Isolated to that probe's part of the round.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{protocol} network unavailable: {error}")]
    NetworkUnavailable {
        protocol: Protocol,
        #[source]
        error: io::Error,
    },

    #[error("{protocol} query could not be sent: {error}")]
    SendFailure {
        protocol: Protocol,
        #[source]
        error: io::Error,
    },
}

impl ProbeError {
    pub fn protocol(&self) -> Protocol {
        match self {
            ProbeError::NetworkUnavailable { protocol, .. }
            | ProbeError::SendFailure { protocol, .. } => *protocol,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ProbeError::NetworkUnavailable { .. } => FailureKind::NetworkUnavailable,
            ProbeError::SendFailure { .. } => FailureKind::SendFailure,
        }
    }
}

/// Serializable classification of a probe failure, recorded in round reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NetworkUnavailable,
    SendFailure,
}

/// A payload that could not be turned into devices. Never aborts a round.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("not an SSDP search response: {0:?}")]
    NotAResponse(String),

    #[error("missing required header {0}")]
    MissingHeader(&'static str),

    #[error("message truncated at offset {0}")]
    Truncated(usize),

    #[error("malformed name at offset {0}")]
    BadName(usize),

    #[error("message declares {0} records but none could be decoded")]
    NoRecords(usize),
}

/// Round-level failures surfaced to the caller.
#[derive(Debug, Error)]
pub enum RoundError {
    #[error("no discovery socket could be opened")]
    NoUsableSocket(Vec<ProbeError>),

    #[error("discovery round cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_error_display() {
        let err = ProbeError::NetworkUnavailable {
            protocol: Protocol::Mdns,
            error: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(format!("{}", err), "MDNS network unavailable: denied");
        assert_eq!(err.protocol(), Protocol::Mdns);
        assert_eq!(err.kind(), FailureKind::NetworkUnavailable);
    }

    #[test]
    fn test_failure_kind_serialization() {
        let json = serde_json::to_string(&FailureKind::SendFailure).unwrap();
        assert_eq!(json, r#""send_failure""#);
    }
}
