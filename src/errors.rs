use std::time::Duration;

use thiserror::Error;

use crate::types::{Address, Ballot, ParticipantId, Value};

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConsensusError {
    #[error("stale round: ballot {ballot} is below read ballot {read_ballot} or impose ballot {impose_ballot}")]
    StaleRound {
        ballot: Ballot,
        read_ballot: Ballot,
        impose_ballot: Ballot,
    },

    #[error("unknown sender: {0}")]
    UnknownSender(Address),

    #[error("agreement violated: {src} reported {reported} but {stored} was decided")]
    AgreementViolation {
        src: ParticipantId,
        stored: Value,
        reported: Value,
    },

    #[error("over-report: {reports} decision reports for {process_count} participants")]
    OverReport { reports: usize, process_count: usize },

    #[error("no answer from the aggregator within {0:?}")]
    Timeout(Duration),
}

impl ConsensusError {
    /// Whether the driver may simply ask again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConsensusError::Timeout(_))
    }
}
