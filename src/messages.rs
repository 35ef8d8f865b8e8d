use std::fmt;
use std::time::{Duration, Instant};

use crate::types;

#[derive(Clone, Debug)]
pub struct SendableMessage {
    pub src: types::Address,
    pub dst: types::Address,
    pub message: Message,
}

/// Enum of all messages exchanged between participants, the aggregator and the driver.
#[derive(Clone, Debug)]
pub enum Message {
    /// Sent by the aggregator (or a driver) to a leader to start a new round.
    StartRound(StartRoundMessage),
    /// Phase 1: sent by a round initiator to every participant.
    Read(ReadMessage),
    /// Phase 1 reply: reports the last value the sender accepted.
    Gather(GatherMessage),
    /// Sent back to a round initiator whose ballot is stale.
    Abort(AbortMessage),
    /// Phase 2: sent by a round initiator to every participant.
    Impose(ImposeMessage),
    /// Phase 2 reply: the sender accepted the imposed value.
    Ack(AckMessage),
    /// Sent by a round initiator to every participant once a majority acked,
    /// and by every deciding participant to the aggregator.
    Decide(DecideMessage),
    /// Sent by the driver to the aggregator to trigger a round via a leader.
    RequestRound(RequestRoundMessage),
    /// The aggregator's answer to a RequestRound.
    RoundStatus(RoundStatusMessage),
}

impl fmt::Display for SendableMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.message {
            Message::StartRound(_) => write!(f, "StartRound from {} => {}", self.src, self.dst),
            Message::Read(m) => write!(f, "Read({}) from {} => {}", m.ballot, self.src, self.dst),
            Message::Gather(m) => write!(f, "Gather({}) from {} => {}", m.ballot, self.src, self.dst),
            Message::Abort(m) => write!(f, "Abort({}) from {} => {}", m.ballot, self.src, self.dst),
            Message::Impose(m) => write!(f, "Impose({}) from {} => {}", m.ballot, self.src, self.dst),
            Message::Ack(m) => write!(f, "Ack({}) from {} => {}", m.ballot, self.src, self.dst),
            Message::Decide(m) => write!(f, "Decide({}) from {} => {}", m.decision, self.src, self.dst),
            Message::RequestRound(_) => write!(f, "RequestRound from {} => {}", self.src, self.dst),
            Message::RoundStatus(_) => write!(f, "RoundStatus from {} => {}", self.src, self.dst),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StartRoundMessage {
    pub proposal: types::Value,
}

#[derive(Clone, Debug)]
pub struct ReadMessage {
    pub src: types::ParticipantId,
    pub sender_ballot: types::Ballot,
    pub ballot: types::Ballot,
}

/// Carries the sender's impose ballot and, if it accepted a value, that value.
#[derive(Clone, Debug)]
pub struct GatherMessage {
    pub src: types::ParticipantId,
    pub sender_ballot: types::Ballot,
    pub ballot: types::Ballot,
    pub est_ballot: types::Ballot,
    pub estimate: Option<types::Value>,
}

#[derive(Clone, Debug)]
pub struct AbortMessage {
    pub src: types::ParticipantId,
    pub sender_ballot: types::Ballot,
    pub ballot: types::Ballot,
}

#[derive(Clone, Debug)]
pub struct ImposeMessage {
    pub src: types::ParticipantId,
    pub sender_ballot: types::Ballot,
    pub ballot: types::Ballot,
    pub proposal: types::Value,
}

#[derive(Clone, Debug)]
pub struct AckMessage {
    pub src: types::ParticipantId,
    pub sender_ballot: types::Ballot,
    pub ballot: types::Ballot,
}

#[derive(Clone, Debug)]
pub struct DecideMessage {
    pub src: types::ParticipantId,
    pub sender_ballot: types::Ballot,
    pub decision: types::Value,
}

/// `request_id` lets the driver tell the answer to this request apart from a
/// late answer to one that already timed out.
#[derive(Clone, Debug)]
pub struct RequestRoundMessage {
    pub request_id: u64,
    pub leader: types::ParticipantId,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoundStatusMessage {
    pub request_id: u64,
    pub decision: Option<types::Value>,
    pub launch_time: Option<Instant>,
    pub decide_time: Option<Instant>,
}

impl RoundStatusMessage {
    /// Time from the first round request to the first decision report.
    pub fn latency(&self) -> Option<Duration> {
        match (self.launch_time, self.decide_time) {
            (Some(launch), Some(decide)) => Some(decide.saturating_duration_since(launch)),
            _ => None,
        }
    }
}
