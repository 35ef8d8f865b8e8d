use std::collections::HashSet;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, error, info, warn};

use crate::errors::ConsensusError;
use crate::messages;
use crate::nodes::mailbox::Mailbox;
use crate::nodes::Server;
use crate::types;

pub enum ParticipantMessageIn {
    StartRound(messages::StartRoundMessage),
    Read(messages::ReadMessage),
    Gather(messages::GatherMessage),
    Abort(messages::AbortMessage),
    Impose(messages::ImposeMessage),
    Ack(messages::AckMessage),
    Decide(messages::DecideMessage),
}

/// Coarse view of where a participant stands in the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParticipantState {
    Idle,
    Gathering,
    Imposing,
    Accepted,
    Decided,
    Crashed,
}

/// One gather reply: the sender's impose ballot and accepted value, if any.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GatherState {
    pub estimate: Option<types::Value>,
    pub est_ballot: types::Ballot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RoundPhase {
    Gather,
    Impose,
    Done,
}

/// Bookkeeping for the round this participant is driving. A fresh one is
/// built for every StartRound, so replies to an older round can never count
/// towards the quorum of the current one.
#[derive(Debug)]
struct Round {
    ballot: types::Ballot,
    phase: RoundPhase,
    // One slot per participant, `Some` once its gather arrived
    gathered: Vec<Option<GatherState>>,
    acks: HashSet<types::ParticipantId>,
}

impl Round {
    fn new(ballot: types::Ballot, process_count: usize) -> Round {
        Round {
            ballot,
            phase: RoundPhase::Gather,
            gathered: vec![None; process_count],
            acks: HashSet::new(),
        }
    }

    fn gathered_count(&self) -> usize {
        self.gathered.iter().filter(|s| s.is_some()).count()
    }

    /// The accepted value with the highest estimate ballot among the gather
    /// replies, later slots winning ties.
    fn highest_estimate(&self) -> Option<types::Value> {
        let mut best: Option<GatherState> = None;
        for state in self.gathered.iter().flatten() {
            if state.estimate.is_none() {
                continue;
            }
            if best.map_or(true, |b| state.est_ballot >= b.est_ballot) {
                best = Some(*state);
            }
        }
        best.and_then(|b| b.estimate)
    }
}

pub struct Participant {
    node_id: types::ParticipantId,
    config: types::Config,
    mailbox: Mailbox,
    chance_to_crash: f64,
    rng: ChaCha8Rng,
    // Round initiator state
    ballot: types::Ballot,
    proposal: types::Value,
    round: Option<Round>,
    // Acceptor state
    read_ballot: types::Ballot,
    impose_ballot: types::Ballot,
    estimate: Option<types::Value>,
    decision: Option<types::Value>,
    crashed: bool,
}

impl Participant {
    pub fn new(
        participant_id: types::ParticipantId,
        config: types::Config,
        chance_to_crash: f64,
        mailbox: Mailbox,
    ) -> anyhow::Result<Participant> {
        if !config.contains(participant_id) {
            anyhow::bail!(
                "{} outside [0, {})",
                participant_id,
                config.process_count
            );
        }
        if !(0.0..=1.0).contains(&chance_to_crash) {
            anyhow::bail!("crash probability {} is not within [0, 1]", chance_to_crash);
        }
        let process_count = config.process_count as types::Ballot;
        let start = participant_id.index() as types::Ballot - process_count;
        Ok(Participant {
            node_id: participant_id,
            rng: config.rng_for(&types::Address::Participant(participant_id)),
            config,
            mailbox,
            chance_to_crash,
            ballot: start,
            proposal: types::Value::Zero,
            round: None,
            read_ballot: 0,
            impose_ballot: start,
            estimate: None,
            decision: None,
            crashed: false,
        })
    }

    pub fn id(&self) -> types::ParticipantId {
        self.node_id
    }

    pub fn ballot(&self) -> types::Ballot {
        self.ballot
    }

    pub fn proposal(&self) -> types::Value {
        self.proposal
    }

    pub fn read_ballot(&self) -> types::Ballot {
        self.read_ballot
    }

    pub fn impose_ballot(&self) -> types::Ballot {
        self.impose_ballot
    }

    pub fn estimate(&self) -> Option<types::Value> {
        self.estimate
    }

    pub fn decision(&self) -> Option<types::Value> {
        self.decision
    }

    /// True when no round driven by this participant is in flight.
    pub fn is_aborted(&self) -> bool {
        self.round.is_none()
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed
    }

    pub fn state(&self) -> ParticipantState {
        if self.crashed {
            return ParticipantState::Crashed;
        }
        if self.decision.is_some() {
            return ParticipantState::Decided;
        }
        match self.round.as_ref().map(|r| r.phase) {
            Some(RoundPhase::Gather) => ParticipantState::Gathering,
            Some(RoundPhase::Impose) | Some(RoundPhase::Done) => ParticipantState::Imposing,
            None if self.estimate.is_some() => ParticipantState::Accepted,
            None => ParticipantState::Idle,
        }
    }

    /// Stops this participant for good. Envelopes already queued for sending
    /// are left alone: they were on the wire before the crash.
    pub fn crash(&mut self) {
        if !self.crashed {
            warn!("{}: crashed", self.node_id);
        }
        self.crashed = true;
        self.mailbox.close();
    }

    pub fn handle_msg(&mut self, msg: ParticipantMessageIn) -> anyhow::Result<()> {
        self.try_to_crash();
        if self.crashed {
            return Ok(());
        }
        // A decided participant only looks at round triggers
        if self.decision.is_some() && !matches!(msg, ParticipantMessageIn::StartRound(_)) {
            return Ok(());
        }
        match msg {
            ParticipantMessageIn::StartRound(start_msg) => {
                if self.decision.is_some() {
                    return Ok(());
                }
                if self.round.is_some() {
                    debug!("{}: round {} still in flight", self.node_id, self.ballot);
                    return Ok(());
                }
                self.proposal = start_msg.proposal;
                self.ballot += self.config.process_count as types::Ballot;
                self.round = Some(Round::new(self.ballot, self.config.process_count));
                debug!(
                    "{}: starting round {} proposing {}",
                    self.node_id, self.ballot, self.proposal
                );
                self.send_all(messages::Message::Read(messages::ReadMessage {
                    src: self.node_id,
                    sender_ballot: self.ballot,
                    ballot: self.ballot,
                }));
            }
            ParticipantMessageIn::Read(read_msg) => match self.admit(read_msg.ballot) {
                Err(stale) => {
                    debug!("{}: rejecting read: {}", self.node_id, stale);
                    self.send_abort(read_msg.src, read_msg.sender_ballot, read_msg.ballot);
                }
                Ok(()) => {
                    self.read_ballot = read_msg.ballot;
                    let msg = messages::GatherMessage {
                        src: self.node_id,
                        sender_ballot: read_msg.sender_ballot,
                        ballot: read_msg.ballot,
                        est_ballot: self.impose_ballot,
                        estimate: self.estimate,
                    };
                    self.send(read_msg.src.into(), messages::Message::Gather(msg));
                }
            },
            ParticipantMessageIn::Gather(gather_msg) => {
                let slot = self.slot_of(gather_msg.src)?;
                let Some(round) = self.round.as_mut() else {
                    return Ok(());
                };
                if round.ballot != gather_msg.ballot || round.phase != RoundPhase::Gather {
                    return Ok(());
                }
                round.gathered[slot] = Some(GatherState {
                    estimate: gather_msg.estimate,
                    est_ballot: gather_msg.est_ballot,
                });
                if !self.config.is_majority(round.gathered_count()) {
                    return Ok(());
                }
                if let Some(value) = round.highest_estimate() {
                    self.proposal = value;
                }
                round.gathered.iter_mut().for_each(|state| *state = None);
                round.phase = RoundPhase::Impose;
                let ballot = round.ballot;
                debug!(
                    "{}: gathered a majority for round {}, imposing {}",
                    self.node_id, ballot, self.proposal
                );
                self.send_all(messages::Message::Impose(messages::ImposeMessage {
                    src: self.node_id,
                    sender_ballot: ballot,
                    ballot,
                    proposal: self.proposal,
                }));
            }
            ParticipantMessageIn::Abort(abort_msg) => {
                if self.round.as_ref().map(|r| r.ballot) == Some(abort_msg.ballot) {
                    debug!(
                        "{}: round {} aborted by {}",
                        self.node_id, abort_msg.ballot, abort_msg.src
                    );
                    self.round = None;
                }
            }
            ParticipantMessageIn::Impose(impose_msg) => match self.admit(impose_msg.ballot) {
                Err(stale) => {
                    debug!("{}: rejecting impose: {}", self.node_id, stale);
                    self.send_abort(impose_msg.src, impose_msg.sender_ballot, impose_msg.ballot);
                }
                Ok(()) => {
                    self.estimate = Some(impose_msg.proposal);
                    self.impose_ballot = impose_msg.ballot;
                    let msg = messages::AckMessage {
                        src: self.node_id,
                        sender_ballot: impose_msg.sender_ballot,
                        ballot: impose_msg.ballot,
                    };
                    self.send(impose_msg.src.into(), messages::Message::Ack(msg));
                }
            },
            ParticipantMessageIn::Ack(ack_msg) => {
                self.slot_of(ack_msg.src)?;
                let Some(round) = self.round.as_mut() else {
                    return Ok(());
                };
                if round.ballot != ack_msg.ballot || round.phase != RoundPhase::Impose {
                    return Ok(());
                }
                round.acks.insert(ack_msg.src);
                if !self.config.is_majority(round.acks.len()) {
                    return Ok(());
                }
                round.acks.clear();
                round.phase = RoundPhase::Done;
                let ballot = round.ballot;
                self.send_all(messages::Message::Decide(messages::DecideMessage {
                    src: self.node_id,
                    sender_ballot: ballot,
                    decision: self.proposal,
                }));
            }
            ParticipantMessageIn::Decide(decide_msg) => {
                if self.decision.is_none() {
                    info!("{}: decided {}", self.node_id, decide_msg.decision);
                    self.decision = Some(decide_msg.decision);
                    let msg = messages::DecideMessage {
                        src: self.node_id,
                        sender_ballot: self.ballot,
                        decision: decide_msg.decision,
                    };
                    self.send(types::Address::Aggregator, messages::Message::Decide(msg));
                }
            }
        }
        Ok(())
    }

    /// A read or impose for `ballot` may only be answered positively if no
    /// higher round has been seen.
    fn admit(&self, ballot: types::Ballot) -> Result<(), ConsensusError> {
        if ballot < self.read_ballot || ballot < self.impose_ballot {
            return Err(ConsensusError::StaleRound {
                ballot,
                read_ballot: self.read_ballot,
                impose_ballot: self.impose_ballot,
            });
        }
        Ok(())
    }

    fn slot_of(&self, src: types::ParticipantId) -> Result<usize, ConsensusError> {
        if self.config.contains(src) {
            Ok(src.index())
        } else {
            Err(ConsensusError::UnknownSender(src.into()))
        }
    }

    fn try_to_crash(&mut self) {
        if self.crashed || self.chance_to_crash <= 0.0 {
            return;
        }
        if self.rng.gen::<f64>() < self.chance_to_crash {
            self.crash();
        }
    }

    fn send_abort(
        &mut self,
        initiator: types::ParticipantId,
        sender_ballot: types::Ballot,
        ballot: types::Ballot,
    ) {
        let msg = messages::AbortMessage {
            src: self.node_id,
            sender_ballot,
            ballot,
        };
        self.send(initiator.into(), messages::Message::Abort(msg));
    }

    fn send(&mut self, dst: types::Address, message: messages::Message) {
        self.mailbox.send(messages::SendableMessage {
            src: self.node_id.into(),
            dst,
            message,
        });
    }

    /// Queue one copy of `message` for every participant, this one included.
    fn send_all(&mut self, message: messages::Message) {
        let participants: Vec<types::ParticipantId> = self.config.participants().collect();
        for dst in participants {
            self.send(dst.into(), message.clone());
        }
    }
}

impl Server for Participant {
    fn address(&self) -> types::Address {
        self.node_id.into()
    }

    fn accept_message(&mut self, msg: messages::SendableMessage) {
        self.mailbox.receive(msg);
    }

    fn work_on_message(&mut self) -> anyhow::Result<bool> {
        let received_msg = match self.mailbox.process_latest_in() {
            None => return Ok(false),
            Some(msg_in) => msg_in,
        };

        let inbox_received = match received_msg.message {
            messages::Message::StartRound(msg) => ParticipantMessageIn::StartRound(msg),
            messages::Message::Read(msg) => ParticipantMessageIn::Read(msg),
            messages::Message::Gather(msg) => ParticipantMessageIn::Gather(msg),
            messages::Message::Abort(msg) => ParticipantMessageIn::Abort(msg),
            messages::Message::Impose(msg) => ParticipantMessageIn::Impose(msg),
            messages::Message::Ack(msg) => ParticipantMessageIn::Ack(msg),
            messages::Message::Decide(msg) => ParticipantMessageIn::Decide(msg),
            msg => {
                error!(
                    "{}: Participant received unexpected message in mailbox: {:?}",
                    self.node_id, msg
                );
                return Ok(true);
            }
        };
        self.handle_msg(inbox_received)?;
        Ok(true)
    }

    fn deliver_sent(&mut self) -> Option<messages::SendableMessage> {
        self.mailbox.deliver_sent()
    }
}
