use std::time::Instant;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, error, info, warn};

use crate::errors::ConsensusError;
use crate::messages;
use crate::nodes::clock::ClockProvider;
use crate::nodes::mailbox::Mailbox;
use crate::nodes::Server;
use crate::types;

pub enum AggregatorMessageIn {
    RequestRound(messages::RequestRoundMessage),
    Decide(messages::DecideMessage),
}

/// Tracks the run-wide decision. It answers the driver's round requests,
/// forwards a random proposal to the chosen leader while nothing is decided
/// and cross-checks every decision report against the first one.
pub struct Aggregator {
    config: types::Config,
    mailbox: Mailbox,
    rng: ChaCha8Rng,
    // Clock provider for the launch and decide timestamps
    clock: Box<dyn ClockProvider + Send>,
    decision: Option<types::Value>,
    launch_time: Option<Instant>,
    decide_time: Option<Instant>,
    decision_reports: usize,
    anomalies: Vec<ConsensusError>,
}

impl Aggregator {
    pub fn new(
        config: types::Config,
        mailbox: Mailbox,
        clock: Box<dyn ClockProvider + Send>,
    ) -> Aggregator {
        Aggregator {
            rng: config.rng_for(&types::Address::Aggregator),
            config,
            mailbox,
            clock,
            decision: None,
            launch_time: None,
            decide_time: None,
            decision_reports: 0,
            anomalies: Vec::new(),
        }
    }

    pub fn decision(&self) -> Option<types::Value> {
        self.decision
    }

    pub fn launch_time(&self) -> Option<Instant> {
        self.launch_time
    }

    pub fn decide_time(&self) -> Option<Instant> {
        self.decide_time
    }

    pub fn decision_reports(&self) -> usize {
        self.decision_reports
    }

    /// Every agreement violation, over-report and unknown reporter seen so far.
    pub fn anomalies(&self) -> &[ConsensusError] {
        &self.anomalies
    }

    pub fn agreement_violations(&self) -> usize {
        self.anomalies
            .iter()
            .filter(|a| matches!(a, ConsensusError::AgreementViolation { .. }))
            .count()
    }

    pub fn over_reports(&self) -> usize {
        self.anomalies
            .iter()
            .filter(|a| matches!(a, ConsensusError::OverReport { .. }))
            .count()
    }

    pub fn status(&self, request_id: u64) -> messages::RoundStatusMessage {
        messages::RoundStatusMessage {
            request_id,
            decision: self.decision,
            launch_time: self.launch_time,
            decide_time: self.decide_time,
        }
    }

    pub fn handle_msg(&mut self, msg: AggregatorMessageIn) -> anyhow::Result<()> {
        match msg {
            AggregatorMessageIn::RequestRound(request) => {
                if self.launch_time.is_none() {
                    self.launch_time = Some(self.clock.now());
                }
                let status = self.status(request.request_id);
                self.send(types::Address::Driver, messages::Message::RoundStatus(status));

                if self.decision.is_some() {
                    return Ok(());
                }
                if !self.config.contains(request.leader) {
                    self.report(ConsensusError::UnknownSender(request.leader.into()));
                    return Ok(());
                }
                let proposal = types::Value::from(self.rng.gen::<bool>());
                debug!("Aggregator: asking {} to propose {}", request.leader, proposal);
                self.send(
                    request.leader.into(),
                    messages::Message::StartRound(messages::StartRoundMessage { proposal }),
                );
            }
            AggregatorMessageIn::Decide(decide_msg) => {
                if !self.config.contains(decide_msg.src) {
                    self.report(ConsensusError::UnknownSender(decide_msg.src.into()));
                    return Ok(());
                }
                match self.decision {
                    None => {
                        info!(
                            "Aggregator: first decision {} reported by {}",
                            decide_msg.decision, decide_msg.src
                        );
                        self.decide_time = Some(self.clock.now());
                        self.decision = Some(decide_msg.decision);
                    }
                    Some(stored) if stored != decide_msg.decision => {
                        self.report(ConsensusError::AgreementViolation {
                            src: decide_msg.src,
                            stored,
                            reported: decide_msg.decision,
                        });
                    }
                    Some(_) => {}
                }

                self.decision_reports += 1;
                let process_count = self.config.process_count;
                if self.decision_reports == process_count {
                    info!("Aggregator: all {} participants decided", process_count);
                } else if self.decision_reports > process_count {
                    self.report(ConsensusError::OverReport {
                        reports: self.decision_reports,
                        process_count,
                    });
                }
            }
        }
        Ok(())
    }

    fn report(&mut self, anomaly: ConsensusError) {
        match anomaly {
            ConsensusError::AgreementViolation { .. } | ConsensusError::OverReport { .. } => {
                error!("Aggregator: {}", anomaly)
            }
            _ => warn!("Aggregator: {}", anomaly),
        }
        self.anomalies.push(anomaly);
    }

    fn send(&mut self, dst: types::Address, message: messages::Message) {
        self.mailbox.send(messages::SendableMessage {
            src: types::Address::Aggregator,
            dst,
            message,
        });
    }
}

impl Server for Aggregator {
    fn address(&self) -> types::Address {
        types::Address::Aggregator
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
            messages::Message::RequestRound(msg) => AggregatorMessageIn::RequestRound(msg),
            messages::Message::Decide(msg) => AggregatorMessageIn::Decide(msg),
            msg => {
                error!(
                    "Aggregator: received unexpected message in mailbox: {:?}",
                    msg
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
