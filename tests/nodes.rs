use std::collections::{HashMap, HashSet};
use std::time::Instant;

use quickcheck::quickcheck;
use synodsim::messages::{Message, SendableMessage, StartRoundMessage};
use synodsim::nodes::aggregator::Aggregator;
use synodsim::nodes::clock::MockClock;
use synodsim::nodes::mailbox::Mailbox;
use synodsim::nodes::participant::{Participant, ParticipantState};
use synodsim::nodes::Server;
use synodsim::types::{Address, Ballot, Config, ParticipantId, Value};

/// Every participant and the aggregator wired to one pool of in-flight
/// envelopes. Tests choose which envelope is delivered next; envelopes
/// between the same pair of nodes always leave the pool oldest first.
struct Network {
    participants: Vec<Participant>,
    aggregator: Aggregator,
    in_flight: Vec<SendableMessage>,
    proposals: HashSet<Value>,
    ballot_owners: HashMap<Ballot, ParticipantId>,
    shared_ballot: bool,
    thresholds_went_back: bool,
}

impl Network {
    fn new(process_count: usize, seed: u64, crash_chances: &[f64]) -> Network {
        let config = Config::new(process_count, Some(seed), None);
        let participants = (0..process_count)
            .map(|id| {
                let chance = crash_chances.get(id).copied().unwrap_or(0.0);
                Participant::new(ParticipantId::new(id), config.clone(), chance, Mailbox::new())
                    .unwrap()
            })
            .collect();
        let clock = Box::new(MockClock::starting_at(Instant::now()));
        Network {
            participants,
            aggregator: Aggregator::new(config, Mailbox::new(), clock),
            in_flight: Vec::new(),
            proposals: HashSet::new(),
            ballot_owners: HashMap::new(),
            shared_ballot: false,
            thresholds_went_back: false,
        }
    }

    fn participant(&self, id: usize) -> &Participant {
        &self.participants[id]
    }

    fn start_round(&mut self, leader: usize, proposal: Value) {
        self.proposals.insert(proposal);
        let envelope = SendableMessage {
            src: Address::Driver,
            dst: Address::Participant(ParticipantId::new(leader)),
            message: Message::StartRound(StartRoundMessage { proposal }),
        };
        self.route(envelope);
    }

    /// Hands one envelope to its destination and pools whatever comes back.
    fn route(&mut self, envelope: SendableMessage) {
        match envelope.dst {
            Address::Participant(id) => {
                let participant = &mut self.participants[id.index()];
                let before = (participant.read_ballot(), participant.impose_ballot());
                participant.accept_message(envelope);
                while participant.work_on_message().unwrap() {}
                let after = (participant.read_ballot(), participant.impose_ballot());
                if after.0 < before.0 || after.1 < before.1 {
                    self.thresholds_went_back = true;
                }
                while let Some(out) = self.participants[id.index()].deliver_sent() {
                    self.pool(out);
                }
            }
            Address::Aggregator => {
                self.aggregator.accept_message(envelope);
                while self.aggregator.work_on_message().unwrap() {}
                while let Some(out) = self.aggregator.deliver_sent() {
                    self.pool(out);
                }
            }
            Address::Driver => {}
        }
    }

    fn pool(&mut self, envelope: SendableMessage) {
        if let (Message::Read(read), Address::Participant(_)) = (&envelope.message, envelope.src) {
            let owner = *self.ballot_owners.entry(read.ballot).or_insert(read.src);
            if owner != read.src {
                self.shared_ballot = true;
            }
        }
        self.in_flight.push(envelope);
    }

    /// Delivers the oldest envelope travelling the same way as `in_flight[pick]`.
    fn deliver(&mut self, pick: usize) {
        if self.in_flight.is_empty() {
            return;
        }
        let picked = &self.in_flight[pick % self.in_flight.len()];
        let (src, dst) = (picked.src, picked.dst);
        let oldest = self
            .in_flight
            .iter()
            .position(|m| m.src == src && m.dst == dst)
            .unwrap();
        let envelope = self.in_flight.remove(oldest);
        self.route(envelope);
    }

    /// Delivers every envelope currently in flight that matches `filter`;
    /// envelopes produced meanwhile stay in flight.
    fn deliver_where(&mut self, filter: impl Fn(&SendableMessage) -> bool) -> usize {
        let (selected, rest): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.in_flight).into_iter().partition(|m| filter(m));
        self.in_flight = rest;
        let delivered = selected.len();
        for envelope in selected {
            self.route(envelope);
        }
        delivered
    }

    fn run_to_quiescence(&mut self) {
        while !self.in_flight.is_empty() {
            self.deliver(0);
        }
    }

    fn decisions(&self) -> Vec<Option<Value>> {
        self.participants.iter().map(|p| p.decision()).collect()
    }
}

fn is_read(m: &SendableMessage) -> bool {
    matches!(m.message, Message::Read(_))
}

fn is_gather(m: &SendableMessage) -> bool {
    matches!(m.message, Message::Gather(_))
}

fn is_impose(m: &SendableMessage) -> bool {
    matches!(m.message, Message::Impose(_))
}

#[test]
fn four_correct_participants_decide_the_leader_proposal() {
    let mut network = Network::new(4, 1, &[]);
    network.start_round(0, Value::One);
    network.run_to_quiescence();

    assert_eq!(network.decisions(), vec![Some(Value::One); 4]);
    assert_eq!(network.aggregator.decision(), Some(Value::One));
    assert_eq!(network.aggregator.decision_reports(), 4);
    assert!(network.aggregator.anomalies().is_empty());
}

#[test]
fn crashed_leader_stalls_its_round_until_another_leader_retries() {
    let mut network = Network::new(5, 2, &[]);
    network.start_round(2, Value::One);
    assert_eq!(network.deliver_where(is_read), 5);
    network.participants[2].crash();
    network.run_to_quiescence();

    assert_eq!(network.decisions(), vec![None; 5]);
    assert_eq!(network.aggregator.decision(), None);
    assert_eq!(network.participant(2).state(), ParticipantState::Crashed);

    network.start_round(3, Value::Zero);
    assert!(network.participant(3).ballot() > network.participant(2).ballot());
    network.run_to_quiescence();

    let decisions = network.decisions();
    assert_eq!(decisions[2], None);
    for (id, decision) in decisions.iter().enumerate() {
        if id != 2 {
            assert_eq!(*decision, Some(Value::Zero));
        }
    }
    assert_eq!(network.aggregator.decision_reports(), 4);
}

#[test]
fn higher_ballot_preempts_a_racing_leader() {
    let mut network = Network::new(5, 3, &[]);
    network.start_round(0, Value::Zero);
    network.deliver_where(is_read);
    network.deliver_where(is_gather);
    assert_eq!(network.participant(0).state(), ParticipantState::Imposing);

    network.start_round(1, Value::One);
    let a = network.participant(0).ballot();
    let b = network.participant(1).ballot();
    assert!(b > a);
    network.deliver_where(is_read);
    network.deliver_where(is_impose);
    for p in &network.participants {
        assert!(p.read_ballot() >= b);
        assert_eq!(p.estimate(), None);
    }
    network.run_to_quiescence();

    assert!(network.participant(0).is_aborted());
    assert_eq!(network.decisions(), vec![Some(Value::One); 5]);
    for p in &network.participants {
        assert_eq!(p.estimate(), Some(Value::One));
    }
    assert_eq!(network.aggregator.agreement_violations(), 0);
}

#[test]
fn later_round_adopts_value_accepted_by_a_majority() {
    let mut network = Network::new(5, 4, &[]);
    network.start_round(0, Value::Zero);
    network.deliver_where(is_read);
    network.deliver_where(is_gather);
    network.deliver_where(is_impose);
    // Zero is now accepted everywhere at ballot 0, but its leader never hears the acks
    network.participants[0].crash();
    network.run_to_quiescence();
    assert_eq!(network.decisions(), vec![None; 5]);

    network.start_round(4, Value::One);
    network.run_to_quiescence();

    assert_eq!(network.participant(4).proposal(), Value::Zero);
    let mut expected = vec![Some(Value::Zero); 5];
    expected[0] = None;
    assert_eq!(network.decisions(), expected);
    assert_eq!(network.aggregator.decision(), Some(Value::Zero));
}

#[test]
fn repeated_decide_is_not_reported_twice() {
    let mut network = Network::new(3, 5, &[]);
    network.start_round(0, Value::One);
    network.run_to_quiescence();
    network.start_round(1, Value::Zero);
    network.run_to_quiescence();

    assert_eq!(network.decisions(), vec![Some(Value::One); 3]);
    assert_eq!(network.aggregator.decision_reports(), 3);
    assert_eq!(network.aggregator.over_reports(), 0);
}

#[test]
fn round_request_through_aggregator_reaches_a_decision() {
    let mut network = Network::new(4, 6, &[]);
    network.route(SendableMessage {
        src: Address::Driver,
        dst: Address::Aggregator,
        message: Message::RequestRound(synodsim::messages::RequestRoundMessage {
            request_id: 1,
            leader: ParticipantId::new(3),
        }),
    });
    network.run_to_quiescence();

    let decided = network.aggregator.decision();
    assert!(decided.is_some());
    assert_eq!(network.decisions(), vec![decided; 4]);
    assert!(network.aggregator.status(2).latency().is_some());
}

/// Plays a schedule of round starts and deliveries, then lets a correct
/// participant retry until the run decides.
fn play(process_count: usize, seed: u64, schedule: &[(u8, u8)]) -> Network {
    let config = Config::new(process_count, None, None);
    let chances = config.crash_chances(0.2);
    let mut network = Network::new(process_count, seed, &chances);

    network.start_round(process_count - 1, Value::from(seed % 2 == 0));
    for (op, arg) in schedule {
        if op % 8 == 0 {
            network.start_round(*arg as usize % process_count, Value::from(arg % 2 == 1));
        } else {
            network.deliver(*arg as usize);
        }
    }
    network.run_to_quiescence();

    let last = process_count - 1;
    for _ in 0..256 {
        if network.aggregator.decision().is_some() {
            break;
        }
        network.start_round(last, Value::One);
        network.run_to_quiescence();
    }
    network
}

quickcheck! {
    fn deciders_agree_under_any_delivery_order(seed: u64, schedule: Vec<(u8, u8)>) -> bool {
        let process_count = 3 + (seed % 5) as usize;
        let network = play(process_count, seed, &schedule);
        let decided: HashSet<Value> = network.decisions().into_iter().flatten().collect();
        decided.len() <= 1 && network.aggregator.agreement_violations() == 0
    }

    fn decided_value_was_proposed(seed: u64, schedule: Vec<(u8, u8)>) -> bool {
        let network = play(5, seed, &schedule);
        network
            .decisions()
            .into_iter()
            .flatten()
            .all(|value| network.proposals.contains(&value))
    }

    fn correct_majority_always_terminates(seed: u64, schedule: Vec<(u8, u8)>) -> bool {
        let network = play(4 + (seed % 4) as usize, seed, &schedule);
        network.aggregator.decision().is_some()
            && network.aggregator.over_reports() == 0
    }

    fn ballots_are_unique_and_thresholds_monotonic(seed: u64, schedule: Vec<(u8, u8)>) -> bool {
        let network = play(5, seed, &schedule);
        !network.shared_ballot && !network.thresholds_went_back
    }
}
