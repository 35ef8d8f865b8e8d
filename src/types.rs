use std::fmt;
use std::time::Duration;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::constants;

/// A ballot orders competing rounds. Participant `id` only ever uses ballots
/// congruent to `id` modulo the process count, so two participants never
/// share one.
pub type Ballot = i64;

/// The binary value the participants agree on.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Value {
    Zero,
    One,
}

impl From<bool> for Value {
    fn from(bit: bool) -> Self {
        if bit {
            Value::One
        } else {
            Value::Zero
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Zero => write!(f, "0"),
            Value::One => write!(f, "1"),
        }
    }
}

/// Index of a participant in `[0, process_count)`.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct ParticipantId(usize);

impl ParticipantId {
    pub fn new(id: usize) -> ParticipantId {
        ParticipantId(id)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Participant{}", self.0)
    }
}

/// Where an envelope is routed to. Participants, the aggregator and the
/// driver each own one mailbox.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Address {
    Participant(ParticipantId),
    Aggregator,
    Driver,
}

impl Address {
    fn seed_offset(&self) -> u64 {
        match self {
            Address::Aggregator => 0,
            Address::Driver => 1,
            Address::Participant(id) => id.index() as u64 + 2,
        }
    }
}

impl From<ParticipantId> for Address {
    fn from(id: ParticipantId) -> Self {
        Address::Participant(id)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::Participant(id) => write!(f, "{}", id),
            Address::Aggregator => write!(f, "Aggregator"),
            Address::Driver => write!(f, "Driver"),
        }
    }
}

/// Timing knobs of the round-trigger driver.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeoutConfig {
    // Leader rotation
    pub leader_timeout: Duration,
    pub poll_interval: Duration,
    // Synchronous ask to the aggregator
    pub ask_timeout: Duration,
    pub decision_deadline: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            leader_timeout: Duration::from_millis(constants::LEADER_TIMEOUT_MILLIS),
            poll_interval: Duration::from_millis(constants::POLL_INTERVAL_MILLIS),
            ask_timeout: Duration::from_secs(constants::ASK_TIMEOUT_SECS),
            decision_deadline: Duration::from_secs(constants::DECISION_DEADLINE_SECS),
        }
    }
}

/// A run configuration: how many participants take part, the optional run
/// seed and the driver timeouts. It is shared read-only by every node.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub process_count: usize,
    pub seed: Option<u64>,
    pub timeout_config: TimeoutConfig,
}

impl Config {
    pub fn new(
        process_count: usize,
        seed: Option<u64>,
        timeout_config: Option<TimeoutConfig>,
    ) -> Config {
        Config {
            process_count,
            seed,
            timeout_config: timeout_config.unwrap_or_default(),
        }
    }

    /// Smallest number of participants forming a majority.
    pub fn quorum(&self) -> usize {
        self.process_count / 2 + 1
    }

    pub fn is_majority(&self, count: usize) -> bool {
        count >= self.quorum()
    }

    /// Number of participants allowed to crash, always a strict minority.
    pub fn faulty_count(&self) -> usize {
        (self.process_count / 2).saturating_sub(1)
    }

    /// Per-participant crash probability: the first `faulty_count`
    /// participants get `chance_to_crash`, the others never crash.
    pub fn crash_chances(&self, chance_to_crash: f64) -> Vec<f64> {
        let faulty = self.faulty_count();
        (0..self.process_count)
            .map(|id| if id < faulty { chance_to_crash } else { 0.0 })
            .collect()
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        id.index() < self.process_count
    }

    pub fn participants(&self) -> impl Iterator<Item = ParticipantId> {
        (0..self.process_count).map(ParticipantId::new)
    }

    /// Random stream owned by the node at `address`. With a run seed every
    /// node gets its own reproducible stream; without one the stream is
    /// seeded from the OS.
    pub fn rng_for(&self, address: &Address) -> ChaCha8Rng {
        let seed = match self.seed {
            Some(seed) => {
                seed.wrapping_add(address.seed_offset().wrapping_mul(constants::SEED_MIX))
            }
            None => rand::random(),
        };
        ChaCha8Rng::seed_from_u64(seed)
    }
}
