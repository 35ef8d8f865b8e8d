// How long the driver sticks with one leader before picking another
pub const LEADER_TIMEOUT_MILLIS: u64 = 100;

// Pause between two round-trigger requests sent to the aggregator
pub const POLL_INTERVAL_MILLIS: u64 = 50;

// Bound on the synchronous wait for the aggregator's answer
pub const ASK_TIMEOUT_SECS: u64 = 150;

// Give up on an iteration that has not decided after this long
pub const DECISION_DEADLINE_SECS: u64 = 300;

// Odd multiplier used to spread a run seed over the nodes of a run
pub const SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;
