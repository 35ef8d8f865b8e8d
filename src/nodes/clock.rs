use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// A scheduled action to be executed at a specific time.
#[derive(Debug, Clone)]
pub struct TimerEvent {
    pub when: Instant,
    pub action: ClockAction,
}

impl PartialEq for TimerEvent {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when
    }
}

impl Eq for TimerEvent {}

impl PartialOrd for TimerEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest first)
        other.when.cmp(&self.when)
    }
}

/// Actions the round-trigger driver schedules for later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockAction {
    /// The current leader had its chance; pick another one.
    RotateLeader,
    /// Ask the aggregator whether the run has decided.
    PollDecision,
}

/// Trait for different clock implementations.
pub trait ClockProvider {
    /// Get the current time.
    fn now(&self) -> Instant;

    /// Schedule an action to occur after the given duration.
    fn schedule(&mut self, action: ClockAction, delay: Duration);

    /// Cancel all pending actions of a specific type.
    fn cancel(&mut self, action: &ClockAction);

    /// Get the time left until the next pending timer, if any.
    fn next_timeout(&self) -> Option<Duration>;

    /// Check for expired timers and return them.
    fn check_timers(&mut self) -> Vec<ClockAction>;
}

/// A clock owned by a driver loop.
pub struct Clock {
    provider: Box<dyn ClockProvider + Send>,
}

impl Clock {
    pub fn new(provider: Box<dyn ClockProvider + Send>) -> Self {
        Clock { provider }
    }

    pub fn now(&self) -> Instant {
        self.provider.now()
    }

    pub fn schedule(&mut self, action: ClockAction, delay: Duration) {
        self.provider.schedule(action, delay);
    }

    pub fn cancel(&mut self, action: &ClockAction) {
        self.provider.cancel(action);
    }

    pub fn next_timeout(&self) -> Option<Duration> {
        self.provider.next_timeout()
    }

    pub fn check_timers(&mut self) -> Vec<ClockAction> {
        self.provider.check_timers()
    }
}

/// Pending timers, earliest first. Shared by both clock providers.
#[derive(Debug, Default)]
struct TimerQueue {
    timers: BinaryHeap<TimerEvent>,
}

impl TimerQueue {
    fn push(&mut self, action: ClockAction, when: Instant) {
        self.timers.push(TimerEvent { when, action });
    }

    fn cancel(&mut self, action: &ClockAction) {
        self.timers.retain(|timer| timer.action != *action);
    }

    fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.timers
            .peek()
            .map(|timer| timer.when.saturating_duration_since(now))
    }

    fn expired(&mut self, now: Instant) -> Vec<ClockAction> {
        let mut expired = Vec::new();
        while let Some(timer) = self.timers.peek() {
            if timer.when > now {
                break;
            }
            if let Some(timer) = self.timers.pop() {
                expired.push(timer.action);
            }
        }
        expired
    }

    fn len(&self) -> usize {
        self.timers.len()
    }
}

/// A real-time clock provider for production use.
#[derive(Debug, Default)]
pub struct SystemClock {
    timers: TimerQueue,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClockProvider for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn schedule(&mut self, action: ClockAction, delay: Duration) {
        let when = self.now() + delay;
        self.timers.push(action, when);
    }

    fn cancel(&mut self, action: &ClockAction) {
        self.timers.cancel(action);
    }

    fn next_timeout(&self) -> Option<Duration> {
        self.timers.next_timeout(self.now())
    }

    fn check_timers(&mut self) -> Vec<ClockAction> {
        let now = self.now();
        self.timers.expired(now)
    }
}

/// A controllable clock for testing.
#[derive(Debug)]
pub struct MockClock {
    current_time: Instant,
    timers: TimerQueue,
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(time: Instant) -> Self {
        MockClock {
            current_time: time,
            timers: TimerQueue::default(),
        }
    }

    /// Advance the mock clock by the given duration.
    pub fn advance(&mut self, duration: Duration) {
        self.current_time += duration;
    }

    /// Number of timers still pending.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }
}

impl ClockProvider for MockClock {
    fn now(&self) -> Instant {
        self.current_time
    }

    fn schedule(&mut self, action: ClockAction, delay: Duration) {
        let when = self.current_time + delay;
        self.timers.push(action, when);
    }

    fn cancel(&mut self, action: &ClockAction) {
        self.timers.cancel(action);
    }

    fn next_timeout(&self) -> Option<Duration> {
        self.timers.next_timeout(self.current_time)
    }

    fn check_timers(&mut self) -> Vec<ClockAction> {
        self.timers.expired(self.current_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_mock_clock_fires_after_delay() {
        let mut mock_clock = MockClock::new();

        mock_clock.schedule(ClockAction::RotateLeader, Duration::from_millis(100));
        assert!(mock_clock.check_timers().is_empty());

        mock_clock.advance(Duration::from_millis(50));
        assert!(mock_clock.check_timers().is_empty());

        mock_clock.advance(Duration::from_millis(60));
        let expired = mock_clock.check_timers();
        assert_eq!(expired, vec![ClockAction::RotateLeader]);
        assert_eq!(mock_clock.pending_timers(), 0);
    }

    #[test]
    fn test_cancel_only_drops_matching_actions() {
        let mut mock_clock = MockClock::new();

        mock_clock.schedule(ClockAction::RotateLeader, Duration::from_millis(100));
        mock_clock.schedule(ClockAction::PollDecision, Duration::from_millis(150));
        mock_clock.schedule(ClockAction::RotateLeader, Duration::from_millis(200));

        mock_clock.cancel(&ClockAction::RotateLeader);
        mock_clock.advance(Duration::from_millis(300));

        assert_eq!(mock_clock.check_timers(), vec![ClockAction::PollDecision]);
    }

    #[test]
    fn test_next_timeout_calculation() {
        let mut mock_clock = MockClock::new();
        assert!(mock_clock.next_timeout().is_none());

        mock_clock.schedule(ClockAction::PollDecision, Duration::from_millis(100));
        assert_eq!(mock_clock.next_timeout(), Some(Duration::from_millis(100)));

        mock_clock.advance(Duration::from_millis(50));
        assert_eq!(mock_clock.next_timeout(), Some(Duration::from_millis(50)));

        mock_clock.advance(Duration::from_millis(80));
        assert_eq!(mock_clock.next_timeout(), Some(Duration::ZERO));
    }

    #[test]
    fn test_timers_fire_in_time_order() {
        let mut mock_clock = MockClock::new();

        mock_clock.schedule(ClockAction::RotateLeader, Duration::from_millis(300));
        mock_clock.schedule(ClockAction::PollDecision, Duration::from_millis(100));

        mock_clock.advance(Duration::from_millis(150));
        assert_eq!(mock_clock.check_timers(), vec![ClockAction::PollDecision]);

        mock_clock.advance(Duration::from_millis(200));
        assert_eq!(mock_clock.check_timers(), vec![ClockAction::RotateLeader]);
    }

    #[test]
    fn test_system_clock_basic() {
        let mut clock = Clock::new(Box::new(SystemClock::new()));

        clock.schedule(ClockAction::PollDecision, Duration::from_millis(1));
        assert!(clock.next_timeout().is_some());

        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(clock.check_timers(), vec![ClockAction::PollDecision]);
        assert!(clock.next_timeout().is_none());
    }

    #[test]
    fn test_cancelled_clock_has_nothing_pending() {
        let mut clock = Clock::new(Box::new(SystemClock::new()));

        clock.schedule(ClockAction::RotateLeader, Duration::from_millis(1));
        clock.schedule(ClockAction::PollDecision, Duration::from_secs(3600));
        clock.cancel(&ClockAction::RotateLeader);
        assert!(clock.next_timeout().unwrap() > Duration::from_secs(60));

        clock.cancel(&ClockAction::PollDecision);
        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.next_timeout().is_none());
        assert!(clock.check_timers().is_empty());
    }
}
