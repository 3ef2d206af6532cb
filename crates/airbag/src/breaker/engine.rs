// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::{CircuitState, ExecutionMode, Transition};

/// Settings of a single circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BreakerOptions {
    pub failure_threshold: u32,
    pub open_duration: Duration,
    pub max_half_open_trials: u32,
}

/// Proof of admission handed out by [`CircuitBreaker::enter`].
///
/// The epoch ties the ticket to the state in which it was issued. Every transition starts a new
/// epoch, so results reported with an older ticket are recognized as stale and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ticket {
    mode: ExecutionMode,
    epoch: u64,
}

impl Ticket {
    pub fn mode(self) -> ExecutionMode {
        self.mode
    }
}

/// Result of asking the breaker for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enter {
    /// The attempt may run. `transition` is set for the single caller that flipped the circuit
    /// from open to half-open.
    Accepted {
        ticket: Ticket,
        transition: Option<Transition>,
    },

    /// The circuit is open, or every half-open trial slot is taken.
    Rejected,
}

/// Circuit breaker state machine of one dependency.
///
/// All state lives behind a single mutex that is held only for the duration of a read or an
/// update, never across an await point. Callers pass `now` explicitly; time is read before the
/// lock is taken.
#[derive(Debug)]
pub(crate) struct CircuitBreaker {
    inner: Mutex<Inner>,
    options: BreakerOptions,
}

#[derive(Debug)]
struct Inner {
    state: State,
    epoch: u64,
    changed_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed { consecutive_failures: u32 },
    Open,
    HalfOpen { trials_in_flight: u32 },
}

impl State {
    fn as_circuit_state(self) -> CircuitState {
        match self {
            Self::Closed { .. } => CircuitState::Closed,
            Self::Open => CircuitState::Open,
            Self::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

impl CircuitBreaker {
    pub fn new(options: BreakerOptions) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: State::Closed { consecutive_failures: 0 },
                epoch: 0,
                changed_at: Instant::now(),
            }),
            options,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.options.failure_threshold > 0
    }

    pub fn options(&self) -> &BreakerOptions {
        &self.options
    }

    pub fn enter(&self) -> Enter {
        self.enter_at(Instant::now())
    }

    pub fn enter_at(&self, now: Instant) -> Enter {
        if !self.is_enabled() {
            return Enter::Accepted {
                ticket: Ticket {
                    mode: ExecutionMode::Normal,
                    epoch: 0,
                },
                transition: None,
            };
        }

        self.inner.lock().enter(now, &self.options)
    }

    pub fn on_success(&self, ticket: Ticket) -> Option<Transition> {
        self.on_success_at(ticket, Instant::now())
    }

    pub fn on_success_at(&self, ticket: Ticket, now: Instant) -> Option<Transition> {
        if !self.is_enabled() {
            return None;
        }

        self.inner.lock().success(ticket, now)
    }

    pub fn on_failure(&self, ticket: Ticket) -> Option<Transition> {
        self.on_failure_at(ticket, Instant::now())
    }

    pub fn on_failure_at(&self, ticket: Ticket, now: Instant) -> Option<Transition> {
        if !self.is_enabled() {
            return None;
        }

        self.inner.lock().failure(ticket, now, &self.options)
    }

    /// Reports an admitted attempt that never produced a verdict about the dependency.
    ///
    /// A half-open trial slot is released without changing the state.
    pub fn on_abandoned(&self, ticket: Ticket) {
        if !self.is_enabled() {
            return;
        }

        self.inner.lock().abandon(ticket);
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state.as_circuit_state()
    }

    pub fn consecutive_failures(&self) -> u32 {
        match self.inner.lock().state {
            State::Closed { consecutive_failures } => consecutive_failures,
            State::Open | State::HalfOpen { .. } => 0,
        }
    }
}

impl Inner {
    fn transition(&mut self, to: State, now: Instant) -> Transition {
        let from = self.state.as_circuit_state();
        self.state = to;
        self.epoch = self.epoch.wrapping_add(1);
        self.changed_at = now;
        Transition::new(from, to.as_circuit_state())
    }

    fn ticket(&self, mode: ExecutionMode) -> Ticket {
        Ticket { mode, epoch: self.epoch }
    }

    fn enter(&mut self, now: Instant, options: &BreakerOptions) -> Enter {
        match self.state {
            State::Closed { .. } => Enter::Accepted {
                ticket: self.ticket(ExecutionMode::Normal),
                transition: None,
            },
            State::Open => {
                if now.saturating_duration_since(self.changed_at) < options.open_duration {
                    return Enter::Rejected;
                }

                // The caller that performs the flip becomes the first probe.
                let transition = self.transition(State::HalfOpen { trials_in_flight: 1 }, now);
                Enter::Accepted {
                    ticket: self.ticket(ExecutionMode::Probe),
                    transition: Some(transition),
                }
            }
            State::HalfOpen { trials_in_flight } => {
                if trials_in_flight >= options.max_half_open_trials {
                    return Enter::Rejected;
                }

                self.state = State::HalfOpen {
                    trials_in_flight: trials_in_flight.saturating_add(1),
                };
                Enter::Accepted {
                    ticket: self.ticket(ExecutionMode::Probe),
                    transition: None,
                }
            }
        }
    }

    fn success(&mut self, ticket: Ticket, now: Instant) -> Option<Transition> {
        if ticket.epoch != self.epoch {
            return None;
        }

        match self.state {
            State::Closed { .. } => {
                self.state = State::Closed { consecutive_failures: 0 };
                None
            }
            // No tickets are issued while open; a matching epoch cannot get here.
            State::Open => None,
            State::HalfOpen { trials_in_flight } => {
                let trials_in_flight = trials_in_flight.saturating_sub(1);

                if trials_in_flight == 0 {
                    Some(self.transition(State::Closed { consecutive_failures: 0 }, now))
                } else {
                    self.state = State::HalfOpen { trials_in_flight };
                    None
                }
            }
        }
    }

    fn failure(&mut self, ticket: Ticket, now: Instant, options: &BreakerOptions) -> Option<Transition> {
        if ticket.epoch != self.epoch {
            return None;
        }

        match self.state {
            State::Closed { consecutive_failures } => {
                let consecutive_failures = consecutive_failures.saturating_add(1);

                if consecutive_failures >= options.failure_threshold {
                    Some(self.transition(State::Open, now))
                } else {
                    self.state = State::Closed { consecutive_failures };
                    None
                }
            }
            State::Open => None,
            State::HalfOpen { .. } => Some(self.transition(State::Open, now)),
        }
    }

    fn abandon(&mut self, ticket: Ticket) {
        // Only probes hold a trial slot.
        if ticket.epoch != self.epoch || ticket.mode() != ExecutionMode::Probe {
            return;
        }

        if let State::HalfOpen { trials_in_flight } = self.state {
            self.state = State::HalfOpen {
                trials_in_flight: trials_in_flight.saturating_sub(1),
            };
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const OPEN_DURATION: Duration = Duration::from_secs(30);

    fn breaker(failure_threshold: u32, max_half_open_trials: u32) -> CircuitBreaker {
        CircuitBreaker::new(BreakerOptions {
            failure_threshold,
            open_duration: OPEN_DURATION,
            max_half_open_trials,
        })
    }

    fn admit(breaker: &CircuitBreaker, now: Instant) -> Ticket {
        match breaker.enter_at(now) {
            Enter::Accepted { ticket, .. } => ticket,
            Enter::Rejected => panic!("attempt was rejected in state {}", breaker.state()),
        }
    }

    fn open(breaker: &CircuitBreaker, now: Instant) {
        for _ in 0..breaker.options().failure_threshold {
            let ticket = admit(breaker, now);
            breaker.on_failure_at(ticket, now);
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn closed_admits_and_counts_failures() {
        let breaker = breaker(3, 1);
        let now = Instant::now();

        let ticket = admit(&breaker, now);
        assert_eq!(ticket.mode(), ExecutionMode::Normal);

        assert_eq!(breaker.on_failure_at(ticket, now), None);
        assert_eq!(breaker.on_failure_at(ticket, now), None);
        assert_eq!(breaker.consecutive_failures(), 2);

        breaker.on_success_at(ticket, now);
        assert_eq!(breaker.consecutive_failures(), 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn threshold_failures_open_exactly_once() {
        let breaker = breaker(3, 1);
        let now = Instant::now();
        let tickets: Vec<_> = (0..5).map(|_| admit(&breaker, now)).collect();

        let transitions: Vec<_> = tickets
            .iter()
            .filter_map(|ticket| breaker.on_failure_at(*ticket, now))
            .collect();

        assert_eq!(transitions, vec![Transition::new(CircuitState::Closed, CircuitState::Open)]);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.enter_at(now + Duration::from_secs(29)), Enter::Rejected);
    }

    #[test]
    fn open_flips_to_half_open_after_open_duration() {
        let breaker = breaker(1, 1);
        let now = Instant::now();
        open(&breaker, now);

        let later = now + OPEN_DURATION;
        let Enter::Accepted { ticket, transition } = breaker.enter_at(later) else {
            panic!("probe must be admitted");
        };

        assert_eq!(ticket.mode(), ExecutionMode::Probe);
        assert_eq!(transition, Some(Transition::new(CircuitState::Open, CircuitState::HalfOpen)));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // The only trial slot is taken.
        assert_eq!(breaker.enter_at(later), Enter::Rejected);
    }

    #[test]
    fn successful_probe_closes() {
        let breaker = breaker(1, 1);
        let now = Instant::now();
        open(&breaker, now);

        let probe = admit(&breaker, now + OPEN_DURATION);
        let transition = breaker.on_success_at(probe, now + OPEN_DURATION);

        assert_eq!(transition, Some(Transition::new(CircuitState::HalfOpen, CircuitState::Closed)));
        assert_eq!(admit(&breaker, now + OPEN_DURATION).mode(), ExecutionMode::Normal);
    }

    #[test]
    fn any_probe_failure_reopens() {
        let breaker = breaker(1, 3);
        let now = Instant::now();
        open(&breaker, now);

        let later = now + OPEN_DURATION;
        let first = admit(&breaker, later);
        let second = admit(&breaker, later);
        let third = admit(&breaker, later);
        assert_eq!(breaker.enter_at(later), Enter::Rejected);

        assert_eq!(breaker.on_success_at(first, later), None);
        let transition = breaker.on_failure_at(second, later);
        assert_eq!(transition, Some(Transition::new(CircuitState::HalfOpen, CircuitState::Open)));

        // The late probe belongs to the previous epoch and changes nothing.
        assert_eq!(breaker.on_success_at(third, later), None);
        assert_eq!(breaker.state(), CircuitState::Open);

        // The open period restarts at the reopening instant.
        assert_eq!(breaker.enter_at(later + Duration::from_secs(29)), Enter::Rejected);
        assert!(matches!(breaker.enter_at(later + OPEN_DURATION), Enter::Accepted { .. }));
    }

    #[test]
    fn half_open_closes_when_last_trial_succeeds() {
        let breaker = breaker(1, 2);
        let now = Instant::now();
        open(&breaker, now);

        let later = now + OPEN_DURATION;
        let first = admit(&breaker, later);
        let second = admit(&breaker, later);

        assert_eq!(breaker.on_success_at(first, later), None);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.on_success_at(second, later).is_some());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn abandoned_probe_releases_trial_slot() {
        let breaker = breaker(1, 1);
        let now = Instant::now();
        open(&breaker, now);

        let later = now + OPEN_DURATION;
        let probe = admit(&breaker, later);
        assert_eq!(breaker.enter_at(later), Enter::Rejected);

        breaker.on_abandoned(probe);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let retry_probe = admit(&breaker, later);
        assert_eq!(retry_probe.mode(), ExecutionMode::Probe);
    }

    #[test]
    fn stale_closed_results_are_ignored() {
        let breaker = breaker(2, 1);
        let now = Instant::now();
        let stale = admit(&breaker, now);
        open(&breaker, now);

        let later = now + OPEN_DURATION;
        let probe = admit(&breaker, later);
        breaker.on_success_at(probe, later);
        assert_eq!(breaker.state(), CircuitState::Closed);

        assert_eq!(breaker.on_failure_at(stale, later), None);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn zero_threshold_disables_breaker() {
        let breaker = breaker(0, 1);
        let now = Instant::now();

        for _ in 0..100 {
            let ticket = admit(&breaker, now);
            assert_eq!(breaker.on_failure_at(ticket, now), None);
        }

        assert!(!breaker.is_enabled());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn concurrent_expiry_admits_exactly_one_prober() {
        let breaker = Arc::new(breaker(1, 1));
        let now = Instant::now();
        open(&breaker, now);

        let later = now + OPEN_DURATION;
        let flips = Arc::new(AtomicUsize::new(0));
        let admitted = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..16)
            .map(|_| {
                let breaker = Arc::clone(&breaker);
                let flips = Arc::clone(&flips);
                let admitted = Arc::clone(&admitted);
                std::thread::spawn(move || {
                    if let Enter::Accepted { transition, .. } = breaker.enter_at(later) {
                        admitted.fetch_add(1, Ordering::SeqCst);
                        if transition.is_some() {
                            flips.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(flips.load(Ordering::SeqCst), 1);
        assert_eq!(admitted.load(Ordering::SeqCst), 1);
    }
}
