//! Connector state machine
//!
//! Pure transition logic with no I/O. The actor feeds it inputs and carries
//! out the returned effects; the model checker drives it directly.
//!
//! ```text
//!            Start(permitted)             TransportOpened
//!   Idle ─────────────────────► Connecting ───────────────► Open
//!    ▲  ▲                          ▲  │                       │
//!    │  │ ReconnectDue(refused)    │  │ TransportFailed       │ TransportFailed
//!    │  └──────────── Reconnecting ◄──┴───────────────────────┘
//!    │                  │      ▲ ReconnectDue(permitted) ──► Connecting
//!    │                  │ attempts >= max
//!    │ Stop             ▼
//!    └──────────────  Failed  ── Start(permitted) ──► Connecting
//! ```
//!
//! Every connection attempt gets a fresh [`Generation`]; inputs tagged with
//! an older generation, and timer expiries for a cancelled [`TimerId`], are
//! ignored.

use super::state::{ConnectionState, RetryBudget, RetryPolicy};
use crate::config::{Gate, GateFailure};
use std::time::Duration;

/// Identifies one connection attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(pub u64);

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one scheduled reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Input {
    /// Gate is evaluated by the caller at the moment of the command
    Start { gate: Gate },
    Stop,
    TransportOpened { generation: Generation },
    TransportFailed { generation: Generation },
    ReconnectDue { timer: TimerId, gate: Gate },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    OpenTransport {
        generation: Generation,
    },
    CloseTransport,
    ScheduleReconnect {
        timer: TimerId,
        delay: Duration,
    },
    CancelReconnect {
        timer: TimerId,
    },
    /// Start or reconnect declined by the gate; not an error
    Refused(GateFailure),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectorMachine {
    state: ConnectionState,
    budget: RetryBudget,
    generation: Generation,
    transport_live: bool,
    timer: Option<TimerId>,
    next_timer: u64,
}

impl ConnectorMachine {
    pub fn new(max_attempts: u32, policy: RetryPolicy) -> Self {
        ConnectorMachine {
            state: ConnectionState::Idle,
            budget: RetryBudget::new(max_attempts, policy),
            generation: Generation::default(),
            transport_live: false,
            timer: None,
            next_timer: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.budget.attempts()
    }

    pub fn max_attempts(&self) -> u32 {
        self.budget.max()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn pending_timer(&self) -> Option<TimerId> {
        self.timer
    }

    pub fn transport_live(&self) -> bool {
        self.transport_live
    }

    /// Events are only forwarded from the open connection of the current attempt
    pub fn accepts_events(&self, generation: Generation) -> bool {
        self.state == ConnectionState::Open && generation == self.generation
    }

    pub fn apply(&mut self, input: Input) -> Vec<Effect> {
        let mut effects = Vec::new();
        match input {
            Input::Start { gate } => self.on_start(gate, &mut effects),
            Input::Stop => self.on_stop(&mut effects),
            Input::TransportOpened { generation } => self.on_opened(generation, &mut effects),
            Input::TransportFailed { generation } => self.on_failed(generation, &mut effects),
            Input::ReconnectDue { timer, gate } => self.on_reconnect_due(timer, gate, &mut effects),
        }
        effects
    }

    fn on_start(&mut self, gate: Gate, effects: &mut Vec<Effect>) {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => {}
            ConnectionState::Idle | ConnectionState::Failed => match gate {
                Gate::Refused(reason) => effects.push(Effect::Refused(reason)),
                Gate::Permitted => {
                    self.budget.reset();
                    self.begin_attempt(effects);
                }
            },
            // Skip the remaining delay; the budget carries over
            ConnectionState::Reconnecting => match gate {
                Gate::Refused(reason) => effects.push(Effect::Refused(reason)),
                Gate::Permitted => {
                    self.cancel_timer(effects);
                    self.begin_attempt(effects);
                }
            },
        }
    }

    fn on_stop(&mut self, effects: &mut Vec<Effect>) {
        if self.state == ConnectionState::Idle {
            return;
        }
        if self.transport_live {
            self.transport_live = false;
            effects.push(Effect::CloseTransport);
        }
        self.cancel_timer(effects);
        self.budget.reset();
        self.transition(ConnectionState::Idle, effects);
    }

    fn on_opened(&mut self, generation: Generation, effects: &mut Vec<Effect>) {
        if generation != self.generation || self.state != ConnectionState::Connecting {
            return;
        }
        self.budget.reset();
        self.transition(ConnectionState::Open, effects);
    }

    fn on_failed(&mut self, generation: Generation, effects: &mut Vec<Effect>) {
        if generation != self.generation || !self.transport_live {
            return;
        }
        self.transport_live = false;
        effects.push(Effect::CloseTransport);
        self.budget.record_failure();
        self.transition(ConnectionState::Reconnecting, effects);

        if self.budget.exhausted() {
            self.transition(ConnectionState::Failed, effects);
        } else {
            let timer = TimerId(self.next_timer);
            self.next_timer += 1;
            self.timer = Some(timer);
            effects.push(Effect::ScheduleReconnect {
                timer,
                delay: self.budget.next_delay(),
            });
        }
    }

    fn on_reconnect_due(&mut self, timer: TimerId, gate: Gate, effects: &mut Vec<Effect>) {
        if self.timer != Some(timer) || self.state != ConnectionState::Reconnecting {
            return;
        }
        self.timer = None;
        match gate {
            Gate::Permitted => self.begin_attempt(effects),
            Gate::Refused(reason) => {
                effects.push(Effect::Refused(reason));
                self.budget.reset();
                self.transition(ConnectionState::Idle, effects);
            }
        }
    }

    fn begin_attempt(&mut self, effects: &mut Vec<Effect>) {
        debug_assert!(!self.transport_live, "attempt started with a live transport");
        self.generation = Generation(self.generation.0 + 1);
        self.transport_live = true;
        self.transition(ConnectionState::Connecting, effects);
        effects.push(Effect::OpenTransport {
            generation: self.generation,
        });
    }

    fn cancel_timer(&mut self, effects: &mut Vec<Effect>) {
        if let Some(timer) = self.timer.take() {
            effects.push(Effect::CancelReconnect { timer });
        }
    }

    fn transition(&mut self, to: ConnectionState, effects: &mut Vec<Effect>) {
        if self.state != to {
            effects.push(Effect::StateChanged {
                from: self.state,
                to,
            });
            self.state = to;
        }
    }

    /// Structural invariants that hold between any two inputs
    pub fn check_invariants(&self) -> Result<(), String> {
        let attempts = self.budget.attempts();
        let max = self.budget.max();

        if attempts > max {
            return Err(format!("attempts {} exceed max {}", attempts, max));
        }
        if self.timer.is_some() != (self.state == ConnectionState::Reconnecting) {
            return Err(format!(
                "timer {:?} inconsistent with state {}",
                self.timer, self.state
            ));
        }
        let expects_transport = matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        );
        if self.transport_live != expects_transport {
            return Err(format!(
                "transport_live={} in state {}",
                self.transport_live, self.state
            ));
        }
        match self.state {
            ConnectionState::Idle | ConnectionState::Open if attempts != 0 => {
                Err(format!("{} with {} attempts", self.state, attempts))
            }
            ConnectionState::Failed if attempts < max => {
                Err(format!("failed with only {} of {} attempts", attempts, max))
            }
            _ => Ok(()),
        }
    }
}
