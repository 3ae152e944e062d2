//! Stateright model of the connector state machine
//!
//! The model wraps the real [`ConnectorMachine`]; only the environment is
//! modelled. Every effect that would start asynchronous work adds the
//! notifications it could eventually produce to `pending`, and any pending
//! notification may be delivered at any time, in any order. Cancelling a read
//! loop or timer does not retract notifications already queued, so stale
//! deliveries are explored too.
//!
//! Gate flips are modelled the way the control surface reacts to them: the
//! flip is followed by `Start` (now permitted) or `Stop` (now refused).

use crate::config::{Gate, GateFailure};
use crate::connector::{
    ConnectionState, ConnectorMachine, Effect, Generation, Input, RetryPolicy, TimerId,
};
use stateright::{Model, Property};
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Notification {
    Opened(Generation),
    Failed(Generation),
    ReconnectDue(TimerId),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectorModelState {
    pub machine: ConnectorMachine,
    pub permitted: bool,
    pub pending: BTreeSet<Notification>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectorAction {
    Start,
    Stop,
    FlipGate,
    Deliver(Notification),
}

pub struct ConnectorModel {
    pub max_attempts: u32,
    /// Exploration bound on connection attempts
    pub max_generation: u64,
}

impl Default for ConnectorModel {
    fn default() -> Self {
        ConnectorModel {
            max_attempts: 2,
            max_generation: 4,
        }
    }
}

impl ConnectorModel {
    fn gate(permitted: bool) -> Gate {
        if permitted {
            Gate::Permitted
        } else {
            Gate::Refused(GateFailure::Disabled)
        }
    }

    fn apply(state: &mut ConnectorModelState, input: Input) {
        for effect in state.machine.apply(input) {
            match effect {
                Effect::OpenTransport { generation } => {
                    state.pending.insert(Notification::Opened(generation));
                    state.pending.insert(Notification::Failed(generation));
                }
                Effect::ScheduleReconnect { timer, .. } => {
                    state.pending.insert(Notification::ReconnectDue(timer));
                }
                Effect::CloseTransport
                | Effect::CancelReconnect { .. }
                | Effect::StateChanged { .. }
                | Effect::Refused(_) => {}
            }
        }
    }
}

impl Model for ConnectorModel {
    type State = ConnectorModelState;
    type Action = ConnectorAction;

    fn init_states(&self) -> Vec<Self::State> {
        [true, false]
            .into_iter()
            .map(|permitted| ConnectorModelState {
                machine: ConnectorMachine::new(
                    self.max_attempts,
                    RetryPolicy::Fixed {
                        delay: Duration::from_millis(1),
                    },
                ),
                permitted,
                pending: BTreeSet::new(),
            })
            .collect()
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        actions.push(ConnectorAction::Start);
        actions.push(ConnectorAction::Stop);
        actions.push(ConnectorAction::FlipGate);
        for notification in &state.pending {
            actions.push(ConnectorAction::Deliver(*notification));
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut next = state.clone();
        match action {
            ConnectorAction::Start => {
                let gate = Self::gate(next.permitted);
                Self::apply(&mut next, Input::Start { gate });
            }
            ConnectorAction::Stop => Self::apply(&mut next, Input::Stop),
            ConnectorAction::FlipGate => {
                next.permitted = !next.permitted;
                if next.permitted {
                    Self::apply(&mut next, Input::Start { gate: Gate::Permitted });
                } else {
                    Self::apply(&mut next, Input::Stop);
                }
            }
            ConnectorAction::Deliver(notification) => {
                next.pending.remove(&notification);
                let input = match notification {
                    Notification::Opened(generation) => Input::TransportOpened { generation },
                    Notification::Failed(generation) => Input::TransportFailed { generation },
                    Notification::ReconnectDue(timer) => Input::ReconnectDue {
                        timer,
                        gate: Self::gate(next.permitted),
                    },
                };
                Self::apply(&mut next, input);
            }
        }
        Some(next)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::always("machine_invariants", |_: &ConnectorModel, s: &ConnectorModelState| {
                s.machine.check_invariants().is_ok()
            }),
            // A connection exists only while the gate permits it
            Property::always("connected_only_when_permitted", |_: &ConnectorModel, s: &ConnectorModelState| {
                !s.machine.transport_live() || s.permitted
            }),
            Property::always("retries_bounded", |m: &ConnectorModel, s: &ConnectorModelState| {
                s.machine.attempts() <= m.max_attempts
            }),
            Property::always("no_timer_after_failed", |_: &ConnectorModel, s: &ConnectorModelState| {
                s.machine.state() != ConnectionState::Failed || s.machine.pending_timer().is_none()
            }),
            Property::always("open_resets_attempts", |_: &ConnectorModel, s: &ConnectorModelState| {
                s.machine.state() != ConnectionState::Open || s.machine.attempts() == 0
            }),
            Property::sometimes("reaches_open", |_: &ConnectorModel, s: &ConnectorModelState| {
                s.machine.state() == ConnectionState::Open
            }),
            Property::sometimes("reaches_failed", |_: &ConnectorModel, s: &ConnectorModelState| {
                s.machine.state() == ConnectionState::Failed
            }),
        ]
    }

    fn within_boundary(&self, state: &Self::State) -> bool {
        state.machine.generation().0 <= self.max_generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initial(model: &ConnectorModel) -> ConnectorModelState {
        model
            .init_states()
            .into_iter()
            .find(|s| s.permitted)
            .unwrap()
    }

    #[test]
    fn test_start_queues_both_outcomes() {
        let model = ConnectorModel::default();
        let state = model
            .next_state(&initial(&model), ConnectorAction::Start)
            .unwrap();
        assert!(state.pending.contains(&Notification::Opened(Generation(1))));
        assert!(state.pending.contains(&Notification::Failed(Generation(1))));
    }

    #[test]
    fn test_stale_failure_after_stop_is_ignored() {
        let model = ConnectorModel::default();
        let s = model.next_state(&initial(&model), ConnectorAction::Start).unwrap();
        let s = model.next_state(&s, ConnectorAction::Stop).unwrap();
        let s = model
            .next_state(&s, ConnectorAction::Deliver(Notification::Failed(Generation(1))))
            .unwrap();
        assert_eq!(s.machine.state(), ConnectionState::Idle);
        assert_eq!(s.machine.attempts(), 0);
    }

    #[test]
    fn test_gate_flip_stops() {
        let model = ConnectorModel::default();
        let s = model.next_state(&initial(&model), ConnectorAction::Start).unwrap();
        let s = model
            .next_state(&s, ConnectorAction::Deliver(Notification::Opened(Generation(1))))
            .unwrap();
        assert_eq!(s.machine.state(), ConnectionState::Open);
        let s = model.next_state(&s, ConnectorAction::FlipGate).unwrap();
        assert_eq!(s.machine.state(), ConnectionState::Idle);
        assert!(!s.machine.transport_live());
    }

    #[test]
    #[ignore] // Run with: cargo test stateright_connector -- --ignored --nocapture
    fn stateright_connector_model_check() {
        use stateright::Checker;

        let model = ConnectorModel::default();
        let checker = model.checker().spawn_bfs().join();

        println!("States explored: {}", checker.unique_state_count());

        checker.assert_properties();

        println!("Model check passed! All connector invariants hold.");
    }
}
