//! Scripted delivery target for tests and simulation

use super::{
    DeliverRequest, DeliveryAck, DeliveryError, DeliveryFuture, DeliveryTarget, TargetId,
};
use crate::buggify::faults::delivery as faults;
use crate::event::MatchedEvent;
use crate::io::simulation::SimulatedRng;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetBehaviour {
    Succeed,
    /// Target-side error
    Fail,
    /// Acknowledges with `success: false`
    Reject,
    /// Never answers
    Hang,
    Gone,
}

struct TargetState {
    behaviour: TargetBehaviour,
    rng: Option<SimulatedRng>,
    attempts: u64,
    received: Vec<MatchedEvent>,
}

pub struct SimulatedTarget {
    id: TargetId,
    state: Mutex<TargetState>,
}

impl SimulatedTarget {
    pub fn new(id: impl Into<String>, behaviour: TargetBehaviour) -> Self {
        SimulatedTarget {
            id: TargetId::new(id),
            state: Mutex::new(TargetState {
                behaviour,
                rng: None,
                attempts: 0,
                received: Vec::new(),
            }),
        }
    }

    /// Succeeds unless buggify injects a delivery fault
    pub fn with_faults(id: impl Into<String>, rng: SimulatedRng) -> Self {
        let target = Self::new(id, TargetBehaviour::Succeed);
        target.state.lock().rng = Some(rng);
        target
    }

    pub fn set_behaviour(&self, behaviour: TargetBehaviour) {
        self.state.lock().behaviour = behaviour;
    }

    pub fn attempts(&self) -> u64 {
        self.state.lock().attempts
    }

    /// Events this target acknowledged successfully
    pub fn received(&self) -> Vec<MatchedEvent> {
        self.state.lock().received.clone()
    }

    fn pick_behaviour(state: &mut TargetState) -> TargetBehaviour {
        let Some(rng) = state.rng.as_mut() else {
            return state.behaviour;
        };
        if crate::buggify!(rng, faults::TARGET_GONE) {
            TargetBehaviour::Gone
        } else if crate::buggify!(rng, faults::TARGET_ERROR) {
            TargetBehaviour::Fail
        } else if crate::buggify!(rng, faults::TARGET_REJECT) {
            TargetBehaviour::Reject
        } else if crate::buggify!(rng, faults::TARGET_TIMEOUT) {
            TargetBehaviour::Hang
        } else {
            state.behaviour
        }
    }
}

impl DeliveryTarget for SimulatedTarget {
    fn id(&self) -> &TargetId {
        &self.id
    }

    fn deliver(&self, request: DeliverRequest) -> DeliveryFuture {
        let mut state = self.state.lock();
        state.attempts += 1;

        match Self::pick_behaviour(&mut state) {
            TargetBehaviour::Succeed => {
                state.received.push(request.payload().clone());
                Box::pin(async { Ok(DeliveryAck { success: true }) })
            }
            TargetBehaviour::Reject => Box::pin(async { Ok(DeliveryAck { success: false }) }),
            TargetBehaviour::Fail => Box::pin(async {
                Err(DeliveryError::Transport("simulated target error".to_string()))
            }),
            TargetBehaviour::Gone => Box::pin(async { Err(DeliveryError::TargetGone) }),
            TargetBehaviour::Hang => Box::pin(futures::future::pending()),
        }
    }
}
