//! Concurrent fan-out under a per-event deadline

use super::{
    DeliverRequest, DeliveryError, DeliveryReport, DeliveryTarget, TargetOutcome, TargetRegistry,
};
use crate::event::MatchedEvent;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_DELIVERY_DEADLINE: Duration = Duration::from_millis(3_000);

#[derive(Clone)]
pub struct DeliveryRouter {
    registry: Arc<dyn TargetRegistry>,
    deadline: Duration,
}

impl DeliveryRouter {
    pub fn new(registry: Arc<dyn TargetRegistry>, deadline: Duration) -> Self {
        DeliveryRouter { registry, deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Offer `event` to every currently registered target.
    ///
    /// Discovery and all attempts share one deadline. Outcomes are reported,
    /// never retried.
    pub async fn dispatch(&self, event: MatchedEvent) -> DeliveryReport {
        let deadline = Instant::now() + self.deadline;

        let targets = match timeout_at(deadline, self.registry.discover()).await {
            Ok(Ok(targets)) => targets,
            Ok(Err(e)) => {
                warn!(identifier = %event.identifier, error = %e, "Target discovery failed, event dropped");
                Vec::new()
            }
            Err(_) => {
                warn!(identifier = %event.identifier, "Target discovery timed out, event dropped");
                Vec::new()
            }
        };

        if targets.is_empty() {
            debug!(identifier = %event.identifier, "No delivery targets, event dropped");
            return DeliveryReport {
                event,
                outcomes: Vec::new(),
            };
        }

        let attempts = targets
            .into_iter()
            .map(|target| self.attempt(target, DeliverRequest::new(event.clone()), deadline));
        let outcomes = join_all(attempts).await;

        let report = DeliveryReport { event, outcomes };
        info!(
            identifier = %report.event.identifier,
            delivered = report.delivered(),
            failed = report.failed(),
            "Event fanned out"
        );
        report
    }

    async fn attempt(
        &self,
        target: Arc<dyn DeliveryTarget>,
        request: DeliverRequest,
        deadline: Instant,
    ) -> TargetOutcome {
        let result = match timeout_at(deadline, target.deliver(request)).await {
            Ok(Ok(ack)) if ack.success => Ok(()),
            Ok(Ok(_)) => Err(DeliveryError::Rejected),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DeliveryError::Timeout(self.deadline)),
        };

        if let Err(e) = &result {
            warn!(target = %target.id(), error = %e, "Delivery failed");
        }

        TargetOutcome {
            target: target.id().clone(),
            error: result.err(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{
        DiscoverFuture, LocalRegistry, SimulatedTarget, TargetBehaviour, TargetId,
    };

    fn event(identifier: &str) -> MatchedEvent {
        MatchedEvent {
            kind: "pause-equivalent".to_string(),
            identifier: identifier.to_string(),
            payload: serde_json::json!({ "rewardId": identifier }),
            received_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_zero_targets_is_silent_drop() {
        let router = DeliveryRouter::new(Arc::new(LocalRegistry::new()), DEFAULT_DELIVERY_DEADLINE);
        let report = router.dispatch(event("RWD-1")).await;
        assert!(report.outcomes.is_empty());
        assert_eq!(report.delivered(), 0);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_affect_others() {
        let registry = Arc::new(LocalRegistry::new());
        let ok_a = Arc::new(SimulatedTarget::new("a", TargetBehaviour::Succeed));
        let bad = Arc::new(SimulatedTarget::new("b", TargetBehaviour::Fail));
        let ok_c = Arc::new(SimulatedTarget::new("c", TargetBehaviour::Succeed));
        registry.register(ok_a.clone());
        registry.register(bad.clone());
        registry.register(ok_c.clone());

        let router = DeliveryRouter::new(registry, DEFAULT_DELIVERY_DEADLINE);
        let report = router.dispatch(event("RWD-1")).await;

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.delivered(), 2);
        assert!(report.outcome_for(&TargetId::new("a")).unwrap().succeeded());
        assert!(matches!(
            report.outcome_for(&TargetId::new("b")).unwrap().error,
            Some(DeliveryError::Transport(_))
        ));
        assert!(report.outcome_for(&TargetId::new("c")).unwrap().succeeded());
        assert_eq!(ok_a.received().len(), 1);
        assert_eq!(ok_c.received().len(), 1);
        assert!(bad.received().is_empty());
    }

    #[tokio::test]
    async fn test_rejection_counts_as_failure() {
        let registry = Arc::new(LocalRegistry::new());
        registry.register(Arc::new(SimulatedTarget::new("r", TargetBehaviour::Reject)));
        let router = DeliveryRouter::new(registry, DEFAULT_DELIVERY_DEADLINE);

        let report = router.dispatch(event("RWD-1")).await;
        assert_eq!(report.outcomes[0].error, Some(DeliveryError::Rejected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_target_abandoned_at_deadline() {
        let registry = Arc::new(LocalRegistry::new());
        let fast = Arc::new(SimulatedTarget::new("fast", TargetBehaviour::Succeed));
        registry.register(Arc::new(SimulatedTarget::new("slow", TargetBehaviour::Hang)));
        registry.register(fast.clone());

        let deadline = Duration::from_millis(500);
        let router = DeliveryRouter::new(registry, deadline);
        let started = Instant::now();
        let report = router.dispatch(event("RWD-1")).await;

        let elapsed = started.elapsed();
        assert!(elapsed >= deadline && elapsed < deadline + Duration::from_millis(50));
        assert_eq!(
            report.outcome_for(&TargetId::new("slow")).unwrap().error,
            Some(DeliveryError::Timeout(deadline))
        );
        assert!(report.outcome_for(&TargetId::new("fast")).unwrap().succeeded());
        assert_eq!(fast.received().len(), 1);
    }

    struct BrokenRegistry;

    impl TargetRegistry for BrokenRegistry {
        fn discover(&self) -> DiscoverFuture {
            Box::pin(async { Err(DeliveryError::Registry("unreachable".to_string())) })
        }
    }

    #[tokio::test]
    async fn test_discovery_error_treated_as_no_targets() {
        let router = DeliveryRouter::new(Arc::new(BrokenRegistry), DEFAULT_DELIVERY_DEADLINE);
        let report = router.dispatch(event("RWD-1")).await;
        assert!(report.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_targets_discovered_per_event() {
        let registry = Arc::new(LocalRegistry::new());
        let router = DeliveryRouter::new(registry.clone(), DEFAULT_DELIVERY_DEADLINE);

        assert!(router.dispatch(event("RWD-1")).await.outcomes.is_empty());

        let late = Arc::new(SimulatedTarget::new("late", TargetBehaviour::Succeed));
        registry.register(late.clone());
        assert_eq!(router.dispatch(event("RWD-1")).await.delivered(), 1);

        registry.unregister(&TargetId::new("late"));
        assert!(router.dispatch(event("RWD-1")).await.outcomes.is_empty());
        assert_eq!(late.received().len(), 1);
    }
}
