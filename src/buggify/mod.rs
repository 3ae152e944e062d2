//! BUGGIFY - deterministic fault injection
//!
//! Simulated collaborators (transport, delivery targets) ask `buggify!` at
//! each decision point whether to misbehave. Decisions are drawn from the
//! caller's seeded RNG, so a DST seed replays the same faults.
//!
//! ```ignore
//! if buggify!(&mut rng, faults::transport::CONNECT_FAIL) {
//!     return Err(TransportError::Connect("injected".into()));
//! }
//! ```
//!
//! Configuration and statistics are thread-local. DST runs use the
//! current-thread tokio runtime, so every injection site of a run sees the
//! same context.

pub mod config;
pub mod faults;

pub use config::FaultConfig;
pub use faults::ALL_FAULTS;

use crate::io::Rng;
use std::cell::RefCell;
use std::collections::HashMap;

/// Checks and triggers per fault ID
#[derive(Debug, Clone, Default)]
pub struct BuggifyStats {
    pub checks: HashMap<String, u64>,
    pub triggers: HashMap<String, u64>,
}

impl BuggifyStats {
    fn record(&mut self, fault_id: &str, triggered: bool) {
        *self.checks.entry(fault_id.to_string()).or_insert(0) += 1;
        if triggered {
            *self.triggers.entry(fault_id.to_string()).or_insert(0) += 1;
        }
    }

    pub fn triggered(&self, fault_id: &str) -> u64 {
        self.triggers.get(fault_id).copied().unwrap_or(0)
    }

    pub fn total_triggers(&self) -> u64 {
        self.triggers.values().sum()
    }

    pub fn summary(&self) -> String {
        let mut ids: Vec<_> = self.checks.keys().collect();
        ids.sort();
        let mut lines = vec!["BUGGIFY:".to_string()];
        for id in ids {
            let checks = self.checks.get(id).copied().unwrap_or(0);
            lines.push(format!("  {}: {}/{}", id, self.triggered(id), checks));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Default)]
struct BuggifyContext {
    config: FaultConfig,
    stats: BuggifyStats,
    suppressed: bool,
}

thread_local! {
    static CONTEXT: RefCell<BuggifyContext> = RefCell::new(BuggifyContext::default());
}

/// Install a fault configuration for the current thread and clear stats
pub fn set_config(config: FaultConfig) {
    CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        ctx.config = config;
        ctx.stats = BuggifyStats::default();
    });
}

pub fn get_stats() -> BuggifyStats {
    CONTEXT.with(|ctx| ctx.borrow().stats.clone())
}

/// Disables injection until dropped
pub struct BuggifySuppressor {
    previous: bool,
}

impl BuggifySuppressor {
    pub fn new() -> Self {
        let previous = CONTEXT.with(|ctx| std::mem::replace(&mut ctx.borrow_mut().suppressed, true));
        BuggifySuppressor { previous }
    }
}

impl Default for BuggifySuppressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BuggifySuppressor {
    fn drop(&mut self) {
        let previous = self.previous;
        CONTEXT.with(|ctx| ctx.borrow_mut().suppressed = previous);
    }
}

/// Returns true if the named fault should be injected now
#[inline]
pub fn should_buggify<R: Rng + ?Sized>(rng: &mut R, fault_id: &str) -> bool {
    CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        let prob = if ctx.suppressed { 0.0 } else { ctx.config.get(fault_id) };
        // Always draw so the RNG stream does not depend on suppression
        let draw = rng.gen_range(0, 1_000_000) as f64 / 1_000_000.0;
        let triggered = draw < prob;
        ctx.stats.record(fault_id, triggered);
        triggered
    })
}

/// Like `should_buggify` with an explicit probability (still honors `enabled`)
#[inline]
pub fn should_buggify_with_prob<R: Rng + ?Sized>(
    rng: &mut R,
    fault_id: &str,
    probability: f64,
) -> bool {
    CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        let active = ctx.config.enabled && !ctx.suppressed;
        let draw = rng.gen_range(0, 1_000_000) as f64 / 1_000_000.0;
        let triggered = active && draw < probability.clamp(0.0, 1.0);
        ctx.stats.record(fault_id, triggered);
        triggered
    })
}

#[macro_export]
macro_rules! buggify {
    ($rng:expr, $fault_id:expr) => {
        $crate::buggify::should_buggify($rng, $fault_id)
    };
    ($rng:expr, $fault_id:expr, $prob:expr) => {
        $crate::buggify::should_buggify_with_prob($rng, $fault_id, $prob)
    };
}
