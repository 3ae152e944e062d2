use super::faults;
use std::collections::HashMap;

/// Per-fault injection probabilities
#[derive(Debug, Clone)]
pub struct FaultConfig {
    pub enabled: bool,
    /// Scales every configured probability (clamped to 1.0)
    pub global_multiplier: f64,
    probabilities: HashMap<&'static str, f64>,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

impl FaultConfig {
    /// Enabled, but no fault has a probability until one is set
    pub fn new() -> Self {
        FaultConfig {
            enabled: true,
            global_multiplier: 1.0,
            probabilities: HashMap::new(),
        }
    }

    pub fn disabled() -> Self {
        FaultConfig {
            enabled: false,
            global_multiplier: 1.0,
            probabilities: HashMap::new(),
        }
    }

    /// Occasional faults: roughly what a flaky network looks like
    pub fn moderate() -> Self {
        FaultConfig::new()
            .with(faults::transport::CONNECT_FAIL, 0.05)
            .with(faults::transport::AUTH_REJECT, 0.01)
            .with(faults::transport::STREAM_DROP, 0.02)
            .with(faults::transport::MALFORMED_FRAME, 0.02)
            .with(faults::delivery::TARGET_ERROR, 0.02)
            .with(faults::delivery::TARGET_TIMEOUT, 0.01)
            .with(faults::delivery::TARGET_GONE, 0.01)
            .with(faults::delivery::TARGET_REJECT, 0.02)
    }

    /// Frequent faults for stress runs
    pub fn chaos() -> Self {
        FaultConfig::new()
            .with(faults::transport::CONNECT_FAIL, 0.30)
            .with(faults::transport::AUTH_REJECT, 0.05)
            .with(faults::transport::STREAM_DROP, 0.15)
            .with(faults::transport::MALFORMED_FRAME, 0.10)
            .with(faults::delivery::TARGET_ERROR, 0.10)
            .with(faults::delivery::TARGET_TIMEOUT, 0.05)
            .with(faults::delivery::TARGET_GONE, 0.05)
            .with(faults::delivery::TARGET_REJECT, 0.10)
    }

    pub fn with(mut self, fault_id: &'static str, probability: f64) -> Self {
        self.probabilities.insert(fault_id, probability.clamp(0.0, 1.0));
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.global_multiplier = multiplier.max(0.0);
        self
    }

    /// Effective probability for a fault (0.0 when disabled or unknown)
    pub fn get(&self, fault_id: &str) -> f64 {
        if !self.enabled {
            return 0.0;
        }
        let base = self.probabilities.get(fault_id).copied().unwrap_or(0.0);
        (base * self.global_multiplier).min(1.0)
    }
}
