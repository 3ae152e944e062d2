//! Randomness and wall-clock helpers
//!
//! Only randomness is abstracted here: time is driven by tokio (paused in
//! tests), and network/transport boundaries are traits in their own modules.
//!
//! `simulation::SimulatedRng` is a seeded ChaCha generator used by DST and
//! fault injection.

pub mod simulation;

/// Source of randomness
///
/// Everything that makes a random decision (fault injection, DST
/// workload generation) takes an `Rng` so a seed fully determines a run.
pub trait Rng: Send {
    fn next_u64(&mut self) -> u64;

    /// Uniform value in `[min, max)`. Returns `min` for an empty range.
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        min + (self.next_u64() % (max - min))
    }

    fn gen_bool(&mut self, probability: f64) -> bool {
        let val = self.next_u64() as f64 / u64::MAX as f64;
        val < probability
    }

    fn choose_index(&mut self, len: usize) -> usize {
        debug_assert!(len > 0, "choose_index on empty slice");
        self.gen_range(0, len as u64) as usize
    }
}

/// Wall-clock milliseconds since the Unix epoch (0 if the clock is before it)
pub fn wall_clock_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
