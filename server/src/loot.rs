//! Stochastic loot budget.
//!
//! Each session accumulates "time without loot"; the longer the drought and
//! the bigger the gap between dogs and items on the ground, the more loot a
//! tick is allowed to drop. The uniform roll comes from the caller so the
//! process stays reproducible under test.

use std::time::Duration;

#[derive(Debug)]
pub struct LootGenerator {
    period: Duration,
    probability: f64,
    time_without_loot: Duration,
}

impl LootGenerator {
    /// `period` is the base interval of the arrival process, `probability`
    /// the chance of at least one arrival within one whole period.
    pub fn new(period: Duration, probability: f64) -> Self {
        Self {
            period,
            probability,
            time_without_loot: Duration::ZERO,
        }
    }

    /// Returns how many loot items to drop this tick.
    ///
    /// `roll` must be uniform on `[0, 1]`. The emitted count is the loot
    /// shortage (`looter_count - loot_count`, floored at zero) scaled by the
    /// probability that at least one arrival happened over the accumulated
    /// drought. The drought timer resets only when something is emitted.
    pub fn generate(
        &mut self,
        dt: Duration,
        loot_count: usize,
        looter_count: usize,
        roll: f64,
    ) -> usize {
        self.time_without_loot += dt;

        let shortage = looter_count.saturating_sub(loot_count);
        let ratio = self.time_without_loot.as_secs_f64() / self.period.as_secs_f64();
        let probability = ((1.0 - (1.0 - self.probability).powf(ratio)) * roll).clamp(0.0, 1.0);
        let generated = (shortage as f64 * probability).round() as usize;

        if generated > 0 {
            self.time_without_loot = Duration::ZERO;
        }
        generated
    }

    pub fn time_without_loot(&self) -> Duration {
        self.time_without_loot
    }

    pub fn set_time_without_loot(&mut self, value: Duration) {
        self.time_without_loot = value;
    }
}
