use meter_core::Store;

use crate::pipeline::PipelineError;

/// Outcome of comparing a cumulative counter against the stored baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// No usable baseline, or the counter did not advance: zero delta.
    Baseline,
    Advance(u64),
}

impl DeltaOutcome {
    pub fn raw(self) -> u64 {
        match self {
            Self::Baseline => 0,
            Self::Advance(delta) => delta,
        }
    }
}

/// Pure delta policy.
///
/// - `last == 0` (never seen, or a counter that was zero) is a baseline.
/// - `observed <= last` is a baseline too: a meter reset or a rollover is
///   indistinguishable from a replacement, so nothing is attributed.
/// - otherwise the counter advanced by `observed - last`.
pub fn compute_delta(last: u64, observed: u64) -> DeltaOutcome {
    if last == 0 || observed <= last {
        DeltaOutcome::Baseline
    } else {
        DeltaOutcome::Advance(observed - last)
    }
}

/// Turns successive counter readings of each meter instance into per-cycle
/// energy deltas, keeping the baseline in the store.
#[derive(Clone)]
pub struct EnergyDeltaEngine {
    store: Store,
    divisor: f64,
}

impl EnergyDeltaEngine {
    /// `divisor` scales raw counter units into the reported unit (1000 for Wh to kWh).
    pub fn new(store: Store, divisor: f64) -> Self {
        Self { store, divisor }
    }

    /// Swaps the stored baseline for `observed` and returns the scaled delta.
    pub async fn observe(&self, source_address: &str, unit_id: i64, observed: u64) -> Result<f64, PipelineError> {
        let last = self
            .store
            .swap_energy_baseline(source_address, unit_id, observed)
            .await?
            .unwrap_or(0);

        let outcome = compute_delta(last, observed);
        if outcome == DeltaOutcome::Baseline && last != 0 && observed < last {
            tracing::warn!(
                source_address,
                unit_id,
                last,
                observed,
                "energy counter went backwards, resetting baseline"
            );
            metrics::counter!("energy_baseline_resets_total").increment(1);
        }

        Ok(outcome.raw() as f64 / self.divisor)
    }
}
