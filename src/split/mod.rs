// src/split/mod.rs

pub mod curve;
pub mod hillclimb;
pub mod waterfill;


pub use curve::{build_response_curves, filter_curves_by_initial_rate, CurvePoint, ResponseCurve, CURVE_FRACTIONS};
pub use hillclimb::hillclimb_split;
pub use waterfill::waterfill_split;

/// Outcome of either splitter: per-curve allocations in raw input units plus
/// instrumentation flags.
#[derive(Debug, Clone, Default)]
pub struct SplitResult {
    /// Parallel to the curve slice handed to the splitter; sums to the
    /// requested total within tolerance after normalization.
    pub allocations: Vec<f64>,
    pub iterations: usize,
    pub budget_exceeded: bool,
    /// The summed path caps could not absorb the requested input.
    pub capacity_shortfall: bool,
}

impl SplitResult {
    /// Expected total output of this allocation under the given curves.
    pub fn total_output(&self, curves: &[ResponseCurve]) -> f64 {
        self.allocations.iter().zip(curves).map(|(x, c)| c.output_at(*x)).sum()
    }
}
