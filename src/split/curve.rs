//! Response-curve construction.
//!
//! Each candidate path is sampled at fixed fractional input points and turned
//! into a monotone piecewise-linear `(input, output, marginal)` curve, already
//! net of the per-hop gas charge. The splitters operate on these curves
//! exclusively, so one pool simulation per sample is the entire cost.

use ethers::types::U256;
use tracing::debug;

use crate::path::{simulate_route, Path, TokenGraph};
use crate::types::{f64_to_u256, u256_to_f64};

/// The canonical sampling fractions, concentrated where curvature dominates.
pub const CURVE_FRACTIONS: [f64; 18] = [
    0.001, 0.0025, 0.005, 0.0075, 0.01, 0.015, 0.02, 0.03, 0.05, 0.075, 0.10, 0.15, 0.20, 0.30,
    0.40, 0.50, 0.75, 1.0,
];

/// One sample of a response curve, in raw-unit terms.
#[derive(Debug, Clone, Copy)]
pub struct CurvePoint {
    pub input_raw: f64,
    pub output_raw: f64,
    /// Finite-difference marginal rate against the previous sample; the
    /// average rate for the first sample. Clamped finite and non-negative.
    pub marginal: f64,
}

/// A monotone piecewise-linear response curve for one path.
#[derive(Debug, Clone)]
pub struct ResponseCurve {
    /// Index into the search's path list.
    pub path_index: usize,
    pub points: Vec<CurvePoint>,
    /// Individual-swap cap for the path, clamped to the request total.
    pub cap_raw: f64,
    pub hops: usize,
}

impl ResponseCurve {
    /// Marginal rate at zero input.
    pub fn initial_marginal(&self) -> f64 {
        self.points.first().map(|p| p.marginal).unwrap_or(0.0)
    }

    /// Interpolated output for an input amount. Linear from the origin below
    /// the first sample, flat beyond the last (capacity).
    pub fn output_at(&self, x: f64) -> f64 {
        if x <= 0.0 || self.points.is_empty() {
            return 0.0;
        }
        let mut prev_x = 0.0;
        let mut prev_y = 0.0;
        for point in &self.points {
            if x <= point.input_raw {
                let span = point.input_raw - prev_x;
                if span <= 0.0 {
                    return point.output_raw;
                }
                return prev_y + (point.output_raw - prev_y) * (x - prev_x) / span;
            }
            prev_x = point.input_raw;
            prev_y = point.output_raw;
        }
        prev_y
    }

    /// Marginal rate at an input amount, interpolated between samples so the
    /// splitters equilibrate against a continuous non-increasing function.
    /// Zero beyond the last sample (capacity).
    pub fn marginal_at(&self, x: f64) -> f64 {
        let Some(first) = self.points.first() else { return 0.0 };
        if x <= first.input_raw {
            return first.marginal;
        }
        for window in self.points.windows(2) {
            let (a, b) = (&window[0], &window[1]);
            if x <= b.input_raw {
                let span = b.input_raw - a.input_raw;
                if span <= 0.0 {
                    return b.marginal;
                }
                return a.marginal + (b.marginal - a.marginal) * (x - a.input_raw) / span;
            }
        }
        0.0
    }

    /// Smallest input `x' >= from_x` at which the marginal drops to `level`
    /// or below, capped at `cap`. Monotone binary search; the marginal is a
    /// non-increasing step function over the samples.
    pub fn solve_input_for_marginal(&self, from_x: f64, level: f64, cap: f64, iterations: usize) -> f64 {
        let cap = cap.max(from_x);
        if self.marginal_at(from_x) <= level {
            return from_x;
        }
        if self.marginal_at(cap) > level {
            return cap;
        }
        let mut lo = from_x;
        let mut hi = cap;
        for _ in 0..iterations {
            let mid = 0.5 * (lo + hi);
            if self.marginal_at(mid) > level {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        hi
    }
}

/// Sampling fractions for a requested step count: the canonical 18-point set,
/// or a log-spaced sweep over the same range for any other count.
fn sampling_fractions(step_count: usize) -> Vec<f64> {
    if step_count == CURVE_FRACTIONS.len() {
        return CURVE_FRACTIONS.to_vec();
    }
    if step_count == 1 {
        return vec![1.0];
    }
    let lo: f64 = 0.001;
    let ratio = (1.0f64 / lo).powf(1.0 / (step_count - 1) as f64);
    (0..step_count).map(|i| (lo * ratio.powi(i as i32)).min(1.0)).collect()
}

/// Build response curves for every path.
///
/// Each sample's output is net of `hops * gas_per_hop_out_raw`, floored at
/// zero. A sample that regresses against its predecessor is recorded at the
/// previous output (the curve's capacity point) and sampling stops there.
pub fn build_response_curves(
    graph: &TokenGraph,
    paths: &[Path],
    total_input_raw: U256,
    gas_per_hop_out_raw: U256,
    step_count: usize,
) -> Vec<ResponseCurve> {
    let fractions = sampling_fractions(step_count);
    let total_f = u256_to_f64(total_input_raw);
    let mut curves = Vec::with_capacity(paths.len());

    for (path_index, path) in paths.iter().enumerate() {
        let hops = path.hop_count();
        let gas_total = gas_per_hop_out_raw.saturating_mul(U256::from(hops));
        let mut points: Vec<CurvePoint> = Vec::with_capacity(fractions.len());
        let mut prev_in = 0.0f64;
        let mut prev_out = 0.0f64;

        for &fraction in &fractions {
            let input_f = (total_f * fraction).round();
            if input_f <= prev_in {
                continue;
            }
            let input_raw = f64_to_u256(input_f);
            let simulated = simulate_route(graph, path, input_raw);
            let output_f = u256_to_f64(simulated.saturating_sub(gas_total));

            if output_f < prev_out {
                // Regression: compound rounding or true saturation. Flatline
                // at the previous output and stop sampling this path.
                points.push(CurvePoint { input_raw: input_f, output_raw: prev_out, marginal: 0.0 });
                break;
            }

            let mut marginal = if points.is_empty() {
                output_f / input_f
            } else {
                (output_f - prev_out) / (input_f - prev_in)
            };
            if !marginal.is_finite() || marginal < 0.0 {
                marginal = 0.0;
            }
            points.push(CurvePoint { input_raw: input_f, output_raw: output_f, marginal });
            prev_in = input_f;
            prev_out = output_f;
        }

        curves.push(ResponseCurve {
            path_index,
            points,
            cap_raw: u256_to_f64(path.cap_raw).min(total_f),
            hops,
        });
    }
    curves
}

/// Quality gate: drop curves whose first-sample effective rate falls below
/// `min_ratio` of the best such rate. A ratio of zero disables the filter.
pub fn filter_curves_by_initial_rate(curves: Vec<ResponseCurve>, min_ratio: f64) -> Vec<ResponseCurve> {
    if min_ratio <= 0.0 || curves.len() <= 1 {
        return curves;
    }
    let best = curves.iter().map(ResponseCurve::initial_marginal).fold(0.0f64, f64::max);
    if best <= 0.0 {
        return curves;
    }
    let before = curves.len();
    let kept: Vec<ResponseCurve> =
        curves.into_iter().filter(|c| c.initial_marginal() >= min_ratio * best).collect();
    if kept.len() < before {
        debug!(target: "sor::split", "Initial-rate filter dropped {} of {} curves", before - kept.len(), before);
    }
    kept
}
