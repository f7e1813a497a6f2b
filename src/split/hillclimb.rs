//! Delta-transfer hill-climb splitter.
//!
//! A mechanical refiner with the same inputs and outputs as the water-fill:
//! start with everything on path zero, then repeatedly execute the single
//! fixed-size transfer with the largest positive gain in total output. Kept
//! as an independent cross-check; the quote facade presents whichever of the
//! two splitters nets more.

use super::curve::ResponseCurve;
use super::SplitResult;
use crate::config::RouterSettings;

/// Run the hill-climb refinement for `total` raw input units.
pub fn hillclimb_split(curves: &[ResponseCurve], total: f64, settings: &RouterSettings) -> SplitResult {
    let n = curves.len();
    let mut result = SplitResult { allocations: vec![0.0; n], ..Default::default() };
    if n == 0 || total <= 0.0 {
        return result;
    }
    result.allocations[0] = total;
    if n == 1 {
        return result;
    }

    let delta = (total * settings.hillclimb_delta_fraction).round().max(1.0);
    let x = &mut result.allocations;

    for _round in 0..settings.max_hillclimb_iterations {
        result.iterations += 1;

        // Keep the active set bounded: fold the smallest allocation into the
        // largest before continuing.
        if x.iter().filter(|v| **v > 0.0).count() > settings.max_active_routes {
            let mut smallest = usize::MAX;
            let mut largest = usize::MAX;
            for (i, value) in x.iter().enumerate() {
                if *value <= 0.0 {
                    continue;
                }
                if smallest == usize::MAX || *value < x[smallest] {
                    smallest = i;
                }
                if largest == usize::MAX || *value > x[largest] {
                    largest = i;
                }
            }
            if smallest != largest && smallest != usize::MAX {
                x[largest] += x[smallest];
                x[smallest] = 0.0;
            }
        }

        // The single best transfer this round.
        let mut best_gain = 0.0f64;
        let mut best_move: Option<(usize, usize, f64)> = None;
        for from in 0..n {
            if x[from] <= 0.0 {
                continue;
            }
            let step = delta.min(x[from]);
            let from_before = curves[from].output_at(x[from]);
            let from_after = curves[from].output_at(x[from] - step);
            for to in 0..n {
                if to == from {
                    continue;
                }
                let to_before = curves[to].output_at(x[to]);
                let to_after = curves[to].output_at(x[to] + step);
                let gain = (from_after + to_after) - (from_before + to_before);
                if gain > best_gain {
                    best_gain = gain;
                    best_move = Some((from, to, step));
                }
            }
        }

        match best_move {
            Some((from, to, step)) => {
                x[from] -= step;
                x[to] += step;
            }
            None => return result,
        }
    }

    result.budget_exceeded = true;
    result
}
