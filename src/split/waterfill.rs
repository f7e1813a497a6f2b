//! Priority-queue water-fill splitter.
//!
//! Marginal-rate equilibration over concave response curves: input flows to
//! the path with the best marginal until that marginal meets the next path's
//! starting rate, activating paths in descending order of initial marginal
//! until the budget is spent. Because every curve is concave, the KKT
//! optimum equilibrates marginals across paths that are neither empty nor at
//! their cap; saturated paths may sit below the common level.

use tracing::debug;

use super::curve::ResponseCurve;
use super::SplitResult;
use crate::config::RouterSettings;

/// Run the water-fill equilibration for `total` raw input units.
pub fn waterfill_split(curves: &[ResponseCurve], total: f64, settings: &RouterSettings) -> SplitResult {
    let n = curves.len();
    let mut result = SplitResult { allocations: vec![0.0; n], ..Default::default() };
    if n == 0 || total <= 0.0 {
        return result;
    }

    let caps: Vec<f64> = curves.iter().map(|c| c.cap_raw.min(total)).collect();
    let tol = settings.waterfill_input_tolerance.max(total * 1e-12).max(1e-9);

    // Paths with no capacity or a dead initial marginal never participate.
    let mut sorted: Vec<usize> =
        (0..n).filter(|&i| caps[i] > tol && curves[i].initial_marginal() > 0.0).collect();
    sorted.sort_by(|&a, &b| {
        curves[b]
            .initial_marginal()
            .total_cmp(&curves[a].initial_marginal())
            .then_with(|| a.cmp(&b))
    });
    if sorted.is_empty() {
        return result;
    }

    let x = &mut result.allocations;
    let mut active: Vec<usize> = Vec::with_capacity(sorted.len());
    let mut pointer = 0usize;
    let mut remaining = total;
    let solve_iters = settings.marginal_solve_iterations;

    while result.iterations < settings.max_waterfill_iterations {
        result.iterations += 1;
        if remaining <= tol {
            break;
        }
        if active.is_empty() {
            if pointer < sorted.len() {
                active.push(sorted[pointer]);
                pointer += 1;
                continue;
            }
            break;
        }

        let current_level =
            active.iter().map(|&i| curves[i].marginal_at(x[i])).fold(0.0f64, f64::max);
        let target_level = if pointer < sorted.len() {
            curves[sorted[pointer]].initial_marginal()
        } else {
            0.0
        };

        // Per-path input that brings the marginal down to the target level
        // (or to the cap, whichever binds first).
        let mut deltas: Vec<(usize, f64)> = Vec::with_capacity(active.len());
        let mut total_delta = 0.0f64;
        for &i in &active {
            let next_x = curves[i].solve_input_for_marginal(x[i], target_level, caps[i], solve_iters);
            let delta = (next_x - x[i]).max(0.0);
            total_delta += delta;
            deltas.push((i, delta));
        }

        if total_delta <= tol && target_level <= 0.0 {
            // Nothing left to pour anywhere: every active path is flat.
            break;
        }

        if total_delta <= remaining + tol {
            // The whole step fits; apply it (proportionally limited by the
            // remaining budget) and activate the next path.
            let scale = if total_delta > remaining && total_delta > 0.0 {
                remaining / total_delta
            } else {
                1.0
            };
            for &(i, delta) in &deltas {
                let applied = delta * scale;
                x[i] += applied;
                remaining -= applied;
            }
            if remaining > tol && pointer < sorted.len() {
                active.push(sorted[pointer]);
                pointer += 1;
            }
        } else {
            // The budget binds before the target level: find the level in
            // [target, current] whose total delta just fits.
            let mut lo = target_level;
            let mut hi = current_level.max(target_level);
            for _ in 0..settings.level_solve_iterations {
                let mid = 0.5 * (lo + hi);
                let demand: f64 = active
                    .iter()
                    .map(|&i| {
                        (curves[i].solve_input_for_marginal(x[i], mid, caps[i], solve_iters) - x[i])
                            .max(0.0)
                    })
                    .sum();
                if demand > remaining {
                    lo = mid;
                } else {
                    hi = mid;
                }
            }
            let mut applied_total = 0.0f64;
            let mut step: Vec<(usize, f64)> = Vec::with_capacity(active.len());
            for &i in &active {
                let delta = (curves[i].solve_input_for_marginal(x[i], hi, caps[i], solve_iters)
                    - x[i])
                    .max(0.0);
                applied_total += delta;
                step.push((i, delta));
            }
            let scale = if applied_total > remaining && applied_total > 0.0 {
                remaining / applied_total
            } else {
                1.0
            };
            for (i, delta) in step {
                let applied = delta * scale;
                x[i] += applied;
                remaining -= applied;
            }
        }

        // Drop newly saturated or flat paths from the active set.
        active.retain(|&i| x[i] < caps[i] - tol && curves[i].marginal_at(x[i]) > 0.0);
    }

    if result.iterations >= settings.max_waterfill_iterations {
        result.budget_exceeded = true;
    }
    if remaining > tol {
        result.capacity_shortfall = true;
        debug!(
            target: "sor::split",
            "Water-fill left {} of {} unallocated (caps bind)", remaining, total
        );
    }

    normalize(x, total, tol, settings.dust_min_fraction);
    result
}

/// Normalize allocations to sum exactly to `total`: fold dust (allocations
/// below `dust_fraction * total`) into the largest allocation, then rescale.
/// Skipped when the sum already matches within tolerance and no dust exists.
pub(super) fn normalize(x: &mut [f64], total: f64, tol: f64, dust_fraction: f64) {
    if x.is_empty() {
        return;
    }
    let dust_floor = dust_fraction * total;
    let mut dust_sum = 0.0f64;
    for value in x.iter_mut() {
        if *value > 0.0 && *value < dust_floor {
            dust_sum += *value;
            *value = 0.0;
        }
    }
    if dust_sum > 0.0 {
        let mut largest: Option<usize> = None;
        for (i, value) in x.iter().enumerate() {
            if *value > 0.0 && largest.map_or(true, |j| *value > x[j]) {
                largest = Some(i);
            }
        }
        if let Some(i) = largest {
            x[i] += dust_sum;
        }
    }

    let sum: f64 = x.iter().sum();
    if sum <= 0.0 {
        return;
    }
    if (sum - total).abs() > tol {
        let scale = total / sum;
        for value in x.iter_mut() {
            *value *= scale;
        }
    }
}
