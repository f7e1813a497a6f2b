//! Route evaluation: end-to-end simulation of a path and gas-adjusted
//! best-single selection.
//!
//! Gas is charged once per path, per hop, in output-token smallest units.
//! The caller derives `gas_per_hop_out_raw` from a USD cost and the output
//! token's USD price and is responsible for using the same figure across the
//! evaluator, the curve builder, and the splitters.

use ethers::types::U256;
use tracing::debug;

use super::graph::TokenGraph;
use super::types::Path;

/// Simulate a path for a discrete input, chaining pool swaps.
///
/// Short-circuits to zero on the first zero-output hop (a broken or drained
/// pool along the way makes the whole path worthless).
pub fn simulate_route(graph: &TokenGraph, path: &Path, amount_in_raw: U256) -> U256 {
    if amount_in_raw.is_zero() {
        return U256::zero();
    }
    let mut amount = amount_in_raw;
    for hop in &path.hops {
        let Some(pool) = graph.pool(hop.pool) else {
            debug!(target: "sor::eval", "Pool {} disappeared mid-simulation", hop.pool);
            return U256::zero();
        };
        let from = graph.token(hop.from).address;
        let to = graph.token(hop.to).address;
        amount = pool.swap(amount, from, to);
        if amount.is_zero() {
            return U256::zero();
        }
    }
    amount
}

/// The winning path of a gas-adjusted single-route evaluation.
#[derive(Debug, Clone, Copy)]
pub struct BestRoute {
    pub index: usize,
    pub output_raw: U256,
    pub gas_cost_raw: U256,
    pub net_output_raw: U256,
}

/// Pick the path with the highest net output (`simulate - hops * gas`,
/// floored at zero). Ties break by discovery order.
pub fn select_best(
    graph: &TokenGraph,
    paths: &[Path],
    amount_in_raw: U256,
    gas_per_hop_out_raw: U256,
) -> Option<BestRoute> {
    let mut best: Option<BestRoute> = None;
    for (index, path) in paths.iter().enumerate() {
        let output_raw = simulate_route(graph, path, amount_in_raw);
        let gas_cost_raw = gas_per_hop_out_raw.saturating_mul(U256::from(path.hop_count()));
        let net_output_raw = output_raw.saturating_sub(gas_cost_raw);
        let better = match &best {
            Some(current) => net_output_raw > current.net_output_raw,
            None => true,
        };
        if better {
            best = Some(BestRoute { index, output_raw, gas_cost_raw, net_output_raw });
        }
    }
    best
}
