//! Engine-wide settings. Per-request knobs live on
//! [`crate::types::QuoteConfig`]; everything here is a deployment-time tunable
//! with defaults matching the service contract.

use serde::{Deserialize, Serialize};

use crate::errors::SorError;

/// Deployment-time configuration for the router core.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    // Search caps
    /// Hard cap on A* expansion iterations in a single search.
    pub max_search_iterations: usize,
    /// Wall-clock budget for a single search, in milliseconds.
    pub max_search_time_ms: u64,
    /// Frontier cap is `max(beam_width * this, top_k * frontier_topk_multiplier)`.
    pub frontier_beam_multiplier: usize,
    /// See `frontier_beam_multiplier`.
    pub frontier_topk_multiplier: usize,
    /// Per-node edge fanout floor: at least this many edges are considered
    /// regardless of beam width.
    pub per_node_edge_cap_floor: usize,
    /// External cancellation signal is polled every this many iterations.
    pub cancellation_check_interval: usize,

    // Heuristic
    /// Iteration cap for one reverse-Dijkstra run.
    pub max_dijkstra_iterations: usize,
    /// Settled-node cap for one reverse-Dijkstra run.
    pub max_dijkstra_nodes: usize,
    /// Maximum cached heuristic tables.
    pub heuristic_cache_capacity: u64,
    /// Heuristic table time-to-live, in seconds.
    pub heuristic_cache_ttl_secs: u64,

    // Graph build
    /// A second-best parallel edge survives compression iff its spot price is
    /// within this many basis points of the best.
    pub parallel_edge_keep_bps: f64,
    /// Probe price-impact ceiling above which a pool is considered shallow.
    pub shallow_probe_impact_max: f64,
    /// Fraction of the output reserve a single swap may drain; the remainder
    /// anchors the per-edge `dx_cap_raw`.
    pub dx_cap_drain_fraction: f64,

    // Water-fill splitter
    /// Outer loop bound for the water-fill equilibration.
    pub max_waterfill_iterations: usize,
    /// Absolute input tolerance folded into the water-fill tolerance term.
    pub waterfill_input_tolerance: f64,
    /// Allocations below this fraction of total input are folded into the
    /// largest allocation during normalization.
    pub dust_min_fraction: f64,
    /// Binary-search iterations when solving a path input for a marginal level.
    pub marginal_solve_iterations: usize,
    /// Binary-search iterations when solving the common water level.
    pub level_solve_iterations: usize,

    // Hill-climb splitter
    /// Round bound for the hill-climb refiner.
    pub max_hillclimb_iterations: usize,
    /// Active-route ceiling; beyond it the smallest allocation is folded away.
    pub max_active_routes: usize,
    /// Transfer delta as a fraction of total input.
    pub hillclimb_delta_fraction: f64,

    // Event dispatcher
    /// Liquidity events whose reserve ratio moves by no more than this are
    /// skipped as balanced.
    pub balanced_ratio_epsilon: f64,
    /// Swap events are coalesced per pool over this window, in milliseconds.
    pub swap_batch_window_ms: u64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            max_search_iterations: 50_000,
            max_search_time_ms: 5_000,
            frontier_beam_multiplier: 32,
            frontier_topk_multiplier: 128,
            per_node_edge_cap_floor: 8,
            cancellation_check_interval: 100,

            max_dijkstra_iterations: 50_000,
            max_dijkstra_nodes: 50_000,
            heuristic_cache_capacity: 256,
            heuristic_cache_ttl_secs: 300,

            parallel_edge_keep_bps: 50.0,
            shallow_probe_impact_max: 0.05,
            dx_cap_drain_fraction: 0.95,

            max_waterfill_iterations: 5_000,
            waterfill_input_tolerance: 1e-9,
            dust_min_fraction: 0.001,
            marginal_solve_iterations: 60,
            level_solve_iterations: 60,

            max_hillclimb_iterations: 200,
            max_active_routes: 10,
            hillclimb_delta_fraction: 0.001,

            balanced_ratio_epsilon: 1e-6,
            swap_batch_window_ms: 2_000,
        }
    }
}

impl RouterSettings {
    /// Load settings from a JSON file, filling unset fields with defaults.
    pub fn from_json_file(path: &std::path::Path) -> Result<Self, SorError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SorError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let settings: Self = serde_json::from_str(&raw)
            .map_err(|e| SorError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that would make the core misbehave.
    pub fn validate(&self) -> Result<(), SorError> {
        if self.max_search_iterations == 0 {
            return Err(SorError::Config("max_search_iterations must be positive".into()));
        }
        if self.dx_cap_drain_fraction <= 0.0 || self.dx_cap_drain_fraction >= 1.0 {
            return Err(SorError::Config(format!(
                "dx_cap_drain_fraction must be in (0, 1), got {}",
                self.dx_cap_drain_fraction
            )));
        }
        if self.parallel_edge_keep_bps < 0.0 {
            return Err(SorError::Config("parallel_edge_keep_bps must be non-negative".into()));
        }
        if !(0.0..=1.0).contains(&self.dust_min_fraction) {
            return Err(SorError::Config("dust_min_fraction must be in [0, 1]".into()));
        }
        if self.balanced_ratio_epsilon < 0.0 {
            return Err(SorError::Config("balanced_ratio_epsilon must be non-negative".into()));
        }
        Ok(())
    }
}
