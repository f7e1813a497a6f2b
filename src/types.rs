//! Shared types for the router core: token records, numeric identifiers,
//! raw/human unit conversion, and the quote request/response contract.

use ahash::AHashSet;
use ethers::types::{Address, U256};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::errors::QuoteError;

/// Dense numeric token identifier used by the hot search loop.
pub type TokenId = u32;
/// Dense numeric pool identifier.
pub type PoolId = u32;

/// Hop count ceiling imposed by the fixed-width visited bitset math; see the
/// config validation in [`QuoteConfig::validate`]. Practical deployments stay
/// at or below 8.
pub const MAX_HOPS_CAP: usize = 63;

/// Symbols priced at $1.00 when no explicit target USD price is supplied.
static RECOGNIZED_STABLECOINS: Lazy<AHashSet<&'static str>> = Lazy::new(|| {
    let mut s = AHashSet::new();
    for sym in ["USDC", "USDT", "DAI", "BUSD", "TUSD", "FRAX", "LUSD", "USDP", "GUSD"] {
        s.insert(sym);
    }
    s
});

/// Whether `symbol` is treated as a $1.00 stablecoin for gas conversion.
pub fn is_recognized_stablecoin(symbol: &str) -> bool {
    RECOGNIZED_STABLECOINS.contains(symbol.to_ascii_uppercase().as_str())
}

/// An immutable token record. Copied into the graph at build time and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

impl Token {
    pub fn new(address: Address, symbol: impl Into<String>, decimals: u8) -> Self {
        Self { address, symbol: symbol.into(), decimals }
    }
}

/// Convert a raw smallest-unit amount to human units.
pub fn normalize_units(amount: U256, decimals: u8) -> f64 {
    if decimals >= 77 {
        return 0.0;
    }
    let divisor = 10f64.powi(decimals as i32);
    if divisor == 0.0 {
        return 0.0;
    }
    let hi = (amount >> 128).as_u128() as f64;
    let lo = (amount & U256::from(u128::MAX)).as_u128() as f64;
    let scale = 2f64.powi(128);
    ((hi * scale) + lo) / divisor
}

/// Convert a human-unit amount to raw smallest units, saturating at the type
/// boundaries. Negative or non-finite inputs map to zero.
pub fn denormalize_units(amount: f64, decimals: u8) -> U256 {
    f64_to_u256(amount * 10f64.powi(decimals as i32))
}

/// Lossy `U256` to `f64` conversion (raw units, no decimal scaling).
pub fn u256_to_f64(amount: U256) -> f64 {
    normalize_units(amount, 0)
}

/// Lossy `f64` to `U256` conversion, saturating and clamping to zero below.
pub fn f64_to_u256(value: f64) -> U256 {
    if !value.is_finite() || value <= 0.0 {
        return U256::zero();
    }
    let u128_max = u128::MAX as f64;
    if value < u128_max {
        return U256::from(value as u128);
    }
    let scale = 2f64.powi(128);
    let hi = (value / scale).floor();
    if hi >= u128_max {
        return U256::MAX;
    }
    let lo = (value - hi * scale).clamp(0.0, u128_max);
    (U256::from(hi as u128) << 128) | U256::from(lo as u128)
}

/// Per-request knobs for a quote. Defaults follow the service-wide contract;
/// callers override individual fields as needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteConfig {
    /// Maximum number of hops in any returned path.
    pub max_hops: usize,
    /// Number of candidate paths the search keeps.
    pub top_k: usize,
    /// Best-first beam width per expansion round.
    pub beam_width: usize,
    /// Per-hop gas cost in USD, charged in output-token units.
    pub gas_per_hop_usd: f64,
    /// Log-domain per-hop penalty applied by the search and heuristic.
    pub gas_per_hop_penalty: f64,
    /// USD price of the target token. Required unless the target is a
    /// recognized stablecoin (then it defaults to 1.0).
    pub target_usd_price: Option<f64>,
    /// Whether to run the route splitters after the single-path evaluation.
    pub enable_splitting: bool,
    /// Quality gate on response curves: paths whose first-sample effective
    /// rate falls below this fraction of the best are dropped. 0 disables.
    pub min_initial_eff_ratio: f64,
    /// Number of response-curve samples. 18 selects the canonical fraction
    /// set; any other value produces a log-spaced sweep.
    pub step_count: usize,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            max_hops: 3,
            top_k: 40,
            beam_width: 32,
            gas_per_hop_usd: 0.01,
            gas_per_hop_penalty: 5e-4,
            target_usd_price: None,
            enable_splitting: true,
            min_initial_eff_ratio: 0.0,
            step_count: 18,
        }
    }
}

impl QuoteConfig {
    /// Reject non-sensical configurations before any work is done.
    pub fn validate(&self) -> Result<(), QuoteError> {
        if self.max_hops == 0 || self.max_hops > MAX_HOPS_CAP {
            return Err(QuoteError::InvalidInput(format!(
                "max_hops must be in 1..={}, got {}",
                MAX_HOPS_CAP, self.max_hops
            )));
        }
        if self.top_k == 0 {
            return Err(QuoteError::InvalidInput("top_k must be positive".to_string()));
        }
        if self.beam_width == 0 {
            return Err(QuoteError::InvalidInput("beam_width must be positive".to_string()));
        }
        if !self.gas_per_hop_usd.is_finite() || self.gas_per_hop_usd < 0.0 {
            return Err(QuoteError::InvalidInput(format!(
                "gas_per_hop_usd must be a non-negative finite number, got {}",
                self.gas_per_hop_usd
            )));
        }
        if !self.gas_per_hop_penalty.is_finite() || self.gas_per_hop_penalty < 0.0 {
            return Err(QuoteError::InvalidInput(format!(
                "gas_per_hop_penalty must be a non-negative finite number, got {}",
                self.gas_per_hop_penalty
            )));
        }
        if let Some(px) = self.target_usd_price {
            if !px.is_finite() || px <= 0.0 {
                return Err(QuoteError::InvalidInput(format!(
                    "target_usd_price must be positive, got {}",
                    px
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.min_initial_eff_ratio) {
            return Err(QuoteError::InvalidInput(format!(
                "min_initial_eff_ratio must be in [0, 1], got {}",
                self.min_initial_eff_ratio
            )));
        }
        if self.step_count == 0 {
            return Err(QuoteError::InvalidInput("step_count must be positive".to_string()));
        }
        Ok(())
    }
}

/// A quote request: swap `amount` (human units of the source token) from
/// `source` into `target`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub source: Address,
    pub target: Address,
    pub amount: f64,
    #[serde(default)]
    pub config: QuoteConfig,
}

impl QuoteRequest {
    pub fn new(source: Address, target: Address, amount: f64) -> Self {
        Self { source, target, amount, config: QuoteConfig::default() }
    }
}

/// One hop of a returned path, in address terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHop {
    pub pool: Address,
    pub from: Address,
    pub to: Address,
}

/// A returned path: its hop records plus the terminal search score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotedPath {
    pub hops: Vec<RouteHop>,
    /// Terminal search score (sum of log spot prices net of hop penalties).
    pub score: f64,
    /// Individual-swap cap in raw source units; `U256::MAX` when uncapped.
    pub cap_raw: U256,
}

/// The winning single path and its gas-adjusted output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestSingle {
    pub path_index: usize,
    pub output_raw: U256,
    pub output_human: f64,
    pub gas_cost_raw: U256,
    pub net_output_raw: U256,
    pub net_output_human: f64,
}

/// Which splitter produced the presented allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitAlgorithm {
    Waterfill,
    Hillclimb,
}

/// One path's share of a split allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitAllocation {
    pub path_index: usize,
    pub input_raw: U256,
    pub input_human: f64,
    pub output_raw: U256,
    pub output_human: f64,
    pub initial_marginal: f64,
    pub final_marginal: f64,
}

/// The split block of a quote response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitOutcome {
    pub total_input_human: f64,
    pub total_output_human: f64,
    pub allocations: Vec<SplitAllocation>,
    pub iterations: usize,
    pub algorithm: SplitAlgorithm,
    /// Set when the summed path caps could not absorb the requested input.
    pub capacity_shortfall: bool,
}

/// Reason code attached to an empty `paths` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoRouteReason {
    SourceEqualsTarget,
    NoRouteFound,
}

/// Per-phase timings and search counters for one quote.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuoteDiagnostics {
    pub heuristic_ms: u64,
    pub search_ms: u64,
    pub eval_ms: u64,
    pub split_ms: u64,
    pub nodes_explored: usize,
    pub states_pruned: usize,
    /// Pruned states as a fraction of explored plus pruned.
    pub pruning_ratio: f64,
    pub search_budget_exceeded: bool,
    pub heuristic_budget_exceeded: bool,
    pub splitter_budget_exceeded: bool,
    pub reason: Option<NoRouteReason>,
}

/// The full quote response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteResponse {
    pub paths: Vec<QuotedPath>,
    pub best_single: Option<BestSingle>,
    pub split: Option<SplitOutcome>,
    pub diagnostics: QuoteDiagnostics,
}
