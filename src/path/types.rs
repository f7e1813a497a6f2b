//! Core data types for the liquidity graph and the top-K search.

use std::sync::atomic::{AtomicU64, Ordering};

use ethers::types::U256;
use smallvec::SmallVec;

use crate::types::{PoolId, TokenId};

/// A directed edge of the liquidity graph, fully precomputed for the hot
/// search loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphEdge {
    pub from: TokenId,
    pub to: TokenId,
    pub pool: PoolId,
    /// Marginal rate of `to` per raw unit of `from`, after fee.
    pub spot_price: f64,
    /// `ln(spot_price + 1e-9)`; the additive search weight.
    pub log_spot_price: f64,
    /// `sqrt(reserve_in * reserve_out)` in raw units.
    pub liquidity_score: f64,
    /// `log_spot_price + ln(liquidity_score + 1e-9)`; ranks parallel edges.
    pub score: f64,
    /// Largest individual swap in raw `from` units that leaves the output
    /// reserve mostly intact; `U256::MAX` when uncapped.
    pub dx_cap_raw: U256,
}

/// An ordered sequence of chained edges from source to target.
#[derive(Debug, Clone)]
pub struct Path {
    pub hops: SmallVec<[GraphEdge; 8]>,
    /// Terminal search score: `Σ log_spot_price - hops * gas_per_hop_penalty`.
    pub score: f64,
    /// `min` over hops of `dx_cap_raw`.
    pub cap_raw: U256,
}

impl Path {
    /// Assemble a path from chained hops, computing its individual-swap cap.
    pub fn from_hops(hops: SmallVec<[GraphEdge; 8]>, score: f64) -> Self {
        debug_assert!(!hops.is_empty());
        debug_assert!(hops.windows(2).all(|w| w[0].to == w[1].from));
        let cap_raw = hops.iter().map(|h| h.dx_cap_raw).min().unwrap_or(U256::MAX);
        Self { hops, score, cap_raw }
    }

    pub fn source(&self) -> TokenId {
        self.hops[0].from
    }

    pub fn target(&self) -> TokenId {
        self.hops[self.hops.len() - 1].to
    }

    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    /// Canonical identity of a route: the ordered `(from, pool, to)` triples.
    pub fn route_key(&self) -> SmallVec<[(TokenId, PoolId, TokenId); 8]> {
        self.hops.iter().map(|h| (h.from, h.pool, h.to)).collect()
    }
}

/// A set of token IDs carried by each search state to exclude cycles.
///
/// Inline up to 512 tokens (eight words), spilling to the heap beyond that so
/// graph size never bounds `max_hops`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBitset {
    words: SmallVec<[u64; 8]>,
}

impl TokenBitset {
    pub fn with_capacity(token_count: usize) -> Self {
        let words = token_count.div_ceil(64).max(1);
        Self { words: smallvec::smallvec![0u64; words] }
    }

    pub fn contains(&self, id: TokenId) -> bool {
        let word = (id / 64) as usize;
        match self.words.get(word) {
            Some(w) => w & (1u64 << (id % 64)) != 0,
            None => false,
        }
    }

    /// Insert `id`, returning whether it was newly added.
    pub fn insert(&mut self, id: TokenId) -> bool {
        let word = (id / 64) as usize;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let mask = 1u64 << (id % 64);
        let newly = self.words[word] & mask == 0;
        self.words[word] |= mask;
        newly
    }
}

/// Thread-safe counters for router operations.
#[derive(Debug, Default)]
pub struct RouterMetrics {
    pub quotes_served: AtomicU64,
    pub paths_found: AtomicU64,
    pub search_time_ms: AtomicU64,
    pub heuristic_cache_hits: AtomicU64,
    pub heuristic_cache_misses: AtomicU64,
    pub graph_updates_applied: AtomicU64,
    pub graph_updates_skipped: AtomicU64,
    pub splits_computed: AtomicU64,
}

impl RouterMetrics {
    pub fn reset(&self) {
        self.quotes_served.store(0, Ordering::Relaxed);
        self.paths_found.store(0, Ordering::Relaxed);
        self.search_time_ms.store(0, Ordering::Relaxed);
        self.heuristic_cache_hits.store(0, Ordering::Relaxed);
        self.heuristic_cache_misses.store(0, Ordering::Relaxed);
        self.graph_updates_applied.store(0, Ordering::Relaxed);
        self.graph_updates_skipped.store(0, Ordering::Relaxed);
        self.splits_computed.store(0, Ordering::Relaxed);
    }

    /// Fraction of received events that caused a weight recomputation. The
    /// design target under nominal traffic is below ~15%.
    pub fn event_update_rate(&self) -> f64 {
        let applied = self.graph_updates_applied.load(Ordering::Relaxed) as f64;
        let skipped = self.graph_updates_skipped.load(Ordering::Relaxed) as f64;
        let total = applied + skipped;
        if total > 0.0 {
            applied / total
        } else {
            0.0
        }
    }

    /// Heuristic cache hit rate as a percentage.
    pub fn heuristic_cache_hit_rate(&self) -> f64 {
        let hits = self.heuristic_cache_hits.load(Ordering::Relaxed) as f64;
        let misses = self.heuristic_cache_misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;
        if total > 0.0 {
            (hits / total) * 100.0
        } else {
            0.0
        }
    }
}
