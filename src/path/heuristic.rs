//! Reverse-Dijkstra admissible heuristic.
//!
//! For a target token, computes the shortest-path cost from every token to
//! the target over the reversed graph under `w = max(0, -log_spot_price +
//! gas_per_hop_penalty)`. The clamp keeps every weight non-negative, so the
//! result never overestimates the remaining score and A* stays admissible.
//! Unreached tokens have no entry; callers substitute 0, which is still an
//! admissible lower bound.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use ethers::types::Address;
use moka::sync::Cache;
use std::time::Duration;
use tracing::debug;

use super::graph::TokenGraph;
use super::types::RouterMetrics;
use crate::config::RouterSettings;
use crate::types::TokenId;

/// Cache key: graph shape plus target and penalty. Weight-only updates keep
/// the same key, trading heuristic precision for reuse (the realized score
/// in `g` stays exact, so search correctness is unaffected).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeuristicKey {
    pub token_count: usize,
    pub edge_count: usize,
    pub target: Address,
    pub penalty_bits: u64,
}

/// A computed heuristic table: flat token-count-sized distances.
#[derive(Debug, Clone)]
pub struct HeuristicTable {
    dist: Vec<f64>,
    pub target: TokenId,
    pub penalty: f64,
    pub budget_exceeded: bool,
}

impl HeuristicTable {
    /// Heuristic value for a token; unreached or out-of-range IDs yield 0.
    pub fn estimate(&self, id: TokenId) -> f64 {
        match self.dist.get(id as usize) {
            Some(d) if d.is_finite() => *d,
            _ => 0.0,
        }
    }

    pub fn reached(&self, id: TokenId) -> bool {
        matches!(self.dist.get(id as usize), Some(d) if d.is_finite())
    }
}

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    dist: f64,
    node: TokenId,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.dist.to_bits() == other.dist.to_bits() && self.node == other.node
    }
}
impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    // Min-heap on distance with a node-ID tiebreak for determinism.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .dist
            .total_cmp(&self.dist)
            .then_with(|| other.node.cmp(&self.node))
    }
}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Run the bounded reverse Dijkstra for one `(target, penalty)` pair.
pub fn reverse_dijkstra(
    graph: &TokenGraph,
    target: TokenId,
    penalty: f64,
    settings: &RouterSettings,
) -> HeuristicTable {
    let token_count = graph.token_count();
    let mut dist = vec![f64::INFINITY; token_count];
    let mut settled = vec![false; token_count];

    // Incoming-edge view of the compact adjacency.
    let mut reverse: Vec<Vec<(TokenId, f64)>> = vec![Vec::new(); token_count];
    for edges in graph.adjacency() {
        for edge in edges {
            let weight = (-edge.log_spot_price + penalty).max(0.0);
            reverse[edge.to as usize].push((edge.from, weight));
        }
    }

    let mut heap = BinaryHeap::new();
    if (target as usize) < token_count {
        dist[target as usize] = 0.0;
        heap.push(QueueEntry { dist: 0.0, node: target });
    }

    let mut iterations = 0usize;
    let mut settled_count = 0usize;
    let mut budget_exceeded = false;

    while let Some(QueueEntry { dist: d, node }) = heap.pop() {
        iterations += 1;
        if iterations > settings.max_dijkstra_iterations || settled_count > settings.max_dijkstra_nodes {
            budget_exceeded = true;
            break;
        }
        if settled[node as usize] {
            continue;
        }
        settled[node as usize] = true;
        settled_count += 1;

        for &(from, weight) in &reverse[node as usize] {
            let candidate = d + weight;
            if candidate < dist[from as usize] {
                dist[from as usize] = candidate;
                heap.push(QueueEntry { dist: candidate, node: from });
            }
        }
    }

    debug!(
        target: "sor::heuristic",
        "Reverse Dijkstra settled {}/{} tokens for target {} in {} iterations (budget_exceeded={})",
        settled_count, token_count, target, iterations, budget_exceeded
    );

    HeuristicTable { dist, target, penalty, budget_exceeded }
}

/// Concurrent heuristic cache keyed on graph shape. Hits are authoritative;
/// misses compute and store with last-writer-wins semantics. Stale entries
/// remain admissible, so quote handlers never wait on invalidation.
pub struct HeuristicCache {
    cache: Cache<HeuristicKey, Arc<HeuristicTable>>,
}

impl HeuristicCache {
    pub fn new(settings: &RouterSettings) -> Self {
        let cache = Cache::builder()
            .max_capacity(settings.heuristic_cache_capacity)
            .time_to_live(Duration::from_secs(settings.heuristic_cache_ttl_secs))
            .build();
        Self { cache }
    }

    pub fn get_or_compute(
        &self,
        graph: &TokenGraph,
        target_addr: Address,
        target: TokenId,
        penalty: f64,
        settings: &RouterSettings,
        metrics: &RouterMetrics,
    ) -> Arc<HeuristicTable> {
        use std::sync::atomic::Ordering as AtomicOrdering;

        let key = HeuristicKey {
            token_count: graph.token_count(),
            edge_count: graph.edge_count(),
            target: target_addr,
            penalty_bits: penalty.to_bits(),
        };
        if let Some(table) = self.cache.get(&key) {
            metrics.heuristic_cache_hits.fetch_add(1, AtomicOrdering::Relaxed);
            return table;
        }
        metrics.heuristic_cache_misses.fetch_add(1, AtomicOrdering::Relaxed);
        let table = Arc::new(reverse_dijkstra(graph, target, penalty, settings));
        self.cache.insert(key, table.clone());
        table
    }

    /// Drop every cached table. Called by the dispatcher on topology changes.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

impl std::fmt::Debug for HeuristicCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeuristicCache").field("entries", &self.cache.entry_count()).finish()
    }
}
