//! A* top-K route search.
//!
//! Best-first expansion over the compact adjacency with a bounded beam,
//! dominance pruning at `(node, depth)`, per-state visited bitsets, and an
//! admissible early-termination rule against the K-th best completed path.
//! Scores are maximized: `g = Σ log_spot_price - hops * penalty` is the
//! realized score and `prio = g - h(node) - penalty * remaining_hops` is an
//! upper bound on any completion of the state, so once the frontier's best
//! `prio` cannot beat the K-th candidate the search is done.
//!
//! States live in an index-based arena and carry parent handles; paths are
//! materialized only on reaching the target, by walking parents.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use ahash::AHashSet;
use smallvec::SmallVec;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::graph::TokenGraph;
use super::heuristic::HeuristicTable;
use super::types::{GraphEdge, Path, TokenBitset};
use crate::config::RouterSettings;
use crate::types::{PoolId, TokenId};

/// Parameters of one top-K search.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    pub source: TokenId,
    pub target: TokenId,
    pub max_hops: usize,
    pub top_k: usize,
    pub beam_width: usize,
    pub gas_per_hop_penalty: f64,
}

/// Ranked paths plus instrumentation counters.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub paths: Vec<Path>,
    pub nodes_explored: usize,
    pub states_pruned: usize,
    pub budget_exceeded: bool,
    pub elapsed: Duration,
}

/// One arena-allocated search state. Parents stay stable because the arena
/// only grows, so frontier and candidate heaps hold small integer handles.
struct SearchState {
    node: TokenId,
    parent: Option<u32>,
    /// Edge taken from the parent; `None` only on the root.
    edge: Option<GraphEdge>,
    visited: TokenBitset,
    g: f64,
    hops: u8,
    prev: Option<TokenId>,
}

#[derive(Debug, Clone, Copy)]
struct FrontierEntry {
    prio: f64,
    seq: u64,
    state: u32,
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}
impl Eq for FrontierEntry {}
impl Ord for FrontierEntry {
    // Max-heap on prio; earlier discovery wins ties for determinism.
    fn cmp(&self, other: &Self) -> Ordering {
        self.prio.total_cmp(&other.prio).then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Candidate {
    score: f64,
    seq: u64,
    path: Path,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}
impl Eq for Candidate {}
impl Ord for Candidate {
    // Greater = better: higher score, then earlier discovery.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.total_cmp(&other.score).then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

type RouteKey = SmallVec<[(TokenId, PoolId, TokenId); 8]>;

/// Find up to `top_k` distinct routes from source to target, best first.
///
/// Returns an empty list iff source equals target, or no path completed
/// within the iteration/time budget and no direct edge existed. Never fails
/// on well-formed inputs.
pub fn find_top_k_routes(
    graph: &TokenGraph,
    heuristic: &HeuristicTable,
    params: SearchParams,
    settings: &RouterSettings,
    cancel: Option<&CancellationToken>,
) -> SearchOutcome {
    let start = Instant::now();
    let mut outcome = SearchOutcome::default();

    let token_count = graph.token_count();
    if params.source == params.target
        || (params.source as usize) >= token_count
        || (params.target as usize) >= token_count
    {
        outcome.elapsed = start.elapsed();
        return outcome;
    }

    let max_hops = params.max_hops.min(crate::types::MAX_HOPS_CAP) as u8;
    let penalty = params.gas_per_hop_penalty;
    let top_k = params.top_k;
    let beam = params.beam_width.max(1);
    let edge_cap = settings.per_node_edge_cap_floor.max(beam / 2);
    let cancel_interval = settings.cancellation_check_interval.max(1);
    let frontier_cap =
        (beam * settings.frontier_beam_multiplier).max(top_k * settings.frontier_topk_multiplier);
    let deadline = start + Duration::from_millis(settings.max_search_time_ms);

    let mut arena: Vec<SearchState> = Vec::with_capacity(1024);
    let mut frontier: BinaryHeap<FrontierEntry> = BinaryHeap::with_capacity(beam * 4);
    let mut candidates: BinaryHeap<Reverse<Candidate>> = BinaryHeap::with_capacity(top_k + 1);
    let mut seen_routes: AHashSet<RouteKey> = AHashSet::with_capacity(top_k * 2);
    // Dominance table over (node, depth), seeded to -inf.
    let mut best_at_depth = vec![f64::NEG_INFINITY; token_count * (params.max_hops + 1)];
    let mut seq: u64 = 0;
    let mut kth_score = f64::NEG_INFINITY;

    // Root state.
    let mut root_visited = TokenBitset::with_capacity(token_count);
    root_visited.insert(params.source);
    arena.push(SearchState {
        node: params.source,
        parent: None,
        edge: None,
        visited: root_visited,
        g: 0.0,
        hops: 0,
        prev: None,
    });
    frontier.push(FrontierEntry {
        prio: -heuristic.estimate(params.source) - penalty * max_hops as f64,
        seq,
        state: 0,
    });

    // Seed candidates with any direct edge so a trivially reachable
    // single-hop quote is never missed.
    for edge in graph.edges_from(params.source) {
        if edge.to != params.target {
            continue;
        }
        let g = edge.log_spot_price - penalty;
        let path = Path::from_hops(smallvec::smallvec![*edge], g);
        if seen_routes.insert(path.route_key()) {
            seq += 1;
            candidates.push(Reverse(Candidate { score: g, seq, path }));
            if candidates.len() > top_k {
                candidates.pop();
            }
            if candidates.len() >= top_k {
                kth_score = candidates.peek().map(|Reverse(c)| c.score).unwrap_or(kth_score);
            }
        }
    }

    let mut iterations = 0usize;

    'outer: while !frontier.is_empty() {
        // Admissible early termination: prio is an upper bound on any
        // completion, so nothing left can improve the K-th best.
        if candidates.len() >= top_k {
            if let Some(top) = frontier.peek() {
                if top.prio <= kth_score {
                    break;
                }
            }
        }

        let round = frontier.len().min(beam);
        for _ in 0..round {
            let Some(entry) = frontier.pop() else { break };
            iterations += 1;
            if iterations > settings.max_search_iterations || Instant::now() > deadline {
                outcome.budget_exceeded = true;
                break 'outer;
            }
            if iterations % cancel_interval == 0 {
                if let Some(token) = cancel {
                    if token.is_cancelled() {
                        outcome.budget_exceeded = true;
                        break 'outer;
                    }
                }
            }

            let state_idx = entry.state;
            let (node, g, hops, prev) = {
                let s = &arena[state_idx as usize];
                (s.node, s.g, s.hops, s.prev)
            };
            if hops >= max_hops {
                continue;
            }
            let hops_next = hops + 1;

            let edges = graph.edges_from(node);
            for edge in edges.iter().take(edges.len().min(edge_cap)) {
                if arena[state_idx as usize].visited.contains(edge.to) {
                    continue;
                }
                // Forbid the immediate A -> B -> A reversal even through a
                // different pool.
                if prev == Some(edge.to) {
                    continue;
                }

                let g_next = g + edge.log_spot_price - penalty;

                if edge.to == params.target {
                    let hops_vec = reconstruct(&arena, state_idx, *edge);
                    let path = Path::from_hops(hops_vec, g_next);
                    let key = path.route_key();
                    if !seen_routes.insert(key) {
                        continue;
                    }
                    if candidates.len() < top_k || g_next > kth_score {
                        seq += 1;
                        candidates.push(Reverse(Candidate { score: g_next, seq, path }));
                        if candidates.len() > top_k {
                            candidates.pop();
                        }
                        if candidates.len() >= top_k {
                            kth_score =
                                candidates.peek().map(|Reverse(c)| c.score).unwrap_or(kth_score);
                        }
                    }
                    continue;
                }

                // A non-target child at the hop limit can never complete.
                if hops_next >= max_hops {
                    continue;
                }

                let depth_slot = edge.to as usize * (params.max_hops + 1) + hops_next as usize;
                if g_next <= best_at_depth[depth_slot] {
                    outcome.states_pruned += 1;
                    continue;
                }
                best_at_depth[depth_slot] = g_next;

                let prio = g_next
                    - heuristic.estimate(edge.to)
                    - penalty * (max_hops - hops_next) as f64;
                let mut visited = arena[state_idx as usize].visited.clone();
                visited.insert(edge.to);
                seq += 1;
                let child = arena.len() as u32;
                arena.push(SearchState {
                    node: edge.to,
                    parent: Some(state_idx),
                    edge: Some(*edge),
                    visited,
                    g: g_next,
                    hops: hops_next,
                    prev: Some(node),
                });
                frontier.push(FrontierEntry { prio, seq, state: child });
            }
        }

        // Cap the frontier by dropping its worst-prio tail.
        if frontier.len() > frontier_cap {
            let mut entries: Vec<FrontierEntry> = frontier.drain().collect();
            entries.sort_unstable_by(|a, b| b.cmp(a));
            outcome.states_pruned += entries.len() - frontier_cap;
            entries.truncate(frontier_cap);
            frontier = entries.into_iter().collect();
        }
    }

    outcome.nodes_explored = iterations;
    let mut finished: Vec<Candidate> = candidates.into_iter().map(|Reverse(c)| c).collect();
    // Best first; ties break by discovery order.
    finished.sort_by(|a, b| b.cmp(a));
    outcome.paths = finished.into_iter().map(|c| c.path).collect();
    outcome.elapsed = start.elapsed();

    debug!(
        target: "sor::search",
        "A* complete: {} paths, {} states explored, {} pruned, {:?} elapsed (budget_exceeded={})",
        outcome.paths.len(),
        outcome.nodes_explored,
        outcome.states_pruned,
        outcome.elapsed,
        outcome.budget_exceeded
    );
    outcome
}

/// Materialize a completed path by walking parent handles, then appending
/// the final edge into the target.
fn reconstruct(arena: &[SearchState], state_idx: u32, final_edge: GraphEdge) -> SmallVec<[GraphEdge; 8]> {
    let mut hops: SmallVec<[GraphEdge; 8]> = SmallVec::new();
    let mut cursor = Some(state_idx);
    while let Some(idx) = cursor {
        let state = &arena[idx as usize];
        if let Some(edge) = state.edge {
            hops.push(edge);
        }
        cursor = state.parent;
    }
    hops.reverse();
    hops.push(final_edge);
    hops
}
