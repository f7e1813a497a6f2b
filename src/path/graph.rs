//! Liquidity graph construction and maintenance.
//!
//! The graph has two layers. A `petgraph` stable directed multigraph records
//! topology (one node per token, two directed edges per live pool) and is the
//! layer the event dispatcher mutates. A secondary flat adjacency replaces
//! addresses with dense numeric IDs and carries fully precomputed
//! [`GraphEdge`] records, sorted and parallel-edge-compressed, so the search
//! loop indexes plain vectors.

use std::sync::Arc;

use ahash::AHashMap;
use ethers::types::{Address, U256};
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use super::types::GraphEdge;
use crate::amm_math;
use crate::config::RouterSettings;
use crate::errors::{EventError, GraphError};
use crate::pool::PoolOracle;
use crate::types::{u256_to_f64, PoolId, Token, TokenId};

/// Topology edge payload: which pool the directed edge belongs to.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PoolEdgeRef {
    pub pool: PoolId,
}

/// The shared liquidity graph. Built once from a pool set and then updated in
/// place by the event dispatcher under a write lock.
pub struct TokenGraph {
    graph: StableDiGraph<Address, PoolEdgeRef>,
    tokens: Vec<Token>,
    token_to_id: AHashMap<Address, TokenId>,
    /// `PoolId`-indexed oracle snapshots; `None` marks a disabled pool.
    pools: Vec<Option<Arc<dyn PoolOracle>>>,
    pool_addrs: Vec<Address>,
    pool_to_id: AHashMap<Address, PoolId>,
    pool_edges: AHashMap<PoolId, SmallVec<[EdgeIndex; 2]>>,
    /// Compact searchable adjacency, indexed by `TokenId`.
    adjacency: Vec<Vec<GraphEdge>>,
    version: u64,
    settings: Arc<RouterSettings>,
}

impl TokenGraph {
    /// Build a graph from a token dictionary and a pool set.
    ///
    /// Edges failing the liquidity filters are dropped silently; the build
    /// fails only when the token dictionary is inconsistent (duplicate
    /// addresses). Pool tokens missing from the dictionary are admitted as
    /// placeholder nodes, the same way pool-creation events admit them.
    pub fn build(
        tokens: Vec<Token>,
        pools: Vec<Arc<dyn PoolOracle>>,
        settings: Arc<RouterSettings>,
    ) -> Result<Self, GraphError> {
        let mut graph = StableDiGraph::new();
        let mut token_to_id = AHashMap::with_capacity(tokens.len());
        for (id, token) in tokens.iter().enumerate() {
            if token_to_id.insert(token.address, id as TokenId).is_some() {
                return Err(GraphError::InconsistentTokenDictionary(format!(
                    "duplicate token address {:?}",
                    token.address
                )));
            }
            let idx = graph.add_node(token.address);
            debug_assert_eq!(idx.index(), id);
        }

        let mut built = Self {
            graph,
            tokens,
            token_to_id,
            pools: Vec::new(),
            pool_addrs: Vec::new(),
            pool_to_id: AHashMap::new(),
            pool_edges: AHashMap::new(),
            adjacency: Vec::new(),
            version: 0,
            settings,
        };

        let mut added = 0usize;
        let mut skipped = 0usize;
        for pool in pools {
            if built.insert_pool(pool) {
                added += 1;
            } else {
                skipped += 1;
            }
        }

        built.rebuild_adjacency();
        info!(
            target: "sor::graph",
            "Graph build complete: {} tokens, {} pools added, {} skipped, {} directed edges ({} searchable)",
            built.tokens.len(),
            added,
            skipped,
            built.edge_count(),
            built.searchable_edge_count()
        );
        Ok(built)
    }

    /// Register a pool and its two directed topology edges. Returns `false`
    /// when the pool is a duplicate.
    fn insert_pool(&mut self, pool: Arc<dyn PoolOracle>) -> bool {
        let addr = pool.address();
        if let Some(&existing) = self.pool_to_id.get(&addr) {
            if self.pools[existing as usize].is_some() {
                debug!(target: "sor::graph", "SKIP: pool {:?} already present", addr);
                return false;
            }
            // A previously disabled pool coming back.
            self.pools[existing as usize] = Some(pool.clone());
            self.add_topology_edges(existing, &pool);
            return true;
        }

        let id = self.pools.len() as PoolId;
        self.pools.push(Some(pool.clone()));
        self.pool_addrs.push(addr);
        self.pool_to_id.insert(addr, id);
        self.add_topology_edges(id, &pool);
        true
    }

    fn add_topology_edges(&mut self, id: PoolId, pool: &Arc<dyn PoolOracle>) {
        let [slot0, slot1] = pool.token_slots();
        let n0 = self.node_of(slot0.token, slot0.decimals);
        let n1 = self.node_of(slot1.token, slot1.decimals);
        let e0 = self.graph.add_edge(n0, n1, PoolEdgeRef { pool: id });
        let e1 = self.graph.add_edge(n1, n0, PoolEdgeRef { pool: id });
        self.pool_edges.insert(id, smallvec::smallvec![e0, e1]);
    }

    /// Resolve or create the node for a token address. Tokens discovered via
    /// pool creation get a hex-derived placeholder symbol.
    fn node_of(&mut self, addr: Address, decimals: u8) -> NodeIndex {
        if let Some(&id) = self.token_to_id.get(&addr) {
            return NodeIndex::new(id as usize);
        }
        let id = self.tokens.len() as TokenId;
        self.tokens.push(Token::new(addr, format!("{:#x}", addr), decimals));
        self.token_to_id.insert(addr, id);
        self.adjacency.push(Vec::new());
        let idx = self.graph.add_node(addr);
        debug_assert_eq!(idx.index(), id as usize);
        idx
    }

    /// Recompute the compact adjacency for every token.
    pub fn rebuild_adjacency(&mut self) {
        self.adjacency = vec![Vec::new(); self.tokens.len()];
        for id in 0..self.tokens.len() {
            self.rebuild_row(id as TokenId);
        }
    }

    /// Recompute one token's compact edge list: gather live directed edges,
    /// filter, sort by score, compress parallel edges.
    fn rebuild_row(&mut self, node: TokenId) {
        let idx = NodeIndex::new(node as usize);
        let mut edges: Vec<GraphEdge> = Vec::new();
        for edge_ref in self.graph.edges(idx) {
            use petgraph::visit::EdgeRef;
            let pool_id = edge_ref.weight().pool;
            let to = edge_ref.target().index() as TokenId;
            let Some(Some(pool)) = self.pools.get(pool_id as usize) else { continue };
            if let Some(edge) = self.compute_edge(node, to, pool_id, pool.as_ref()) {
                edges.push(edge);
            }
        }
        self.sort_edges(&mut edges);
        let compressed = self.compress_parallel(edges);
        if (node as usize) >= self.adjacency.len() {
            self.adjacency.resize((node as usize) + 1, Vec::new());
        }
        self.adjacency[node as usize] = compressed;
    }

    /// Compute a searchable edge, or `None` when the direction fails the
    /// build-time filters (shallow or empty pools are excluded).
    fn compute_edge(
        &self,
        from: TokenId,
        to: TokenId,
        pool_id: PoolId,
        pool: &dyn PoolOracle,
    ) -> Option<GraphEdge> {
        let from_addr = self.tokens[from as usize].address;
        let to_addr = self.tokens[to as usize].address;
        let reserve_in = pool.reserve_of(from_addr)?;
        let reserve_out = pool.reserve_of(to_addr)?;
        if reserve_in < U256::one() || reserve_out < U256::one() {
            return None;
        }
        let spot_price = pool.spot_price(from_addr, to_addr);
        if !spot_price.is_finite() || spot_price <= 0.0 {
            return None;
        }
        if amm_math::probe_price_impact(reserve_in) > self.settings.shallow_probe_impact_max {
            debug!(target: "sor::graph", "SKIP: pool {:?} too shallow from {:?}", pool.address(), from_addr);
            return None;
        }

        let log_spot_price = (spot_price + 1e-9).ln();
        let liquidity_score = (u256_to_f64(reserve_in) * u256_to_f64(reserve_out)).sqrt();
        let score = log_spot_price + (liquidity_score + 1e-9).ln();
        if !score.is_finite() {
            warn!(target: "sor::graph", "SKIP: pool {:?} produced a non-finite score", pool.address());
            return None;
        }
        let dx_cap_raw = amm_math::dx_cap_for_drain(
            reserve_in,
            amm_math::fee_to_ppm(pool.fee()),
            self.settings.dx_cap_drain_fraction,
        );

        Some(GraphEdge { from, to, pool: pool_id, spot_price, log_spot_price, liquidity_score, score, dx_cap_raw })
    }

    /// Score-descending order with a deterministic pool-address tiebreak.
    fn sort_edges(&self, edges: &mut [GraphEdge]) {
        edges.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| self.pool_addrs[a.pool as usize].cmp(&self.pool_addrs[b.pool as usize]))
        });
    }

    /// Keep the best edge per destination, plus the runner-up when its spot
    /// price sits within the configured basis-point window of the best.
    fn compress_parallel(&self, sorted: Vec<GraphEdge>) -> Vec<GraphEdge> {
        let keep_ratio = self.settings.parallel_edge_keep_bps / 10_000.0;
        let mut best_spot: AHashMap<TokenId, f64> = AHashMap::new();
        let mut kept_count: AHashMap<TokenId, u8> = AHashMap::new();
        let mut out = Vec::with_capacity(sorted.len());
        for edge in sorted {
            let count = kept_count.entry(edge.to).or_insert(0);
            match *count {
                0 => {
                    best_spot.insert(edge.to, edge.spot_price);
                    *count = 1;
                    out.push(edge);
                }
                1 => {
                    let best = best_spot[&edge.to];
                    if best > 0.0 && ((edge.spot_price - best).abs() / best) <= keep_ratio {
                        *count = 2;
                        out.push(edge);
                    }
                }
                _ => {}
            }
        }
        self.sort_edges(&mut out);
        out
    }

    // --- Accessors -----------------------------------------------------

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Directed topology edge count (two per live pool). This is the shape
    /// component of the heuristic cache key, deliberately insensitive to
    /// weight-only changes.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Edges surviving the filters and compression.
    pub fn searchable_edge_count(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum()
    }

    pub fn token_id(&self, addr: &Address) -> Option<TokenId> {
        self.token_to_id.get(addr).copied()
    }

    pub fn token(&self, id: TokenId) -> &Token {
        &self.tokens[id as usize]
    }

    pub fn pool_id(&self, addr: &Address) -> Option<PoolId> {
        self.pool_to_id.get(addr).copied()
    }

    pub fn pool_address(&self, id: PoolId) -> Address {
        self.pool_addrs[id as usize]
    }

    pub fn pool(&self, id: PoolId) -> Option<&Arc<dyn PoolOracle>> {
        self.pools.get(id as usize).and_then(|p| p.as_ref())
    }

    pub fn edges_from(&self, id: TokenId) -> &[GraphEdge] {
        self.adjacency.get(id as usize).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn adjacency(&self) -> &[Vec<GraphEdge>] {
        &self.adjacency
    }

    /// Monotonic version counter, bumped on every dispatcher write.
    pub fn version(&self) -> u64 {
        self.version
    }

    // --- Dispatcher mutation API --------------------------------------
    //
    // Each method runs under the caller's exclusive write token and leaves
    // the compact adjacency consistent before returning, so readers observe
    // the full effect of one event or none of it.

    /// Add a pool (PoolCreated). Unknown tokens become new graph nodes.
    pub(crate) fn add_pool(&mut self, pool: Arc<dyn PoolOracle>) -> bool {
        let added = self.insert_pool(pool.clone());
        if added {
            let [slot0, slot1] = pool.token_slots();
            self.refresh_endpoints(slot0.token, slot1.token);
            self.version += 1;
        }
        added
    }

    /// Remove a pool's edges (PoolDisabled). The pool keeps its ID so a later
    /// re-creation is cheap.
    pub(crate) fn remove_pool(&mut self, addr: &Address) -> Result<(), EventError> {
        let id = self.pool_to_id.get(addr).copied().ok_or(EventError::UnknownPool(*addr))?;
        let Some(pool) = self.pools[id as usize].take() else {
            return Err(EventError::UnknownPool(*addr));
        };
        if let Some(edges) = self.pool_edges.remove(&id) {
            for edge in edges {
                self.graph.remove_edge(edge);
            }
        }
        let [slot0, slot1] = pool.token_slots();
        self.refresh_endpoints(slot0.token, slot1.token);
        self.version += 1;
        Ok(())
    }

    /// Replace a pool's reserve snapshot and recompute both directional
    /// edges (weights, score, and `dx_cap_raw`).
    pub(crate) fn update_pool_reserves(
        &mut self,
        addr: &Address,
        reserve0: U256,
        reserve1: U256,
    ) -> Result<(), EventError> {
        let id = self.pool_to_id.get(addr).copied().ok_or(EventError::UnknownPool(*addr))?;
        let Some(pool) = self.pools[id as usize].as_ref() else {
            return Err(EventError::UnknownPool(*addr));
        };
        let updated = pool.with_reserves(reserve0, reserve1);
        let [slot0, slot1] = updated.token_slots();
        self.pools[id as usize] = Some(updated);
        self.refresh_endpoints(slot0.token, slot1.token);
        self.version += 1;
        Ok(())
    }

    /// Replace a pool's fee and recompute both directional edges. The edge
    /// weight formula includes the fee (spot price is after-fee), so fee
    /// events always change weights.
    pub(crate) fn update_pool_fee(&mut self, addr: &Address, fee: f64) -> Result<(), EventError> {
        let id = self.pool_to_id.get(addr).copied().ok_or(EventError::UnknownPool(*addr))?;
        let Some(pool) = self.pools[id as usize].as_ref() else {
            return Err(EventError::UnknownPool(*addr));
        };
        let updated = pool.with_fee(fee);
        let [slot0, slot1] = updated.token_slots();
        self.pools[id as usize] = Some(updated);
        self.refresh_endpoints(slot0.token, slot1.token);
        self.version += 1;
        Ok(())
    }

    fn refresh_endpoints(&mut self, token0: Address, token1: Address) {
        for addr in [token0, token1] {
            if let Some(&id) = self.token_to_id.get(&addr) {
                self.rebuild_row(id);
            }
        }
    }
}

impl std::fmt::Debug for TokenGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGraph")
            .field("tokens", &self.tokens.len())
            .field("pools", &self.pools.iter().filter(|p| p.is_some()).count())
            .field("edges", &self.edge_count())
            .field("searchable_edges", &self.searchable_edge_count())
            .field("version", &self.version)
            .finish()
    }
}
