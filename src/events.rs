//! Graph update dispatcher.
//!
//! Consumes batches of pool mutation events and applies selective weight or
//! topology updates to the shared graph. Each write holds the graph's
//! exclusive lock, so a concurrent search observes the full effect of one
//! event or none of it. Events inside a batch are applied in order; batches
//! arrive in commit order.
//!
//! Balanced liquidity operations do not move the spot price and are skipped;
//! swap events are coalesced per pool over a short window so one weight
//! recomputation covers a burst. Under nominal traffic fewer than ~15% of
//! received events should reach the graph.

use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;

use dashmap::DashMap;
use ethers::types::{Address, U256};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RouterSettings;
use crate::errors::EventError;
use crate::path::{HeuristicCache, RouterMetrics, TokenGraph};
use crate::pool::PoolOracle;
use crate::types::u256_to_f64;

/// Pool mutation event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEventKind {
    PoolCreated,
    PoolDisabled,
    LiquidityAdded,
    LiquidityRemoved,
    Swapped,
    FeeUpdated,
}

/// One pool mutation event as delivered by the ingestion collaborator.
#[derive(Debug, Clone)]
pub struct PoolEvent {
    pub kind: PoolEventKind,
    pub pool_addr: Address,
    pub old_reserves: Option<(U256, U256)>,
    pub new_reserves: Option<(U256, U256)>,
    pub fee: Option<f64>,
    /// Oracle payload for `PoolCreated`.
    pub pool: Option<Arc<dyn PoolOracle>>,
}

impl PoolEvent {
    pub fn created(pool: Arc<dyn PoolOracle>) -> Self {
        Self {
            kind: PoolEventKind::PoolCreated,
            pool_addr: pool.address(),
            old_reserves: None,
            new_reserves: None,
            fee: None,
            pool: Some(pool),
        }
    }

    pub fn disabled(pool_addr: Address) -> Self {
        Self { kind: PoolEventKind::PoolDisabled, pool_addr, old_reserves: None, new_reserves: None, fee: None, pool: None }
    }

    pub fn liquidity(kind: PoolEventKind, pool_addr: Address, old: (U256, U256), new: (U256, U256)) -> Self {
        debug_assert!(matches!(kind, PoolEventKind::LiquidityAdded | PoolEventKind::LiquidityRemoved));
        Self { kind, pool_addr, old_reserves: Some(old), new_reserves: Some(new), fee: None, pool: None }
    }

    pub fn swapped(pool_addr: Address, old: (U256, U256), new: (U256, U256)) -> Self {
        Self {
            kind: PoolEventKind::Swapped,
            pool_addr,
            old_reserves: Some(old),
            new_reserves: Some(new),
            fee: None,
            pool: None,
        }
    }

    pub fn fee_updated(pool_addr: Address, fee: f64) -> Self {
        Self { kind: PoolEventKind::FeeUpdated, pool_addr, old_reserves: None, new_reserves: None, fee: Some(fee), pool: None }
    }
}

/// Applies event batches to the shared graph and keeps the heuristic cache
/// honest across topology changes.
pub struct GraphUpdateDispatcher {
    graph: Arc<RwLock<TokenGraph>>,
    heuristic: Arc<HeuristicCache>,
    metrics: Arc<RouterMetrics>,
    settings: Arc<RouterSettings>,
    pending_swaps: DashMap<Address, PoolEvent>,
}

impl GraphUpdateDispatcher {
    pub(crate) fn new(
        graph: Arc<RwLock<TokenGraph>>,
        heuristic: Arc<HeuristicCache>,
        metrics: Arc<RouterMetrics>,
        settings: Arc<RouterSettings>,
    ) -> Self {
        Self { graph, heuristic, metrics, settings, pending_swaps: DashMap::new() }
    }

    /// Apply one batch of events in order. Swap events are only coalesced
    /// here; call [`flush_swaps`](Self::flush_swaps) (or let [`run`](Self::run)
    /// do it on its window) to push them into the graph.
    pub async fn apply_batch(&self, events: Vec<PoolEvent>) {
        for event in events {
            match event.kind {
                PoolEventKind::Swapped => self.coalesce_swap(event),
                _ => self.apply_event(&event).await,
            }
        }
        if self.settings.swap_batch_window_ms == 0 {
            self.flush_swaps().await;
        }
    }

    /// Latest-wins coalescing: a burst of swaps on one pool costs a single
    /// weight recomputation at the next flush.
    fn coalesce_swap(&self, event: PoolEvent) {
        if self.pending_swaps.insert(event.pool_addr, event).is_some() {
            self.metrics.graph_updates_skipped.fetch_add(1, AtomicOrdering::Relaxed);
        }
    }

    /// Apply every pending coalesced swap event.
    pub async fn flush_swaps(&self) {
        let keys: Vec<Address> = self.pending_swaps.iter().map(|entry| *entry.key()).collect();
        for key in keys {
            if let Some((_, event)) = self.pending_swaps.remove(&key) {
                self.apply_event(&event).await;
            }
        }
    }

    async fn apply_event(&self, event: &PoolEvent) {
        match event.kind {
            PoolEventKind::PoolCreated => {
                let Some(pool) = event.pool.clone() else {
                    warn!(target: "sor::events", "PoolCreated for {:?} without an oracle payload", event.pool_addr);
                    self.metrics.graph_updates_skipped.fetch_add(1, AtomicOrdering::Relaxed);
                    return;
                };
                let mut graph = self.graph.write().await;
                if graph.add_pool(pool) {
                    drop(graph);
                    // Topology changed: the cache key shape moved.
                    self.heuristic.invalidate_all();
                    self.metrics.graph_updates_applied.fetch_add(1, AtomicOrdering::Relaxed);
                } else {
                    self.metrics.graph_updates_skipped.fetch_add(1, AtomicOrdering::Relaxed);
                }
            }
            PoolEventKind::PoolDisabled => {
                let mut graph = self.graph.write().await;
                match graph.remove_pool(&event.pool_addr) {
                    Ok(()) => {
                        drop(graph);
                        self.heuristic.invalidate_all();
                        self.metrics.graph_updates_applied.fetch_add(1, AtomicOrdering::Relaxed);
                    }
                    Err(e) => {
                        warn!(target: "sor::events", "PoolDisabled {:?} rejected: {}", event.pool_addr, e);
                        self.metrics.graph_updates_skipped.fetch_add(1, AtomicOrdering::Relaxed);
                    }
                }
            }
            PoolEventKind::LiquidityAdded | PoolEventKind::LiquidityRemoved => {
                if self.is_balanced(event).await {
                    debug!(target: "sor::events", "Balanced liquidity event on {:?} skipped", event.pool_addr);
                    self.metrics.graph_updates_skipped.fetch_add(1, AtomicOrdering::Relaxed);
                    return;
                }
                self.apply_reserve_update(event).await;
            }
            PoolEventKind::Swapped => {
                self.apply_reserve_update(event).await;
            }
            PoolEventKind::FeeUpdated => {
                let Some(fee) = event.fee else {
                    warn!(target: "sor::events", "FeeUpdated for {:?} without a fee", event.pool_addr);
                    self.metrics.graph_updates_skipped.fetch_add(1, AtomicOrdering::Relaxed);
                    return;
                };
                if !fee.is_finite() || !(0.0..1.0).contains(&fee) {
                    warn!(target: "sor::events", "FeeUpdated for {:?} with out-of-range fee {}", event.pool_addr, fee);
                    self.metrics.graph_updates_skipped.fetch_add(1, AtomicOrdering::Relaxed);
                    return;
                }
                let mut graph = self.graph.write().await;
                match graph.update_pool_fee(&event.pool_addr, fee) {
                    Ok(()) => self.metrics.graph_updates_applied.fetch_add(1, AtomicOrdering::Relaxed),
                    Err(e) => {
                        warn!(target: "sor::events", "FeeUpdated {:?} rejected: {}", event.pool_addr, e);
                        self.metrics.graph_updates_skipped.fetch_add(1, AtomicOrdering::Relaxed)
                    }
                };
            }
        }
    }

    /// Whether a liquidity event leaves the reserve ratio unchanged within
    /// epsilon. Balanced deposits and withdrawals do not perturb the spot
    /// price and must not trigger weight recomputation.
    async fn is_balanced(&self, event: &PoolEvent) -> bool {
        let Some((new0, new1)) = event.new_reserves else { return false };
        let old = match event.old_reserves {
            Some(old) => Some(old),
            None => {
                let graph = self.graph.read().await;
                graph
                    .pool_id(&event.pool_addr)
                    .and_then(|id| graph.pool(id).cloned())
                    .map(|p| {
                        let [s0, s1] = p.token_slots();
                        (s0.reserve_raw, s1.reserve_raw)
                    })
            }
        };
        let Some((old0, old1)) = old else { return false };
        let (old0, old1) = (u256_to_f64(old0), u256_to_f64(old1));
        let (new0, new1) = (u256_to_f64(new0), u256_to_f64(new1));
        if old0 <= 0.0 || old1 <= 0.0 || new0 <= 0.0 || new1 <= 0.0 {
            return false;
        }
        let old_ratio = old0 / old1;
        let new_ratio = new0 / new1;
        ((new_ratio - old_ratio) / old_ratio).abs() <= self.settings.balanced_ratio_epsilon
    }

    async fn apply_reserve_update(&self, event: &PoolEvent) {
        let Some((new0, new1)) = event.new_reserves else {
            warn!(target: "sor::events", "{}", EventError::MissingReserves(event.pool_addr));
            self.metrics.graph_updates_skipped.fetch_add(1, AtomicOrdering::Relaxed);
            return;
        };
        // A transition into empty reserves would produce non-finite weights;
        // skip it and leave a trace for the operator.
        if new0.is_zero() || new1.is_zero() {
            let inconsistent = EventError::InconsistentReserves {
                pool: event.pool_addr,
                detail: format!("new reserves {} / {}", new0, new1),
            };
            warn!(target: "sor::events", "{}", inconsistent);
            self.metrics.graph_updates_skipped.fetch_add(1, AtomicOrdering::Relaxed);
            return;
        }
        let mut graph = self.graph.write().await;
        match graph.update_pool_reserves(&event.pool_addr, new0, new1) {
            Ok(()) => {
                self.metrics.graph_updates_applied.fetch_add(1, AtomicOrdering::Relaxed);
            }
            Err(e) => {
                warn!(target: "sor::events", "Reserve update for {:?} rejected: {}", event.pool_addr, e);
                self.metrics.graph_updates_skipped.fetch_add(1, AtomicOrdering::Relaxed);
            }
        }
    }

    /// Drive the dispatcher from a batch channel until cancellation: apply
    /// incoming batches as they arrive and flush coalesced swaps on the
    /// configured window.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Vec<PoolEvent>>, cancel: CancellationToken) {
        let window = std::time::Duration::from_millis(self.settings.swap_batch_window_ms.max(1));
        let mut flush_tick = tokio::time::interval(window);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.flush_swaps().await;
                    return;
                }
                batch = rx.recv() => {
                    match batch {
                        Some(events) => self.apply_batch(events).await,
                        None => {
                            self.flush_swaps().await;
                            return;
                        }
                    }
                }
                _ = flush_tick.tick() => {
                    self.flush_swaps().await;
                }
            }
        }
    }
}

impl std::fmt::Debug for GraphUpdateDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphUpdateDispatcher")
            .field("applied", &self.metrics.graph_updates_applied)
            .field("skipped", &self.metrics.graph_updates_skipped)
            .finish_non_exhaustive()
    }
}
