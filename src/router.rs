//! The smart order router facade.
//!
//! Owns the shared graph, the heuristic cache, and the metrics, and
//! orchestrates a quote end to end: resolve and validate the request, run
//! the top-K search under a read lock, evaluate the best single path, and
//! when splitting is enabled build response curves and run both splitters,
//! presenting whichever nets more.

use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::Instant;

use ethers::types::U256;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::RouterSettings;
use crate::errors::{QuoteError, SorError};
use crate::events::GraphUpdateDispatcher;
use crate::path::{
    find_top_k_routes, select_best, simulate_route, HeuristicCache, Path, RouterMetrics,
    SearchOutcome, SearchParams, TokenGraph,
};
use crate::pool::{PoolOracle, PoolStore};
use crate::split::{
    build_response_curves, filter_curves_by_initial_rate, hillclimb_split, waterfill_split,
    ResponseCurve, SplitResult,
};
use crate::types::{
    denormalize_units, f64_to_u256, is_recognized_stablecoin, normalize_units, u256_to_f64,
    BestSingle, NoRouteReason, QuoteDiagnostics, QuoteRequest, QuoteResponse, QuotedPath, RouteHop,
    SplitAlgorithm, SplitAllocation, SplitOutcome, Token,
};

/// Shared router core. Clone-cheap handles to one graph instance serve many
/// concurrent quote requests; a single dispatcher writes.
pub struct SmartOrderRouter {
    settings: Arc<RouterSettings>,
    graph: Arc<RwLock<TokenGraph>>,
    heuristic: Arc<HeuristicCache>,
    metrics: Arc<RouterMetrics>,
}

impl SmartOrderRouter {
    /// Build a router from explicit token and pool sets.
    pub fn from_parts(
        tokens: Vec<Token>,
        pools: Vec<Arc<dyn PoolOracle>>,
        settings: RouterSettings,
    ) -> Result<Self, SorError> {
        settings.validate()?;
        let settings = Arc::new(settings);
        let graph = TokenGraph::build(tokens, pools, settings.clone())?;
        let heuristic = Arc::new(HeuristicCache::new(&settings));
        Ok(Self {
            settings,
            graph: Arc::new(RwLock::new(graph)),
            heuristic,
            metrics: Arc::new(RouterMetrics::default()),
        })
    }

    /// Build a router from an external pool store.
    pub async fn from_store(
        store: &dyn PoolStore,
        settings: RouterSettings,
    ) -> Result<Self, SorError> {
        let tokens = store.load_tokens().await?;
        let pools = store.load_pools().await?;
        let router = Self::from_parts(tokens, pools, settings)?;
        info!(target: "sor::router", "Router loaded from store: {:?}", *router.graph.read().await);
        Ok(router)
    }

    /// The dispatcher that applies pool mutation events to this router's
    /// graph. One writer; quote handlers keep reading.
    pub fn dispatcher(&self) -> GraphUpdateDispatcher {
        GraphUpdateDispatcher::new(
            self.graph.clone(),
            self.heuristic.clone(),
            self.metrics.clone(),
            self.settings.clone(),
        )
    }

    pub fn metrics(&self) -> Arc<RouterMetrics> {
        self.metrics.clone()
    }

    /// Shared graph handle, exposed for instrumentation and tests.
    pub fn graph(&self) -> Arc<RwLock<TokenGraph>> {
        self.graph.clone()
    }

    /// Serve one quote request.
    pub async fn quote(&self, request: &QuoteRequest) -> Result<QuoteResponse, QuoteError> {
        self.quote_with_cancel(request, None).await
    }

    /// Serve one quote request with an external cancellation signal, polled
    /// at iteration granularity inside the search.
    pub async fn quote_with_cancel(
        &self,
        request: &QuoteRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<QuoteResponse, QuoteError> {
        request.config.validate()?;
        if !request.amount.is_finite() || request.amount <= 0.0 {
            return Err(QuoteError::NonPositiveAmount(request.amount));
        }

        let graph = self.graph.read().await;
        let source_id =
            graph.token_id(&request.source).ok_or(QuoteError::UnknownSource(request.source))?;
        let target_id =
            graph.token_id(&request.target).ok_or(QuoteError::UnknownTarget(request.target))?;

        let mut diagnostics = QuoteDiagnostics::default();
        self.metrics.quotes_served.fetch_add(1, AtomicOrdering::Relaxed);

        if source_id == target_id {
            diagnostics.reason = Some(NoRouteReason::SourceEqualsTarget);
            return Ok(QuoteResponse { paths: Vec::new(), best_single: None, split: None, diagnostics });
        }

        let source_token = graph.token(source_id).clone();
        let target_token = graph.token(target_id).clone();

        // No silent $1 default: a non-stablecoin target needs an explicit
        // USD price for the gas conversion.
        let target_usd_price = match request.config.target_usd_price {
            Some(px) => px,
            None if is_recognized_stablecoin(&target_token.symbol) => 1.0,
            None => return Err(QuoteError::MissingTargetUsdPrice(request.target)),
        };

        let amount_raw = denormalize_units(request.amount, source_token.decimals);
        if amount_raw.is_zero() {
            return Err(QuoteError::NonPositiveAmount(request.amount));
        }

        // Heuristic (cached on graph shape).
        let started = Instant::now();
        let heuristic = self.heuristic.get_or_compute(
            &graph,
            request.target,
            target_id,
            request.config.gas_per_hop_penalty,
            &self.settings,
            &self.metrics,
        );
        diagnostics.heuristic_ms = started.elapsed().as_millis() as u64;
        diagnostics.heuristic_budget_exceeded = heuristic.budget_exceeded;

        // Top-K search.
        let params = SearchParams {
            source: source_id,
            target: target_id,
            max_hops: request.config.max_hops,
            top_k: request.config.top_k,
            beam_width: request.config.beam_width,
            gas_per_hop_penalty: request.config.gas_per_hop_penalty,
        };
        let outcome: SearchOutcome =
            find_top_k_routes(&graph, &heuristic, params, &self.settings, cancel);
        diagnostics.search_ms = outcome.elapsed.as_millis() as u64;
        diagnostics.nodes_explored = outcome.nodes_explored;
        diagnostics.states_pruned = outcome.states_pruned;
        let denom = outcome.nodes_explored + outcome.states_pruned;
        diagnostics.pruning_ratio =
            if denom > 0 { outcome.states_pruned as f64 / denom as f64 } else { 0.0 };
        diagnostics.search_budget_exceeded = outcome.budget_exceeded;
        self.metrics.search_time_ms.fetch_add(diagnostics.search_ms, AtomicOrdering::Relaxed);
        self.metrics.paths_found.fetch_add(outcome.paths.len() as u64, AtomicOrdering::Relaxed);

        if outcome.paths.is_empty() {
            diagnostics.reason = Some(NoRouteReason::NoRouteFound);
            return Ok(QuoteResponse { paths: Vec::new(), best_single: None, split: None, diagnostics });
        }

        // Gas per hop in target smallest units.
        let gas_per_hop_out_raw =
            denormalize_units(request.config.gas_per_hop_usd / target_usd_price, target_token.decimals);

        // Best single path.
        let started = Instant::now();
        let best = select_best(&graph, &outcome.paths, amount_raw, gas_per_hop_out_raw);
        diagnostics.eval_ms = started.elapsed().as_millis() as u64;
        let best_single = best.map(|b| BestSingle {
            path_index: b.index,
            output_raw: b.output_raw,
            output_human: normalize_units(b.output_raw, target_token.decimals),
            gas_cost_raw: b.gas_cost_raw,
            net_output_raw: b.net_output_raw,
            net_output_human: normalize_units(b.net_output_raw, target_token.decimals),
        });

        // Split allocation across paths.
        let split = if request.config.enable_splitting {
            let started = Instant::now();
            let split = self.run_splitters(
                &graph,
                &outcome.paths,
                amount_raw,
                gas_per_hop_out_raw,
                request,
                &source_token,
                &target_token,
                &mut diagnostics,
            );
            diagnostics.split_ms = started.elapsed().as_millis() as u64;
            split
        } else {
            None
        };

        let paths = outcome
            .paths
            .iter()
            .map(|p| QuotedPath {
                hops: p
                    .hops
                    .iter()
                    .map(|h| RouteHop {
                        pool: graph.pool_address(h.pool),
                        from: graph.token(h.from).address,
                        to: graph.token(h.to).address,
                    })
                    .collect(),
                score: p.score,
                cap_raw: p.cap_raw,
            })
            .collect();

        Ok(QuoteResponse { paths, best_single, split, diagnostics })
    }

    /// Build curves, run both splitters, and convert the better allocation
    /// into the response shape.
    #[allow(clippy::too_many_arguments)]
    fn run_splitters(
        &self,
        graph: &TokenGraph,
        paths: &[Path],
        amount_raw: U256,
        gas_per_hop_out_raw: U256,
        request: &QuoteRequest,
        source_token: &Token,
        target_token: &Token,
        diagnostics: &mut QuoteDiagnostics,
    ) -> Option<SplitOutcome> {
        let curves = build_response_curves(
            graph,
            paths,
            amount_raw,
            gas_per_hop_out_raw,
            request.config.step_count,
        );
        let curves = filter_curves_by_initial_rate(curves, request.config.min_initial_eff_ratio);
        if curves.is_empty() {
            return None;
        }

        let total_f = u256_to_f64(amount_raw);
        let waterfill = waterfill_split(&curves, total_f, &self.settings);
        let hillclimb = hillclimb_split(&curves, total_f, &self.settings);
        self.metrics.splits_computed.fetch_add(1, AtomicOrdering::Relaxed);

        let (result, algorithm) =
            if waterfill.total_output(&curves) >= hillclimb.total_output(&curves) {
                (waterfill, SplitAlgorithm::Waterfill)
            } else {
                (hillclimb, SplitAlgorithm::Hillclimb)
            };
        diagnostics.splitter_budget_exceeded = result.budget_exceeded;
        debug!(
            target: "sor::split",
            "Splitter chose {:?} after {} iterations over {} curves",
            algorithm,
            result.iterations,
            curves.len()
        );

        Some(self.materialize_split(
            graph,
            paths,
            &curves,
            &result,
            algorithm,
            amount_raw,
            gas_per_hop_out_raw,
            request,
            source_token,
            target_token,
        ))
    }

    /// Round the float allocation onto raw units (the largest allocation
    /// absorbs the rounding residue so the sum is exact) and re-run the
    /// evaluator on each share for authoritative outputs.
    #[allow(clippy::too_many_arguments)]
    fn materialize_split(
        &self,
        graph: &TokenGraph,
        paths: &[Path],
        curves: &[ResponseCurve],
        result: &SplitResult,
        algorithm: SplitAlgorithm,
        amount_raw: U256,
        gas_per_hop_out_raw: U256,
        request: &QuoteRequest,
        source_token: &Token,
        target_token: &Token,
    ) -> SplitOutcome {
        let mut inputs: Vec<U256> = result.allocations.iter().map(|x| f64_to_u256(x.round())).collect();
        let allocated: U256 = inputs.iter().fold(U256::zero(), |acc, v| acc.saturating_add(*v));
        if allocated != amount_raw && !allocated.is_zero() {
            if let Some(largest) = (0..inputs.len()).max_by_key(|&i| inputs[i]) {
                if allocated < amount_raw {
                    inputs[largest] = inputs[largest].saturating_add(amount_raw - allocated);
                } else {
                    inputs[largest] = inputs[largest].saturating_sub(allocated - amount_raw);
                }
            }
        }

        let mut allocations = Vec::new();
        let mut total_output_raw = U256::zero();
        for (slot, curve) in curves.iter().enumerate() {
            let input_raw = inputs[slot];
            if input_raw.is_zero() {
                continue;
            }
            let path = &paths[curve.path_index];
            let gas_total = gas_per_hop_out_raw.saturating_mul(U256::from(curve.hops));
            let output_raw = simulate_route(graph, path, input_raw).saturating_sub(gas_total);
            total_output_raw = total_output_raw.saturating_add(output_raw);
            allocations.push(SplitAllocation {
                path_index: curve.path_index,
                input_raw,
                input_human: normalize_units(input_raw, source_token.decimals),
                output_raw,
                output_human: normalize_units(output_raw, target_token.decimals),
                initial_marginal: curve.initial_marginal(),
                final_marginal: curve.marginal_at(u256_to_f64(input_raw)),
            });
        }

        SplitOutcome {
            total_input_human: request.amount,
            total_output_human: normalize_units(total_output_raw, target_token.decimals),
            allocations,
            iterations: result.iterations,
            algorithm,
            capacity_shortfall: result.capacity_shortfall,
        }
    }
}

impl std::fmt::Debug for SmartOrderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartOrderRouter")
            .field("settings", &self.settings)
            .field("heuristic", &self.heuristic)
            .finish_non_exhaustive()
    }
}
