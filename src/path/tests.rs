// src/path/tests.rs

use std::sync::Arc;

use ethers::types::{Address, U256};

use super::graph::TokenGraph;
use super::heuristic::reverse_dijkstra;
use super::search::{find_top_k_routes, SearchParams};
use crate::config::RouterSettings;
use crate::pool::{ConstantProductPool, PoolOracle, PoolTokenSlot};
use crate::types::Token;

fn sample_address(val: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[19] = val;
    Address::from(bytes)
}

fn token(val: u8, symbol: &str, decimals: u8) -> Token {
    Token::new(sample_address(val), symbol, decimals)
}

fn cpmm(
    pool: u8,
    token_a: u8,
    reserve_a: u64,
    token_b: u8,
    reserve_b: u64,
    fee: f64,
) -> Arc<dyn PoolOracle> {
    Arc::new(ConstantProductPool::new(
        sample_address(pool),
        PoolTokenSlot { token: sample_address(token_a), reserve_raw: U256::from(reserve_a), decimals: 8 },
        PoolTokenSlot { token: sample_address(token_b), reserve_raw: U256::from(reserve_b), decimals: 8 },
        fee,
    ))
}

fn settings() -> Arc<RouterSettings> {
    Arc::new(RouterSettings::default())
}

fn build_graph(tokens: Vec<Token>, pools: Vec<Arc<dyn PoolOracle>>) -> TokenGraph {
    TokenGraph::build(tokens, pools, settings()).expect("graph build")
}

fn default_params(source: u32, target: u32) -> SearchParams {
    SearchParams {
        source,
        target,
        max_hops: 3,
        top_k: 8,
        beam_width: 32,
        gas_per_hop_penalty: 0.0,
    }
}

#[test]
fn test_graph_emits_both_directions() {
    let graph = build_graph(
        vec![token(1, "AAA", 8), token(2, "BBB", 8)],
        vec![cpmm(10, 1, 5_000_000_000, 2, 25_000_000_000, 0.003)],
    );
    assert_eq!(graph.token_count(), 2);
    assert_eq!(graph.edge_count(), 2);
    assert_eq!(graph.searchable_edge_count(), 2);

    let forward = &graph.edges_from(0)[0];
    assert_eq!(forward.to, 1);
    assert!((forward.spot_price - 5.0 * 0.997).abs() < 1e-9);
    assert!((forward.log_spot_price - (5.0_f64 * 0.997 + 1e-9).ln()).abs() < 1e-9);
    let expected_liquidity = (5e9f64 * 25e9f64).sqrt();
    assert!((forward.liquidity_score - expected_liquidity).abs() / expected_liquidity < 1e-9);

    let backward = &graph.edges_from(1)[0];
    assert_eq!(backward.to, 0);
    assert!((backward.spot_price - 0.2 * 0.997).abs() < 1e-9);
}

#[test]
fn test_graph_excludes_empty_pools() {
    let graph = build_graph(
        vec![token(1, "AAA", 8), token(2, "BBB", 8)],
        vec![cpmm(10, 1, 0, 2, 25_000_000_000, 0.003)],
    );
    // Topology keeps the pool; the searchable view drops both directions.
    assert_eq!(graph.searchable_edge_count(), 0);
    assert!(graph.edges_from(0).is_empty());
}

#[test]
fn test_graph_rejects_duplicate_token() {
    let result = TokenGraph::build(
        vec![token(1, "AAA", 8), token(1, "DUP", 8)],
        vec![],
        settings(),
    );
    assert!(result.is_err());
}

#[test]
fn test_parallel_edge_compression_keeps_at_most_two() {
    // Three A<->B pools. The second sits inside the 50 bps window of the
    // best, the third far outside it.
    let graph = build_graph(
        vec![token(1, "AAA", 8), token(2, "BBB", 8)],
        vec![
            cpmm(10, 1, 10_000_000_000, 2, 20_000_000_000, 0.003),
            cpmm(11, 1, 9_000_000_000, 2, 17_994_600_000, 0.003), // ~30 bps off
            cpmm(12, 1, 8_000_000_000, 2, 12_000_000_000, 0.003), // ~25% off
        ],
    );
    let edges = graph.edges_from(0);
    assert_eq!(edges.len(), 2);
    // Sorted by score descending: the deepest pool first.
    assert!(edges[0].liquidity_score > edges[1].liquidity_score);
    let spread = (edges[1].spot_price - edges[0].spot_price).abs() / edges[0].spot_price;
    assert!(spread <= 0.005, "kept runner-up outside the window: {}", spread);
}

#[test]
fn test_edge_dx_cap_matches_closed_form() {
    let graph = build_graph(
        vec![token(1, "AAA", 8), token(2, "BBB", 8)],
        vec![cpmm(10, 1, 5_000_000_000, 2, 25_000_000_000, 0.003)],
    );
    let edge = &graph.edges_from(0)[0];
    let expected = 19.0 * 5e9 / 0.997;
    let got = edge.dx_cap_raw.as_u128() as f64;
    assert!((got - expected).abs() / expected < 1e-6);
}

#[test]
fn test_reverse_dijkstra_line_graph() {
    // A -> B -> C line; target C.
    let graph = build_graph(
        vec![token(1, "AAA", 8), token(2, "BBB", 8), token(3, "CCC", 8)],
        vec![
            cpmm(10, 1, 10_000_000_000, 2, 10_000_000_000, 0.003),
            cpmm(11, 2, 10_000_000_000, 3, 10_000_000_000, 0.003),
        ],
    );
    let penalty = 0.01;
    let table = reverse_dijkstra(&graph, 2, penalty, &RouterSettings::default());

    assert_eq!(table.estimate(2), 0.0);
    let hop_cost = (-(0.997f64 + 1e-9).ln() + penalty).max(0.0);
    assert!((table.estimate(1) - hop_cost).abs() < 1e-9);
    assert!((table.estimate(0) - 2.0 * hop_cost).abs() < 1e-9);
    assert!(!table.budget_exceeded);
}

#[test]
fn test_reverse_dijkstra_unreachable_is_zero() {
    // D is disconnected; its estimate falls back to the admissible zero.
    let graph = build_graph(
        vec![token(1, "AAA", 8), token(2, "BBB", 8), token(4, "DDD", 8)],
        vec![cpmm(10, 1, 10_000_000_000, 2, 10_000_000_000, 0.003)],
    );
    let table = reverse_dijkstra(&graph, 1, 0.0, &RouterSettings::default());
    assert!(table.reached(0));
    assert!(!table.reached(2));
    assert_eq!(table.estimate(2), 0.0);
}

#[test]
fn test_search_finds_direct_and_two_hop() {
    // A -> U direct plus A -> W -> U.
    let graph = build_graph(
        vec![token(1, "AAA", 8), token(2, "USDC", 6), token(3, "WWW", 8)],
        vec![
            cpmm(10, 1, 10_000_000_000, 2, 10_000_000_000, 0.003),
            cpmm(11, 1, 10_000_000_000, 3, 10_000_000_000, 0.003),
            cpmm(12, 3, 10_000_000_000, 2, 10_000_000_000, 0.003),
        ],
    );
    let target = graph.token_id(&sample_address(2)).unwrap();
    let source = graph.token_id(&sample_address(1)).unwrap();
    let table = reverse_dijkstra(&graph, target, 0.0, &RouterSettings::default());
    let outcome = find_top_k_routes(
        &graph,
        &table,
        default_params(source, target),
        &RouterSettings::default(),
        None,
    );

    assert_eq!(outcome.paths.len(), 2);
    // Fewer fee hits score better.
    assert_eq!(outcome.paths[0].hop_count(), 1);
    assert_eq!(outcome.paths[1].hop_count(), 2);
    assert!(outcome.paths[0].score > outcome.paths[1].score);
    for path in &outcome.paths {
        assert_eq!(path.source(), source);
        assert_eq!(path.target(), target);
        for window in path.hops.windows(2) {
            assert_eq!(window[0].to, window[1].from);
        }
    }
}

#[test]
fn test_search_source_equals_target_is_empty() {
    let graph = build_graph(
        vec![token(1, "AAA", 8), token(2, "BBB", 8)],
        vec![cpmm(10, 1, 10_000_000_000, 2, 10_000_000_000, 0.003)],
    );
    let table = reverse_dijkstra(&graph, 0, 0.0, &RouterSettings::default());
    let outcome =
        find_top_k_routes(&graph, &table, default_params(0, 0), &RouterSettings::default(), None);
    assert!(outcome.paths.is_empty());
}

#[test]
fn test_search_pool_sequences_are_unique() {
    // A dense diamond with parallel pools; every returned route must have a
    // distinct ordered pool sequence.
    let graph = build_graph(
        vec![token(1, "AAA", 8), token(2, "BBB", 8), token(3, "CCC", 8), token(4, "DDD", 8)],
        vec![
            cpmm(10, 1, 10_000_000_000, 2, 10_000_000_000, 0.003),
            cpmm(11, 1, 10_000_000_000, 2, 10_010_000_000, 0.003),
            cpmm(12, 1, 10_000_000_000, 3, 10_000_000_000, 0.003),
            cpmm(13, 3, 10_000_000_000, 2, 10_000_000_000, 0.003),
            cpmm(14, 1, 10_000_000_000, 4, 10_000_000_000, 0.003),
            cpmm(15, 4, 10_000_000_000, 2, 10_000_000_000, 0.003),
        ],
    );
    let target = 1u32;
    let table = reverse_dijkstra(&graph, target, 0.0, &RouterSettings::default());
    let outcome =
        find_top_k_routes(&graph, &table, default_params(0, target), &RouterSettings::default(), None);

    assert!(outcome.paths.len() >= 3);
    let mut seen = std::collections::HashSet::new();
    for path in &outcome.paths {
        let key: Vec<u32> = path.hops.iter().map(|h| h.pool).collect();
        assert!(seen.insert(key), "duplicate pool sequence returned");
        // No token revisited along a path.
        let mut tokens: Vec<u32> = path.hops.iter().map(|h| h.from).collect();
        tokens.push(path.target());
        let unique: std::collections::HashSet<_> = tokens.iter().collect();
        assert_eq!(unique.len(), tokens.len());
    }
}

#[test]
fn test_search_respects_max_hops() {
    // Only a 3-hop route exists but max_hops is 2.
    let graph = build_graph(
        vec![token(1, "AAA", 8), token(2, "BBB", 8), token(3, "CCC", 8), token(4, "DDD", 8)],
        vec![
            cpmm(10, 1, 10_000_000_000, 2, 10_000_000_000, 0.003),
            cpmm(11, 2, 10_000_000_000, 3, 10_000_000_000, 0.003),
            cpmm(12, 3, 10_000_000_000, 4, 10_000_000_000, 0.003),
        ],
    );
    let table = reverse_dijkstra(&graph, 3, 0.0, &RouterSettings::default());
    let mut params = default_params(0, 3);
    params.max_hops = 2;
    let outcome = find_top_k_routes(&graph, &table, params, &RouterSettings::default(), None);
    assert!(outcome.paths.is_empty());

    params.max_hops = 3;
    let outcome = find_top_k_routes(&graph, &table, params, &RouterSettings::default(), None);
    assert_eq!(outcome.paths.len(), 1);
    assert_eq!(outcome.paths[0].hop_count(), 3);
}

#[test]
fn test_search_heuristic_admissibility_witness() {
    // For every token on a returned path, the recorded prefix score plus the
    // clamped heuristic at that token must bound the terminal score from
    // above: each remaining hop loses at least what its clamped weight says.
    let graph = build_graph(
        vec![token(1, "AAA", 8), token(2, "BBB", 8), token(3, "CCC", 8)],
        vec![
            cpmm(10, 1, 10_000_000_000, 2, 9_900_000_000, 0.003),
            cpmm(11, 2, 10_000_000_000, 3, 9_800_000_000, 0.003),
            cpmm(12, 1, 10_000_000_000, 3, 9_500_000_000, 0.003),
        ],
    );
    let penalty = 0.001;
    let table = reverse_dijkstra(&graph, 2, penalty, &RouterSettings::default());
    let mut params = default_params(0, 2);
    params.gas_per_hop_penalty = penalty;
    let outcome = find_top_k_routes(&graph, &table, params, &RouterSettings::default(), None);
    assert!(outcome.paths.len() >= 2);

    for path in &outcome.paths {
        let terminal = path.score;
        let mut g = 0.0;
        for hop in &path.hops {
            // State at hop.from, before taking this hop.
            assert!(g + table.estimate(hop.from) >= terminal - 1e-9);
            g += hop.log_spot_price - penalty;
        }
    }
}

#[test]
fn test_search_determinism() {
    let tokens = vec![token(1, "AAA", 8), token(2, "BBB", 8), token(3, "CCC", 8), token(4, "DDD", 8)];
    let pools = || {
        vec![
            cpmm(10, 1, 10_000_000_000, 2, 10_000_000_000, 0.003),
            cpmm(11, 1, 10_000_000_000, 3, 11_000_000_000, 0.003),
            cpmm(12, 3, 10_000_000_000, 2, 9_000_000_000, 0.003),
            cpmm(13, 1, 10_000_000_000, 4, 10_500_000_000, 0.003),
            cpmm(14, 4, 10_000_000_000, 2, 9_500_000_000, 0.003),
        ]
    };
    let graph_a = build_graph(tokens.clone(), pools());
    let graph_b = build_graph(tokens, pools());
    let table_a = reverse_dijkstra(&graph_a, 1, 0.0, &RouterSettings::default());
    let table_b = reverse_dijkstra(&graph_b, 1, 0.0, &RouterSettings::default());

    let a = find_top_k_routes(&graph_a, &table_a, default_params(0, 1), &RouterSettings::default(), None);
    let b = find_top_k_routes(&graph_b, &table_b, default_params(0, 1), &RouterSettings::default(), None);

    assert_eq!(a.paths.len(), b.paths.len());
    for (pa, pb) in a.paths.iter().zip(b.paths.iter()) {
        assert_eq!(pa.score.to_bits(), pb.score.to_bits());
        let ka: Vec<u32> = pa.hops.iter().map(|h| h.pool).collect();
        let kb: Vec<u32> = pb.hops.iter().map(|h| h.pool).collect();
        assert_eq!(ka, kb);
    }
}
