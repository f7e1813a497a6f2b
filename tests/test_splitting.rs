//! Split-allocation scenarios: strict improvement over the best single
//! path, cap saturation, allocation balance, and marginal equilibration.

mod common;

use common::{addr, cpmm, router, token};
use ethers::types::U256;
use sor::QuoteRequest;

const A: u8 = 1;
const U: u8 = 2;
const W: u8 = 3;
const X: u8 = 4;

/// Splitting strictly improves: parallel pools with staggered depth beat
/// any single route by a clear margin.
#[tokio::test]
async fn test_splitting_strictly_improves() {
    let router = router(
        vec![token(A, "ALPHA", 8), token(U, "USDC", 6)],
        vec![
            cpmm(10, (A, 5_000_000_000, 8), (U, 5_000_000_000, 6), 0.003),
            cpmm(11, (A, 3_000_000_000, 8), (U, 3_000_000_000, 6), 0.003),
            cpmm(12, (A, 2_000_000_000, 8), (U, 2_000_000_000, 6), 0.003),
        ],
    );

    // 30% of the smallest pool's reserve.
    let request = QuoteRequest::new(addr(A), addr(U), 6.0);
    let response = router.quote(&request).await.expect("quote");

    let best = response.best_single.expect("best single");
    let split = response.split.expect("split block");
    assert!(split.allocations.len() >= 2);
    assert!(
        split.total_output_human >= best.net_output_human * 1.01,
        "split {} does not beat single {} by 1%",
        split.total_output_human,
        best.net_output_human
    );
}

/// Allocation balance: inputs are non-negative and sum exactly to the
/// request amount.
#[tokio::test]
async fn test_allocation_balance() {
    let router = router(
        vec![token(A, "ALPHA", 8), token(U, "USDC", 6)],
        vec![
            cpmm(10, (A, 5_000_000_000, 8), (U, 5_000_000_000, 6), 0.003),
            cpmm(11, (A, 3_000_000_000, 8), (U, 3_010_000_000, 6), 0.003),
        ],
    );

    let request = QuoteRequest::new(addr(A), addr(U), 6.0);
    let response = router.quote(&request).await.expect("quote");
    let split = response.split.expect("split block");

    let total: U256 =
        split.allocations.iter().fold(U256::zero(), |acc, a| acc + a.input_raw);
    assert_eq!(total, U256::from(600_000_000u64));
    assert!(!split.capacity_shortfall);
    assert!(split.allocations.iter().all(|a| a.input_raw > U256::zero()));
}

/// Cap saturation: a thin route whose individual-swap cap binds is pinned
/// at that cap while the remainder equilibrates across deep alternatives.
#[tokio::test]
async fn test_cap_saturation_and_equilibration() {
    let router = router(
        vec![
            token(A, "ALPHA", 8),
            token(U, "USDC", 6),
            token(W, "WMID", 8),
            token(X, "XMID", 8),
        ],
        vec![
            // Thin direct pool: excellent rate, tiny reserves. Its cap is
            // ~2e8 raw against a 1e10 request.
            cpmm(20, (A, 10_500_000, 8), (U, 21_000_000, 6), 0.003),
            // Two identical deep two-hop routes at a far lower composed
            // rate, so the thin pool's marginal still clears the final
            // water level at its cap.
            cpmm(21, (A, 1_000_000_000_000, 8), (W, 65_000_000_000, 8), 0.003),
            cpmm(22, (W, 1_000_000_000_000, 8), (U, 65_000_000_000, 6), 0.003),
            cpmm(23, (A, 1_000_000_000_000, 8), (X, 65_000_000_000, 8), 0.003),
            cpmm(24, (X, 1_000_000_000_000, 8), (U, 65_000_000_000, 6), 0.003),
        ],
    );

    let mut request = QuoteRequest::new(addr(A), addr(U), 100.0);
    request.config.gas_per_hop_usd = 0.0;
    let response = router.quote(&request).await.expect("quote");
    let split = response.split.expect("split block");

    // The thin direct path ranks first on score and carries a small cap.
    let thin_path_cap = response.paths[0].cap_raw;
    assert!(thin_path_cap < U256::from(1_000_000_000u64));
    assert_eq!(response.paths[0].hops.len(), 1);

    let thin =
        split.allocations.iter().find(|a| a.path_index == 0).expect("thin path allocated");
    let cap = thin_path_cap.as_u128() as f64;
    let got = thin.input_raw.as_u128() as f64;
    assert!((got - cap).abs() / cap < 0.02, "thin allocation {} not at cap {}", got, cap);

    // The two deep routes end equilibrated: near-equal inputs and matching
    // final marginals.
    let deep: Vec<_> = split.allocations.iter().filter(|a| a.path_index != 0).collect();
    assert_eq!(deep.len(), 2);
    let in0 = deep[0].input_raw.as_u128() as f64;
    let in1 = deep[1].input_raw.as_u128() as f64;
    assert!((in0 - in1).abs() / in0.max(in1) < 0.05);
    let m0 = deep[0].final_marginal;
    let m1 = deep[1].final_marginal;
    assert!((m0 - m1).abs() <= f64::max(1e-5, m0 * 0.05));

    let total: U256 =
        split.allocations.iter().fold(U256::zero(), |acc, a| acc + a.input_raw);
    assert_eq!(total, U256::from(10_000_000_000u64));
}

/// No-splitting dominance: the presented split never loses to the best
/// single path, across amounts.
#[tokio::test]
async fn test_split_never_loses_to_best_single() {
    let router = router(
        vec![token(A, "ALPHA", 8), token(U, "USDC", 6), token(W, "WMID", 8)],
        vec![
            cpmm(10, (A, 50_000_000_000, 8), (U, 50_000_000_000, 6), 0.003),
            cpmm(11, (A, 8_000_000_000, 8), (W, 8_000_000_000, 8), 0.003),
            cpmm(12, (W, 9_000_000_000, 8), (U, 9_000_000_000, 6), 0.003),
        ],
    );

    for amount in [1.0, 10.0, 60.0, 200.0] {
        let request = QuoteRequest::new(addr(A), addr(U), amount);
        let response = router.quote(&request).await.expect("quote");
        let best = response.best_single.expect("best single");
        let split = response.split.expect("split block");
        assert!(
            split.total_output_human >= best.net_output_human * (1.0 - 1e-6),
            "amount {}: split {} lost to single {}",
            amount,
            split.total_output_human,
            best.net_output_human
        );
    }
}

/// K = 1 degenerates cleanly: one path, the whole amount on it.
#[tokio::test]
async fn test_split_single_path_degenerate() {
    let router = router(
        vec![token(A, "ALPHA", 8), token(U, "USDC", 6)],
        vec![cpmm(10, (A, 50_000_000_000, 8), (U, 50_000_000_000, 6), 0.003)],
    );

    let mut request = QuoteRequest::new(addr(A), addr(U), 10.0);
    request.config.top_k = 1;
    let response = router.quote(&request).await.expect("quote");
    let split = response.split.expect("split block");
    assert_eq!(split.allocations.len(), 1);
    assert_eq!(split.allocations[0].input_raw, U256::from(1_000_000_000u64));
}

/// The quality gate drops paths whose first-sample rate is far below the
/// best one.
#[tokio::test]
async fn test_min_initial_eff_ratio_filters_paths() {
    let router = router(
        vec![token(A, "ALPHA", 8), token(U, "USDC", 6), token(W, "WMID", 8)],
        vec![
            cpmm(10, (A, 50_000_000_000, 8), (U, 50_000_000_000, 6), 0.003),
            // A much worse two-hop detour: ~50% effective rate.
            cpmm(11, (A, 10_000_000_000, 8), (W, 5_000_000_000, 8), 0.003),
            cpmm(12, (W, 10_000_000_000, 8), (U, 10_000_000_000, 6), 0.003),
        ],
    );

    let mut request = QuoteRequest::new(addr(A), addr(U), 10.0);
    request.config.min_initial_eff_ratio = 0.9;
    let response = router.quote(&request).await.expect("quote");
    let split = response.split.expect("split block");
    assert_eq!(split.allocations.len(), 1);
    assert_eq!(split.allocations[0].path_index, 0);
}
