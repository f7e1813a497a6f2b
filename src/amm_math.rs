//! # Constant-Product Swap Math
//!
//! Pure, deterministic arithmetic for constant-product pools. All functions
//! operate only on the reserve snapshot they are handed; there are no state
//! lookups and no side effects.
//!
//! - Intermediate products use `U512` so large reserves never lose precision.
//! - Every operation saturates instead of panicking; an oversized input
//!   produces an output approaching (and never reaching) the output reserve.
//! - Fees are carried in parts-per-million to keep the hot path integral.

use ethers::types::{U256, U512};

/// Parts-per-million denominator for fee arithmetic.
pub const PPM: u32 = 1_000_000;

/// Convert a rational fee in `[0, 1)` to parts-per-million, clamping bad
/// inputs to zero.
pub fn fee_to_ppm(fee: f64) -> u32 {
    if !fee.is_finite() || fee <= 0.0 {
        return 0;
    }
    ((fee * PPM as f64).round() as u32).min(PPM - 1)
}

/// Output amount for a constant-product swap with the given fee.
///
/// Returns zero when either reserve is zero (the edge is absent per the pool
/// contract). Saturates toward `reserve_out` for inputs beyond the pool's
/// liquidity.
pub fn get_amount_out(amount_in: U256, reserve_in: U256, reserve_out: U256, fee_ppm: u32) -> U256 {
    if amount_in.is_zero() || reserve_in.is_zero() || reserve_out.is_zero() {
        return U256::zero();
    }
    let fee_ppm = fee_ppm.min(PPM - 1);
    let keep = U512::from(PPM - fee_ppm);

    // out = in' * reserve_out / (reserve_in * PPM + in') with in' = in * keep
    let saturated = reserve_out.saturating_sub(U256::one());
    let amount_in_with_fee = match U512::from(amount_in).checked_mul(keep) {
        Some(v) => v,
        None => return saturated,
    };
    let numerator = match amount_in_with_fee.checked_mul(U512::from(reserve_out)) {
        Some(n) => n,
        // Astronomically large input: the quote saturates just below the
        // output reserve.
        None => return saturated,
    };
    let denominator = match U512::from(reserve_in)
        .checked_mul(U512::from(PPM))
        .and_then(|d| d.checked_add(amount_in_with_fee))
    {
        Some(d) if !d.is_zero() => d,
        _ => return saturated,
    };
    let out = numerator / denominator;
    U256::try_from(out).unwrap_or(U256::MAX).min(saturated)
}

/// Instantaneous marginal rate of `to` per raw unit of `from`, after fee.
///
/// Zero when either reserve is zero.
pub fn spot_price(reserve_in: U256, reserve_out: U256, fee_ppm: u32) -> f64 {
    if reserve_in.is_zero() || reserve_out.is_zero() {
        return 0.0;
    }
    let rin = crate::types::u256_to_f64(reserve_in);
    let rout = crate::types::u256_to_f64(reserve_out);
    if rin <= 0.0 || rout <= 0.0 {
        return 0.0;
    }
    let keep = (PPM - fee_ppm.min(PPM - 1)) as f64 / PPM as f64;
    let price = (rout / rin) * keep;
    if price.is_finite() && price > 0.0 {
        price
    } else {
        0.0
    }
}

/// Largest input that leaves at least `1 - drain_fraction` of the output
/// reserve in a constant-product pool.
///
/// Solved from the closed form: draining fraction `d` of the output reserve
/// requires `dx = (d / (1 - d)) * reserve_in / (1 - fee)`. Used as a coarse
/// per-edge individual-swap ceiling regardless of pool variant.
pub fn dx_cap_for_drain(reserve_in: U256, fee_ppm: u32, drain_fraction: f64) -> U256 {
    if reserve_in.is_zero() || !(0.0..1.0).contains(&drain_fraction) || drain_fraction == 0.0 {
        return U256::MAX;
    }
    let rin = crate::types::u256_to_f64(reserve_in);
    let keep = (PPM - fee_ppm.min(PPM - 1)) as f64 / PPM as f64;
    let dx = (drain_fraction / (1.0 - drain_fraction)) * rin / keep;
    if !dx.is_finite() {
        return U256::MAX;
    }
    crate::types::f64_to_u256(dx)
}

/// Price impact of the standard shallow-pool probe against `reserve_in`.
///
/// The probe is `min(0.001 * reserve_in, 1e9)` raw units; the impact is the
/// probe's share of the post-probe reserve.
pub fn probe_price_impact(reserve_in: U256) -> f64 {
    let rin = crate::types::u256_to_f64(reserve_in);
    if rin <= 0.0 {
        return 1.0;
    }
    let probe = (0.001 * rin).min(1e9);
    probe / (rin + probe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_out_univ2_vector() {
        // 10 A (8 decimals) into a 50 A / 25_000 U pool at 30 bps.
        let reserve_in = U256::from(5_000_000_000u64);
        let reserve_out = U256::from(25_000_000_000u64);
        let amount_in = U256::from(1_000_000_000u64);
        let out = get_amount_out(amount_in, reserve_in, reserve_out, 3_000);

        // 25e9 * (1e9 * 0.997) / (5e9 + 1e9 * 0.997)
        let expected = 25_000_000_000f64 * 997_000_000.0 / (5_000_000_000f64 + 997_000_000.0);
        let got = out.as_u64() as f64;
        assert!((got - expected).abs() / expected < 1e-6, "got {} expected {}", got, expected);
    }

    #[test]
    fn test_amount_out_zero_reserves() {
        assert_eq!(
            get_amount_out(U256::from(10u64), U256::zero(), U256::from(100u64), 0),
            U256::zero()
        );
        assert_eq!(
            get_amount_out(U256::from(10u64), U256::from(100u64), U256::zero(), 0),
            U256::zero()
        );
    }

    #[test]
    fn test_amount_out_saturates_below_reserve_out() {
        let reserve_in = U256::from(1_000u64);
        let reserve_out = U256::from(1_000u64);
        let out = get_amount_out(U256::MAX, reserve_in, reserve_out, 0);
        assert!(out < reserve_out);
    }

    #[test]
    fn test_amount_out_monotone_and_concave() {
        let rin = U256::from(5_000_000_000u64);
        let rout = U256::from(25_000_000_000u64);
        let mut prev_out = U256::zero();
        let mut prev_marginal = f64::INFINITY;
        for step in 1..=20u64 {
            let amount = U256::from(step * 100_000_000);
            let out = get_amount_out(amount, rin, rout, 3_000);
            assert!(out >= prev_out);
            let marginal = (out - prev_out).as_u64() as f64 / 100_000_000.0;
            assert!(marginal <= prev_marginal + 1e-9);
            prev_out = out;
            prev_marginal = marginal;
        }
    }

    #[test]
    fn test_spot_price_after_fee() {
        let px = spot_price(U256::from(5_000_000_000u64), U256::from(25_000_000_000u64), 3_000);
        assert!((px - 5.0 * 0.997).abs() < 1e-9);
        assert_eq!(spot_price(U256::zero(), U256::from(1u64), 0), 0.0);
    }

    #[test]
    fn test_dx_cap_drains_expected_fraction() {
        let rin = U256::from(10_000_000_000u64);
        let rout = U256::from(10_000_000_000u64);
        let cap = dx_cap_for_drain(rin, 3_000, 0.95);
        let out = get_amount_out(cap, rin, rout, 3_000);
        let drained = out.as_u64() as f64 / 10_000_000_000f64;
        assert!((drained - 0.95).abs() < 1e-3, "drained {}", drained);
    }

    #[test]
    fn test_probe_impact_is_small_for_normal_pools() {
        assert!(probe_price_impact(U256::from(5_000_000_000u64)) < 0.05);
        assert!(probe_price_impact(U256::from(1_000u64)) < 0.05);
        assert_eq!(probe_price_impact(U256::zero()), 1.0);
    }

    #[test]
    fn test_fee_to_ppm_clamps() {
        assert_eq!(fee_to_ppm(0.003), 3_000);
        assert_eq!(fee_to_ppm(-0.1), 0);
        assert_eq!(fee_to_ppm(2.0), PPM - 1);
    }
}
