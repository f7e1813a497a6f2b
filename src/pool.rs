//! Pool oracle abstraction.
//!
//! A pool is polymorphic over the capability set `{spot_price, swap,
//! token_slots}` and must be deterministic and pure with respect to its
//! current reserve snapshot; the core never mutates a pool through this
//! interface. Reserve updates from the event dispatcher produce a fresh
//! snapshot via [`PoolOracle::with_reserves`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::amm_math;
use crate::errors::GraphError;
use crate::types::Token;

/// Pool curve families the router understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolVariant {
    ConstantProduct,
    Concentrated,
    Stable,
}

impl fmt::Display for PoolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolVariant::ConstantProduct => write!(f, "constant-product"),
            PoolVariant::Concentrated => write!(f, "concentrated"),
            PoolVariant::Stable => write!(f, "stable"),
        }
    }
}

/// One side of a two-token pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolTokenSlot {
    pub token: Address,
    pub reserve_raw: U256,
    pub decimals: u8,
}

/// A pure, deterministic view of one pool's swap behavior at a reserve
/// snapshot.
///
/// `spot_price` returns `0.0` and `swap` returns zero when either reserve is
/// zero. A `swap` input exceeding the pool's liquidity is not an error; the
/// result saturates but stays non-negative and finite.
pub trait PoolOracle: Send + Sync {
    fn address(&self) -> Address;
    fn variant(&self) -> PoolVariant;
    /// Fee as a rational in `[0, 1)`.
    fn fee(&self) -> f64;
    fn token_slots(&self) -> [PoolTokenSlot; 2];
    /// Instantaneous marginal rate of `to` per raw unit of `from`, after fee.
    fn spot_price(&self, from: Address, to: Address) -> f64;
    /// Output for a discrete input, monotone non-decreasing and concave.
    fn swap(&self, amount_in_raw: U256, from: Address, to: Address) -> U256;
    /// A new snapshot of the same pool with replaced reserves (slot order).
    fn with_reserves(&self, reserve0: U256, reserve1: U256) -> Arc<dyn PoolOracle>;
    /// A new snapshot of the same pool with a replaced fee.
    fn with_fee(&self, fee: f64) -> Arc<dyn PoolOracle>;

    fn reserve_of(&self, token: Address) -> Option<U256> {
        self.token_slots().iter().find(|s| s.token == token).map(|s| s.reserve_raw)
    }

    fn decimals_of(&self, token: Address) -> Option<u8> {
        self.token_slots().iter().find(|s| s.token == token).map(|s| s.decimals)
    }
}

impl fmt::Debug for dyn PoolOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOracle")
            .field("address", &self.address())
            .field("variant", &self.variant())
            .field("fee", &self.fee())
            .finish_non_exhaustive()
    }
}

/// The in-crate constant-product (`x * y = k`) pool implementation.
///
/// Concentrated-liquidity and stable-curve pools are external collaborators
/// implementing [`PoolOracle`] over the same contract.
#[derive(Debug, Clone)]
pub struct ConstantProductPool {
    address: Address,
    slot0: PoolTokenSlot,
    slot1: PoolTokenSlot,
    fee: f64,
    fee_ppm: u32,
}

impl ConstantProductPool {
    pub fn new(address: Address, slot0: PoolTokenSlot, slot1: PoolTokenSlot, fee: f64) -> Self {
        let fee_ppm = amm_math::fee_to_ppm(fee);
        Self { address, slot0, slot1, fee, fee_ppm }
    }

    fn oriented(&self, from: Address, to: Address) -> Option<(U256, U256)> {
        if from == self.slot0.token && to == self.slot1.token {
            Some((self.slot0.reserve_raw, self.slot1.reserve_raw))
        } else if from == self.slot1.token && to == self.slot0.token {
            Some((self.slot1.reserve_raw, self.slot0.reserve_raw))
        } else {
            None
        }
    }
}

impl PoolOracle for ConstantProductPool {
    fn address(&self) -> Address {
        self.address
    }

    fn variant(&self) -> PoolVariant {
        PoolVariant::ConstantProduct
    }

    fn fee(&self) -> f64 {
        self.fee
    }

    fn token_slots(&self) -> [PoolTokenSlot; 2] {
        [self.slot0, self.slot1]
    }

    fn spot_price(&self, from: Address, to: Address) -> f64 {
        match self.oriented(from, to) {
            Some((reserve_in, reserve_out)) => {
                amm_math::spot_price(reserve_in, reserve_out, self.fee_ppm)
            }
            None => 0.0,
        }
    }

    fn swap(&self, amount_in_raw: U256, from: Address, to: Address) -> U256 {
        match self.oriented(from, to) {
            Some((reserve_in, reserve_out)) => {
                amm_math::get_amount_out(amount_in_raw, reserve_in, reserve_out, self.fee_ppm)
            }
            None => U256::zero(),
        }
    }

    fn with_reserves(&self, reserve0: U256, reserve1: U256) -> Arc<dyn PoolOracle> {
        let mut pool = self.clone();
        pool.slot0.reserve_raw = reserve0;
        pool.slot1.reserve_raw = reserve1;
        Arc::new(pool)
    }

    fn with_fee(&self, fee: f64) -> Arc<dyn PoolOracle> {
        let mut pool = self.clone();
        pool.fee = fee;
        pool.fee_ppm = amm_math::fee_to_ppm(fee);
        Arc::new(pool)
    }
}

/// External pool record source; the persistent store is a collaborator and
/// is specified only by the data it returns.
#[async_trait]
pub trait PoolStore: Send + Sync {
    async fn load_pools(&self) -> Result<Vec<Arc<dyn PoolOracle>>, GraphError>;
    async fn load_tokens(&self) -> Result<Vec<Token>, GraphError>;
}

/// In-memory [`PoolStore`] used for wiring and tests.
pub struct StaticPoolStore {
    pools: Vec<Arc<dyn PoolOracle>>,
    tokens: Vec<Token>,
}

impl StaticPoolStore {
    pub fn new(pools: Vec<Arc<dyn PoolOracle>>, tokens: Vec<Token>) -> Self {
        Self { pools, tokens }
    }
}

#[async_trait]
impl PoolStore for StaticPoolStore {
    async fn load_pools(&self) -> Result<Vec<Arc<dyn PoolOracle>>, GraphError> {
        Ok(self.pools.clone())
    }

    async fn load_tokens(&self) -> Result<Vec<Token>, GraphError> {
        Ok(self.tokens.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(val: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = val;
        Address::from(bytes)
    }

    fn sample_pool() -> ConstantProductPool {
        ConstantProductPool::new(
            addr(10),
            PoolTokenSlot { token: addr(1), reserve_raw: U256::from(5_000_000_000u64), decimals: 8 },
            PoolTokenSlot { token: addr(2), reserve_raw: U256::from(25_000_000_000u64), decimals: 6 },
            0.003,
        )
    }

    #[test]
    fn test_swap_both_directions() {
        let pool = sample_pool();
        let out = pool.swap(U256::from(1_000_000_000u64), addr(1), addr(2));
        assert!(out > U256::zero());
        let back = pool.swap(out, addr(2), addr(1));
        // Round trip loses the fee twice.
        assert!(back < U256::from(1_000_000_000u64));
    }

    #[test]
    fn test_swap_unknown_token_is_zero() {
        let pool = sample_pool();
        assert_eq!(pool.swap(U256::from(1_000u64), addr(9), addr(2)), U256::zero());
        assert_eq!(pool.spot_price(addr(1), addr(9)), 0.0);
    }

    #[test]
    fn test_zero_reserve_pool_is_inert() {
        let pool = sample_pool().with_reserves(U256::zero(), U256::from(1u64));
        assert_eq!(pool.spot_price(addr(1), addr(2)), 0.0);
        assert_eq!(pool.swap(U256::from(1_000u64), addr(1), addr(2)), U256::zero());
    }

    #[test]
    fn test_with_reserves_preserves_identity() {
        let pool = sample_pool();
        let updated = pool.with_reserves(U256::from(7u64), U256::from(9u64));
        assert_eq!(updated.address(), pool.address());
        assert_eq!(updated.fee(), pool.fee());
        assert_eq!(updated.reserve_of(addr(1)), Some(U256::from(7u64)));
        assert_eq!(updated.reserve_of(addr(2)), Some(U256::from(9u64)));
    }
}
