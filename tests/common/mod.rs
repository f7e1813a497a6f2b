//! Shared fixtures for the integration scenarios.

use std::sync::Arc;

use ethers::types::{Address, U256};

use sor::{
    ConstantProductPool, PoolOracle, PoolTokenSlot, RouterSettings, SmartOrderRouter, Token,
};

/// Deterministic address from a single byte tag.
pub fn addr(val: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[19] = val;
    Address::from(bytes)
}

pub fn token(val: u8, symbol: &str, decimals: u8) -> Token {
    Token::new(addr(val), symbol, decimals)
}

/// Constant-product pool fixture over two `(token tag, reserve, decimals)`
/// slots.
pub fn cpmm(
    pool: u8,
    slot0: (u8, u128, u8),
    slot1: (u8, u128, u8),
    fee: f64,
) -> Arc<dyn PoolOracle> {
    Arc::new(ConstantProductPool::new(
        addr(pool),
        PoolTokenSlot { token: addr(slot0.0), reserve_raw: U256::from(slot0.1), decimals: slot0.2 },
        PoolTokenSlot { token: addr(slot1.0), reserve_raw: U256::from(slot1.1), decimals: slot1.2 },
        fee,
    ))
}

static INIT_TRACING: std::sync::Once = std::sync::Once::new();

/// Install the test log subscriber once; `RUST_LOG=sor=debug` shows the
/// router's trace output while a test runs.
fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Router over the given universe with default settings and a zero swap
/// batching window so dispatcher tests apply immediately.
pub fn router(tokens: Vec<Token>, pools: Vec<Arc<dyn PoolOracle>>) -> SmartOrderRouter {
    init_tracing();
    let settings = RouterSettings { swap_batch_window_ms: 0, ..RouterSettings::default() };
    SmartOrderRouter::from_parts(tokens, pools, settings).expect("router build")
}

/// The raw constant-product output for one hop, computed independently of
/// the crate under test.
pub fn expected_cpmm_out(amount_in: f64, reserve_in: f64, reserve_out: f64, fee: f64) -> f64 {
    let effective = amount_in * (1.0 - fee);
    reserve_out * effective / (reserve_in + effective)
}
