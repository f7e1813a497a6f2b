//! # Centralized Error Handling
//!
//! A single hierarchical error enum for the whole crate. Only
//! [`QuoteError`] variants are hard failures at the public boundary; every
//! other condition (no route, exhausted budget, oracle fault, an
//! inconsistent event) degrades into structured diagnostics on the response
//! and is never raised past the component that observed it.

use ethers::types::Address;
use thiserror::Error;

/// The top-level error type, encapsulating all failures within the router.
#[derive(Error, Debug)]
pub enum SorError {
    #[error("Quote error: {0}")]
    Quote(#[from] QuoteError),
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("Event error: {0}")]
    Event(#[from] EventError),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors surfaced to quote callers. All variants are rejections of the
/// request itself; no partial work has been done when one is returned.
#[derive(Error, Debug, Clone)]
pub enum QuoteError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Unknown source token {0:?}")]
    UnknownSource(Address),
    #[error("Unknown target token {0:?}")]
    UnknownTarget(Address),
    #[error("Non-positive swap amount {0}")]
    NonPositiveAmount(f64),
    #[error("Target {0:?} is not a recognized stablecoin and no target_usd_price was supplied")]
    MissingTargetUsdPrice(Address),
}

/// Errors raised while building or mutating the token graph.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Inconsistent token dictionary: {0}")]
    InconsistentTokenDictionary(String),
    #[error("Pool store error: {0}")]
    Store(String),
}

/// Errors observed by the graph update dispatcher. These are logged and
/// counted, never propagated to quote handlers.
#[derive(Error, Debug)]
pub enum EventError {
    #[error("Unknown pool {0:?}")]
    UnknownPool(Address),
    #[error("Inconsistent reserve transition for pool {pool:?}: {detail}")]
    InconsistentReserves { pool: Address, detail: String },
    #[error("Event for pool {0:?} is missing its new reserve snapshot")]
    MissingReserves(Address),
}
