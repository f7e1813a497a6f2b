//! # Smart Order Router Core
//!
//! Given a source token, a destination token, and a swap amount, this crate
//! produces ranked paths through a liquidity graph built from AMM pools and
//! an optimal allocation of the input across those paths, maximizing expected
//! output net of per-hop gas.
//!
//! The three load-bearing subsystems:
//!
//! - **Graph construction and maintenance** ([`path::TokenGraph`],
//!   [`events::GraphUpdateDispatcher`]): a directed multigraph over tokens,
//!   weighted by spot-price log-ratios, with parallel-edge compression and
//!   selective in-place updates under streaming liquidity events.
//! - **Top-K pathfinding** ([`path::find_top_k_routes`]): A* over a bounded
//!   best-first frontier with a cached reverse-Dijkstra heuristic, dominance
//!   pruning, and an admissible early-termination rule.
//! - **Route splitting** ([`split`]): marginal-rate water-filling over
//!   pre-sampled response curves, cross-checked by an iterative hill-climb
//!   refiner.
//!
//! [`router::SmartOrderRouter`] wires the pieces together behind a single
//! `quote` entry point. Pool math beyond constant-product and all I/O (pool
//! persistence, event transport) are collaborators behind the
//! [`pool::PoolOracle`] and [`pool::PoolStore`] traits.

pub mod amm_math;
pub mod config;
pub mod errors;
pub mod events;
pub mod path;
pub mod pool;
pub mod router;
pub mod split;
pub mod types;

pub use config::RouterSettings;
pub use errors::{EventError, GraphError, QuoteError, SorError};
pub use events::{GraphUpdateDispatcher, PoolEvent, PoolEventKind};
pub use path::{Path, RouterMetrics, TokenGraph};
pub use pool::{ConstantProductPool, PoolOracle, PoolStore, PoolTokenSlot, PoolVariant, StaticPoolStore};
pub use router::SmartOrderRouter;
pub use types::{
    QuoteConfig, QuoteDiagnostics, QuoteRequest, QuoteResponse, QuotedPath, RouteHop, Token,
};
