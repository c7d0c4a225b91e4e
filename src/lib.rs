//! MEV search engine for BSC: traces pending swaps, finds arbitrage and
//! sandwich routes around them, sizes and validates them on a fork and
//! submits the survivors through a private relay.

pub mod config;
pub mod dex;
pub mod error;
pub mod execution;
pub mod graph;
pub mod multicall;
pub mod orchestrator;
pub mod price;
pub mod simulation;
pub mod solver;
pub mod stream;
pub mod trace;
pub mod types;
