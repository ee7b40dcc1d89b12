//! DOG market data and fee backfill backend.
//!
//! Multi-source price, market and network snapshots served from TTL caches
//! with per-source fallbacks; rune transfer classification; and a paced job
//! that recovers missing transaction fees from a Bitcoin node.

pub mod aggregator;
pub mod api;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod feeds;
pub mod fees;
pub mod middleware;
pub mod models;
pub mod rpc;
pub mod scrapers;
pub mod store;
pub mod stream;
