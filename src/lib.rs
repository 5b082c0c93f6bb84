//! Folio Server Library
//!
//! Progressive PDF delivery engine. The binary in main.rs wires these modules
//! into an HTTP server; benches and tests use them directly.
//!
//! # Modules
//!
//! - `pool`: bounded pool of open documents (LRU + idle TTL)
//! - `cache`: two-tier (memory + disk) page render cache
//! - `render`: rendering backend boundary and the bounded render worker pool
//! - `strategy`: inline / streaming / image delivery selection
//! - `prefetch`: background cache warming and housekeeping
//! - `routes`: HTTP endpoints

pub mod cache;
pub mod config;
pub mod error;
pub mod pool;
pub mod prefetch;
pub mod range;
pub mod registry;
pub mod render;
pub mod routes;
pub mod session;
pub mod state;
pub mod stats;
pub mod strategy;
