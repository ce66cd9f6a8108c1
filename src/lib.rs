//! Field Server Library
//!
//! Server-side simulation core of a sector-partitioned multiplayer world.
//! Each field runs on its own single-writer actor thread; a sector-grid AOI
//! engine turns world mutations into Enter / Leave / Move / Snapshot events
//! for the players that can see them.
//!
//! # Features
//!
//! - `metrics_extended` - Tick time percentiles (p95/p99) in the metrics output (enabled by default)

pub mod config;
pub mod field;
pub mod metrics;
pub mod net;
pub mod util;
pub mod worker;
