//! Series Extraction Engine Library
//!
//! A stateless-per-request library for resolving signal names and extracting
//! time series from heterogeneous vehicle measurement files (MDF 4.x, MDF 3.x,
//! CSV/Excel exports).
//!
//! # Architecture
//!
//! This library is intentionally minimal and focused on resolution and
//! extraction:
//! - Opens measurement files behind one capability interface
//! - Discovers channels across a file set (union or intersection)
//! - Resolves loosely-spelled identifiers to canonical channel names
//! - Stitches per-file runs into one monotonic series per channel
//! - Reduces series for interactive plotting (stride or LTTB)
//!
//! The library does NOT:
//! - Interpret the physical meaning of a signal
//! - Perform analytics or statistics beyond basic min/mean/max
//! - Manage the file set lifecycle (upload, delete, purge)
//! - Persist anything beyond its in-memory caches
//!
//! All higher-level functionality is in the application layer (series-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use series_engine::{DiscoveryMode, ExtractOptions, SeriesEngine};
//! use std::path::PathBuf;
//!
//! let engine = SeriesEngine::new();
//! let files = vec![PathBuf::from("run1.mf4"), PathBuf::from("run2.mf4")];
//!
//! // What channels do these files share?
//! for channel in engine.discover(&files, DiscoveryMode::Intersection) {
//!     println!("{} ({}/{})", channel.id, channel.present_count, channel.files_total);
//! }
//!
//! // Read one signal, stitched across both files
//! let response = engine
//!     .get_series(&files, &["VehicleSpeed".to_string()], &ExtractOptions::default())
//!     .unwrap();
//! for (id, series) in &response.resolved {
//!     println!("{}: {} samples [{}]", id, series.len(), series.unit);
//! }
//! ```

// Public modules
pub mod alias;
pub mod catalog;
pub mod downsample;
pub mod engine;
pub mod extract;
pub mod formats;
pub mod resolve;
pub mod types;

// Re-export main types for convenience
pub use catalog::ChannelCatalog;
pub use engine::SeriesEngine;
pub use extract::SeriesCache;
pub use types::{
    basic_stats, ChannelInfo, DiscoveryMode, DownsampleAlgorithm, EngineError, ExtractOptions,
    Result, Series, SeriesResponse, SeriesStats, DEFAULT_MAX_POINTS,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
