//! Core types for the series extraction engine
//!
//! This module defines the result types the engine hands to callers and the
//! option types callers pass in. The engine itself reports per-file and
//! per-channel problems by omission, so the error enum here only covers
//! programming-level failures (malformed options, unreadable configuration).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur at the engine API boundary
///
/// Per-file read failures and unresolved channel requests are NOT errors;
/// they degrade to empty results or `unresolved` entries.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Failed to parse file: {0}")]
    FormatError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// One stitched time series for a resolved channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Cleaned canonical name used for display
    pub name: String,
    /// Monotonically non-decreasing after stitching
    pub timestamps: Vec<f64>,
    /// Same length as `timestamps`
    pub values: Vec<f64>,
    /// First non-empty unit seen across the file runs
    pub unit: String,
}

impl Series {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// One entry in the discovery output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Canonical channel name (request this id to read the channel)
    pub id: String,
    /// Cleaned display form of the name
    pub display_name: String,
    /// Punctuation-normalized identifier form
    pub clean: String,
    /// Number of files (out of the requested set) containing this channel
    pub present_count: usize,
    /// Size of the requested file set
    pub files_total: usize,
}

/// Discovery scope across a file set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Every channel seen in any file
    Union,
    /// Only channels present in all files
    Intersection,
}

impl fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryMode::Union => write!(f, "union"),
            DiscoveryMode::Intersection => write!(f, "intersection"),
        }
    }
}

/// Downsampling strategy for the final reduction step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownsampleAlgorithm {
    /// Keep every k-th sample; fast, may alias transient spikes
    Stride,
    /// Largest-Triangle-Three-Buckets; shape-preserving
    Lttb,
}

impl fmt::Display for DownsampleAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownsampleAlgorithm::Stride => write!(f, "stride"),
            DownsampleAlgorithm::Lttb => write!(f, "lttb"),
        }
    }
}

/// Default point budget; extraction at or above this budget with otherwise
/// default options is the cacheable "full resolution" shape.
pub const DEFAULT_MAX_POINTS: usize = 100_000;

/// Options for series extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractOptions {
    /// Use real clock values (stitched); false synthesizes a running index
    pub include_time: bool,
    /// Rescale values to [0, 1] (skipped for constant series)
    pub normalize: bool,
    /// Maximum number of points returned per series
    pub max_points: usize,
    /// Final reduction strategy
    pub algorithm: DownsampleAlgorithm,
    /// Optional [tmin, tmax] filter applied to the stitched series before
    /// downsampling; either bound may be None
    pub time_window: Option<(Option<f64>, Option<f64>)>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            include_time: true,
            normalize: false,
            max_points: DEFAULT_MAX_POINTS,
            algorithm: DownsampleAlgorithm::Stride,
            time_window: None,
        }
    }
}

impl ExtractOptions {
    /// True when a full-resolution extraction with these options may be
    /// served from / stored into the series cache.
    pub fn is_cacheable(&self) -> bool {
        !self.normalize
            && self.include_time
            && self.max_points >= DEFAULT_MAX_POINTS
            && self.time_window.is_none()
    }

    /// Validate caller-supplied options. This is the only place where a
    /// request can fail hard instead of degrading.
    pub fn validate(&self) -> Result<()> {
        if self.max_points == 0 {
            return Err(EngineError::InvalidOptions(
                "max_points must be at least 1".to_string(),
            ));
        }
        if let Some((Some(tmin), Some(tmax))) = self.time_window {
            if tmin > tmax {
                return Err(EngineError::InvalidOptions(format!(
                    "empty time window: tmin {} > tmax {}",
                    tmin, tmax
                )));
            }
        }
        Ok(())
    }
}

/// Result of a `get_series` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesResponse {
    /// Requested id -> stitched (and possibly reduced) series
    pub resolved: std::collections::BTreeMap<String, Series>,
    /// Requested ids that did not map to any channel with data
    pub unresolved: Vec<String>,
}

impl SeriesResponse {
    pub fn empty() -> Self {
        Self {
            resolved: std::collections::BTreeMap::new(),
            unresolved: Vec::new(),
        }
    }
}

/// Basic per-series aggregates for extraction reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub signal: String,
    pub min: f64,
    pub mean: f64,
    pub max: f64,
}

/// Compute min/mean/max for every resolved series. NaN samples are ignored;
/// all-NaN or empty series are skipped.
pub fn basic_stats(response: &SeriesResponse) -> Vec<SeriesStats> {
    let mut out = Vec::new();
    for series in response.resolved.values() {
        let vals: Vec<f64> = series.values.iter().copied().filter(|v| v.is_finite()).collect();
        if vals.is_empty() {
            continue;
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for v in &vals {
            min = min.min(*v);
            max = max.max(*v);
            sum += *v;
        }
        out.push(SeriesStats {
            signal: series.name.clone(),
            min,
            mean: sum / vals.len() as f64,
            max,
        });
    }
    out
}
