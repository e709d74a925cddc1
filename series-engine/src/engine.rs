//! Engine facade: channel discovery and series retrieval over a file set
//!
//! Owns the two process-wide caches (channel catalog, series cache) and wires
//! together alias indexing, request-time resolution, extraction and the final
//! reduction step. The file-set lifecycle (upload, delete, purge) lives with
//! an external collaborator which must call `clear_caches()` on any mutation.

use crate::alias;
use crate::catalog::ChannelCatalog;
use crate::downsample;
use crate::extract::{self, SeriesCache};
use crate::resolve;
use crate::types::{
    ChannelInfo, DiscoveryMode, DownsampleAlgorithm, ExtractOptions, Result, Series,
    SeriesResponse, DEFAULT_MAX_POINTS,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Application-scoped engine instance
#[derive(Default)]
pub struct SeriesEngine {
    catalog: ChannelCatalog,
    series_cache: SeriesCache,
}

impl SeriesEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enumerate channels across `files`.
    ///
    /// Union mode returns every canonical name seen in any file; intersection
    /// restricts to names present in all of them. Entries are sorted by id
    /// and carry presence counts and display names.
    pub fn discover(&self, files: &[PathBuf], mode: DiscoveryMode) -> Vec<ChannelInfo> {
        let mut counts: std::collections::BTreeMap<String, usize> = Default::default();
        for file in files {
            for name in self.catalog.list_channels(file).iter() {
                *counts.entry(name.clone()).or_insert(0) += 1;
            }
        }

        let total = files.len();
        let out: Vec<ChannelInfo> = counts
            .into_iter()
            .filter(|(_, count)| mode == DiscoveryMode::Union || *count == total)
            .map(|(id, count)| ChannelInfo {
                display_name: alias::display_name(&id),
                clean: alias::clean_name(&id),
                id,
                present_count: count,
                files_total: total,
            })
            .collect();
        log::info!(
            "Discovery ({}) over {} file(s): {} channel(s)",
            mode,
            total,
            out.len()
        );
        out
    }

    /// Retrieve stitched series for `ids` across `files`.
    ///
    /// Each requested id is resolved through the request-time resolver;
    /// unresolved ids are returned in a distinct list. Resolved channels are
    /// extracted at full (or inflated) resolution, optionally filtered to
    /// `time_window`, then reduced to `max_points` with the chosen algorithm.
    ///
    /// # Arguments
    /// * `files` - files to read, in stitching order
    /// * `ids` - requested identifiers (canonical names, aliases, or close)
    /// * `options` - extraction and reduction options
    ///
    /// # Returns
    /// Resolved series keyed by the requested id, plus the unresolved ids.
    pub fn get_series(
        &self,
        files: &[PathBuf],
        ids: &[String],
        options: &ExtractOptions,
    ) -> Result<SeriesResponse> {
        options.validate()?;

        let lookup = alias::build_lookup(&self.catalog, files);
        let resolution = resolve::resolve_ids(&lookup, ids);

        let mut response = SeriesResponse::empty();
        response.unresolved = resolution.unresolved;
        if resolution.resolved.is_empty() {
            return Ok(response);
        }

        // Extract above the requested budget when a reduction follows, so
        // windowing and shape-preserving reduction see enough raw samples
        let reduced = options.max_points < DEFAULT_MAX_POINTS || options.time_window.is_some();
        let budget = if reduced {
            usize::max(options.max_points * 3, options.max_points + 2000)
        } else {
            options.max_points
        };

        // Distinct requests may share a canonical channel; extract it once
        let mut canonical_ids: Vec<String> = Vec::new();
        for (_, canonical) in &resolution.resolved {
            if !canonical_ids.contains(canonical) {
                canonical_ids.push(canonical.clone());
            }
        }
        let extract_options = ExtractOptions {
            max_points: budget,
            algorithm: DownsampleAlgorithm::Stride,
            time_window: None,
            ..options.clone()
        };
        let raw = extract::extract_series(
            &self.catalog,
            &self.series_cache,
            files,
            &canonical_ids,
            &extract_options,
        );

        for (requested, canonical) in &resolution.resolved {
            let Some(series) = raw.get(canonical) else {
                continue;
            };
            response
                .resolved
                .insert(requested.clone(), reduce_series(series, options));
        }
        log::info!(
            "Series request: {} requested, {} resolved, {} unresolved",
            ids.len(),
            response.resolved.len(),
            response.unresolved.len()
        );
        Ok(response)
    }

    /// Alias expansion of every channel in one file, canonical -> aliases.
    /// Backs verbose channel listings; never consulted during extraction.
    pub fn channel_aliases(&self, file: &Path) -> HashMap<String, Vec<String>> {
        alias::expanded_aliases_for_file(&self.catalog, file)
    }

    /// Drop both process-wide caches. Must be called by the file lifecycle
    /// collaborator before serving requests over a mutated file set.
    pub fn clear_caches(&self) {
        self.catalog.clear();
        self.series_cache.clear();
    }
}

/// Apply the time window and the final reduction to one extracted series.
fn reduce_series(series: &Series, options: &ExtractOptions) -> Series {
    let mut xs = series.timestamps.clone();
    let mut ys = series.values.clone();

    if let Some((tmin, tmax)) = options.time_window {
        let keep: Vec<usize> = xs
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                tmin.map_or(true, |lo| **t >= lo) && tmax.map_or(true, |hi| **t <= hi)
            })
            .map(|(i, _)| i)
            .collect();
        // A window that selects nothing leaves the series unfiltered
        if !keep.is_empty() {
            xs = keep.iter().map(|&i| xs[i]).collect();
            ys = keep.iter().map(|&i| ys[i]).collect();
        }
    }

    if xs.len() > options.max_points {
        let (rx, ry) = match options.algorithm {
            DownsampleAlgorithm::Lttb => downsample::lttb(&xs, &ys, options.max_points),
            DownsampleAlgorithm::Stride => {
                downsample::stride_decimate(&xs, &ys, options.max_points)
            }
        };
        xs = rx;
        ys = ry;
    }

    Series {
        name: series.name.clone(),
        timestamps: xs,
        values: ys,
        unit: series.unit.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;

    fn write_csv(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_discover_union_and_intersection() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_csv(dir.path(), "a.csv", "Time,X,Y\n0,1,2\n1,3,4\n");
        let b = write_csv(dir.path(), "b.csv", "Time,X,Z\n0,5,6\n1,7,8\n");
        let engine = SeriesEngine::new();
        let files = vec![a, b];

        let union = engine.discover(&files, DiscoveryMode::Union);
        let union_ids: Vec<&str> = union.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(union_ids, vec!["X", "Y", "Z"]);

        let x = union.iter().find(|c| c.id == "X").unwrap();
        assert_eq!(x.present_count, 2);
        assert_eq!(x.files_total, 2);

        let inter = engine.discover(&files, DiscoveryMode::Intersection);
        let inter_ids: Vec<&str> = inter.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(inter_ids, vec!["X"]);
    }

    #[test]
    fn test_get_series_stitches_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_csv(dir.path(), "a.csv", "Time,Speed\n0,10\n1,20\n2,30\n");
        let b = write_csv(dir.path(), "b.csv", "Time,Speed\n0,40\n1,50\n2,60\n");
        let engine = SeriesEngine::new();

        let response = engine
            .get_series(&[a, b], &["Speed".to_string()], &ExtractOptions::default())
            .unwrap();
        let series = response.resolved.get("Speed").unwrap();
        assert_eq!(series.timestamps, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(series.values, vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0]);
        assert!(response.unresolved.is_empty());
    }

    #[test]
    fn test_two_aliases_of_one_channel_both_get_the_series() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_csv(dir.path(), "a.csv", "Time,Veh.Spd\n0,10\n1,20\n2,30\n");
        let engine = SeriesEngine::new();

        let ids = vec!["Veh.Spd".to_string(), "veh_spd".to_string()];
        let response = engine
            .get_series(&[a], &ids, &ExtractOptions::default())
            .unwrap();
        assert!(response.unresolved.is_empty());
        let literal = response.resolved.get("Veh.Spd").unwrap();
        let cleaned = response.resolved.get("veh_spd").unwrap();
        assert_eq!(literal, cleaned);
        assert_eq!(literal.values, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_channel_aliases_listing() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_csv(dir.path(), "a.csv", "Time,Signal.EA.001\n0,1\n1,2\n");
        let engine = SeriesEngine::new();

        let expansions = engine.channel_aliases(&a);
        let aliases = expansions.get("Signal.EA.001").unwrap();
        assert_eq!(aliases[0], "Signal.EA.001");
        assert!(aliases.contains(&"Signal".to_string()));
    }

    #[test]
    fn test_get_series_reports_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_csv(dir.path(), "a.csv", "Time,Speed\n0,1\n1,2\n");
        let engine = SeriesEngine::new();

        let response = engine
            .get_series(
                &[a],
                &["Speed".to_string(), "qq".to_string()],
                &ExtractOptions::default(),
            )
            .unwrap();
        assert!(response.resolved.contains_key("Speed"));
        assert_eq!(response.unresolved, vec!["qq".to_string()]);
    }

    #[test]
    fn test_time_window_applied_before_reduction() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_csv(
            dir.path(),
            "a.csv",
            "Time,Sig\n0,1\n1,2\n2,3\n3,4\n4,5\n5,6\n",
        );
        let engine = SeriesEngine::new();

        let options = ExtractOptions {
            time_window: Some((Some(1.0), Some(3.0))),
            ..Default::default()
        };
        let response = engine
            .get_series(&[a], &["Sig".to_string()], &options)
            .unwrap();
        let series = response.resolved.get("Sig").unwrap();
        assert_eq!(series.timestamps, vec![1.0, 2.0, 3.0]);
        assert_eq!(series.values, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_lttb_reduction_bounds_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = String::from("Time,Sig\n");
        for i in 0..200 {
            content.push_str(&format!("{},{}\n", i, (i % 7) * 10));
        }
        let a = write_csv(dir.path(), "a.csv", &content);
        let engine = SeriesEngine::new();

        let options = ExtractOptions {
            max_points: 20,
            algorithm: DownsampleAlgorithm::Lttb,
            ..Default::default()
        };
        let response = engine
            .get_series(&[a], &["Sig".to_string()], &options)
            .unwrap();
        let series = response.resolved.get("Sig").unwrap();
        assert_eq!(series.len(), 20);
        assert_eq!(series.timestamps[0], 0.0);
        assert_eq!(*series.timestamps.last().unwrap(), 199.0);
    }

    #[test]
    fn test_invalid_options_rejected() {
        let engine = SeriesEngine::new();
        let options = ExtractOptions {
            max_points: 0,
            ..Default::default()
        };
        assert!(engine
            .get_series(&[], &["Sig".to_string()], &options)
            .is_err());
    }

    #[test]
    fn test_clear_caches() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_csv(dir.path(), "a.csv", "Time,Speed\n0,1\n1,2\n");
        let engine = SeriesEngine::new();

        engine
            .get_series(&[a.clone()], &["Speed".to_string()], &ExtractOptions::default())
            .unwrap();
        engine.clear_caches();

        // A fresh request over the same path still works after invalidation
        let response = engine
            .get_series(&[a], &["Speed".to_string()], &ExtractOptions::default())
            .unwrap();
        assert!(response.resolved.contains_key("Speed"));
    }
}
