//! Multi-file series extraction with cross-file stitching
//!
//! Files are independent recordings whose clocks may restart at zero or
//! overlap. Extraction reads one channel's samples from every file in the
//! given order and concatenates the runs into a single monotonic series,
//! shifting a run forward only when its clock clearly restarted. Full
//! resolution results with default options are cached per (file set, id set).

use crate::alias;
use crate::catalog::ChannelCatalog;
use crate::downsample;
use crate::formats::{self, ChannelSource};
use crate::types::{ExtractOptions, Series};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

type CacheKey = (Vec<String>, Vec<String>);
type SeriesMap = BTreeMap<String, Series>;

/// Cache of full-resolution extraction results
///
/// Keyed by the sorted file paths and the sorted requested ids, so key
/// equality is independent of request ordering. Only populated when
/// `ExtractOptions::is_cacheable` holds (time included, no normalization,
/// full point budget, no window); anything else bypasses the cache entirely.
#[derive(Default)]
pub struct SeriesCache {
    cache: Mutex<HashMap<CacheKey, Arc<SeriesMap>>>,
}

impl SeriesCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(files: &[PathBuf], ids: &[String]) -> CacheKey {
        let mut paths: Vec<String> = files
            .iter()
            .map(|f| f.to_string_lossy().into_owned())
            .collect();
        paths.sort();
        let mut sorted_ids = ids.to_vec();
        sorted_ids.sort();
        (paths, sorted_ids)
    }

    fn get(&self, key: &CacheKey) -> Option<Arc<SeriesMap>> {
        self.cache.lock().ok()?.get(key).map(Arc::clone)
    }

    fn put(&self, key: CacheKey, value: Arc<SeriesMap>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, value);
        }
    }

    /// Drop every cached result. Must run whenever the file set mutates.
    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            let dropped = cache.len();
            cache.clear();
            log::info!("Series cache cleared ({} entr(ies) dropped)", dropped);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

/// Accumulates per-file runs of one channel into a stitched series.
struct Stitcher {
    timestamps: Vec<f64>,
    values: Vec<f64>,
    unit: String,
    last_end: Option<f64>,
    last_step: Option<f64>,
}

impl Stitcher {
    fn new() -> Self {
        Self {
            timestamps: Vec::new(),
            values: Vec::new(),
            unit: String::new(),
            last_end: None,
            last_step: None,
        }
    }

    /// Append one run keeping real clock values.
    ///
    /// A run is kept unshifted when its first timestamp lands at or after
    /// the previous end, within a tolerance of twice the larger known step.
    /// A run starting clearly before that restarted its clock and is shifted
    /// to begin exactly one inferred step after the previous end.
    fn append_timed(&mut self, t: &[f64], v: &[f64]) {
        let step_here = inferred_step(t);
        let step = step_here
            .or(self.last_step)
            .filter(|s| *s > 0.0)
            .unwrap_or(0.0);
        let tol = 2.0 * f64::max(step_here.unwrap_or(0.0), self.last_step.unwrap_or(0.0));

        let offset = match self.last_end {
            None => 0.0,
            Some(last_end) => {
                let delta = t[0] - last_end;
                if delta > -tol {
                    0.0
                } else {
                    (last_end + step) - t[0]
                }
            }
        };

        let first = t[0] + offset;
        self.timestamps.extend(t.iter().map(|ti| ti + offset));
        self.values.extend_from_slice(v);

        let end = *self.timestamps.last().unwrap_or(&first);
        self.last_end = Some(end);
        if t.len() >= 2 {
            self.last_step = Some((end - first) / (t.len() - 1) as f64);
        }
    }

    /// Append one run under a synthetic running integer index.
    fn append_indexed(&mut self, v: &[f64]) {
        let base = match self.timestamps.last() {
            Some(last) => last + 1.0,
            None => 0.0,
        };
        self.timestamps
            .extend((0..v.len()).map(|i| base + i as f64));
        self.values.extend_from_slice(v);
    }

    fn set_unit_once(&mut self, unit: &str) {
        if self.unit.is_empty() && !unit.is_empty() {
            self.unit = unit.to_string();
        }
    }

    fn is_empty(&self) -> bool {
        self.timestamps.is_empty() || self.values.is_empty()
    }
}

/// Mean sample spacing of a run, when at least two samples exist.
fn inferred_step(t: &[f64]) -> Option<f64> {
    if t.len() >= 2 {
        Some((t[t.len() - 1] - t[0]) / (t.len() - 1) as f64)
    } else {
        None
    }
}

/// Rescale to [0, 1]. Constant series are left unscaled.
fn normalize_values(values: &mut [f64]) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values.iter() {
        min = min.min(*v);
        max = max.max(*v);
    }
    if max > min {
        let span = max - min;
        for v in values.iter_mut() {
            *v = (*v - min) / span;
        }
    }
}

/// Extract stitched series for `ids` across `files`.
///
/// Each id is resolved against the alias index built from the files'
/// catalogs; ids with no mapping or no samples are simply absent from the
/// result map. Values are optionally normalized to [0, 1] and the series is
/// stride-decimated down to `options.max_points`. Only the `include_time`,
/// `normalize` and `max_points` fields drive extraction; windowing and the
/// final reduction algorithm are the caller's concern.
///
/// # Arguments
/// * `catalog` - shared channel catalog (backs the alias index)
/// * `cache` - shared series cache, consulted when `options.is_cacheable()`
/// * `files` - files to read, in stitching order
/// * `ids` - requested identifiers (canonical names or aliases)
pub fn extract_series(
    catalog: &ChannelCatalog,
    cache: &SeriesCache,
    files: &[PathBuf],
    ids: &[String],
    options: &ExtractOptions,
) -> Arc<SeriesMap> {
    let cache_key = if options.is_cacheable() {
        let key = SeriesCache::key(files, ids);
        if let Some(hit) = cache.get(&key) {
            log::debug!("Series cache hit for {} id(s)", ids.len());
            return hit;
        }
        Some(key)
    } else {
        None
    };

    let lookup = alias::build_lookup(catalog, files);
    let sources: Vec<Box<dyn ChannelSource>> =
        files.iter().filter_map(|f| formats::open_source(f)).collect();

    let mut out = SeriesMap::new();
    for req in ids {
        let Some(canonical) = lookup.get(req) else {
            log::debug!("No alias mapping for requested id {:?}", req);
            continue;
        };

        let mut stitcher = Stitcher::new();
        for source in &sources {
            let data = source.read(canonical);
            if data.is_empty() {
                continue;
            }
            stitcher.set_unit_once(&data.unit);
            if options.include_time {
                stitcher.append_timed(&data.timestamps, &data.values);
            } else {
                stitcher.append_indexed(&data.values);
            }
        }
        if stitcher.is_empty() {
            continue;
        }

        if options.normalize {
            normalize_values(&mut stitcher.values);
        }
        let (timestamps, values) = downsample::stride_decimate(
            &stitcher.timestamps,
            &stitcher.values,
            options.max_points,
        );

        out.insert(
            req.clone(),
            Series {
                name: alias::clean_name(canonical),
                timestamps,
                values,
                unit: stitcher.unit,
            },
        );
    }

    let result = Arc::new(out);
    if let Some(key) = cache_key {
        cache.put(key, Arc::clone(&result));
    }
    result
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

    fn engine_parts() -> (ChannelCatalog, SeriesCache) {
        (ChannelCatalog::new(), SeriesCache::new())
    }

    #[test]
    fn test_restarted_clock_is_shifted() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_csv(dir.path(), "a.csv", "Time,Speed\n0,10\n1,20\n2,30\n");
        let b = write_csv(dir.path(), "b.csv", "Time,Speed\n0,40\n1,50\n2,60\n");
        let (catalog, cache) = engine_parts();

        let result = extract_series(
            &catalog,
            &cache,
            &[a, b],
            &["Speed".to_string()],
            &ExtractOptions::default(),
        );
        let series = result.get("Speed").unwrap();
        assert_eq!(series.timestamps, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(series.values, vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0]);
    }

    #[test]
    fn test_consistent_clock_is_not_shifted() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_csv(dir.path(), "a.csv", "Time,Speed\n0,10\n1,20\n2,30\n");
        let b = write_csv(dir.path(), "b.csv", "Time,Speed\n10,40\n11,50\n12,60\n");
        let (catalog, cache) = engine_parts();

        let result = extract_series(
            &catalog,
            &cache,
            &[a, b],
            &["Speed".to_string()],
            &ExtractOptions::default(),
        );
        let series = result.get("Speed").unwrap();
        assert_eq!(series.timestamps, vec![0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_index_mode_ignores_clock() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_csv(dir.path(), "a.csv", "Time,Speed\n5,10\n6,20\n");
        let b = write_csv(dir.path(), "b.csv", "Time,Speed\n100,30\n200,40\n");
        let (catalog, cache) = engine_parts();

        let options = ExtractOptions {
            include_time: false,
            ..Default::default()
        };
        let result = extract_series(&catalog, &cache, &[a, b], &["Speed".to_string()], &options);
        let series = result.get("Speed").unwrap();
        assert_eq!(series.timestamps, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(series.values, vec![10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_normalization_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_csv(dir.path(), "a.csv", "Time,Sig\n0,10\n1,30\n2,20\n");
        let (catalog, cache) = engine_parts();

        let options = ExtractOptions {
            normalize: true,
            ..Default::default()
        };
        let result = extract_series(&catalog, &cache, &[a], &["Sig".to_string()], &options);
        let series = result.get("Sig").unwrap();
        assert_eq!(series.values, vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn test_constant_series_left_unscaled() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_csv(dir.path(), "a.csv", "Time,Sig\n0,7\n1,7\n2,7\n");
        let (catalog, cache) = engine_parts();

        let options = ExtractOptions {
            normalize: true,
            ..Default::default()
        };
        let result = extract_series(&catalog, &cache, &[a], &["Sig".to_string()], &options);
        let series = result.get("Sig").unwrap();
        assert_eq!(series.values, vec![7.0, 7.0, 7.0]);
    }

    #[test]
    fn test_unknown_id_reported_by_omission() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_csv(dir.path(), "a.csv", "Time,Speed\n0,1\n1,2\n");
        let (catalog, cache) = engine_parts();

        let result = extract_series(
            &catalog,
            &cache,
            &[a],
            &["Speed".to_string(), "NoSuchChannel".to_string()],
            &ExtractOptions::default(),
        );
        assert!(result.contains_key("Speed"));
        assert!(!result.contains_key("NoSuchChannel"));
    }

    #[test]
    fn test_default_options_use_cache() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_csv(dir.path(), "a.csv", "Time,Speed\n0,1\n1,2\n");
        let b = write_csv(dir.path(), "b.csv", "Time,Speed\n0,3\n1,4\n");
        let (catalog, cache) = engine_parts();
        let ids = vec!["Speed".to_string()];

        let options = ExtractOptions::default();
        let first = extract_series(&catalog, &cache, &[a.clone(), b.clone()], &ids, &options);
        assert_eq!(cache.len(), 1);

        // Reversed file order sorts to the same key
        let second = extract_series(&catalog, &cache, &[b, a], &ids, &options);
        assert_eq!(cache.len(), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_non_default_options_bypass_cache() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_csv(dir.path(), "a.csv", "Time,Speed\n0,1\n1,2\n");
        let (catalog, cache) = engine_parts();
        let ids = vec!["Speed".to_string()];

        let normalized = ExtractOptions {
            normalize: true,
            ..Default::default()
        };
        let indexed = ExtractOptions {
            include_time: false,
            ..Default::default()
        };
        let reduced = ExtractOptions {
            max_points: 100,
            ..Default::default()
        };
        extract_series(&catalog, &cache, &[a.clone()], &ids, &normalized);
        extract_series(&catalog, &cache, &[a.clone()], &ids, &indexed);
        extract_series(&catalog, &cache, &[a], &ids, &reduced);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_alias_request_resolves_via_index() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_csv(dir.path(), "a.csv", "Time,Veh.Spd\n0,1\n1,2\n");
        let (catalog, cache) = engine_parts();

        let result = extract_series(
            &catalog,
            &cache,
            &[a],
            &["veh_spd".to_string()],
            &ExtractOptions::default(),
        );
        let series = result.get("veh_spd").unwrap();
        assert_eq!(series.values, vec![1.0, 2.0]);
    }
}
