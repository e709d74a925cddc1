//! Measurement file format readers (MDF 4.x, MDF 3.x, CSV/Excel)
//!
//! Each reader exposes the same capability interface: list the channels the
//! file contains and read one channel's samples. Readers are tried in a fixed
//! priority order and a failure in one never aborts the dispatch; a file no
//! reader can open simply yields no source, which higher layers treat as
//! "no data available" rather than a fatal error.

use std::path::Path;

pub mod mdf3;
pub mod mdf4;
pub mod table;

pub use mdf3::Mdf3File;
pub use mdf4::Mdf4File;
pub use table::TableSource;

/// Raw samples of one channel as read from a single file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelData {
    pub timestamps: Vec<f64>,
    pub values: Vec<f64>,
    pub unit: String,
}

impl ChannelData {
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty() || self.values.is_empty()
    }
}

/// Common capability interface for all format readers
///
/// `read` returns empty sequences (never an error) when the channel cannot be
/// located or yields no samples.
pub trait ChannelSource {
    /// Ordered list of canonical channel names in this file
    fn channels(&self) -> &[String];

    /// Read one channel's (timestamps, values, unit)
    fn read(&self, name: &str) -> ChannelData;
}

/// File format inferred from the path extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    /// Binary MDF family (.mdf, .mf4, .dat)
    Mdf,
    /// Comma-separated or spreadsheet export (.csv, .xlsx, .xls)
    Tabular,
    Unknown,
}

/// Classify a path by extension
pub fn format_of(path: &Path) -> FormatKind {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase());
    match ext.as_deref() {
        Some("mdf") | Some("mf4") | Some("dat") => FormatKind::Mdf,
        Some("csv") | Some("xlsx") | Some("xls") => FormatKind::Tabular,
        _ => FormatKind::Unknown,
    }
}

/// Open a file behind the capability interface, trying readers in priority
/// order: tabular (when the extension marks it so), then the primary MDF 4.x
/// decoder, then the MDF 3.x fallback.
///
/// Returns None when no reader can open the file. Decoder failures leave a
/// best-effort diagnostic trace file next to the input.
pub fn open_source(path: &Path) -> Option<Box<dyn ChannelSource>> {
    if format_of(path) == FormatKind::Tabular {
        match TableSource::open(path) {
            Ok(source) => {
                log::info!("Opened tabular file: {:?}", path);
                return Some(Box::new(source));
            }
            Err(e) => {
                log::warn!("Failed to read tabular file {:?}: {}", path, e);
                return None;
            }
        }
    }

    match Mdf4File::open(path) {
        Ok(source) => {
            log::info!("Opened MDF 4.x file: {:?}", path);
            return Some(Box::new(source));
        }
        Err(e) => {
            log::warn!("Primary MDF decoder failed for {:?}: {}", path, e);
            write_diagnostic(path, "open_primary_error", &e.to_string());
        }
    }

    match Mdf3File::open(path) {
        Ok(source) => {
            log::info!("Opened MDF 3.x file (fallback decoder): {:?}", path);
            Some(Box::new(source))
        }
        Err(e) => {
            log::warn!("Fallback MDF decoder failed for {:?}: {}", path, e);
            write_diagnostic(path, "open_fallback_error", &e.to_string());
            None
        }
    }
}

/// Write a diagnostic trace next to a failed input. Best-effort: diagnostics
/// are never required for correct operation, so write failures are swallowed.
fn write_diagnostic(path: &Path, tag: &str, message: &str) {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return;
    };
    let diag = path.with_file_name(format!("{}.{}.txt", name, tag));
    if let Err(e) = std::fs::write(&diag, format!("decoder open failed:\n{}\n", message)) {
        log::debug!("Could not write diagnostic file {:?}: {}", diag, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_format_classification() {
        assert_eq!(format_of(Path::new("run.mf4")), FormatKind::Mdf);
        assert_eq!(format_of(Path::new("run.MDF")), FormatKind::Mdf);
        assert_eq!(format_of(Path::new("export.csv")), FormatKind::Tabular);
        assert_eq!(format_of(Path::new("export.XLSX")), FormatKind::Tabular);
        assert_eq!(format_of(Path::new("notes.txt")), FormatKind::Unknown);
    }

    #[test]
    fn test_open_source_unreadable_file_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.mf4");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"this is not a measurement file").unwrap();
        drop(f);

        assert!(open_source(&path).is_none());

        // Both decoders failed, so both diagnostic side files exist
        assert!(dir
            .path()
            .join("garbage.mf4.open_primary_error.txt")
            .exists());
        assert!(dir
            .path()
            .join("garbage.mf4.open_fallback_error.txt")
            .exists());
    }

    #[test]
    fn test_open_source_missing_file_yields_none() {
        assert!(open_source(Path::new("/nonexistent/path/run.mf4")).is_none());
    }

    #[test]
    fn test_open_source_dispatch_order() {
        let dir = tempfile::tempdir().unwrap();

        // An MDF 4.x image goes straight through the primary decoder
        let mf4 = dir.path().join("run.mf4");
        let image = mdf4::tests::single_channel_file("EngSpd", "rpm", &[0.0, 0.5], &[800.0, 900.0]);
        std::fs::write(&mf4, image).unwrap();
        let source = open_source(&mf4).unwrap();
        assert_eq!(source.channels(), &["time", "EngSpd"]);
        assert!(!dir.path().join("run.mf4.open_primary_error.txt").exists());

        // An MDF 3.x image is rejected by the primary decoder and picked up
        // by the fallback, leaving the primary's diagnostic trace behind
        let legacy = dir.path().join("legacy.dat");
        let image = mdf3::tests::single_channel_file("Temp", "degC", &[0.0, 0.1], &[10, 20], -40.0, 0.5);
        std::fs::write(&legacy, image).unwrap();
        let source = open_source(&legacy).unwrap();
        assert_eq!(source.channels(), &["time", "Temp"]);
        assert!(dir.path().join("legacy.dat.open_primary_error.txt").exists());
        assert!(!dir.path().join("legacy.dat.open_fallback_error.txt").exists());
    }
}
