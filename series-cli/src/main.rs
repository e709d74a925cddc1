//! Series Extraction CLI Application
//!
//! This is the command-line interface for the series extraction engine.
//! It uses the series-engine library and adds:
//! - Channel discovery listings (union / intersection)
//! - Multi-signal extraction to JSON
//! - Basic per-signal statistics
//! - TOML configuration for repeatable extraction jobs

use anyhow::{bail, Result};
use clap::Parser;
use series_engine::{
    basic_stats, DiscoveryMode, DownsampleAlgorithm, ExtractOptions, SeriesEngine,
};
use std::path::PathBuf;

mod config;

/// Series Extractor - Resolve signals and extract time series from measurement files
#[derive(Parser, Debug)]
#[command(name = "series-cli")]
#[command(about = "Extract time series from measurement files (MF4, MDF, CSV, Excel)", long_about = None)]
#[command(version)]
struct Args {
    /// Measurement file(s) to read, in stitching order (can be repeated)
    #[arg(short, long, value_name = "FILE")]
    file: Vec<PathBuf>,

    /// Signal name(s) to extract (can be repeated); aliases are accepted
    #[arg(short, long, value_name = "NAME")]
    signal: Vec<String>,

    /// List channels instead of extracting
    #[arg(short, long)]
    list: bool,

    /// Restrict listings to channels present in every file
    #[arg(long)]
    intersection: bool,

    /// Show per-file alias expansions in listings (implies --list)
    #[arg(long)]
    aliases: bool,

    /// Normalize values to [0, 1]
    #[arg(long)]
    normalize: bool,

    /// Use a running sample index instead of real timestamps
    #[arg(long)]
    index: bool,

    /// Maximum points per extracted series
    #[arg(long, value_name = "COUNT", default_value_t = series_engine::DEFAULT_MAX_POINTS)]
    max_points: usize,

    /// Downsampling algorithm: stride or lttb
    #[arg(long, value_name = "ALGO", default_value = "stride")]
    algo: String,

    /// Lower time bound applied before downsampling
    #[arg(long, value_name = "SECONDS")]
    tmin: Option<f64>,

    /// Upper time bound applied before downsampling
    #[arg(long, value_name = "SECONDS")]
    tmax: Option<f64>,

    /// Output file for extracted series as JSON (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Print min/mean/max per extracted signal
    #[arg(long)]
    stats: bool,

    /// Path to configuration file (config.toml) for repeatable jobs
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let mut args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("Series Extractor CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using engine library v{}", series_engine::VERSION);

    // A config file fills in whatever the command line left unset
    if let Some(config_path) = args.config.clone() {
        log::info!("Loading configuration from: {:?}", config_path);
        apply_config(&mut args, &config::load_config(&config_path)?);
    }

    if args.file.is_empty() {
        // No input - show quick start
        println!("Series Extractor - No input specified");
        println!("\nQuick Start:");
        println!("  series-cli --file run.mf4 --list");
        println!("  series-cli --file run1.mf4 --file run2.mf4 --signal VehicleSpeed");
        println!("\nFor repeatable jobs:");
        println!("  series-cli --config job.toml");
        println!("\nUse --help for more options");
        return Ok(());
    }

    let engine = SeriesEngine::new();
    if args.list || args.aliases || args.signal.is_empty() {
        discovery_mode(&engine, &args)
    } else {
        extraction_mode(&engine, &args)
    }
}

/// Discovery mode - list channels across the file set
fn discovery_mode(engine: &SeriesEngine, args: &Args) -> Result<()> {
    let mode = if args.intersection {
        DiscoveryMode::Intersection
    } else {
        DiscoveryMode::Union
    };

    let channels = engine.discover(&args.file, mode);
    println!(
        "{} channel(s) ({} over {} file(s)):\n",
        channels.len(),
        mode,
        args.file.len()
    );
    for ch in &channels {
        if ch.display_name != ch.id {
            println!("  {}  [{}]  {}/{}", ch.id, ch.display_name, ch.present_count, ch.files_total);
        } else {
            println!("  {}  {}/{}", ch.id, ch.present_count, ch.files_total);
        }
    }

    if args.aliases {
        for file in &args.file {
            println!("\nAlias expansions for {:?}:", file);
            let expansions = engine.channel_aliases(file);
            let mut names: Vec<&String> = expansions.keys().collect();
            names.sort();
            for name in names {
                println!("  {}: {}", name, expansions[name].join(", "));
            }
        }
    }
    Ok(())
}

/// Extraction mode - resolve signals, extract, emit JSON
fn extraction_mode(engine: &SeriesEngine, args: &Args) -> Result<()> {
    let options = ExtractOptions {
        include_time: !args.index,
        normalize: args.normalize,
        max_points: args.max_points,
        algorithm: parse_algorithm(&args.algo)?,
        time_window: if args.tmin.is_some() || args.tmax.is_some() {
            Some((args.tmin, args.tmax))
        } else {
            None
        },
    };

    let response = engine.get_series(&args.file, &args.signal, &options)?;
    for id in &response.unresolved {
        log::warn!("Unresolved signal: {:?}", id);
    }

    if args.stats {
        for s in basic_stats(&response) {
            println!(
                "{}: min={:.6} mean={:.6} max={:.6}",
                s.signal, s.min, s.mean, s.max
            );
        }
    }

    let json = serde_json::to_string_pretty(&response)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)?;
            log::info!(
                "Wrote {} series to {:?}",
                response.resolved.len(),
                path
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Merge config-file settings into unset command-line arguments
fn apply_config(args: &mut Args, config: &config::AppConfig) {
    if args.file.is_empty() {
        args.file = config.input.files.clone();
    }
    if args.signal.is_empty() {
        args.signal = config.extraction.signals.clone();
    }
    if !args.normalize {
        args.normalize = config.extraction.normalize;
    }
    if !args.index {
        args.index = !config.extraction.include_time;
    }
    if args.max_points == series_engine::DEFAULT_MAX_POINTS {
        args.max_points = config.extraction.max_points;
    }
    if args.algo == "stride" {
        args.algo = config.extraction.algorithm.clone();
    }
    if args.tmin.is_none() {
        args.tmin = config.extraction.tmin;
    }
    if args.tmax.is_none() {
        args.tmax = config.extraction.tmax;
    }
    if args.output.is_none() {
        args.output = config.output.path.clone();
    }
    if !args.stats {
        args.stats = config.output.stats;
    }
}

fn parse_algorithm(name: &str) -> Result<DownsampleAlgorithm> {
    match name.to_lowercase().as_str() {
        "stride" => Ok(DownsampleAlgorithm::Stride),
        "lttb" => Ok(DownsampleAlgorithm::Lttb),
        other => bail!("Unknown downsampling algorithm: {:?} (expected stride or lttb)", other),
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_algorithm() {
        assert_eq!(parse_algorithm("stride").unwrap(), DownsampleAlgorithm::Stride);
        assert_eq!(parse_algorithm("LTTB").unwrap(), DownsampleAlgorithm::Lttb);
        assert!(parse_algorithm("nearest").is_err());
    }

    #[test]
    fn test_config_merge_respects_cli() {
        let mut args = Args::parse_from(["series-cli", "--file", "cli.csv", "--max-points", "42"]);
        let config = config::AppConfig {
            input: config::InputConfig {
                files: vec![PathBuf::from("cfg.csv")],
            },
            extraction: config::ExtractionConfig {
                signals: vec!["Speed".to_string()],
                max_points: 7,
                ..Default::default()
            },
            output: Default::default(),
        };

        apply_config(&mut args, &config);
        // Command line wins where it was given
        assert_eq!(args.file, vec![PathBuf::from("cli.csv")]);
        assert_eq!(args.max_points, 42);
        // Config fills what was left unset
        assert_eq!(args.signal, vec!["Speed".to_string()]);
    }

    #[test]
    fn test_extraction_mode_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("a.csv");
        std::fs::write(&csv, "Time,Speed\n0,1\n1,2\n").unwrap();
        let out = dir.path().join("out.json");

        let args = Args::parse_from([
            "series-cli",
            "--file",
            csv.to_str().unwrap(),
            "--signal",
            "Speed",
            "--output",
            out.to_str().unwrap(),
        ]);
        let engine = SeriesEngine::new();
        extraction_mode(&engine, &args).unwrap();

        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.contains("\"Speed\""));
        assert!(text.contains("\"timestamps\""));
    }
}
