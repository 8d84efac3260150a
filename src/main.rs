//! vrimg - Inspect and decode VRimg render frames.
//!
//! This binary wires the library's reader, tile engine and channel cache
//! pool to a small command-line interface.

use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vrimg_reader::{
    config::{Cli, Command, ExtractConfig, InfoConfig, ProbeConfig, ScrubConfig},
    error::FormatError,
    format::probe,
    io::{BlockCache, FileRangeReader},
    tile::InputFile,
    CachePool,
};

type LocalFile = InputFile<BlockCache<FileRangeReader>>;

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if let Err(e) = cli.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    if let Err(e) = init_thread_pool(cli.threads) {
        error!("Could not start worker threads: {}", e);
        return ExitCode::FAILURE;
    }

    match &cli.command {
        Command::Probe(config) => run_probe(config),
        Command::Info(config) => run_info(&cli, config),
        Command::Extract(config) => run_extract(&cli, config),
        Command::Scrub(config) => run_scrub(&cli, config),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "vrimg_reader=debug,vrimg=debug"
    } else {
        "vrimg_reader=info,vrimg=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Size the global rayon pool used for tile decoding.
fn init_thread_pool(threads: usize) -> Result<(), rayon::ThreadPoolBuildError> {
    if threads == 0 {
        return Ok(());
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("vrimg-decode-{i}"))
        .build_global()
}

/// Open a local file with the configured block cache.
fn open_file(cli: &Cli, path: &Path) -> Result<LocalFile, FormatError> {
    let reader = FileRangeReader::open(path)?;
    InputFile::open(BlockCache::with_capacity(
        reader,
        cli.block_size,
        cli.cache_blocks,
    ))
}

// =============================================================================
// Probe Command
// =============================================================================

fn run_probe(config: &ProbeConfig) -> ExitCode {
    let mut failed = false;

    for path in &config.files {
        let result = FileRangeReader::open(path).and_then(|reader| probe(&reader));
        match result {
            Ok(true) => println!("{}: importable", path.display()),
            Ok(false) => println!("{}: not importable", path.display()),
            Err(e) => {
                error!("{}: {}", path.display(), e);
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

// =============================================================================
// Info Command
// =============================================================================

fn run_info(cli: &Cli, config: &InfoConfig) -> ExitCode {
    let file = match open_file(cli, &config.file) {
        Ok(file) => file,
        Err(e) => {
            error!("{}: {}", config.file.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let description = match file.describe() {
        Ok(description) => description,
        Err(e) => {
            error!("{}: {}", config.file.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if config.json {
        match serde_json::to_string_pretty(&description) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Could not serialize description: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        print!("{}", description);
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Extract Command
// =============================================================================

fn run_extract(cli: &Cli, config: &ExtractConfig) -> ExitCode {
    let mut file = match open_file(cli, &config.file) {
        Ok(file) => file,
        Err(e) => {
            error!("{}: {}", config.file.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let header = file.header();
    let (width, height) = (header.width(), header.height());
    let Some(layer) = header.find_layer(&config.layer) else {
        error!(
            "{}: no layer named '{}' (available: {})",
            config.file.display(),
            config.layer,
            header.layers().keys().cloned().collect::<Vec<_>>().join(", ")
        );
        return ExitCode::FAILURE;
    };

    let row_bytes = config.row_bytes.unwrap_or_else(|| layer.row_bytes(width));
    let Some(len) = row_bytes.checked_mul(height as usize) else {
        error!("Output of {} rows of {} bytes is too large", height, row_bytes);
        return ExitCode::FAILURE;
    };
    info!(
        "Extracting '{}' ({}) {}x{} from {}",
        layer.name,
        layer.type_label(),
        width,
        height,
        config.file.display()
    );

    let started = Instant::now();

    if config.full_load {
        match file.load_from_file(None) {
            Ok(report) if !report.is_complete() => {
                if report.tiles_failed > 0 {
                    warn!("{} tile(s) could not be decoded", report.tiles_failed);
                }
                if report.scan_failed {
                    warn!("Tag table could not be read to the end");
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!("{}: {}", config.file.display(), e);
                return ExitCode::FAILURE;
            }
        }
    }

    let mut dest = vec![0u8; len];
    match file.copy_layer_to_buffer(&config.layer, &mut dest, row_bytes) {
        Ok(true) => {}
        Ok(false) => {
            error!("Layer '{}' disappeared during extraction", config.layer);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("{}: {}", config.file.display(), e);
            return ExitCode::FAILURE;
        }
    }

    debug!("Decoded in {:?}", started.elapsed());

    if let Err(e) = std::fs::write(&config.output, &dest) {
        error!("{}: {}", config.output.display(), e);
        return ExitCode::FAILURE;
    }

    info!("Wrote {} bytes to {}", dest.len(), config.output.display());
    ExitCode::SUCCESS
}

// =============================================================================
// Scrub Command
// =============================================================================

fn run_scrub(cli: &Cli, config: &ScrubConfig) -> ExitCode {
    let mut pool = CachePool::new(config.cache_caches);
    let timeout = config.cache_timeout();

    info!(
        "Scrubbing {} frame(s) x {} pass(es), cache: {} entries, {:?} timeout",
        config.files.len(),
        config.passes,
        config.cache_caches,
        timeout
    );

    let started = Instant::now();
    let mut frames = 0usize;

    for pass in 0..config.passes {
        for path in &config.files {
            match scrub_frame(cli, &mut pool, path) {
                Ok(bytes) => {
                    frames += 1;
                    debug!("pass {}: {} ({} bytes)", pass + 1, path.display(), bytes);
                }
                Err(e) if e.is_cancelled() => {
                    warn!("Cancelled");
                    pool.shutdown();
                    return ExitCode::FAILURE;
                }
                Err(e) => error!("{}: {}", path.display(), e),
            }
            pool.on_idle(timeout);
        }
    }

    let stats = pool.stats();
    info!(
        "Read {} frame(s) in {:?}: {} hits, {} misses, {} builds, {} evictions, {} bytes resident",
        frames,
        started.elapsed(),
        stats.hits,
        stats.misses,
        stats.builds,
        stats.evictions,
        pool.memory_size()
    );

    pool.shutdown();
    ExitCode::SUCCESS
}

/// Copy every layer of one frame, going through the pool.
fn scrub_frame(
    cli: &Cli,
    pool: &mut CachePool,
    path: &Path,
) -> Result<usize, vrimg_reader::DecodeError> {
    let mut file = open_file(cli, path)?;

    if let Some(cache) = pool.find_or_build(&file)? {
        file.attach_cache(cache);
    }

    let header = file.header();
    let (width, height) = (header.width(), header.height());
    let layers: Vec<(String, usize, Option<usize>)> = header
        .layers()
        .values()
        .map(|layer| {
            (
                layer.name.clone(),
                layer.row_bytes(width),
                layer.buffer_len(width, height),
            )
        })
        .collect();

    let mut total = 0;
    for (name, row_bytes, len) in layers {
        let Some(len) = len else {
            return Err(vrimg_reader::DecodeError::OutOfMemory {
                layer: name,
                bytes: usize::MAX,
            });
        };
        let mut dest = vec![0u8; len];
        file.copy_layer_to_buffer(&name, &mut dest, row_bytes)?;
        total += dest.len();
    }

    Ok(total)
}
