//! Command-line configuration for the `vrimg` tool.
//!
//! This module provides the configuration surface of the binary:
//! - Command-line arguments via clap
//! - Environment variables with `VRIMG_` prefix
//! - Defaults matching the library's constants
//!
//! # Environment Variables
//!
//! - `VRIMG_THREADS` - Worker threads for tile decoding (default: one per CPU)
//! - `VRIMG_BLOCK_SIZE` - Block size of the per-file read cache (default: 64KB)
//! - `VRIMG_CACHE_BLOCKS` - Blocks cached per open file (default: 64)
//! - `VRIMG_CACHE_CAPACITY` - Channel caches kept by `scrub` (default: 3)
//! - `VRIMG_CACHE_TIMEOUT` - Idle seconds before a channel cache may be evicted (default: 30)

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::cache::{DEFAULT_CACHE_TIMEOUT, DEFAULT_MAX_CACHES};
use crate::io::{DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE};

// =============================================================================
// Default Values
// =============================================================================

/// Default number of passes over the frame list in `scrub`.
pub const DEFAULT_SCRUB_PASSES: usize = 2;

/// Smallest accepted block size.
pub const MIN_BLOCK_SIZE: usize = 1024;

/// Largest accepted block size.
pub const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;

// =============================================================================
// CLI Arguments
// =============================================================================

/// vrimg - Inspect and decode VRimg multi-layer render frames.
#[derive(Parser, Debug, Clone)]
#[command(name = "vrimg")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Worker threads for tile decoding. 0 uses one per CPU.
    #[arg(long, global = true, default_value_t = 0, env = "VRIMG_THREADS")]
    pub threads: usize,

    /// Block size in bytes of the per-file read cache.
    #[arg(long, global = true, default_value_t = DEFAULT_BLOCK_SIZE, env = "VRIMG_BLOCK_SIZE")]
    pub block_size: usize,

    /// Number of blocks cached per open file.
    #[arg(long, global = true, default_value_t = DEFAULT_BLOCK_CACHE_CAPACITY, env = "VRIMG_CACHE_BLOCKS")]
    pub cache_blocks: usize,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Report whether each file is a VRimg file.
    Probe(ProbeConfig),

    /// Print a file's resolution, channels and metadata.
    Info(InfoConfig),

    /// Decode one layer to a raw native-endian file.
    Extract(ExtractConfig),

    /// Read a frame sequence repeatedly through the channel cache pool.
    Scrub(ScrubConfig),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ProbeConfig {
    /// Files to probe.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct InfoConfig {
    /// File to describe.
    pub file: PathBuf,

    /// Print the description as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ExtractConfig {
    /// File to decode.
    pub file: PathBuf,

    /// Name of the layer to extract.
    #[arg(short, long)]
    pub layer: String,

    /// Output path for the raw pixel data.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Bytes between output rows. Defaults to the packed layer row size.
    #[arg(long)]
    pub row_bytes: Option<usize>,

    /// Decode the whole file first and copy the layer from memory.
    #[arg(long, default_value_t = false)]
    pub full_load: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ScrubConfig {
    /// Frames to read, in order.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Passes over the frame list.
    #[arg(long, default_value_t = DEFAULT_SCRUB_PASSES)]
    pub passes: usize,

    /// Maximum channel caches kept. 0 disables caching.
    #[arg(long, default_value_t = DEFAULT_MAX_CACHES, env = "VRIMG_CACHE_CAPACITY")]
    pub cache_caches: usize,

    /// Idle seconds before a channel cache may be evicted. 0 disables the sweep.
    #[arg(long, default_value_t = DEFAULT_CACHE_TIMEOUT.as_secs(), env = "VRIMG_CACHE_TIMEOUT")]
    pub cache_timeout: u64,
}

impl Cli {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.block_size < MIN_BLOCK_SIZE || self.block_size > MAX_BLOCK_SIZE {
            return Err("block_size must be between 1KB and 16MB".to_string());
        }
        if self.cache_blocks == 0 {
            return Err("cache_blocks must be greater than 0".to_string());
        }

        match &self.command {
            Command::Extract(config) => config.validate(),
            Command::Scrub(config) => config.validate(),
            Command::Probe(_) | Command::Info(_) => Ok(()),
        }
    }
}

impl ExtractConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.layer.is_empty() {
            return Err("Layer name must not be empty".to_string());
        }
        if self.row_bytes == Some(0) {
            return Err("row_bytes must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl ScrubConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.passes == 0 {
            return Err("passes must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn cache_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_timeout)
    }
}

// =============================================================================
// Tests
// =============================================================================
