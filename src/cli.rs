//! Shared CLI helpers and small reusable Clap fragments

use clap::Parser;
use std::path::PathBuf;

/// Client options; every field overrides the matching config file entry
#[derive(Clone, Debug, Default, Parser)]
#[command(
    name = "treesync",
    version,
    about = "Make the local directory tree match a treesync daemon's tree"
)]
pub struct ClientOpts {
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Local root directory (default: current directory)
    #[arg(short = 'd', long)]
    pub directory: Option<PathBuf>,

    /// Daemon endpoint (host:port)
    #[arg(short = 'e', long)]
    pub endpoint: Option<String>,

    /// Skip re-hashing fetched files
    #[arg(long)]
    pub no_verify: bool,

    /// Compressed bytes requested per chunk
    #[arg(long)]
    pub chunk_size: Option<u32>,

    /// Append log lines to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Do not print the progress tree
    #[arg(short, long)]
    pub quiet: bool,

    /// Abort the whole run after this many seconds
    #[arg(long = "timeout")]
    pub timeout_secs: Option<u64>,
}

/// Daemon options used by treesyncd
#[derive(Clone, Debug, Parser)]
#[command(name = "treesyncd", version, about = "Serve a directory tree to treesync clients")]
pub struct DaemonOpts {
    /// Bind address (host:port)
    #[arg(long, default_value = "0.0.0.0:9032")]
    pub bind: String,

    /// Root directory to serve
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
}
