//! Client configuration: defaults, then a TOML file, then CLI flags

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::ClientOpts;
use crate::fetch::FetchOptions;
use crate::protocol::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use crate::reconcile::ReconcileOptions;

/// Shape of the configuration file; every key is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub directory: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub verify: Option<bool>,
    pub chunk_size: Option<u32>,
    pub log_file: Option<PathBuf>,
    pub quiet: Option<bool>,
    pub timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&data)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

/// Fully resolved client settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub directory: PathBuf,
    pub endpoint: String,
    pub verify: bool,
    pub chunk_size: u32,
    pub log_file: Option<PathBuf>,
    pub quiet: bool,
    pub timeout: Option<Duration>,
}

impl ClientConfig {
    /// Merge CLI flags over the optional config file. `cwd` is the root when
    /// neither names a directory.
    pub fn resolve(opts: &ClientOpts, cwd: &Path) -> Result<Self> {
        let file = match opts.config {
            Some(ref p) => FileConfig::load(p)?,
            None => FileConfig::default(),
        };
        Self::merge(file, opts, cwd)
    }

    pub fn merge(file: FileConfig, opts: &ClientOpts, cwd: &Path) -> Result<Self> {
        let endpoint = match opts.endpoint.clone().or(file.endpoint) {
            Some(e) if !e.trim().is_empty() => e.trim().to_string(),
            _ => bail!("endpoint is not set (use --endpoint or `endpoint` in the config file)"),
        };
        let directory = opts
            .directory
            .clone()
            .or(file.directory)
            .map(|d| if d.is_absolute() { d } else { cwd.join(d) })
            .unwrap_or_else(|| cwd.to_path_buf());
        let chunk_size = opts
            .chunk_size
            .or(file.chunk_size)
            .unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            bail!("chunk size must be between 1 and {} bytes", MAX_CHUNK_SIZE);
        }
        let verify = if opts.no_verify {
            false
        } else {
            file.verify.unwrap_or(true)
        };
        Ok(Self {
            directory,
            endpoint,
            verify,
            chunk_size,
            log_file: opts.log_file.clone().or(file.log_file),
            quiet: opts.quiet || file.quiet.unwrap_or(false),
            timeout: opts
                .timeout_secs
                .or(file.timeout_secs)
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
        })
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            fetch: FetchOptions {
                chunk_size: self.chunk_size,
                verify: self.verify,
            },
        }
    }
}
