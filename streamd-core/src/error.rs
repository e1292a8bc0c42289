//! Crate-wide error types.
//!
//! Each component gets its own leaf error enum; [`StreamdError`] composes
//! them via `#[from]` so callers at the top (the launcher, the CLI) can
//! propagate with `?` without naming every component's error type.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnumeratorError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("card {0} has no resolvable bus/device pair")]
    NotFound(u32),
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum RuleEmitError {
    #[error("invalid port path: {0:?}")]
    InvalidPort(String),
    #[error("bus and device numbers must be strictly positive, got bus={bus} dev={dev}")]
    NonPositive { bus: i64, dev: i64 },
    #[error("failed to write rule file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors surfaced by the Lock Manager (C6).
///
/// `Contention` is not a bug: it is the expected outcome when a second
/// supervisor loses a race for the same device.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock for {name:?} is held by live process {pid}")]
    Contention { name: String, pid: i32 },
    #[error("failed to access lock file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("lock file {path:?} contents are not a valid pid")]
    Corrupt { path: PathBuf },
}

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("encoder binary {path:?} not found or not executable: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: String, to: String },
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("attempts exhausted after {attempts} tries")]
    Exhausted { attempts: u32 },
}

#[derive(Error, Debug)]
pub enum StatusError {
    #[error(transparent)]
    Enumerator(#[from] EnumeratorError),
    #[error("failed to read lock directory {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("release request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("no platform-matched asset in release {0:?}")]
    NoMatchingAsset(String),
    #[error("checksums asset missing from release {0:?}")]
    NoChecksumsAsset(String),
    #[error("checksum mismatch for {name}: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        computed: String,
    },
    #[error("no checksum entry for {name:?} in manifest")]
    NoChecksumEntry { name: String },
    #[error("tar entry {name:?} exceeds the per-entry size bound ({size} > {bound})")]
    EntryTooLarge {
        name: String,
        size: u64,
        bound: u64,
    },
    #[error("failed to parse semver {0:?}")]
    BadSemver(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Error, Debug)]
pub enum StreamdError {
    #[error(transparent)]
    Enumerator(#[from] EnumeratorError),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    RuleEmit(#[from] RuleEmitError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error(transparent)]
    Update(#[from] UpdateError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = StreamdError> = std::result::Result<T, E>;
