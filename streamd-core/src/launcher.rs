//! Encoder Launcher (C7).
//!
//! Builds and spawns the external encoder command with the resolved
//! parameters; streams its stderr to the logger (spec.md §4.7).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use crate::error::LaunchError;

#[derive(Debug, Clone)]
pub struct StreamParams {
    pub input_handle: String,
    pub sample_rate: u32,
    pub channels: u32,
    pub codec: String,
    pub bitrate: String,
    pub destination_url: String,
}

/// Builds the positional argument list for the encoder invocation. The
/// destination URL is always last — a testable property (spec.md §4.7, §8).
pub fn build_args(params: &StreamParams) -> Vec<String> {
    vec![
        "-f".to_string(),
        params.input_handle.clone(),
        "-ar".to_string(),
        params.sample_rate.to_string(),
        "-ac".to_string(),
        params.channels.to_string(),
        "-c".to_string(),
        params.codec.clone(),
        "-b".to_string(),
        params.bitrate.clone(),
        params.destination_url.clone(),
    ]
}

pub struct Launcher {
    encoder_path: PathBuf,
}

impl Launcher {
    pub fn new(encoder_path: impl Into<PathBuf>) -> Self {
        Self {
            encoder_path: encoder_path.into(),
        }
    }

    /// Spawns the encoder in its own process group (so a termination
    /// signal can target the whole subtree), discarding stdout and piping
    /// stderr for the caller to forward into the logger.
    pub fn spawn(&self, params: &StreamParams) -> Result<Child, LaunchError> {
        let args = build_args(params);
        let mut command = Command::new(&self.encoder_path);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        unsafe_set_process_group(&mut command);

        command.spawn().map_err(|source| LaunchError::Spawn {
            path: self.encoder_path.clone(),
            source,
        })
    }

    pub fn encoder_path(&self) -> &Path {
        &self.encoder_path
    }
}

#[cfg(unix)]
fn unsafe_set_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    // Put the child in its own process group (pgid = its own pid) so a
    // signal to the group reaches every descendant it spawns.
    command.process_group(0);
}

#[cfg(not(unix))]
fn unsafe_set_process_group(_command: &mut Command) {}

/// Drains a child's stderr line-by-line into `tracing`, tagging every
/// line with the owning device's sanitized name.
pub async fn forward_stderr_to_log(stderr: ChildStderr, sanitized_name: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!(device = %sanitized_name, encoder_stderr = %line);
    }
}
