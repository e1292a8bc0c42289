//! Status Reporter (C9).
//!
//! On demand: enumerate devices (C1) for the device count and nominal
//! URLs, glob the lock directory for `*.lock` for the liveness table, and
//! liveness-probe each lock's recorded owner. Never mutates the lock
//! directory (spec.md §4.9).

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::enumerator::Enumerator;
use crate::error::StatusError;
use crate::lock;
use crate::sanitize::sanitize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamLiveness {
    Running,
    Stale,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveStream {
    pub device_name: String,
    pub status: StreamLiveness,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailableUrl {
    pub device_name: String,
    pub url: String,
}

/// The structured status output of spec.md §6: `service_status`,
/// `device_count`, `active_streams`, `available_urls`, optional `error`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub service_status: String,
    pub device_count: usize,
    pub active_streams: Vec<ActiveStream>,
    pub available_urls: Vec<AvailableUrl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct StatusReporter {
    enumerator: Enumerator,
    lock_dir: PathBuf,
    relay_base_url: String,
}

impl StatusReporter {
    pub fn new(
        asound_root: impl Into<PathBuf>,
        lock_dir: impl Into<PathBuf>,
        relay_base_url: impl Into<String>,
    ) -> Self {
        Self {
            enumerator: Enumerator::new(asound_root.into()),
            lock_dir: lock_dir.into(),
            relay_base_url: relay_base_url.into(),
        }
    }

    /// Never fails outward: enumeration or lock-dir I/O errors are folded
    /// into the snapshot's `error` field so a status query always returns
    /// a renderable result, the way the CLI's `status` subcommand needs.
    pub fn snapshot(&self, now_unix_secs: u64) -> StatusSnapshot {
        match self.try_snapshot(now_unix_secs) {
            Ok(snapshot) => snapshot,
            Err(e) => StatusSnapshot {
                service_status: "error".to_string(),
                device_count: 0,
                active_streams: Vec::new(),
                available_urls: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }

    fn try_snapshot(&self, now_unix_secs: u64) -> Result<StatusSnapshot, StatusError> {
        let devices = self.enumerator.enumerate()?;

        let available_urls = devices
            .iter()
            .map(|d| {
                let name = sanitize(&d.name, now_unix_secs);
                let url = format!("{}/{}", self.relay_base_url.trim_end_matches('/'), name);
                AvailableUrl {
                    device_name: name,
                    url,
                }
            })
            .collect();

        let active_streams = self.read_active_streams()?;

        Ok(StatusSnapshot {
            service_status: "ok".to_string(),
            device_count: devices.len(),
            active_streams,
            available_urls,
            error: None,
        })
    }

    fn read_active_streams(&self) -> Result<Vec<ActiveStream>, StatusError> {
        let entries = match fs::read_dir(&self.lock_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StatusError::Io {
                    path: self.lock_dir.clone(),
                    source,
                })
            }
        };

        let mut streams = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StatusError::Io {
                path: self.lock_dir.clone(),
                source,
            })?;
            let path = entry.path();
            let Some(device_name) = lock_file_device_name(&path) else {
                continue;
            };

            let (status, pid) = match lock::read_owner(&path) {
                Ok(Some(pid)) if lock::is_process_alive(pid) => (StreamLiveness::Running, Some(pid)),
                Ok(Some(pid)) => (StreamLiveness::Stale, Some(pid)),
                Ok(None) | Err(_) => (StreamLiveness::Unknown, None),
            };
            streams.push(ActiveStream {
                device_name,
                status,
                pid,
            });
        }
        streams.sort_by(|a, b| a.device_name.cmp(&b.device_name));
        Ok(streams)
    }
}

fn lock_file_device_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    name.strip_suffix(".lock").map(str::to_string)
}
