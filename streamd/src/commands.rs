//! Subcommand bodies invoked by `main`. Each function does exactly one
//! thing the CLI surface exposes; orchestration of the actual run loop
//! lives in [`crate::app`].

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use streamd_core::config::{self, StreamdConfig};
use streamd_core::enumerator::Enumerator;
use streamd_core::error::StreamdError;
use streamd_core::rules::{reload_and_trigger, write_rule_file, PortRule, SystemCommandRunner};
use streamd_core::status::StatusReporter;
use streamd_core::topology::{resolve_card_bus_dev, resolve_topology};
use streamd_core::update::Updater;

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn load_config(path: &Path) -> Result<StreamdConfig, StreamdError> {
    Ok(StreamdConfig::load(path)?)
}

/// Prints the status snapshot, either as the structured JSON form or a
/// human-readable table (spec.md §6's environment/flag-selectable format).
pub fn status(config: &StreamdConfig, json: bool) {
    let reporter = StatusReporter::new(
        config.asound_root.clone(),
        config.lock_dir.clone(),
        config.relay_base_url.clone(),
    );
    let snapshot = reporter.snapshot(now_unix_secs());

    if json {
        match serde_json::to_string_pretty(&snapshot) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("failed to serialize status: {e}"),
        }
        return;
    }

    println!("service_status: {}", snapshot.service_status);
    println!("device_count:   {}", snapshot.device_count);
    println!("active streams:");
    for stream in &snapshot.active_streams {
        match stream.pid {
            Some(pid) => println!("  {:<32} {:?} (pid {pid})", stream.device_name, stream.status),
            None => println!("  {:<32} {:?}", stream.device_name, stream.status),
        }
    }
    println!("available urls:");
    for url in &snapshot.available_urls {
        println!("  {:<32} {}", url.device_name, url.url);
    }
    if let Some(err) = &snapshot.error {
        println!("error: {err}");
    }
}

/// One-pass bash→YAML config migration (spec.md §1 out-of-scope glue,
/// exposed here only as a thin CLI wrapper around [`config::migrate_bash`]).
pub fn migrate_config(input: &Path, output: &Path) -> std::io::Result<()> {
    let text = std::fs::read_to_string(input)?;
    let migrated = config::migrate_bash(&text);
    let yaml = serde_yaml::to_string(&migrated).expect("StreamdConfig always serializes to YAML");
    std::fs::write(output, yaml)
}

/// Enumerates devices (C1), resolves each card's USB topology (C3), and
/// writes the byte-exact hotplug rule file (C4). Devices whose topology
/// cannot be resolved (e.g. not currently plugged in) are skipped rather
/// than failing the whole run.
pub fn emit_rules(config: &StreamdConfig, output: &Path, reload: bool) -> Result<(), StreamdError> {
    let enumerator = Enumerator::new(config.asound_root.clone());
    let devices = enumerator.enumerate()?;

    let mut rules = Vec::new();
    for device in &devices {
        let control_path = config
            .sound_class_root
            .join(format!("controlC{}", device.card_index));
        let Ok((bus, dev)) = resolve_card_bus_dev(&control_path) else {
            tracing::warn!(card = device.card_index, "could not resolve bus/dev, skipping");
            continue;
        };
        let Ok(topo) = resolve_topology(&config.sysfs_usb_root, bus, dev) else {
            tracing::warn!(card = device.card_index, "could not resolve USB topology, skipping");
            continue;
        };
        rules.push(PortRule {
            port_path: topo.port_path,
            bus_num: bus as i64,
            dev_num: dev as i64,
        });
    }

    write_rule_file(output, &rules)?;

    if reload {
        if let Err(e) = reload_and_trigger(&SystemCommandRunner) {
            tracing::warn!(error = %e, "udev reload-and-trigger failed");
        }
    }
    Ok(())
}

/// Checks the release index and, unless `check_only`, downloads, verifies,
/// and installs a newer release (spec.md §4.10).
pub async fn update(
    release_index_url: &str,
    current_version: &str,
    check_only: bool,
) -> Result<(), StreamdError> {
    let current_binary = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("streamd"));
    let updater = Updater::new(release_index_url, &current_binary)?;
    let release = updater.fetch_release().await?;

    if !Updater::is_newer(current_version, &release)? {
        println!("already up to date ({current_version})");
        return Ok(());
    }

    println!("update available: {current_version} -> {}", release.tag_name);
    if check_only {
        return Ok(());
    }

    let platform_tag = streamd_core::update::current_platform_tag();
    let asset = Updater::select_asset(&release, &platform_tag)?;
    let checksums_asset = Updater::select_checksums_asset(&release)?;

    let scratch_dir = std::env::temp_dir().join(format!("streamd-update-{}", release.tag_name));
    std::fs::create_dir_all(&scratch_dir).map_err(streamd_core::error::UpdateError::Io)?;
    let artifact_path = scratch_dir.join(&asset.name);
    let checksums_path = scratch_dir.join(&checksums_asset.name);

    updater
        .download_to(&asset.browser_download_url, &artifact_path)
        .await?;
    updater
        .download_to(&checksums_asset.browser_download_url, &checksums_path)
        .await?;

    let manifest_text =
        std::fs::read_to_string(&checksums_path).map_err(streamd_core::error::UpdateError::Io)?;
    Updater::verify_checksum(&artifact_path, &manifest_text, &asset.name)?;

    let extract_dir = scratch_dir.join("extracted");
    Updater::extract_tar_gz(&artifact_path, &extract_dir)?;

    let new_binary = extract_dir.join("streamd");
    updater.atomic_replace(&new_binary)?;
    println!("updated to {}", release.tag_name);
    Ok(())
}
