//! Top-level launcher (spec.md §2 control flow): reads configuration,
//! enumerates devices via the Enumerator (C1), starts one Supervisor (C8)
//! per device, and propagates a single cancellation signal to all of them
//! on shutdown. The CLI is deliberately thin over this — spec.md §1 scopes
//! the command dispatcher itself out, referenced only at this interface.

use std::time::{SystemTime, UNIX_EPOCH};

use streamd_core::backoff::Backoff;
use streamd_core::config::StreamdConfig;
use streamd_core::enumerator::{Device, Enumerator};
use streamd_core::error::StreamdError;
use streamd_core::launcher::StreamParams;
use streamd_core::sanitize::sanitize;
use streamd_core::supervisor::{RunOutcome, StreamConfig, Supervisor};
use tokio_util::sync::CancellationToken;

/// Waits for either `SIGINT` (interactive `ctrl-c`) or, on Unix, `SIGTERM`
/// (what `systemctl stop` sends per `systemd/streamd.service`'s
/// `Type=simple` contract). Whichever arrives first cancels the launcher.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Builds the per-device encoder parameters: per-device overrides from
/// config win, otherwise sensible defaults. The input handle prefers the
/// by-id persistent path when the Enumerator found one, falling back to
/// the bare `hw:<card>` handle (spec.md §9 open question (b): parameters
/// are fixed at Supervisor start and persist until restart).
fn build_stream_params(config: &StreamdConfig, device: &Device, sanitized: &str) -> StreamParams {
    let device_override = config.devices.get(sanitized);
    let sample_rate = device_override
        .and_then(|o| o.sample_rate)
        .unwrap_or(48000);
    let channels = device_override.and_then(|o| o.channels).unwrap_or(2);
    let codec = device_override
        .and_then(|o| o.codec.clone())
        .unwrap_or_else(|| "opus".to_string());
    let bitrate = device_override
        .and_then(|o| o.bitrate.clone())
        .unwrap_or_else(|| "128k".to_string());
    let input_handle = device
        .by_id_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| format!("hw:{}", device.card_index));
    let destination_url = format!(
        "{}/{}",
        config.relay_base_url.trim_end_matches('/'),
        sanitized
    );

    StreamParams {
        input_handle,
        sample_rate,
        channels,
        codec,
        bitrate,
        destination_url,
    }
}

/// Enumerates devices, starts one Supervisor per device, and blocks until
/// every Supervisor reaches a terminal state — either because its own run
/// ended or because the process received a shutdown signal, which cancels
/// all of them (spec.md §5 "cancelling the launcher cancels all
/// Supervisors").
pub async fn run(config: StreamdConfig) -> Result<(), StreamdError> {
    let enumerator = Enumerator::new(config.asound_root.clone());
    let devices = enumerator.enumerate()?;
    if devices.is_empty() {
        tracing::warn!(root = ?config.asound_root, "no USB capture devices found");
    }

    let root_cancel = CancellationToken::new();
    let signal_task = {
        let root_cancel = root_cancel.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            tracing::info!("shutdown signal received, cancelling all supervisors");
            root_cancel.cancel();
        })
    };

    let now = now_unix_secs();
    let mut handles = Vec::with_capacity(devices.len());
    for device in devices {
        let sanitized = sanitize(&device.name, now);
        let params = build_stream_params(&config, &device, &sanitized);
        let stream_config = StreamConfig {
            sanitized_name: sanitized.clone(),
            lock_dir: config.lock_dir.clone(),
            encoder_path: config.encoder_path.clone(),
            params,
            stop_timeout: config.stop_timeout(),
            success_threshold: config.success_threshold(),
        };
        let backoff = Backoff::new(config.backoff.clone().into());
        let cancel = root_cancel.child_token();
        let supervisor = Supervisor::new(stream_config, backoff, cancel);
        tracing::info!(device = %sanitized, "starting supervisor");
        handles.push((sanitized, tokio::spawn(supervisor.run())));
    }

    for (name, handle) in handles {
        match handle.await {
            Ok(RunOutcome::Cancelled) => {
                tracing::info!(device = %name, "supervisor stopped cleanly");
            }
            Ok(RunOutcome::Error(e)) => {
                tracing::error!(device = %name, error = %e, "supervisor exited with an error");
            }
            Err(join_err) => {
                tracing::error!(device = %name, error = %join_err, "supervisor task panicked");
            }
        }
    }

    signal_task.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use streamd_core::config::DeviceOverride;

    fn sample_device(by_id: Option<&str>) -> Device {
        Device {
            card_index: 2,
            name: "USB Audio Device".to_string(),
            usb_vendor_id: "046d".to_string(),
            usb_product_id: "082c".to_string(),
            by_id_path: by_id.map(PathBuf::from),
        }
    }

    fn sample_config(devices: HashMap<String, DeviceOverride>) -> StreamdConfig {
        let mut config = StreamdConfig::default();
        config.relay_base_url = "rtsp://relay.local:8554".to_string();
        config.devices = devices;
        config
    }

    #[test]
    fn defaults_apply_when_no_override_present() {
        let config = sample_config(HashMap::new());
        let device = sample_device(Some("/dev/snd/by-id/usb-Device-00"));
        let params = build_stream_params(&config, &device, "USB_Audio_Device");

        assert_eq!(params.input_handle, "/dev/snd/by-id/usb-Device-00");
        assert_eq!(params.sample_rate, 48000);
        assert_eq!(params.channels, 2);
        assert_eq!(params.codec, "opus");
        assert_eq!(params.bitrate, "128k");
        assert_eq!(
            params.destination_url,
            "rtsp://relay.local:8554/USB_Audio_Device"
        );
    }

    #[test]
    fn falls_back_to_hw_handle_without_a_by_id_path() {
        let config = sample_config(HashMap::new());
        let device = sample_device(None);
        let params = build_stream_params(&config, &device, "USB_Audio_Device");
        assert_eq!(params.input_handle, "hw:2");
    }

    #[test]
    fn per_device_override_wins_over_defaults() {
        let mut devices = HashMap::new();
        devices.insert(
            "USB_Audio_Device".to_string(),
            DeviceOverride {
                sample_rate: Some(44100),
                channels: Some(1),
                codec: Some("aac".to_string()),
                bitrate: Some("256k".to_string()),
            },
        );
        let config = sample_config(devices);
        let device = sample_device(None);
        let params = build_stream_params(&config, &device, "USB_Audio_Device");

        assert_eq!(params.sample_rate, 44100);
        assert_eq!(params.channels, 1);
        assert_eq!(params.codec, "aac");
        assert_eq!(params.bitrate, "256k");
    }

    #[test]
    fn destination_url_strips_trailing_slash_on_relay_base() {
        let mut config = sample_config(HashMap::new());
        config.relay_base_url = "rtsp://relay.local:8554/".to_string();
        let device = sample_device(None);
        let params = build_stream_params(&config, &device, "USB_Audio_Device");
        assert_eq!(
            params.destination_url,
            "rtsp://relay.local:8554/USB_Audio_Device"
        );
    }

    /// Scenario 6 (spec.md §8): a bash→YAML migration fixture feeds the
    /// launcher, which builds a Supervisor's stream params for the
    /// migrated device; the resulting encoder command line's last
    /// argument is the configured destination URL, and the rate-flag pair
    /// appears earlier, exactly as the migrated `blue_yeti` entry
    /// specifies.
    #[test]
    fn migrated_bash_config_drives_a_correctly_ordered_encoder_command_line() {
        let bash = r#"
RELAY_BASE_URL=rtsp://relay.local:8554
DEVICE_blue_yeti_SAMPLE_RATE=48000
DEVICE_blue_yeti_CHANNELS=2
DEVICE_blue_yeti_CODEC=opus
DEVICE_blue_yeti_BITRATE=192k
"#;
        let config = streamd_core::config::migrate_bash(bash);
        let device = Device {
            card_index: 3,
            name: "blue yeti".to_string(),
            usb_vendor_id: "b58e".to_string(),
            usb_product_id: "9e84".to_string(),
            by_id_path: None,
        };
        let sanitized = sanitize(&device.name, 1_700_000_000);
        assert_eq!(sanitized, "blue_yeti");

        let params = build_stream_params(&config, &device, &sanitized);
        assert_eq!(params.destination_url, "rtsp://relay.local:8554/blue_yeti");
        assert_eq!(params.sample_rate, 48000);

        let args = streamd_core::launcher::build_args(&params);
        assert_eq!(args.last().unwrap(), &params.destination_url);
        let rate_flag_pos = args.iter().position(|a| a == "-ar").unwrap();
        assert_eq!(args[rate_flag_pos + 1], "48000");
        assert!(rate_flag_pos < args.len() - 1);
    }
}
