//! Device Enumerator (C1).
//!
//! Discovers USB capture cards under the kernel's audio filesystem
//! (production root: `/proc/asound`) and parses per-card identity and
//! capabilities. Non-USB cards are skipped; missing optional metadata
//! yields empty fields, never failure (spec.md §4.1).

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::EnumeratorError;

/// The canonical common-rates set a range is intersected against
/// (spec.md §4.1).
pub const COMMON_RATES: &[u32] = &[
    8000, 11025, 16000, 22050, 32000, 44100, 48000, 88200, 96000, 176400, 192000, 352800, 384000,
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Device {
    pub card_index: u32,
    pub name: String,
    pub usb_vendor_id: String,
    pub usb_product_id: String,
    pub by_id_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub sample_formats: Vec<String>,
    pub sample_rates: Vec<u32>,
    pub channel_counts: Vec<u32>,
    pub unknown: bool,
}

impl Default for Capabilities {
    /// Fallback defaults when a card's capture-endpoint description file
    /// is absent: 16-bit little-endian, 48 kHz, stereo, marked unknown.
    fn default() -> Self {
        Self {
            sample_formats: vec!["S16_LE".to_string()],
            sample_rates: vec![48000],
            channel_counts: vec![2],
            unknown: true,
        }
    }
}

pub struct Enumerator {
    asound_root: PathBuf,
}

impl Enumerator {
    pub fn new(asound_root: impl Into<PathBuf>) -> Self {
        Self {
            asound_root: asound_root.into(),
        }
    }

    /// Enumerate USB capture devices in ascending card-index order.
    pub fn enumerate(&self) -> Result<Vec<Device>, EnumeratorError> {
        let mut indices = self.card_indices()?;
        indices.sort_unstable();

        let mut devices = Vec::new();
        for index in indices {
            let card_dir = self.asound_root.join(format!("card{index}"));
            let Some((vendor, product)) = self.read_usb_ids(&card_dir)? else {
                continue; // non-USB card, skip
            };
            let name = self.read_name(&card_dir)?;
            let by_id_path = self.find_by_id_symlink(index);
            devices.push(Device {
                card_index: index,
                name,
                usb_vendor_id: vendor,
                usb_product_id: product,
                by_id_path,
            });
        }
        Ok(devices)
    }

    fn card_indices(&self) -> Result<Vec<u32>, EnumeratorError> {
        let read_dir = match fs::read_dir(&self.asound_root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(EnumeratorError::Io {
                    path: self.asound_root.clone(),
                    source,
                })
            }
        };

        let mut indices = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|source| EnumeratorError::Io {
                path: self.asound_root.clone(),
                source,
            })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(rest) = name.strip_prefix("card") {
                if let Ok(index) = rest.parse::<u32>() {
                    indices.push(index);
                }
            }
        }
        Ok(indices)
    }

    fn read_name(&self, card_dir: &Path) -> Result<String, EnumeratorError> {
        match fs::read_to_string(card_dir.join("id")) {
            Ok(s) => Ok(s.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(EnumeratorError::Io {
                path: card_dir.join("id"),
                source,
            }),
        }
    }

    /// Reads the USB vendor:product pair from the card's `usbid` file.
    /// Its absence is the definition of "non-USB" (spec.md §4.1), so a
    /// missing file yields `None` rather than an error.
    fn read_usb_ids(&self, card_dir: &Path) -> Result<Option<(String, String)>, EnumeratorError> {
        let path = card_dir.join("usbid");
        match fs::read_to_string(&path) {
            Ok(s) => Ok(parse_usb_id(s.trim())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(EnumeratorError::Io { path, source }),
        }
    }

    fn find_by_id_symlink(&self, card_index: u32) -> Option<PathBuf> {
        let by_id_dir = self.asound_root.join("by-id");
        let entries = fs::read_dir(&by_id_dir).ok()?;
        let control_node = format!("controlC{card_index}");
        for entry in entries.flatten() {
            let path = entry.path();
            if let Ok(target) = fs::read_link(&path) {
                if target
                    .file_name()
                    .and_then(|f| f.to_str())
                    .map(|f| f == control_node)
                    .unwrap_or(false)
                {
                    return Some(path);
                }
            }
        }
        None
    }

    /// Read a card's capture-endpoint capability description. Returns
    /// fallback defaults (and `unknown = true`) if the description file is
    /// absent, never an error (spec.md §4.1).
    pub fn read_capabilities(&self, card_index: u32) -> Result<Capabilities, EnumeratorError> {
        let path = self
            .asound_root
            .join(format!("card{card_index}"))
            .join("pcm0c/info"); // PCM 0, capture direction
        let text = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Capabilities::default()),
            Err(source) => return Err(EnumeratorError::Io { path, source }),
        };
        Ok(parse_capabilities(&text))
    }
}

fn parse_usb_id(raw: &str) -> Option<(String, String)> {
    let mut parts = raw.splitn(2, ':');
    let vendor = parts.next()?.trim();
    let product = parts.next()?.trim();
    if vendor.is_empty() || product.is_empty() {
        None
    } else {
        Some((vendor.to_string(), product.to_string()))
    }
}

/// Parse a capture-endpoint description of the form:
///
/// ```text
/// Formats: S16_LE S24_LE
/// Rates: 44100, 48000
/// Channels: 2
/// ```
///
/// or a rate range form (`Rates: 8000 - 96000`), which is materialized as
/// the intersection with [`COMMON_RATES`].
fn parse_capabilities(text: &str) -> Capabilities {
    let mut sample_formats = Vec::new();
    let mut sample_rates = Vec::new();
    let mut channel_counts = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Formats:") {
            sample_formats = rest.split_whitespace().map(|s| s.to_string()).collect();
        } else if let Some(rest) = line.strip_prefix("Rates:") {
            sample_rates = parse_rates(rest.trim());
        } else if let Some(rest) = line.strip_prefix("Channels:") {
            channel_counts = rest
                .split(',')
                .filter_map(|s| s.trim().parse::<u32>().ok())
                .collect();
        }
    }

    let unknown = sample_formats.is_empty() && sample_rates.is_empty() && channel_counts.is_empty();
    if unknown {
        return Capabilities::default();
    }

    if sample_formats.is_empty() {
        sample_formats = vec!["S16_LE".to_string()];
    }
    if sample_rates.is_empty() {
        sample_rates = vec![48000];
    }
    if channel_counts.is_empty() {
        channel_counts = vec![2];
    }

    sample_rates.sort_unstable();
    channel_counts.sort_unstable();

    Capabilities {
        sample_formats,
        sample_rates,
        channel_counts,
        unknown: false,
    }
}

fn parse_rates(rest: &str) -> Vec<u32> {
    if let Some((lo, hi)) = rest.split_once('-') {
        if let (Ok(lo), Ok(hi)) = (lo.trim().parse::<u32>(), hi.trim().parse::<u32>()) {
            let mut rates: Vec<u32> = COMMON_RATES
                .iter()
                .copied()
                .filter(|r| *r >= lo && *r <= hi)
                .collect();
            rates.sort_unstable();
            return rates;
        }
    }

    let mut rates: Vec<u32> = rest
        .split(',')
        .filter_map(|s| s.trim().parse::<u32>().ok())
        .collect();
    rates.sort_unstable();
    rates
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn make_card(root: &Path, index: u32, name: &str, usbid: Option<&str>) {
        let dir = root.join(format!("card{index}"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("id"), format!("{name}\n")).unwrap();
        if let Some(usbid) = usbid {
            fs::write(dir.join("usbid"), format!("{usbid}\n")).unwrap();
        }
    }

    #[test]
    fn enumerates_only_usb_cards_ascending() {
        let root = tempdir().unwrap();
        make_card(root.path(), 1, "NonUSB", None);
        make_card(root.path(), 0, "USB Audio Device", Some("1234:5678"));
        make_card(root.path(), 2, "Blue Yeti", Some("b58e:9e84"));

        let devices = Enumerator::new(root.path()).enumerate().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].card_index, 0);
        assert_eq!(devices[0].name, "USB Audio Device");
        assert_eq!(devices[0].usb_vendor_id, "1234");
        assert_eq!(devices[0].usb_product_id, "5678");
        assert_eq!(devices[1].card_index, 2);
    }

    #[test]
    fn missing_root_yields_empty_not_error() {
        let root = tempdir().unwrap();
        let missing = root.path().join("does-not-exist");
        let devices = Enumerator::new(missing).enumerate().unwrap();
        assert!(devices.is_empty());
    }

    #[test]
    fn capabilities_fall_back_when_info_file_absent() {
        let root = tempdir().unwrap();
        make_card(root.path(), 0, "Dev", Some("1:2"));
        let caps = Enumerator::new(root.path()).read_capabilities(0).unwrap();
        assert!(caps.unknown);
        assert_eq!(caps.sample_rates, vec![48000]);
        assert_eq!(caps.channel_counts, vec![2]);
    }

    #[test]
    fn capabilities_parse_explicit_rate_list() {
        let root = tempdir().unwrap();
        make_card(root.path(), 0, "Dev", Some("1:2"));
        fs::create_dir_all(root.path().join("card0/pcm0c")).unwrap();
        fs::write(
            root.path().join("card0/pcm0c/info"),
            "Formats: S16_LE\nRates: 48000, 44100\nChannels: 2\n",
        )
        .unwrap();
        let caps = Enumerator::new(root.path()).read_capabilities(0).unwrap();
        assert!(!caps.unknown);
        assert_eq!(caps.sample_rates, vec![44100, 48000]);
    }

    #[test]
    fn capabilities_parse_rate_range_against_common_set() {
        let root = tempdir().unwrap();
        make_card(root.path(), 0, "Dev", Some("1:2"));
        fs::create_dir_all(root.path().join("card0/pcm0c")).unwrap();
        fs::write(
            root.path().join("card0/pcm0c/info"),
            "Formats: S16_LE\nRates: 8000 - 96000\nChannels: 2\n",
        )
        .unwrap();
        let caps = Enumerator::new(root.path()).read_capabilities(0).unwrap();
        let expected: Vec<u32> = COMMON_RATES
            .iter()
            .copied()
            .filter(|r| *r >= 8000 && *r <= 96000)
            .collect();
        assert_eq!(caps.sample_rates, expected);
    }
}
