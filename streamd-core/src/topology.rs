//! USB Topology Resolver (C3).
//!
//! Maps a card number to its physical USB port path by walking sysfs and
//! matching on the (bus, device) number pair — never bus number alone. A
//! bus-only match historically mis-identified a hub sitting at a parent
//! path as the device itself; matching the pair is non-negotiable
//! (spec.md §4.3, §9).

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::TopologyError;

fn port_dir_regex() -> Regex {
    Regex::new(r"^[0-9]+-[0-9]+(\.[0-9]+)*$").expect("static regex is valid")
}

/// Checks whether `name` is a syntactically valid USB port path
/// (e.g. `1-1.4`).
pub fn is_port_path(name: &str) -> bool {
    port_dir_regex().is_match(name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbTopology {
    pub port_path: String,
    pub product: Option<String>,
    pub serial: Option<String>,
}

fn read_decimal(path: &Path) -> Option<u32> {
    let s = fs::read_to_string(path).ok()?;
    // `u32::from_str` is base-10 and has no octal special case, so leading
    // zeros (e.g. "010") are tolerated and never reinterpreted as octal.
    s.trim().parse::<u32>().ok()
}

fn read_optional_string(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve `(bus, dev)` to a physical port path by scanning direct children
/// of `usb_root` (the sysfs USB devices directory, e.g.
/// `/sys/bus/usb/devices`).
pub fn resolve_topology(
    usb_root: &Path,
    bus: u32,
    dev: u32,
) -> Result<UsbTopology, TopologyError> {
    let entries = fs::read_dir(usb_root).map_err(|source| TopologyError::Io {
        path: usb_root.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| TopologyError::Io {
            path: usb_root.to_path_buf(),
            source,
        })?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if !is_port_path(name) {
            continue;
        }

        let candidate = entry.path();
        let Some(candidate_bus) = read_decimal(&candidate.join("busnum")) else {
            continue;
        };
        let Some(candidate_dev) = read_decimal(&candidate.join("devnum")) else {
            continue;
        };

        if candidate_bus == bus && candidate_dev == dev {
            return Ok(UsbTopology {
                port_path: name.to_string(),
                product: read_optional_string(&candidate.join("product")),
                serial: read_optional_string(&candidate.join("serial")),
            });
        }
    }

    Err(TopologyError::NotFound(dev))
}

/// Resolve a sound card's `busnum`/`devnum` by following its control-node
/// symlink and walking upward until a directory containing both `busnum`
/// and `devnum` is found. Intermediate parse failures reset the
/// locally-captured numbers — they must never leak into the next
/// iteration (spec.md §4.3).
pub fn resolve_card_bus_dev(
    card_control_path: &Path,
) -> Result<(u32, u32), TopologyError> {
    let mut current = fs::canonicalize(card_control_path).map_err(|source| TopologyError::Io {
        path: card_control_path.to_path_buf(),
        source,
    })?;

    loop {
        // Reset every iteration: a partial match at this level must not
        // contaminate the next one.
        let bus = read_decimal(&current.join("busnum"));
        let dev = read_decimal(&current.join("devnum"));

        if let (Some(bus), Some(dev)) = (bus, dev) {
            return Ok((bus, dev));
        }

        let Some(parent) = current.parent() else {
            return Err(TopologyError::NotFound(0));
        };
        if parent == current {
            return Err(TopologyError::NotFound(0));
        }
        current = parent.to_path_buf();

        // Reached a filesystem root without finding both files: give up
        // rather than loop forever on a detached path.
        if current == Path::new("/") || current == PathBuf::new() {
            let bus = read_decimal(&current.join("busnum"));
            let dev = read_decimal(&current.join("devnum"));
            if let (Some(bus), Some(dev)) = (bus, dev) {
                return Ok((bus, dev));
            }
            return Err(TopologyError::NotFound(0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn make_usb_device(root: &Path, name: &str, bus: u32, dev: u32) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("busnum"), format!("{bus}\n")).unwrap();
        fs::write(dir.join("devnum"), format!("{dev}\n")).unwrap();
    }

    #[test]
    fn port_regex_accepts_nested_paths() {
        assert!(is_port_path("1-1.4"));
        assert!(is_port_path("1-1"));
        assert!(is_port_path("3-2.1.4"));
        assert!(!is_port_path("usb1"));
        assert!(!is_port_path("1-1.4:1.0"));
    }

    #[test]
    fn matches_bus_and_dev_pair_not_bus_alone() {
        let dir = tempdir().unwrap();
        // A hub sits at 1-1 sharing the same bus as the real device at 1-1.4.
        make_usb_device(dir.path(), "1-1", 1, 2);
        make_usb_device(dir.path(), "1-1.4", 1, 5);

        let topo = resolve_topology(dir.path(), 1, 5).unwrap();
        assert_eq!(topo.port_path, "1-1.4");
    }

    #[test]
    fn no_match_is_not_found() {
        let dir = tempdir().unwrap();
        make_usb_device(dir.path(), "1-1", 1, 2);
        let err = resolve_topology(dir.path(), 2, 9).unwrap_err();
        assert!(matches!(err, TopologyError::NotFound(_)));
    }

    #[test]
    fn reads_optional_product_and_serial() {
        let dir = tempdir().unwrap();
        make_usb_device(dir.path(), "2-1", 2, 1);
        fs::write(dir.path().join("2-1/product"), "Blue Yeti\n").unwrap();
        let topo = resolve_topology(dir.path(), 2, 1).unwrap();
        assert_eq!(topo.product.as_deref(), Some("Blue Yeti"));
        assert_eq!(topo.serial, None);
    }

    #[test]
    fn decimal_parse_rejects_octal_interpretation() {
        let dir = tempdir().unwrap();
        // "010" must be decimal 10, never octal 8.
        make_usb_device(dir.path(), "1-2", 1, 10);
        fs::write(dir.path().join("1-2/devnum"), "010\n").unwrap();
        let topo = resolve_topology(dir.path(), 1, 10).unwrap();
        assert_eq!(topo.port_path, "1-2");
    }
}
