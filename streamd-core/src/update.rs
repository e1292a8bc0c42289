//! Self-Updater (C10).
//!
//! Query a release index over HTTPS with a bounded timeout, compare
//! versions via parsed semver, identify a platform-matched artifact and
//! its companion checksums manifest, verify SHA-256, extract a bounded
//! tarball, and atomically replace the running binary with backup +
//! restore-on-failure (spec.md §4.10). The HTTPS client is `reqwest` with
//! `rustls-tls` and hashing is `sha2` — both already teacher dependencies
//! (`src-tauri/Cargo.toml`'s `reqwest`, `beacon-server`'s auth use of
//! `sha2`); `tar`/`flate2` are new, justified in DESIGN.md.

use std::cmp::Ordering;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tar::Archive;

use crate::error::UpdateError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-entry extraction bound, guarding against decompression-bomb style
/// expansion while unpacking an update tarball (spec.md §4.10).
const MAX_ENTRY_BYTES: u64 = 200 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    pub size: u64,
    pub content_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseIndex {
    pub tag_name: String,
    pub published_at: String,
    pub assets: Vec<ReleaseAsset>,
}

/// `major.minor.patch[-pre_release]`, compared numerically per component.
/// A release without a pre-release suffix is strictly newer than one with
/// a suffix at the same `major.minor.patch` (spec.md §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre_release: bool,
}

impl SemVer {
    pub fn parse(raw: &str) -> Result<Self, UpdateError> {
        let stripped = raw.strip_prefix('v').unwrap_or(raw);
        let (core, pre) = match stripped.split_once('-') {
            Some((c, p)) => (c, Some(p)),
            None => (stripped, None),
        };
        let mut components = core.split('.');
        let bad = || UpdateError::BadSemver(raw.to_string());
        let major = components.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let minor = components.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let patch = components.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        if components.next().is_some() {
            return Err(bad());
        }
        Ok(Self {
            major,
            minor,
            patch,
            pre_release: pre.is_some(),
        })
    }
}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| match (self.pre_release, other.pre_release) {
                (false, true) => Ordering::Greater,
                (true, false) => Ordering::Less,
                _ => Ordering::Equal,
            })
    }
}

fn is_checksums_asset_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "checksums.txt" || lower == "sha256sums.txt" || lower.ends_with("_checksums.txt")
}

/// Best-effort platform tag for the running host, used to pick a
/// platform-matched asset by substring match against release asset names
/// (e.g. `streamd-x86_64-unknown-linux-gnu.tar.gz`).
pub fn current_platform_tag() -> String {
    let arch = std::env::consts::ARCH;
    let os = std::env::consts::OS;
    match os {
        "linux" => format!("{arch}-unknown-linux-gnu"),
        "macos" => format!("{arch}-apple-darwin"),
        "windows" => format!("{arch}-pc-windows-msvc"),
        other => format!("{arch}-{other}"),
    }
}

/// Parse a checksums manifest and return the hex digest for the entry
/// whose basename matches `artifact_name`. Tolerates one- or two-space
/// separators and an optional `*` binary-mode marker and path prefix on
/// the filename; entries whose hash field is not 64 hex characters are
/// invalid and skipped rather than causing a parse failure (spec.md §6).
pub fn find_checksum(manifest_text: &str, artifact_name: &str) -> Result<String, UpdateError> {
    for line in manifest_text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((hash, rest)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let hash = hash.trim();
        if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            continue;
        }
        let rest = rest.trim_start().strip_prefix('*').unwrap_or(rest.trim_start());
        let basename = Path::new(rest)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or(rest);
        if basename == artifact_name {
            return Ok(hash.to_ascii_lowercase());
        }
    }
    Err(UpdateError::NoChecksumEntry {
        name: artifact_name.to_string(),
    })
}

fn sha256_hex(path: &Path) -> Result<String, io::Error> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

pub struct Updater {
    client: reqwest::Client,
    release_index_url: String,
    current_binary: PathBuf,
}

impl Updater {
    pub fn new(
        release_index_url: impl Into<String>,
        current_binary: impl Into<PathBuf>,
    ) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            release_index_url: release_index_url.into(),
            current_binary: current_binary.into(),
        })
    }

    pub async fn fetch_release(&self) -> Result<ReleaseIndex, UpdateError> {
        let response = self.client.get(&self.release_index_url).send().await?;
        let release = response.json::<ReleaseIndex>().await?;
        Ok(release)
    }

    pub fn is_newer(current_version: &str, release: &ReleaseIndex) -> Result<bool, UpdateError> {
        let current = SemVer::parse(current_version)?;
        let candidate = SemVer::parse(&release.tag_name)?;
        Ok(candidate > current)
    }

    pub fn select_asset<'a>(
        release: &'a ReleaseIndex,
        platform_tag: &str,
    ) -> Result<&'a ReleaseAsset, UpdateError> {
        release
            .assets
            .iter()
            .find(|a| a.name.contains(platform_tag))
            .ok_or_else(|| UpdateError::NoMatchingAsset(release.tag_name.clone()))
    }

    pub fn select_checksums_asset<'a>(
        release: &'a ReleaseIndex,
    ) -> Result<&'a ReleaseAsset, UpdateError> {
        release
            .assets
            .iter()
            .find(|a| is_checksums_asset_name(&a.name))
            .ok_or_else(|| UpdateError::NoChecksumsAsset(release.tag_name.clone()))
    }

    pub async fn download_to(&self, url: &str, dest: &Path) -> Result<(), UpdateError> {
        let bytes = self.client.get(url).send().await?.bytes().await?;
        tokio::fs::write(dest, &bytes)
            .await
            .map_err(UpdateError::Io)
    }

    /// Computes the artifact's SHA-256 and compares it against the
    /// manifest entry whose basename matches `artifact_name`. A mismatch
    /// is fatal (spec.md §4.10); the current binary is never touched by
    /// this step.
    pub fn verify_checksum(
        artifact_path: &Path,
        manifest_text: &str,
        artifact_name: &str,
    ) -> Result<(), UpdateError> {
        let expected = find_checksum(manifest_text, artifact_name)?;
        let computed = sha256_hex(artifact_path).map_err(UpdateError::Io)?;
        if expected.eq_ignore_ascii_case(&computed) {
            Ok(())
        } else {
            Err(UpdateError::ChecksumMismatch {
                name: artifact_name.to_string(),
                expected,
                computed,
            })
        }
    }

    /// Extracts a `.tar.gz` artifact into `dest_dir`, bounding each
    /// entry's declared size to guard against decompression expansion.
    pub fn extract_tar_gz(archive_path: &Path, dest_dir: &Path) -> Result<(), UpdateError> {
        std::fs::create_dir_all(dest_dir)?;
        let file = std::fs::File::open(archive_path)?;
        let decoder = GzDecoder::new(file);
        let mut archive = Archive::new(decoder);
        for entry in archive.entries()? {
            let mut entry = entry?;
            let size = entry.header().size()?;
            if size > MAX_ENTRY_BYTES {
                let name = entry.path()?.display().to_string();
                return Err(UpdateError::EntryTooLarge {
                    name,
                    size,
                    bound: MAX_ENTRY_BYTES,
                });
            }
            entry.unpack_in(dest_dir)?;
        }
        Ok(())
    }

    /// Atomically replaces the current binary: copy to a sibling
    /// `.backup` first, stage the extracted artifact as another sibling
    /// of `current_binary` (it otherwise lives under a scratch directory
    /// that is typically a different filesystem, e.g. tmpfs, where
    /// `rename` would fail with `EXDEV`), rename the staged sibling into
    /// place, restore from backup on failure, remove the backup on
    /// success (spec.md §4.10).
    pub fn atomic_replace(&self, new_binary: &Path) -> Result<(), UpdateError> {
        let backup = self.current_binary.with_extension("backup");
        std::fs::copy(&self.current_binary, &backup)?;

        let staged = self.current_binary.with_extension("new");
        if let Err(e) = std::fs::copy(new_binary, &staged) {
            let _ = std::fs::remove_file(&backup);
            return Err(UpdateError::Io(e));
        }

        match std::fs::rename(&staged, &self.current_binary) {
            Ok(()) => {
                let _ = std::fs::remove_file(&backup);
                Ok(())
            }
            Err(e) => {
                let _ = std::fs::remove_file(&staged);
                let _ = std::fs::copy(&backup, &self.current_binary);
                let _ = std::fs::remove_file(&backup);
                Err(UpdateError::Io(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn semver_parses_and_strips_v_prefix() {
        let a = SemVer::parse("v1.2.3").unwrap();
        assert_eq!((a.major, a.minor, a.patch, a.pre_release), (1, 2, 3, false));
    }

    #[test]
    fn semver_release_beats_prerelease_of_same_base() {
        let release = SemVer::parse("1.2.3").unwrap();
        let pre = SemVer::parse("1.2.3-rc1").unwrap();
        assert!(release > pre);
    }

    #[test]
    fn semver_compares_numerically_not_lexicographically() {
        let a = SemVer::parse("1.9.0").unwrap();
        let b = SemVer::parse("1.10.0").unwrap();
        assert!(b > a);
    }

    #[test]
    fn semver_rejects_malformed() {
        assert!(SemVer::parse("not-a-version").is_err());
        assert!(SemVer::parse("1.2").is_err());
    }

    #[test]
    fn is_newer_compares_tag_against_running_version() {
        let release = ReleaseIndex {
            tag_name: "v2.0.0".to_string(),
            published_at: "2026-01-01T00:00:00Z".to_string(),
            assets: Vec::new(),
        };
        assert!(Updater::is_newer("1.9.0", &release).unwrap());
        assert!(!Updater::is_newer("2.0.0", &release).unwrap());
    }

    #[test]
    fn checksums_asset_name_matching_is_case_insensitive() {
        assert!(is_checksums_asset_name("checksums.txt"));
        assert!(is_checksums_asset_name("SHA256SUMS.txt"));
        assert!(is_checksums_asset_name("streamd_checksums.txt"));
        assert!(!is_checksums_asset_name("streamd.tar.gz"));
    }

    #[test]
    fn find_checksum_matches_by_basename_two_space_and_one_space() {
        let manifest = format!(
            "{}  streamd-x86_64-unknown-linux-gnu.tar.gz\n{} *dist/streamd.tar.gz\n",
            "a".repeat(64),
            "b".repeat(64),
        );
        assert_eq!(
            find_checksum(&manifest, "streamd-x86_64-unknown-linux-gnu.tar.gz").unwrap(),
            "a".repeat(64)
        );
        assert_eq!(find_checksum(&manifest, "streamd.tar.gz").unwrap(), "b".repeat(64));
    }

    #[test]
    fn find_checksum_skips_invalid_length_hash() {
        let manifest = format!("{}  streamd.tar.gz\n", "a".repeat(10));
        let err = find_checksum(&manifest, "streamd.tar.gz").unwrap_err();
        assert!(matches!(err, UpdateError::NoChecksumEntry { .. }));
    }

    #[test]
    fn verify_checksum_ok_then_bitflip_mismatch() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("streamd.bin");
        std::fs::write(&artifact, b"hello world").unwrap();
        let digest = sha256_hex(&artifact).unwrap();
        let manifest = format!("{digest}  streamd.bin\n");

        Updater::verify_checksum(&artifact, &manifest, "streamd.bin").unwrap();

        std::fs::write(&artifact, b"Hello world").unwrap(); // bit flip
        let err = Updater::verify_checksum(&artifact, &manifest, "streamd.bin").unwrap_err();
        assert!(matches!(err, UpdateError::ChecksumMismatch { .. }));
    }

    #[test]
    fn atomic_replace_swaps_binary_and_removes_backup_on_success() {
        let dir = tempdir().unwrap();
        let current = dir.path().join("streamd");
        let new_binary = dir.path().join("streamd.new");
        std::fs::write(&current, b"old").unwrap();
        std::fs::write(&new_binary, b"new").unwrap();

        let updater = Updater::new("https://example.invalid/release", &current).unwrap();
        updater.atomic_replace(&new_binary).unwrap();

        assert_eq!(std::fs::read(&current).unwrap(), b"new");
        assert!(!current.with_extension("backup").exists());
        assert!(!current.with_extension("new").exists());
    }

    #[test]
    fn atomic_replace_works_when_the_new_binary_lives_in_a_different_directory() {
        // Stand-in for the real deployment shape: the extracted artifact
        // lives under a scratch directory (typically tmpfs), not next to
        // the installed binary. `atomic_replace` must stage it as a
        // sibling of `current_binary` before the final rename so that
        // rename is never attempted across filesystems.
        let install_dir = tempdir().unwrap();
        let scratch_dir = tempdir().unwrap();
        let current = install_dir.path().join("streamd");
        let new_binary = scratch_dir.path().join("extracted").join("streamd");
        std::fs::create_dir_all(new_binary.parent().unwrap()).unwrap();
        std::fs::write(&current, b"old").unwrap();
        std::fs::write(&new_binary, b"new").unwrap();

        let updater = Updater::new("https://example.invalid/release", &current).unwrap();
        updater.atomic_replace(&new_binary).unwrap();

        assert_eq!(std::fs::read(&current).unwrap(), b"new");
        assert!(!current.with_extension("backup").exists());
        assert!(!current.with_extension("new").exists());
        // The original scratch-dir copy is untouched; only the sibling
        // stage file (since removed) and the install path were touched.
        assert_eq!(std::fs::read(&new_binary).unwrap(), b"new");
    }

    #[test]
    fn select_asset_matches_platform_tag_substring() {
        let release = ReleaseIndex {
            tag_name: "v1.0.0".to_string(),
            published_at: "2026-01-01T00:00:00Z".to_string(),
            assets: vec![
                ReleaseAsset {
                    name: "streamd-x86_64-unknown-linux-gnu.tar.gz".to_string(),
                    browser_download_url: "https://example.invalid/a".to_string(),
                    size: 100,
                    content_type: "application/gzip".to_string(),
                },
                ReleaseAsset {
                    name: "checksums.txt".to_string(),
                    browser_download_url: "https://example.invalid/b".to_string(),
                    size: 1,
                    content_type: "text/plain".to_string(),
                },
            ],
        };
        let asset = Updater::select_asset(&release, "x86_64-unknown-linux-gnu").unwrap();
        assert_eq!(asset.name, "streamd-x86_64-unknown-linux-gnu.tar.gz");
        let checksums = Updater::select_checksums_asset(&release).unwrap();
        assert_eq!(checksums.name, "checksums.txt");
    }
}
