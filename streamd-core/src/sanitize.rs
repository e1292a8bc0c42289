//! Name Sanitizer (C2).
//!
//! Deterministic map from an arbitrary device name to a filesystem-safe
//! identifier used as a configuration key, symlink basename, and lock
//! filename. Byte-exact reproducibility is load-bearing: any divergence
//! from this contract silently mis-routes configuration (spec.md §4.2, §9).

const MAX_INPUT_BYTES: usize = 1024;
const MAX_OUTPUT_BYTES: usize = 64;

fn is_disallowed_control(byte: u8) -> bool {
    matches!(byte, 0x00..=0x08 | 0x0B | 0x0C | 0x0E..=0x1F | 0x7F)
}

/// Fallback identifier used whenever the input fails validation.
///
/// `now` is injected so callers (and tests) get deterministic output instead
/// of depending on wall-clock time.
fn fallback(now_unix_secs: u64) -> String {
    format!("unknown_device_{now_unix_secs}")
}

/// Sanitize `input` into a filesystem- and config-key-safe identifier.
///
/// See module docs and spec.md §4.2 for the exact contract. `now_unix_secs`
/// is only consulted on the fallback path.
pub fn sanitize(input: &str, now_unix_secs: u64) -> String {
    let bytes = input.as_bytes();

    if bytes.len() > MAX_INPUT_BYTES || bytes.iter().any(|&b| is_disallowed_control(b)) {
        return fallback(now_unix_secs);
    }

    if input.contains("..") || input.contains('/') || input.contains('$') || input.starts_with('-')
    {
        return fallback(now_unix_secs);
    }

    let truncated = &bytes[..bytes.len().min(MAX_OUTPUT_BYTES)];

    let mut mapped: Vec<u8> = Vec::with_capacity(truncated.len());
    for &b in truncated {
        if b.is_ascii_alphanumeric() {
            mapped.push(b);
        } else {
            mapped.push(b'_');
        }
    }

    let collapsed = collapse_underscore_runs(&mapped);
    let trimmed = trim_underscores(&collapsed);

    if trimmed.is_empty() {
        return fallback(now_unix_secs);
    }

    let mut result = String::from_utf8(trimmed).expect("ASCII-only bytes are valid UTF-8");
    if result.as_bytes()[0].is_ascii_digit() {
        result = format!("dev_{result}");
        // The prefix can push an already-64-byte result past the output
        // cap; re-truncate and drop any underscore the cut exposes at the
        // end so the hard 64-byte invariant holds regardless of prefixing.
        if result.len() > MAX_OUTPUT_BYTES {
            result.truncate(MAX_OUTPUT_BYTES);
            while result.ends_with('_') {
                result.pop();
            }
        }
    }

    result
}

fn collapse_underscore_runs(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut prev_underscore = false;
    for &b in input {
        if b == b'_' {
            if !prev_underscore {
                out.push(b);
            }
            prev_underscore = true;
        } else {
            out.push(b);
            prev_underscore = false;
        }
    }
    out
}

fn trim_underscores(input: &[u8]) -> Vec<u8> {
    let start = input.iter().position(|&b| b != b'_').unwrap_or(input.len());
    let end = input.iter().rposition(|&b| b != b'_').map(|i| i + 1).unwrap_or(0);
    if start >= end {
        Vec::new()
    } else {
        input[start..end].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: u64 = 1_700_000_000;

    #[test]
    fn plain_name_passes_through() {
        assert_eq!(sanitize("USB Audio Device", T), "USB_Audio_Device");
    }

    #[test]
    fn collapses_runs_and_trims() {
        assert_eq!(sanitize("  weird---name!!  ", T), "weird_name");
    }

    #[test]
    fn leading_digit_gets_prefixed() {
        assert_eq!(sanitize("2i2 Audio", T), "dev_2i2_Audio");
    }

    #[test]
    fn rejects_path_traversal() {
        assert_eq!(sanitize("../etc/passwd", T), fallback(T));
    }

    #[test]
    fn rejects_path_separator() {
        assert_eq!(sanitize("foo/bar", T), fallback(T));
    }

    #[test]
    fn rejects_dollar_sign() {
        assert_eq!(sanitize("foo$(rm -rf)", T), fallback(T));
    }

    #[test]
    fn rejects_leading_dash() {
        assert_eq!(sanitize("-rf", T), fallback(T));
    }

    #[test]
    fn rejects_control_characters() {
        assert_eq!(sanitize("bad\x01name", T), fallback(T));
    }

    #[test]
    fn tolerates_tab_lf_cr_but_maps_to_underscore() {
        // HT/LF/CR are not rejected outright but are outside [A-Za-z0-9]
        // so they still collapse to underscores.
        assert_eq!(sanitize("a\tb\nc\rd", T), "a_b_c_d");
    }

    #[test]
    fn truncates_to_64_bytes() {
        let long = "a".repeat(200);
        let out = sanitize(&long, T);
        assert_eq!(out.len(), 64);
        assert!(out.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'));
    }

    #[test]
    fn truncates_to_64_bytes_even_with_leading_digit_prefix() {
        // A 64-byte all-digit input maps straight through to a 64-byte
        // leading-digit result; adding "dev_" must not push the output
        // past the 64-byte hard cap.
        let long = "9".repeat(64);
        let out = sanitize(&long, T);
        assert!(out.len() <= 64, "output was {} bytes", out.len());
        assert!(out.starts_with("dev_"));
        assert!(!out.as_bytes()[0].is_ascii_digit());
        assert!(!out.ends_with('_'));
        assert!(out.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'));
    }

    #[test]
    fn rejects_over_1024_bytes() {
        let long = "a".repeat(1025);
        assert_eq!(sanitize(&long, T), fallback(T));
    }

    #[test]
    fn empty_after_stripping_falls_back() {
        assert_eq!(sanitize("!!!", T), fallback(T));
    }

    #[test]
    fn deterministic_for_same_input() {
        assert_eq!(sanitize("USB Audio Device", T), sanitize("USB Audio Device", T));
    }

    #[test]
    fn never_starts_with_digit_or_contains_disallowed_chars() {
        let cases = [
            "USB Audio Device",
            "2i2",
            "Blue Yeti X",
            "  spacey  ",
            "ALL_CAPS-99",
        ];
        for c in cases {
            let out = sanitize(c, T);
            assert!(out.len() <= 64);
            assert!(!out.is_empty());
            assert!(out.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'));
            assert!(!out.as_bytes()[0].is_ascii_digit());
        }
    }
}
