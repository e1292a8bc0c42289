//! Service unit (spec.md §6): a single text file consumed by an external
//! init system, fixed byte-for-byte by contract. `include_str!` embeds the
//! shipped reference file directly, so the embedded blob and the reference
//! file can never drift apart — the build fails outright if the reference
//! file is missing, which is the "build-time check" spec.md §6 calls for.

pub const SERVICE_UNIT: &str = include_str!("../../systemd/streamd.service");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeds_the_reference_unit_file_byte_for_byte() {
        let on_disk = std::fs::read_to_string(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../systemd/streamd.service"
        ))
        .unwrap();
        assert_eq!(SERVICE_UNIT, on_disk);
    }

    #[test]
    fn names_the_correct_binary_and_subcommand() {
        assert!(SERVICE_UNIT.contains("streamd run --config"));
        assert!(SERVICE_UNIT.contains("[Install]"));
    }
}
