//! Descriptor codec.
//!
//! Maps the structured parts of a [`PackDescription`] onto flat column
//! values: the per-extension size map and the extension presence bitmask.
//! Extension strings found in stored size maps are admitted into the
//! extension registry rather than rejected.

use crate::pack::{PackDescription, PackExt};
use crate::Result;
use std::collections::BTreeMap;

/// Returns the size of every file with a strictly positive recorded size.
pub fn size_map(desc: &PackDescription) -> BTreeMap<String, u64> {
    desc.file_sizes()
        .filter(|(_, size)| *size > 0)
        .map(|(ext, size)| (ext.extension().to_string(), size))
        .collect()
}

/// Sets the size of each listed extension, registering unknown extensions.
pub fn apply_size_map(desc: &mut PackDescription, sizes: &BTreeMap<String, u64>) -> Result<()> {
    for (extension, size) in sizes {
        let ext = PackExt::lookup_or_register(extension)?;
        desc.set_file_size(ext, *size);
    }
    Ok(())
}

/// Returns the OR of the bit of every extension marked present.
pub fn extension_bits(desc: &PackDescription) -> u32 {
    desc.file_exts().fold(0, |bits, ext| bits | ext.bit())
}

/// Marks present each registered extension whose bit is set.
pub fn apply_extension_bits(desc: &mut PackDescription, bits: u32) {
    for ext in PackExt::values() {
        if bits & ext.bit() != 0 {
            desc.add_file_ext(ext);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::PackSource;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const BUILTINS: [PackExt; 5] = [
        PackExt::PACK,
        PackExt::INDEX,
        PackExt::KEEP,
        PackExt::BITMAP_INDEX,
        PackExt::REFTABLE,
    ];

    fn fresh() -> PackDescription {
        PackDescription::new("pack-test-INSERT", PackSource::Insert)
    }

    /// Descriptors over the built-in extensions with arbitrary sizes and presence.
    fn description_strategy() -> impl Strategy<Value = PackDescription> {
        prop::collection::vec((0..5usize, 0..1_000_000u64, any::<bool>()), 0..8).prop_map(
            |files| {
                let mut desc = fresh();
                for (i, size, present) in files {
                    desc.set_file_size(BUILTINS[i], size);
                    if present {
                        desc.add_file_ext(BUILTINS[i]);
                    }
                }
                desc
            },
        )
    }

    #[test]
    fn test_pack_and_index_round_trip() {
        let mut desc = fresh();
        desc.record_file(PackExt::PACK, 100);
        desc.record_file(PackExt::INDEX, 20);

        let sizes = size_map(&desc);
        let bits = extension_bits(&desc);
        assert_eq!(bits, 0b11);

        let mut decoded = fresh();
        apply_size_map(&mut decoded, &sizes).unwrap();
        apply_extension_bits(&mut decoded, bits);

        assert_eq!(decoded.file_size(PackExt::PACK), 100);
        assert_eq!(decoded.file_size(PackExt::INDEX), 20);
        assert!(decoded.has_file_ext(PackExt::PACK));
        assert!(decoded.has_file_ext(PackExt::INDEX));
        assert!(!decoded.has_file_ext(PackExt::BITMAP_INDEX));
    }

    #[test]
    fn test_zero_sizes_are_dropped() {
        let mut desc = fresh();
        desc.set_file_size(PackExt::PACK, 10);
        desc.set_file_size(PackExt::KEEP, 0);
        let sizes = size_map(&desc);
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes.get("pack"), Some(&10));
    }

    #[test]
    fn test_unknown_extension_is_registered() {
        let mut sizes = BTreeMap::new();
        sizes.insert("codec_test_ext".to_string(), 7);

        let mut desc = fresh();
        apply_size_map(&mut desc, &sizes).unwrap();

        let ext = PackExt::lookup("codec_test_ext").unwrap();
        assert!(ext.position() >= 5);
        assert_eq!(desc.file_size(ext), 7);
        assert_eq!(size_map(&desc), sizes);
    }

    #[test]
    fn test_unassigned_bits_are_ignored() {
        let mut desc = fresh();
        apply_extension_bits(&mut desc, (1 << 31) | PackExt::KEEP.bit());
        assert!(desc.has_file_ext(PackExt::KEEP));
        assert_eq!(desc.file_exts().count(), 1);
    }

    proptest! {
        #[test]
        fn size_map_round_trips(desc in description_strategy()) {
            let sizes = size_map(&desc);
            let mut decoded = fresh();
            apply_size_map(&mut decoded, &sizes).unwrap();
            prop_assert_eq!(size_map(&decoded), sizes);
            for ext in BUILTINS {
                if desc.file_size(ext) > 0 {
                    prop_assert_eq!(decoded.file_size(ext), desc.file_size(ext));
                }
            }
        }

        #[test]
        fn extension_bits_round_trip(desc in description_strategy()) {
            let bits = extension_bits(&desc);
            let mut decoded = fresh();
            apply_extension_bits(&mut decoded, bits);
            prop_assert_eq!(extension_bits(&decoded), bits);
            for ext in BUILTINS {
                prop_assert_eq!(decoded.has_file_ext(ext), desc.has_file_ext(ext));
            }
        }
    }
}
