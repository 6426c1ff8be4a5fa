//! Location and timezone stripping for raw EXIF blobs.

use std::fmt;

use super::fields;
use super::tags::{self, Section};

/// The original blob, handed back when it could not be sanitized.
///
/// Sanitization fails open: the caller decides whether embedding the
/// unsanitized blob is acceptable.
#[derive(Debug)]
pub struct Passthrough {
    blob: Vec<u8>,
    pub reason: String,
}

impl Passthrough {
    pub fn into_blob(self) -> Vec<u8> {
        self.blob
    }
}

impl fmt::Display for Passthrough {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EXIF left unsanitized: {}", self.reason)
    }
}

impl std::error::Error for Passthrough {}

/// Remove the GPS section and every excluded tag from `blob`.
///
/// Returns bare TIFF data. Entries with no known name are kept.
pub fn sanitize(blob: &[u8]) -> Result<Vec<u8>, Passthrough> {
    let passthrough = |reason: String| Passthrough { blob: blob.to_vec(), reason };

    fields::rewrite(
        blob,
        |section, tag| {
            section != Section::Gps
                && tags::tag_name(section, tag).is_none_or(|name| !tags::is_excluded(name))
        },
        None,
    )
    .map_err(|e| passthrough(format!("{e:#}")))
}

/// Sanitize, logging and returning the input unchanged on failure.
pub fn sanitize_or_passthrough(blob: &[u8]) -> Vec<u8> {
    match sanitize(blob) {
        Ok(clean) => clean,
        Err(p) => {
            log::warn!("{p}");
            p.into_blob()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif::tiff::{ByteOrder, Entry, ExifBlob};

    fn tagged_blob() -> Vec<u8> {
        let order = ByteOrder::Little;
        let mut blob = ExifBlob::new(order);
        blob.set(Section::Primary, Entry::ascii(tags::MAKE, "Acme"));
        // Misplaced timezone tag in IFD0 must go too.
        blob.set(Section::Primary, Entry::ascii(tags::OFFSET_TIME, "+02:00"));
        blob.set(Section::Exif, Entry::ascii(tags::DATE_TIME_ORIGINAL, "2023:05:14 10:22:31"));
        blob.set(Section::Exif, Entry::ascii(tags::OFFSET_TIME_ORIGINAL, "+02:00"));
        blob.set(Section::Exif, Entry::ascii(tags::SUB_SEC_TIME_ORIGINAL, "123"));
        blob.set(Section::Exif, Entry::rational(tags::F_NUMBER, 28, 10, order));
        blob.set(Section::Gps, Entry::ascii(tags::GPS_LATITUDE_REF, "N"));
        blob.set(Section::Gps, Entry::rational(tags::GPS_LATITUDE, 48, 1, order));
        blob.set(Section::Interop, Entry::ascii(0x0001, "R98"));
        blob.encode().unwrap()
    }

    #[test]
    fn strips_gps_and_offsets_everywhere() {
        let clean = sanitize(&tagged_blob()).unwrap();
        let decoded = ExifBlob::decode(&clean).unwrap();

        assert!(!decoded.has_section(Section::Gps));
        for (section, entry) in decoded.iter() {
            if let Some(name) = tags::tag_name(section, entry.tag) {
                assert!(!tags::is_excluded(name), "{name} survived in {}", section.name());
            }
        }
    }

    #[test]
    fn kept_entries_are_byte_identical() {
        let original = ExifBlob::decode(&tagged_blob()).unwrap();
        let clean = ExifBlob::decode(&sanitize(&tagged_blob()).unwrap()).unwrap();

        for (section, tag) in [
            (Section::Primary, tags::MAKE),
            (Section::Exif, tags::F_NUMBER),
            (Section::Exif, tags::DATE_TIME_ORIGINAL),
            (Section::Interop, 0x0001),
        ] {
            let before = original.get(section, tag).unwrap();
            assert_eq!(clean.get(section, tag), Some(before), "0x{tag:04x} in {}", section.name());
        }
        assert_eq!(clean.order, ByteOrder::Little);
    }

    #[test]
    fn interop_ids_are_not_mistaken_for_gps() {
        // 0x0001 is GPSLatitudeRef in GPS but InteroperabilityIndex in Interop.
        let clean = sanitize(&tagged_blob()).unwrap();
        let decoded = ExifBlob::decode(&clean).unwrap();
        assert!(decoded.get(Section::Interop, 0x0001).is_some());
    }

    #[test]
    fn accepts_app1_prefix() {
        let mut wrapped = b"Exif\0\0".to_vec();
        wrapped.extend_from_slice(&tagged_blob());
        let clean = sanitize(&wrapped).unwrap();
        assert!(clean.starts_with(b"II*\0"));
    }

    #[test]
    fn idempotent() {
        let once = sanitize(&tagged_blob()).unwrap();
        let twice = sanitize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn fails_open() {
        let garbage = b"definitely not a TIFF header".to_vec();
        let err = sanitize(&garbage).unwrap_err();
        assert!(!err.reason.is_empty());
        assert_eq!(err.into_blob(), garbage);
        assert_eq!(sanitize_or_passthrough(&garbage), garbage);
    }
}
