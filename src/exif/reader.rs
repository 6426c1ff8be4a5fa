use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime};
use img_parts::{Bytes, DynImage, ImageEXIF};
use nom_exif::{EntryValue, ExifIter, MediaParser, MediaSource};
use std::path::Path;
use std::time::SystemTime;

use super::fields;
use super::rational::{self, RationalMode, Ratio};
use super::record::{Field, FieldValue, MetadataRecord};
use super::tags;
use super::value::{TagMap, TagValue};
use crate::container::{self, ContainerImage};
use crate::pipeline::ImageKind;

/// Tag name → record field.
const FIELD_MAP: &[(&str, Field)] = &[
    ("Make", Field::Make),
    ("Model", Field::Model),
    ("FocalLengthIn35mmFilm", Field::FocalLength),
    ("FNumber", Field::Aperture),
    ("ExposureTime", Field::ShutterSpeed),
    ("ISOSpeedRatings", Field::Iso),
    ("LensModel", Field::Lens),
];

const NAIVE_FORMATS: &[&str] = &["%Y:%m:%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Somewhere raw EXIF tags can be read from.
pub trait MetadataSource {
    /// All readable tags by symbolic name. Missing metadata is an empty map,
    /// not an error.
    fn raw_tags(&self) -> Result<TagMap>;
}

/// EXIF stored as a raw blob inside a JPEG APP1 segment or a PNG/WebP chunk.
pub struct EmbeddedBlob<'a> {
    path: &'a Path,
}

impl<'a> EmbeddedBlob<'a> {
    pub fn new(path: &'a Path) -> Self {
        Self { path }
    }
}

impl MetadataSource for EmbeddedBlob<'_> {
    fn raw_tags(&self) -> Result<TagMap> {
        let bytes = std::fs::read(self.path).context("Failed to read image file")?;
        match embedded_exif(&bytes)? {
            Some(tiff) => fields::tag_map(&tiff),
            None => {
                log::debug!("No EXIF data found in {}", self.path.display());
                Ok(TagMap::new())
            }
        }
    }
}

/// EXIF read through the container's own metadata structures (HEIF items).
///
/// The container's EXIF item is decoded with the same tag-level reader as
/// [`EmbeddedBlob`], so the two sources agree on a blob they share. Files
/// that can't be opened as containers are read with nom-exif.
pub struct ContainerNative<'a> {
    path: &'a Path,
    container: Option<&'a dyn ContainerImage>,
}

impl<'a> ContainerNative<'a> {
    pub fn new(path: &'a Path) -> Self {
        Self { path, container: None }
    }

    /// Read from an already opened container instead of reopening `path`.
    pub fn with_container(path: &'a Path, container: &'a dyn ContainerImage) -> Self {
        Self { path, container: Some(container) }
    }

    fn item_tags(&self, container: &dyn ContainerImage) -> Result<TagMap> {
        match container::container_exif(container) {
            Some(blob) => fields::tag_map(&blob),
            None => {
                log::debug!("No EXIF item in {}", self.path.display());
                Ok(TagMap::new())
            }
        }
    }

    fn nom_exif_tags(&self) -> Result<TagMap> {
        let mut parser = MediaParser::new();
        let ms = match MediaSource::file_path(self.path) {
            Ok(ms) => ms,
            Err(e) => {
                log::debug!("No parseable metadata in {}: {e}", self.path.display());
                return Ok(TagMap::new());
            }
        };

        let iter: ExifIter = match parser.parse(ms) {
            Ok(iter) => iter,
            Err(_) => {
                log::debug!("No EXIF data found in {}", self.path.display());
                return Ok(TagMap::new());
            }
        };

        let mut map = TagMap::new();
        for entry in iter {
            // IFD1 describes the thumbnail, not the photo.
            if entry.ifd_index() == 1 {
                continue;
            }
            let Some(name) = tags::tag_name_any(entry.tag_code()) else {
                continue;
            };
            match entry.get_result() {
                Ok(value) => map.insert(name, from_entry_value(value)),
                // Keep the tag present so the date fallback chain still runs.
                Err(e) => {
                    log::debug!("{name} in {}: {e}", self.path.display());
                    map.insert(name, TagValue::Text(String::new()));
                }
            }
        }
        Ok(map)
    }
}

impl MetadataSource for ContainerNative<'_> {
    fn raw_tags(&self) -> Result<TagMap> {
        if let Some(container) = self.container {
            return self.item_tags(container);
        }
        match container::open_container(self.path) {
            Ok(opened) => self.item_tags(opened.as_ref()),
            Err(e) => {
                log::debug!("{e:#}; reading {} with nom-exif", self.path.display());
                self.nom_exif_tags()
            }
        }
    }
}

fn from_entry_value(value: &EntryValue) -> TagValue {
    match value {
        EntryValue::Text(s) => TagValue::Text(s.clone()),
        EntryValue::URational(r) => TagValue::Rational(Ratio::new(r.0 as i64, r.1 as i64)),
        EntryValue::IRational(r) => TagValue::Rational(Ratio::new(r.0 as i64, r.1 as i64)),
        EntryValue::U8(v) => TagValue::Integer(*v as i64),
        EntryValue::U16(v) => TagValue::Integer(*v as i64),
        EntryValue::U32(v) => TagValue::Integer(*v as i64),
        EntryValue::U64(v) => TagValue::Integer(*v as i64),
        EntryValue::I8(v) => TagValue::Integer(*v as i64),
        EntryValue::I16(v) => TagValue::Integer(*v as i64),
        EntryValue::I32(v) => TagValue::Integer(*v as i64),
        EntryValue::I64(v) => TagValue::Integer(*v),
        EntryValue::F32(v) => TagValue::Float(*v as f64),
        EntryValue::F64(v) => TagValue::Float(*v),
        // nom-exif resolves capture times to an offset (the local zone when
        // the file has none); RFC 3339 keeps the wall clock recoverable.
        EntryValue::Time(t) => TagValue::Text(t.to_rfc3339()),
        EntryValue::Undefined(bytes) => TagValue::Bytes(bytes.clone()),
        EntryValue::URationalArray(items) => TagValue::List(
            items
                .iter()
                .map(|r| TagValue::Rational(Ratio::new(r.0 as i64, r.1 as i64)))
                .collect(),
        ),
        EntryValue::IRationalArray(items) => TagValue::List(
            items
                .iter()
                .map(|r| TagValue::Rational(Ratio::new(r.0 as i64, r.1 as i64)))
                .collect(),
        ),
        #[allow(unreachable_patterns)]
        other => TagValue::Text(other.to_string()),
    }
}

/// Locate the raw EXIF blob in a JPEG, PNG or WebP file.
///
/// Returns bare TIFF data, or `None` for formats img-parts doesn't handle
/// and files without EXIF.
pub fn embedded_exif(bytes: &[u8]) -> Result<Option<Vec<u8>>> {
    let image = DynImage::from_bytes(Bytes::copy_from_slice(bytes))
        .map_err(|e| anyhow::anyhow!("Failed to parse image container: {e}"))?;
    Ok(image
        .and_then(|img| img.exif())
        .map(|exif| super::tiff::normalize_payload(&exif).to_vec()))
}

/// Build a [`MetadataRecord`] from raw tags.
///
/// `mtime` is the last-resort capture time when `DateTimeOriginal` exists but
/// can't be parsed.
pub fn record_from_tags(raw: &TagMap, mtime: Option<SystemTime>) -> MetadataRecord {
    let mut record = MetadataRecord::new();

    for (name, field) in FIELD_MAP {
        if tags::is_excluded(name) {
            continue;
        }
        let Some(value) = raw.get(name) else {
            continue;
        };
        if let Some(value) = normalize_field(*field, value.clone()) {
            record.set(*field, value);
        }
    }

    if let Some(taken) = date_taken(raw, mtime) {
        record.set(Field::DateTaken, FieldValue::Text(taken));
    }

    record
}

fn normalize_field(field: Field, value: TagValue) -> Option<FieldValue> {
    let mode = match field {
        Field::ShutterSpeed => RationalMode::FractionString,
        _ => RationalMode::Decimal,
    };
    match rational::normalize(value.first()?, mode) {
        TagValue::Text(s) => clean_text(&s).map(FieldValue::Text),
        TagValue::Bytes(b) => clean_text(&String::from_utf8_lossy(&b)).map(FieldValue::Text),
        TagValue::Integer(v) => Some(FieldValue::Integer(v)),
        TagValue::Float(v) => Some(FieldValue::Float(v)),
        TagValue::Rational(r) => Some(FieldValue::Float(r.to_decimal())),
        TagValue::List(_) => None,
    }
}

fn clean_text(text: &str) -> Option<String> {
    let trimmed = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn text_of(value: &TagValue) -> Option<String> {
    match value.clone().first()? {
        TagValue::Text(s) => clean_text(&s),
        TagValue::Bytes(b) => clean_text(&String::from_utf8_lossy(&b)),
        _ => None,
    }
}

/// Parse an EXIF timestamp to its wall-clock value.
pub fn parse_exif_datetime(text: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

fn date_taken(raw: &TagMap, mtime: Option<SystemTime>) -> Option<String> {
    let original = raw.get("DateTimeOriginal")?;

    let parsed = text_of(original)
        .and_then(|s| parse_exif_datetime(&s))
        .or_else(|| {
            raw.get("DateTime")
                .and_then(text_of)
                .and_then(|s| parse_exif_datetime(&s))
        })
        .or_else(|| mtime.map(|t| DateTime::<Local>::from(t).naive_local()))?;

    Some(parsed.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

/// Read and normalize a file's metadata through `source`.
pub fn read_record(source: &dyn MetadataSource, path: &Path) -> Result<MetadataRecord> {
    let raw = source.raw_tags()?;
    let mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();
    Ok(record_from_tags(&raw, mtime))
}

/// Extract the normalized metadata record for an image.
///
/// Never fails: unreadable files and missing metadata both yield an empty
/// record (the former with a warning).
pub fn extract_metadata(path: &Path, kind: ImageKind) -> MetadataRecord {
    let result = match kind {
        ImageKind::Heif | ImageKind::Gif => read_record(&ContainerNative::new(path), path),
        ImageKind::Jpeg | ImageKind::Png | ImageKind::WebP => {
            read_record(&EmbeddedBlob::new(path), path)
        }
    };

    result.unwrap_or_else(|e| {
        log::warn!("Failed to read metadata from {}: {e:#}", path.display());
        MetadataRecord::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::tests::{FakeContainer, marked_pixels};
    use crate::exif::tags::Section;
    use crate::exif::tiff::{ByteOrder, Entry, ExifBlob};
    use crate::exif::writer::encode_jpeg;
    use image::{DynamicImage, RgbImage};
    use tempfile::TempDir;

    fn camera_tags() -> TagMap {
        let mut raw = TagMap::new();
        raw.insert("Make", TagValue::Text("Acme\0\0".into()));
        raw.insert("Model", TagValue::Text("  Pocket 9 ".into()));
        raw.insert("FNumber", TagValue::Rational(Ratio::new(28, 10)));
        raw.insert("ExposureTime", TagValue::Rational(Ratio::new(2, 1000)));
        raw.insert("ISOSpeedRatings", TagValue::List(vec![TagValue::Integer(200), TagValue::Integer(0)]));
        raw.insert("FocalLengthIn35mmFilm", TagValue::Integer(26));
        raw.insert("LensModel", TagValue::Bytes(b"Acme 26mm f/2.8\0".to_vec()));
        raw.insert("DateTimeOriginal", TagValue::Text("2023:05:14 10:22:31".into()));
        raw.insert("GPSLatitude", TagValue::Rational(Ratio::new(48, 1)));
        raw.insert("OffsetTimeOriginal", TagValue::Text("+02:00".into()));
        raw
    }

    // ── field mapping ────────────────────────────────────────────────

    #[test]
    fn maps_and_normalizes_fields() {
        let record = record_from_tags(&camera_tags(), None);
        assert_eq!(record.get(Field::Make), Some(&FieldValue::Text("Acme".into())));
        assert_eq!(record.get(Field::Model), Some(&FieldValue::Text("Pocket 9".into())));
        assert_eq!(record.get(Field::Aperture), Some(&FieldValue::Float(2.8)));
        assert_eq!(record.get(Field::ShutterSpeed), Some(&FieldValue::Text("1/500s".into())));
        assert_eq!(record.get(Field::Iso), Some(&FieldValue::Integer(200)));
        assert_eq!(record.get(Field::FocalLength), Some(&FieldValue::Integer(26)));
        assert_eq!(record.get(Field::Lens), Some(&FieldValue::Text("Acme 26mm f/2.8".into())));
        assert_eq!(
            record.get(Field::DateTaken),
            Some(&FieldValue::Text("2023-05-14T10:22:31Z".into()))
        );
    }

    #[test]
    fn no_location_or_offset_keys() {
        let json = serde_json::to_string(&record_from_tags(&camera_tags(), None)).unwrap();
        assert!(!json.contains("GPS"));
        assert!(!json.contains("Offset"));
        assert!(!json.contains("null"));
    }

    #[test]
    fn empty_values_are_omitted() {
        let mut raw = TagMap::new();
        raw.insert("Make", TagValue::Text("\0\0 ".into()));
        let record = record_from_tags(&raw, None);
        assert!(record.is_empty());
    }

    // ── dateTaken ────────────────────────────────────────────────────

    #[test]
    fn offset_timestamps_keep_wall_clock() {
        let mut raw = TagMap::new();
        raw.insert("DateTimeOriginal", TagValue::Text("2023-05-14T10:22:31+09:00".into()));
        let record = record_from_tags(&raw, None);
        assert_eq!(
            record.get(Field::DateTaken),
            Some(&FieldValue::Text("2023-05-14T10:22:31Z".into()))
        );
    }

    #[test]
    fn falls_back_to_datetime_then_mtime() {
        let mut raw = TagMap::new();
        raw.insert("DateTimeOriginal", TagValue::Text("garbage".into()));
        raw.insert("DateTime", TagValue::Text("2020:01:02 03:04:05".into()));
        assert_eq!(
            record_from_tags(&raw, None).get(Field::DateTaken),
            Some(&FieldValue::Text("2020-01-02T03:04:05Z".into()))
        );

        let mut raw = TagMap::new();
        raw.insert("DateTimeOriginal", TagValue::Text("garbage".into()));
        let record = record_from_tags(&raw, Some(SystemTime::now()));
        let taken = record.get(Field::DateTaken).and_then(FieldValue::as_text).unwrap();
        assert!(taken.ends_with('Z'));
        assert_eq!(taken.len(), "2023-05-14T10:22:31Z".len());
    }

    #[test]
    fn no_original_timestamp_means_no_date() {
        let mut raw = TagMap::new();
        raw.insert("DateTime", TagValue::Text("2020:01:02 03:04:05".into()));
        assert!(record_from_tags(&raw, Some(SystemTime::now())).get(Field::DateTaken).is_none());
    }

    // ── sources ──────────────────────────────────────────────────────

    #[test]
    fn embedded_blob_from_jpeg() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo.jpg");

        let order = ByteOrder::Big;
        let mut blob = ExifBlob::new(order);
        blob.set(Section::Primary, Entry::ascii(tags::MAKE, "Acme"));
        blob.set(Section::Exif, Entry::rational(tags::F_NUMBER, 28, 10, order));
        blob.set(Section::Exif, Entry::ascii(tags::DATE_TIME_ORIGINAL, "2023:05:14 10:22:31"));
        blob.set(Section::Gps, Entry::ascii(tags::GPS_LATITUDE_REF, "N"));
        let tiff = blob.encode().unwrap();

        let img = DynamicImage::ImageRgb8(RgbImage::new(16, 8));
        std::fs::write(&path, encode_jpeg(&img, 90, Some(&tiff)).unwrap()).unwrap();

        let record = extract_metadata(&path, ImageKind::Jpeg);
        assert_eq!(record.get(Field::Make), Some(&FieldValue::Text("Acme".into())));
        assert_eq!(record.get(Field::Aperture), Some(&FieldValue::Float(2.8)));
        assert_eq!(
            record.get(Field::DateTaken),
            Some(&FieldValue::Text("2023-05-14T10:22:31Z".into()))
        );
    }

    /// Blob with an unparseable `DateTimeOriginal` and a two-value ISO.
    fn damaged_date_blob() -> Vec<u8> {
        let order = ByteOrder::Little;
        let mut blob = ExifBlob::new(order);
        blob.set(Section::Primary, Entry::ascii(tags::MAKE, "Acme"));
        blob.set(Section::Primary, Entry::ascii(tags::DATE_TIME, "2020:01:02 03:04:05"));
        blob.set(Section::Exif, Entry::ascii(tags::DATE_TIME_ORIGINAL, "0000:00:00 00:00:00"));
        let mut iso = Entry::short(tags::ISO_SPEED_RATINGS, 200, order);
        iso.count = 2;
        iso.data.extend_from_slice(&order.u16_bytes(0));
        blob.set(Section::Exif, iso);
        blob.encode().unwrap()
    }

    fn jpeg_with(dir: &TempDir, name: &str, tiff: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let img = DynamicImage::ImageRgb8(RgbImage::new(16, 8));
        std::fs::write(&path, encode_jpeg(&img, 90, Some(tiff)).unwrap()).unwrap();
        path
    }

    #[test]
    fn both_sources_agree_on_shared_blob() {
        let dir = TempDir::new().unwrap();
        let blob = damaged_date_blob();
        let path = jpeg_with(&dir, "photo.jpg", &blob);

        let mut heif_item = 6u32.to_be_bytes().to_vec();
        heif_item.extend_from_slice(b"Exif\0\0");
        heif_item.extend_from_slice(&blob);
        let container = FakeContainer {
            exif: Some(heif_item),
            blocks: Vec::new(),
            pixels: marked_pixels(16, 8, 0),
        };

        let embedded = read_record(&EmbeddedBlob::new(&path), &path).unwrap();
        let native = read_record(&ContainerNative::with_container(&path, &container), &path).unwrap();
        assert_eq!(embedded, native);
        assert_eq!(
            native.get(Field::DateTaken),
            Some(&FieldValue::Text("2020-01-02T03:04:05Z".into()))
        );
        assert_eq!(native.get(Field::Iso), Some(&FieldValue::Integer(200)));
        assert_eq!(native.get(Field::Make), Some(&FieldValue::Text("Acme".into())));
    }

    #[test]
    fn container_without_exif_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo.heic");
        std::fs::write(&path, b"placeholder").unwrap();
        let container = FakeContainer { exif: None, blocks: Vec::new(), pixels: marked_pixels(2, 2, 0) };
        let record = read_record(&ContainerNative::with_container(&path, &container), &path).unwrap();
        assert!(record.is_empty());
    }

    #[test]
    fn unopenable_container_still_falls_back_on_dates() {
        // Not a HEIF file, so the nom-exif reader handles it.
        let dir = TempDir::new().unwrap();
        let path = jpeg_with(&dir, "photo.jpg", &damaged_date_blob());
        let record = read_record(&ContainerNative::new(&path), &path).unwrap();
        assert_eq!(
            record.get(Field::DateTaken),
            Some(&FieldValue::Text("2020-01-02T03:04:05Z".into()))
        );
    }

    #[test]
    fn no_metadata_is_empty_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.jpg");
        let img = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        std::fs::write(&path, encode_jpeg(&img, 90, None).unwrap()).unwrap();
        assert!(extract_metadata(&path, ImageKind::Jpeg).is_empty());
    }

    #[test]
    fn unreadable_file_is_empty_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(extract_metadata(&path, ImageKind::Jpeg).is_empty());
        assert!(extract_metadata(&dir.path().join("missing.heic"), ImageKind::Heif).is_empty());
    }
}
