//! Tag-level access to raw EXIF blobs.
//!
//! kamadak-exif parses and rewrites blobs. When it rejects one (unknown
//! value types, strip thumbnails, sub-IFDs hanging off IFD1, structural
//! damage) the in-crate TIFF codec takes over, so a blob is only given up
//! on when both fail.

use anyhow::{Result, anyhow, bail, ensure};
use kamadak_exif::experimental::Writer;
use kamadak_exif::{Context, Exif, Field, In, Reader, Tag, Value};
use std::io::Cursor;

use super::rational::Ratio;
use super::tags::{self, Section};
use super::tiff::{ExifBlob, normalize_payload};
use super::value::{TagMap, TagValue};

/// TIFF strip layout tags; thumbnails stored this way go through the codec.
const STRIP_OFFSETS: u16 = 0x0111;
const STRIP_BYTE_COUNTS: u16 = 0x0117;

fn parse(tiff: &[u8]) -> Result<Exif> {
    Reader::new()
        .read_raw(tiff.to_vec())
        .map_err(|e| anyhow!("kamadak-exif could not parse EXIF: {e}"))
}

/// The sub-section a parsed field belongs to.
fn section_of(field: &Field) -> Option<Section> {
    let primary = field.ifd_num == In::PRIMARY;
    match field.tag.context() {
        Context::Tiff if primary => Some(Section::Primary),
        Context::Tiff if field.ifd_num == In::THUMBNAIL => Some(Section::Thumbnail),
        Context::Exif if primary => Some(Section::Exif),
        Context::Gps if primary => Some(Section::Gps),
        Context::Interop if primary => Some(Section::Interop),
        _ => None,
    }
}

/// Pointers and thumbnail offsets are regenerated on write.
fn is_structural(section: Section, tag: u16) -> bool {
    match section {
        Section::Primary => matches!(
            tag,
            tags::EXIF_IFD_POINTER | tags::GPS_IFD_POINTER | tags::INTEROP_IFD_POINTER
        ),
        Section::Exif => tag == tags::INTEROP_IFD_POINTER,
        Section::Thumbnail => matches!(
            tag,
            tags::JPEG_INTERCHANGE_FORMAT | tags::JPEG_INTERCHANGE_FORMAT_LENGTH
        ),
        Section::Gps | Section::Interop => false,
    }
}

fn collapse(values: Vec<TagValue>) -> Option<TagValue> {
    match values.len() {
        0 => None,
        1 => values.into_iter().next(),
        _ => Some(TagValue::List(values)),
    }
}

fn ints<T: Copy + Into<i64>>(items: &[T]) -> Option<TagValue> {
    collapse(items.iter().map(|v| TagValue::Integer((*v).into())).collect())
}

fn tag_value(value: &Value) -> Option<TagValue> {
    match value {
        Value::Ascii(strings) => Some(TagValue::Text(
            strings
                .first()
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .unwrap_or_default(),
        )),
        Value::Undefined(bytes, _) => Some(TagValue::Bytes(bytes.clone())),
        Value::Byte(v) => ints(v),
        Value::SByte(v) => ints(v),
        Value::Short(v) => ints(v),
        Value::SShort(v) => ints(v),
        Value::Long(v) => ints(v),
        Value::SLong(v) => ints(v),
        Value::Rational(v) => collapse(
            v.iter()
                .map(|r| TagValue::Rational(Ratio::new(r.num as i64, r.denom as i64)))
                .collect(),
        ),
        Value::SRational(v) => collapse(
            v.iter()
                .map(|r| TagValue::Rational(Ratio::new(r.num as i64, r.denom as i64)))
                .collect(),
        ),
        Value::Float(v) => collapse(v.iter().map(|f| TagValue::Float(*f as f64)).collect()),
        Value::Double(v) => collapse(v.iter().map(|f| TagValue::Float(*f)).collect()),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

/// Fields of the photo's own sections, IFD0 first, then Exif, GPS, Interop.
fn photo_fields(exif: &Exif) -> Vec<(Section, &Field)> {
    let mut fields: Vec<(Section, &Field)> = exif
        .fields()
        .filter_map(|f| section_of(f).map(|s| (s, f)))
        .filter(|(s, f)| *s != Section::Thumbnail && !is_structural(*s, f.tag.number()))
        .collect();
    fields.sort_by_key(|(section, _)| *section);
    fields
}

/// Flatten a raw blob to a [`TagMap`]. Thumbnail tags are skipped.
pub fn tag_map(blob: &[u8]) -> Result<TagMap> {
    let tiff = normalize_payload(blob);
    let mut map = TagMap::new();

    match parse(tiff) {
        Ok(exif) => {
            for (section, field) in photo_fields(&exif) {
                let Some(name) = tags::tag_name(section, field.tag.number()) else {
                    continue;
                };
                if let Some(value) = tag_value(&field.value) {
                    map.insert(name, value);
                }
            }
        }
        Err(e) => {
            log::debug!("{e:#}; decoding with the TIFF codec");
            let blob = ExifBlob::decode(tiff)?;
            for (section, entry) in blob.iter() {
                if section == Section::Thumbnail {
                    continue;
                }
                let Some(name) = tags::tag_name(section, entry.tag) else {
                    continue;
                };
                if let Some(value) = entry.value(blob.order) {
                    map.insert(name, value);
                }
            }
        }
    }
    Ok(map)
}

/// IFD0 `Orientation`, if the blob has one.
pub fn orientation(blob: &[u8]) -> Result<Option<u16>> {
    let tiff = normalize_payload(blob);
    match parse(tiff) {
        Ok(exif) => Ok(exif
            .get_field(Tag::Orientation, In::PRIMARY)
            .and_then(|f| f.value.get_uint(0))
            .and_then(|v| u16::try_from(v).ok())),
        Err(e) => {
            log::debug!("{e:#}; decoding with the TIFF codec");
            Ok(ExifBlob::decode(tiff)?.orientation())
        }
    }
}

/// Re-encode a blob, keeping only the entries `keep` accepts and, when
/// given, replacing an existing IFD0 `Orientation`.
///
/// Output is bare TIFF data in the blob's own byte order. Sections left
/// empty are dropped together with their pointers.
pub fn rewrite(
    blob: &[u8],
    keep: impl Fn(Section, u16) -> bool,
    orientation: Option<u16>,
) -> Result<Vec<u8>> {
    let tiff = normalize_payload(blob);
    match parse(tiff).and_then(|exif| write_fields(&exif, &keep, orientation)) {
        Ok(out) => Ok(out),
        Err(e) => {
            log::debug!("{e:#}; re-encoding with the TIFF codec");
            let mut decoded = ExifBlob::decode(tiff)?;
            decoded.retain(|section, entry| keep(section, entry.tag));
            if let Some(value) = orientation {
                if decoded.orientation().is_some() {
                    decoded.set_orientation(value);
                }
            }
            decoded.encode()
        }
    }
}

/// Re-encode a blob unchanged, dropping unreferenced bytes.
pub fn reencode(blob: &[u8]) -> Result<Vec<u8>> {
    rewrite(blob, |_, _| true, None)
}

fn thumbnail(exif: &Exif) -> Option<&[u8]> {
    let offset = exif
        .get_field(Tag::JPEGInterchangeFormat, In::THUMBNAIL)?
        .value
        .get_uint(0)? as usize;
    let len = exif
        .get_field(Tag::JPEGInterchangeFormatLength, In::THUMBNAIL)?
        .value
        .get_uint(0)? as usize;
    exif.buf().get(offset..offset.checked_add(len)?)
}

fn write_fields(
    exif: &Exif,
    keep: &dyn Fn(Section, u16) -> bool,
    orientation: Option<u16>,
) -> Result<Vec<u8>> {
    let reset = orientation.map(|value| Field {
        tag: Tag::Orientation,
        ifd_num: In::PRIMARY,
        value: Value::Short(vec![value]),
    });

    let mut kept: Vec<(Section, &Field)> = Vec::new();
    for field in exif.fields() {
        let Some(section) = section_of(field) else {
            bail!("{} in {:?} has no section to write it to", field.tag, field.ifd_num);
        };
        let number = field.tag.number();
        ensure!(
            !(section == Section::Thumbnail && matches!(number, STRIP_OFFSETS | STRIP_BYTE_COUNTS)),
            "strip thumbnail"
        );
        if is_structural(section, number) || !keep(section, number) {
            continue;
        }
        ensure!(
            !matches!(field.value, Value::Unknown(..)),
            "{} has a value type kamadak-exif cannot write",
            field.tag
        );
        match (&reset, section, number) {
            (Some(reset), Section::Primary, tags::ORIENTATION) => kept.push((section, reset)),
            _ => kept.push((section, field)),
        }
    }
    kept.sort_by_key(|(section, field)| (*section, field.tag.number()));

    let mut writer = Writer::new();
    for &(_, field) in &kept {
        writer.push_field(field);
    }
    let thumb = thumbnail(exif);
    if let Some(jpeg) = thumb {
        writer.set_jpeg(jpeg, In::THUMBNAIL);
    }

    let mut out = Cursor::new(Vec::new());
    writer
        .write(&mut out, exif.little_endian())
        .map_err(|e| anyhow!("kamadak-exif could not write EXIF: {e}"))?;
    Ok(out.into_inner())
}
