//! Raw EXIF (TIFF-structured) blob codec.
//!
//! Decodes a blob into its sub-sections and writes it back compactly. Sub-IFD
//! pointers and the IFD1 thumbnail pointer are structural: they are removed
//! on decode and regenerated on encode, so callers only ever see real tags.
//!
//! ```txt
//! | 2          | 2  | 4            |
//! | "II"/"MM"  | 42 | IFD0 offset  |
//!
//! IFD: | count (2) | count × entry (12) | next IFD offset (4) |
//! entry: | tag (2) | format (2) | components (4) | value or offset (4) |
//! ```

use anyhow::{Context, Result, bail, ensure};
use std::collections::{BTreeMap, HashSet};

use super::rational::Ratio;
use super::tags::{self, Section};
use super::value::TagValue;

pub const EXIF_PREFIX: &[u8] = b"Exif\0\0";

/// TIFF entry formats.
pub mod format {
    pub const BYTE: u16 = 1;
    pub const ASCII: u16 = 2;
    pub const SHORT: u16 = 3;
    pub const LONG: u16 = 4;
    pub const RATIONAL: u16 = 5;
    pub const SBYTE: u16 = 6;
    pub const UNDEFINED: u16 = 7;
    pub const SSHORT: u16 = 8;
    pub const SLONG: u16 = 9;
    pub const SRATIONAL: u16 = 10;
    pub const FLOAT: u16 = 11;
    pub const DOUBLE: u16 = 12;
    pub const IFD: u16 = 13;
}

fn component_size(data_format: u16) -> Option<usize> {
    match data_format {
        format::BYTE | format::ASCII | format::SBYTE | format::UNDEFINED => Some(1),
        format::SHORT | format::SSHORT => Some(2),
        format::LONG | format::SLONG | format::FLOAT | format::IFD => Some(4),
        format::RATIONAL | format::SRATIONAL | format::DOUBLE => Some(8),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn read_u16(self, data: &[u8], offset: usize) -> Result<u16> {
        let bytes: [u8; 2] = data
            .get(offset..offset + 2)
            .context("read past end of EXIF data")?
            .try_into()?;
        Ok(match self {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        })
    }

    fn read_u32(self, data: &[u8], offset: usize) -> Result<u32> {
        let bytes: [u8; 4] = data
            .get(offset..offset + 4)
            .context("read past end of EXIF data")?
            .try_into()?;
        Ok(match self {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        })
    }

    pub fn u16_bytes(self, val: u16) -> [u8; 2] {
        match self {
            ByteOrder::Little => val.to_le_bytes(),
            ByteOrder::Big => val.to_be_bytes(),
        }
    }

    pub fn u32_bytes(self, val: u32) -> [u8; 4] {
        match self {
            ByteOrder::Little => val.to_le_bytes(),
            ByteOrder::Big => val.to_be_bytes(),
        }
    }
}

/// One IFD entry. `data` holds the value bytes in the blob's byte order.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub tag: u16,
    pub format: u16,
    pub count: u32,
    pub data: Vec<u8>,
}

impl Entry {
    pub fn ascii(tag: u16, text: &str) -> Self {
        let mut data = text.as_bytes().to_vec();
        data.push(0);
        Self { tag, format: format::ASCII, count: data.len() as u32, data }
    }

    pub fn short(tag: u16, value: u16, order: ByteOrder) -> Self {
        Self { tag, format: format::SHORT, count: 1, data: order.u16_bytes(value).to_vec() }
    }

    pub fn long(tag: u16, value: u32, order: ByteOrder) -> Self {
        Self { tag, format: format::LONG, count: 1, data: order.u32_bytes(value).to_vec() }
    }

    pub fn rational(tag: u16, num: u32, den: u32, order: ByteOrder) -> Self {
        Self::rationals(tag, &[(num, den)], order)
    }

    pub fn rationals(tag: u16, values: &[(u32, u32)], order: ByteOrder) -> Self {
        let data = values
            .iter()
            .flat_map(|(n, d)| order.u32_bytes(*n).into_iter().chain(order.u32_bytes(*d)))
            .collect();
        Self { tag, format: format::RATIONAL, count: values.len() as u32, data }
    }

    pub fn undefined(tag: u16, bytes: &[u8]) -> Self {
        Self { tag, format: format::UNDEFINED, count: bytes.len() as u32, data: bytes.to_vec() }
    }

    /// Decode the entry's value. `None` for unknown formats.
    pub fn value(&self, order: ByteOrder) -> Option<TagValue> {
        let size = component_size(self.format)?;
        let components = self.data.chunks_exact(size).take(self.count as usize);
        let u16_at = |c: &[u8]| match order {
            ByteOrder::Little => u16::from_le_bytes([c[0], c[1]]),
            ByteOrder::Big => u16::from_be_bytes([c[0], c[1]]),
        };
        let u32_at = |c: &[u8]| match order {
            ByteOrder::Little => u32::from_le_bytes([c[0], c[1], c[2], c[3]]),
            ByteOrder::Big => u32::from_be_bytes([c[0], c[1], c[2], c[3]]),
        };

        let values: Vec<TagValue> = match self.format {
            format::ASCII => return Some(TagValue::Text(ascii_text(&self.data))),
            format::UNDEFINED => return Some(TagValue::Bytes(self.data.clone())),
            format::BYTE => components.map(|c| TagValue::Integer(c[0] as i64)).collect(),
            format::SBYTE => components.map(|c| TagValue::Integer(c[0] as i8 as i64)).collect(),
            format::SHORT => components.map(|c| TagValue::Integer(u16_at(c) as i64)).collect(),
            format::SSHORT => components
                .map(|c| TagValue::Integer(u16_at(c) as i16 as i64))
                .collect(),
            format::LONG | format::IFD => components
                .map(|c| TagValue::Integer(u32_at(c) as i64))
                .collect(),
            format::SLONG => components
                .map(|c| TagValue::Integer(u32_at(c) as i32 as i64))
                .collect(),
            format::RATIONAL => components
                .map(|c| TagValue::Rational(Ratio::new(u32_at(c) as i64, u32_at(&c[4..]) as i64)))
                .collect(),
            format::SRATIONAL => components
                .map(|c| {
                    TagValue::Rational(Ratio::new(
                        u32_at(c) as i32 as i64,
                        u32_at(&c[4..]) as i32 as i64,
                    ))
                })
                .collect(),
            format::FLOAT => components
                .map(|c| TagValue::Float(f32::from_bits(u32_at(c)) as f64))
                .collect(),
            format::DOUBLE => components
                .map(|c| {
                    let hi = u32_at(c) as u64;
                    let lo = u32_at(&c[4..]) as u64;
                    let bits = match order {
                        ByteOrder::Big => (hi << 32) | lo,
                        ByteOrder::Little => (lo << 32) | hi,
                    };
                    TagValue::Float(f64::from_bits(bits))
                })
                .collect(),
            _ => return None,
        };

        match values.len() {
            0 => None,
            1 => values.into_iter().next(),
            _ => Some(TagValue::List(values)),
        }
    }
}

/// ASCII value up to the first NUL.
fn ascii_text(data: &[u8]) -> String {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

fn is_tiff_header(data: &[u8]) -> bool {
    data.starts_with(b"II*\0") || data.starts_with(b"MM\0*")
}

/// Strip the wrappers EXIF payloads arrive in down to the TIFF header.
///
/// Handles a leading `Exif\0\0` (JPEG APP1, some WebP writers) and the
/// 4-byte big-endian header offset that prefixes HEIF `Exif` items.
pub fn normalize_payload(data: &[u8]) -> &[u8] {
    if let Some(rest) = data.strip_prefix(EXIF_PREFIX) {
        return rest;
    }
    if is_tiff_header(data) {
        return data;
    }
    if data.len() > 4 {
        let skip = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if let Some(rest) = data.get(4 + skip..) {
            if let Some(tiff) = rest.strip_prefix(EXIF_PREFIX) {
                return tiff;
            }
            if is_tiff_header(rest) {
                return rest;
            }
        }
    }
    data
}

/// A decoded EXIF blob.
#[derive(Debug, Clone, PartialEq)]
pub struct ExifBlob {
    pub order: ByteOrder,
    sections: BTreeMap<Section, Vec<Entry>>,
    thumbnail: Option<Vec<u8>>,
}

impl ExifBlob {
    pub fn new(order: ByteOrder) -> Self {
        Self { order, sections: BTreeMap::new(), thumbnail: None }
    }

    /// Decode a blob. Accepts bare TIFF data or any wrapper understood by
    /// [`normalize_payload`].
    pub fn decode(data: &[u8]) -> Result<Self> {
        let data = normalize_payload(data);
        ensure!(data.len() >= 8, "EXIF data too short ({} bytes)", data.len());

        let order = match &data[0..2] {
            b"II" => ByteOrder::Little,
            b"MM" => ByteOrder::Big,
            _ => bail!("Invalid TIFF byte order"),
        };
        ensure!(order.read_u16(data, 2)? == 42, "Invalid TIFF magic number");

        let mut blob = Self::new(order);
        let mut visited = HashSet::new();

        let ifd0_offset = order.read_u32(data, 4)? as usize;
        let (mut primary, next) =
            read_ifd(data, ifd0_offset, order, &mut visited).context("Failed to read IFD0")?;
        let exif_offset = take_long(&mut primary, tags::EXIF_IFD_POINTER, order);
        let gps_offset = take_long(&mut primary, tags::GPS_IFD_POINTER, order);
        let mut interop_offset = take_long(&mut primary, tags::INTEROP_IFD_POINTER, order);
        blob.sections.insert(Section::Primary, primary);

        if let Some(offset) = exif_offset {
            let (mut exif, _) = read_ifd(data, offset, order, &mut visited)
                .context("Failed to read Exif IFD")?;
            if let Some(offset) = take_long(&mut exif, tags::INTEROP_IFD_POINTER, order) {
                interop_offset = Some(offset);
            }
            blob.sections.insert(Section::Exif, exif);
        }

        // A damaged GPS or Interop section never blocks the rest of the blob;
        // GPS is location data we would drop anyway.
        if let Some(offset) = gps_offset {
            match read_ifd(data, offset, order, &mut visited) {
                Ok((gps, _)) => {
                    blob.sections.insert(Section::Gps, gps);
                }
                Err(e) => log::debug!("Dropping unreadable GPS IFD: {e}"),
            }
        }
        if let Some(offset) = interop_offset {
            match read_ifd(data, offset, order, &mut visited) {
                Ok((interop, _)) => {
                    blob.sections.insert(Section::Interop, interop);
                }
                Err(e) => log::debug!("Dropping unreadable Interop IFD: {e}"),
            }
        }

        if next != 0 {
            match read_ifd(data, next as usize, order, &mut visited) {
                Ok((mut ifd1, _)) => {
                    let thumb_offset = take_long(&mut ifd1, tags::JPEG_INTERCHANGE_FORMAT, order);
                    let thumb_len =
                        take_long(&mut ifd1, tags::JPEG_INTERCHANGE_FORMAT_LENGTH, order);
                    if let (Some(offset), Some(len)) = (thumb_offset, thumb_len) {
                        match data.get(offset..offset + len) {
                            Some(bytes) => blob.thumbnail = Some(bytes.to_vec()),
                            None => log::debug!("Thumbnail extends beyond EXIF data, dropping it"),
                        }
                    }
                    blob.sections.insert(Section::Thumbnail, ifd1);
                }
                Err(e) => log::debug!("Dropping unreadable IFD1: {e}"),
            }
        }

        Ok(blob)
    }

    /// Encode back to bare TIFF data (no `Exif\0\0` prefix).
    pub fn encode(&self) -> Result<Vec<u8>> {
        let order = self.order;
        let has = |section: Section| self.sections.get(&section).is_some_and(|e| !e.is_empty());

        let mut out = Vec::with_capacity(1024);
        out.extend_from_slice(match order {
            ByteOrder::Little => b"II",
            ByteOrder::Big => b"MM",
        });
        out.extend_from_slice(&order.u16_bytes(42));
        out.extend_from_slice(&order.u32_bytes(8));

        let needs_exif_ifd = has(Section::Exif) || has(Section::Interop);

        let mut primary = self.entries(Section::Primary).to_vec();
        if needs_exif_ifd {
            primary.push(Entry::long(tags::EXIF_IFD_POINTER, 0, order));
        }
        if has(Section::Gps) {
            primary.push(Entry::long(tags::GPS_IFD_POINTER, 0, order));
        }
        let ifd0 = write_ifd(&mut out, primary, order)?;

        if needs_exif_ifd {
            let mut exif = self.entries(Section::Exif).to_vec();
            if has(Section::Interop) {
                exif.push(Entry::long(tags::INTEROP_IFD_POINTER, 0, order));
            }
            let exif_ifd = write_ifd(&mut out, exif, order)?;
            ifd0.patch(&mut out, tags::EXIF_IFD_POINTER, exif_ifd.start, order);

            if has(Section::Interop) {
                let interop = write_ifd(&mut out, self.entries(Section::Interop).to_vec(), order)?;
                exif_ifd.patch(&mut out, tags::INTEROP_IFD_POINTER, interop.start, order);
            }
        }

        if has(Section::Gps) {
            let gps = write_ifd(&mut out, self.entries(Section::Gps).to_vec(), order)?;
            ifd0.patch(&mut out, tags::GPS_IFD_POINTER, gps.start, order);
        }

        if has(Section::Thumbnail) || self.thumbnail.is_some() {
            let mut ifd1_entries = self.entries(Section::Thumbnail).to_vec();
            if let Some(ref thumb) = self.thumbnail {
                let len = u32::try_from(thumb.len()).context("Thumbnail too large")?;
                ifd1_entries.push(Entry::long(tags::JPEG_INTERCHANGE_FORMAT, 0, order));
                ifd1_entries.push(Entry::long(tags::JPEG_INTERCHANGE_FORMAT_LENGTH, len, order));
            }
            let ifd1 = write_ifd(&mut out, ifd1_entries, order)?;
            if let Some(ref thumb) = self.thumbnail {
                pad_even(&mut out);
                let at = to_offset(out.len())?;
                out.extend_from_slice(thumb);
                ifd1.patch(&mut out, tags::JPEG_INTERCHANGE_FORMAT, at, order);
            }
            ifd0.set_next(&mut out, ifd1.start, order);
        }

        Ok(out)
    }

    pub fn entries(&self, section: Section) -> &[Entry] {
        self.sections.get(&section).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_section(&self, section: Section) -> bool {
        self.sections.contains_key(&section)
    }

    pub fn get(&self, section: Section, tag: u16) -> Option<&Entry> {
        self.entries(section).iter().find(|e| e.tag == tag)
    }

    /// Insert `entry`, replacing any entry with the same tag.
    pub fn set(&mut self, section: Section, entry: Entry) {
        let entries = self.sections.entry(section).or_default();
        match entries.iter_mut().find(|e| e.tag == entry.tag) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    pub fn remove_section(&mut self, section: Section) -> Option<Vec<Entry>> {
        self.sections.remove(&section)
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(Section, &Entry) -> bool) {
        for (section, entries) in self.sections.iter_mut() {
            entries.retain(|e| keep(*section, e));
        }
    }

    /// Every entry, section by section (IFD0 first).
    pub fn iter(&self) -> impl Iterator<Item = (Section, &Entry)> {
        self.sections
            .iter()
            .flat_map(|(section, entries)| entries.iter().map(move |e| (*section, e)))
    }

    pub fn thumbnail(&self) -> Option<&[u8]> {
        self.thumbnail.as_deref()
    }

    pub fn set_thumbnail(&mut self, thumbnail: Option<Vec<u8>>) {
        self.thumbnail = thumbnail;
    }

    /// IFD0 Orientation (1–8), if present.
    pub fn orientation(&self) -> Option<u16> {
        self.get(Section::Primary, tags::ORIENTATION)
            .and_then(|e| e.value(self.order))
            .and_then(|v| v.as_integer())
            .and_then(|v| u16::try_from(v).ok())
    }

    pub fn set_orientation(&mut self, orientation: u16) {
        let entry = Entry::short(tags::ORIENTATION, orientation, self.order);
        self.set(Section::Primary, entry);
    }
}

fn read_ifd(
    data: &[u8],
    offset: usize,
    order: ByteOrder,
    visited: &mut HashSet<usize>,
) -> Result<(Vec<Entry>, u32)> {
    ensure!(visited.insert(offset), "IFD loop at offset {offset}");

    let count = order.read_u16(data, offset)? as usize;
    let start = offset + 2;
    let end = start + count * 12;
    ensure!(end + 4 <= data.len(), "IFD at offset {offset} extends beyond EXIF data");

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let eo = start + i * 12;
        let tag = order.read_u16(data, eo)?;
        let data_format = order.read_u16(data, eo + 2)?;
        let components = order.read_u32(data, eo + 4)?;
        let size = component_size(data_format)
            .with_context(|| format!("Tag 0x{tag:04x} has unknown format {data_format}"))?
            .checked_mul(components as usize)
            .with_context(|| format!("Tag 0x{tag:04x} size overflows"))?;

        let value = if size <= 4 {
            data[eo + 8..eo + 8 + size].to_vec()
        } else {
            let value_offset = order.read_u32(data, eo + 8)? as usize;
            data.get(value_offset..value_offset + size)
                .with_context(|| format!("Tag 0x{tag:04x} value extends beyond EXIF data"))?
                .to_vec()
        };

        entries.push(Entry { tag, format: data_format, count: components, data: value });
    }

    let next = order.read_u32(data, end)?;
    Ok((entries, next))
}

/// Remove a single-LONG entry and return its value.
fn take_long(entries: &mut Vec<Entry>, tag: u16, order: ByteOrder) -> Option<usize> {
    let idx = entries.iter().position(|e| e.tag == tag)?;
    let entry = entries.remove(idx);
    match entry.value(order) {
        Some(TagValue::Integer(v)) => usize::try_from(v).ok().filter(|v| *v != 0),
        _ => None,
    }
}

fn pad_even(out: &mut Vec<u8>) {
    if out.len() % 2 == 1 {
        out.push(0);
    }
}

fn to_offset(pos: usize) -> Result<u32> {
    u32::try_from(pos).context("EXIF data exceeds 4 GiB")
}

/// Where an IFD landed in the output, for back-patching pointers.
struct WrittenIfd {
    start: u32,
    entries_at: usize,
    tags: Vec<u16>,
    next_at: usize,
}

impl WrittenIfd {
    fn patch(&self, out: &mut [u8], tag: u16, value: u32, order: ByteOrder) {
        if let Some(idx) = self.tags.iter().position(|t| *t == tag) {
            let at = self.entries_at + idx * 12 + 8;
            out[at..at + 4].copy_from_slice(&order.u32_bytes(value));
        }
    }

    fn set_next(&self, out: &mut [u8], value: u32, order: ByteOrder) {
        out[self.next_at..self.next_at + 4].copy_from_slice(&order.u32_bytes(value));
    }
}

fn write_ifd(out: &mut Vec<u8>, mut entries: Vec<Entry>, order: ByteOrder) -> Result<WrittenIfd> {
    pad_even(out);
    entries.sort_by_key(|e| e.tag);
    entries.dedup_by_key(|e| e.tag);

    let start = out.len();
    let table_len = 2 + entries.len() * 12 + 4;
    let count = u16::try_from(entries.len()).context("Too many IFD entries")?;

    let mut table = Vec::with_capacity(table_len);
    let mut data_area = Vec::new();
    let mut data_at = start + table_len;

    table.extend_from_slice(&order.u16_bytes(count));
    for entry in &entries {
        table.extend_from_slice(&order.u16_bytes(entry.tag));
        table.extend_from_slice(&order.u16_bytes(entry.format));
        table.extend_from_slice(&order.u32_bytes(entry.count));
        if entry.data.len() <= 4 {
            let mut inline = [0u8; 4];
            inline[..entry.data.len()].copy_from_slice(&entry.data);
            table.extend_from_slice(&inline);
        } else {
            table.extend_from_slice(&order.u32_bytes(to_offset(data_at)?));
            data_area.extend_from_slice(&entry.data);
            data_at += entry.data.len();
            if data_at % 2 == 1 {
                data_area.push(0);
                data_at += 1;
            }
        }
    }
    let next_at = start + table.len();
    table.extend_from_slice(&[0u8; 4]);

    out.extend_from_slice(&table);
    out.extend_from_slice(&data_area);

    Ok(WrittenIfd {
        start: to_offset(start)?,
        entries_at: start + 2,
        tags: entries.iter().map(|e| e.tag).collect(),
        next_at,
    })
}
