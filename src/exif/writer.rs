use anyhow::{Context, Result, bail, ensure};
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use img_parts::Bytes;
use img_parts::ImageEXIF;
use img_parts::jpeg::Jpeg;

use super::fields;
use super::tiff::{self, EXIF_PREFIX};

/// APP1 payload limit: a 16-bit segment length that counts itself.
const MAX_APP1_CONTENTS: usize = 65533;

/// Encode `img` as a baseline JPEG, optionally embedding an EXIF blob.
///
/// If embedding the blob fails, it is re-encoded with only the entries it
/// references and embedded once more; a second failure is an error.
pub fn encode_jpeg(img: &DynamicImage, quality: u8, exif: Option<&[u8]>) -> Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))
        .context("JPEG encoding failed")?;

    let Some(blob) = exif else {
        return Ok(buf);
    };

    match embed_exif(&buf, blob) {
        Ok(out) => Ok(out),
        Err(first) => {
            log::warn!("EXIF embed failed ({first:#}), retrying with re-serialized blob");
            let rebuilt = fields::reencode(blob)
                .with_context(|| format!("EXIF embed failed: {first:#}"))?;
            embed_exif(&buf, &rebuilt).context("EXIF embed failed after re-serialization")
        }
    }
}

/// Insert `blob` as the EXIF APP1 segment of an encoded JPEG.
///
/// Any existing EXIF segment is replaced. The segment is placed directly
/// after APP0 so EXIF readers that stop early still find it.
pub fn embed_exif(jpeg_bytes: &[u8], blob: &[u8]) -> Result<Vec<u8>> {
    let tiff_data = tiff::normalize_payload(blob);
    ensure!(!tiff_data.is_empty(), "EXIF blob is empty");
    let size = EXIF_PREFIX.len() + tiff_data.len();
    if size > MAX_APP1_CONTENTS {
        bail!("EXIF blob is {size} bytes, over the {MAX_APP1_CONTENTS} byte APP1 limit");
    }

    let mut jpeg = Jpeg::from_bytes(Bytes::copy_from_slice(jpeg_bytes))
        .map_err(|e| anyhow::anyhow!("Failed to parse JPEG: {e}"))?;

    // img-parts set_exif() expects just the TIFF data (after Exif\0\0)
    jpeg.set_exif(Some(Bytes::copy_from_slice(tiff_data)));

    // set_exif() may insert after other APP segments; move it back.
    if let Some(pos) = find_exif_segment_pos(&jpeg) {
        let target = jpeg
            .segments()
            .iter()
            .position(|s| s.marker() == 0xE0)
            .map(|app0| app0 + 1)
            .unwrap_or(0);
        if target < pos {
            let segments = jpeg.segments_mut();
            let seg = segments.remove(pos);
            segments.insert(target, seg);
        }
    }

    Ok(jpeg.encoder().bytes().to_vec())
}

/// Find the position of the EXIF APP1 segment in a JPEG.
/// EXIF segments have marker 0xE1 (APP1) and contents starting with "Exif\0\0".
fn find_exif_segment_pos(jpeg: &Jpeg) -> Option<usize> {
    jpeg.segments()
        .iter()
        .position(|s| s.marker() == 0xE1 && s.contents().starts_with(EXIF_PREFIX))
}

/// Encode `img` as lossy WebP. No metadata is written.
pub fn encode_webp(img: &DynamicImage, quality: f32) -> Result<Vec<u8>> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut config = webp::WebPConfig::new()
        .map_err(|_| anyhow::anyhow!("Failed to initialise WebP encoder config"))?;
    config.quality = quality;
    // slowest, smallest
    config.method = 6;

    let encoded = webp::Encoder::from_rgb(rgb.as_raw(), width, height)
        .encode_advanced(&config)
        .map_err(|e| anyhow::anyhow!("WebP encoding failed: {e:?}"))?;
    Ok(encoded.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif::reader::embedded_exif;
    use crate::exif::tags::{self, Section};
    use crate::exif::tiff::{ByteOrder, Entry, ExifBlob};
    use image::RgbImage;

    fn small_image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(32, 16, |x, y| {
            image::Rgb([(x * 8) as u8, (y * 16) as u8, 128])
        }))
    }

    fn sample_exif() -> Vec<u8> {
        let mut blob = ExifBlob::new(ByteOrder::Little);
        blob.set(Section::Primary, Entry::ascii(tags::MAKE, "Acme"));
        blob.set(Section::Exif, Entry::ascii(tags::DATE_TIME_ORIGINAL, "2023:05:14 10:22:31"));
        blob.encode().unwrap()
    }

    // ── JPEG ─────────────────────────────────────────────────────────

    #[test]
    fn jpeg_without_exif() {
        let bytes = encode_jpeg(&small_image(), 85, None).unwrap();
        assert!(bytes.starts_with(&[0xFF, 0xD8]));
        assert_eq!(embedded_exif(&bytes).unwrap(), None);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 16));
    }

    #[test]
    fn jpeg_with_exif_after_app0() {
        let exif = sample_exif();
        let bytes = encode_jpeg(&small_image(), 85, Some(&exif)).unwrap();
        assert_eq!(embedded_exif(&bytes).unwrap(), Some(exif));

        let jpeg = Jpeg::from_bytes(Bytes::from(bytes)).unwrap();
        let pos = find_exif_segment_pos(&jpeg).unwrap();
        assert!(pos <= 1, "EXIF segment at {pos}");
    }

    #[test]
    fn embed_replaces_existing_exif() {
        let first = encode_jpeg(&small_image(), 85, Some(&sample_exif())).unwrap();
        let mut blob = ExifBlob::new(ByteOrder::Big);
        blob.set(Section::Primary, Entry::ascii(tags::MODEL, "Other"));
        let replacement = blob.encode().unwrap();

        let second = embed_exif(&first, &replacement).unwrap();
        assert_eq!(embedded_exif(&second).unwrap(), Some(replacement));
    }

    #[test]
    fn oversized_blob_is_reencoded() {
        let mut exif = sample_exif();
        exif.resize(70_000, 0);
        assert!(embed_exif(&encode_jpeg(&small_image(), 85, None).unwrap(), &exif).is_err());

        let bytes = encode_jpeg(&small_image(), 85, Some(&exif)).unwrap();
        let embedded = embedded_exif(&bytes).unwrap().unwrap();
        assert!(embedded.len() < MAX_APP1_CONTENTS);
        assert_eq!(
            fields::tag_map(&embedded).unwrap(),
            fields::tag_map(&sample_exif()).unwrap()
        );
    }

    #[test]
    fn undecodable_oversized_blob_fails() {
        let garbage = vec![0x42; 70_000];
        assert!(encode_jpeg(&small_image(), 85, Some(&garbage)).is_err());
    }

    // ── WebP ─────────────────────────────────────────────────────────

    #[test]
    fn webp_round_trip_dimensions() {
        let bytes = encode_webp(&small_image(), 85.0).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WEBP");
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 16));
    }
}
