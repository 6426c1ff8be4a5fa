//! Container decoding: HEIC/HEIF (and ordinary rasters) to an upright RGB
//! pixel buffer plus a sanitized EXIF blob.
//!
//! HEIF access goes through the [`ContainerImage`] trait so the decode steps
//! run the same against libheif (behind the `heif` feature) and in tests.

use anyhow::{Context, Result, bail, ensure};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use std::path::Path;

use crate::exif::reader::embedded_exif;
use crate::exif::sanitize::sanitize;
use crate::exif::fields;
use crate::exif::tiff::normalize_payload;
use crate::exif::writer::encode_jpeg;
use crate::pipeline::ImageKind;

/// A metadata item attached to a container image.
#[derive(Debug, Clone)]
pub struct MetadataBlock {
    /// Item type as stored in the container, e.g. `Exif` or `mime`.
    pub kind: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PixelMode {
    Rgb,
    Rgba,
    Luma,
    Palette(Vec<[u8; 3]>),
}

impl PixelMode {
    fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelMode::Rgb => 3,
            PixelMode::Rgba => 4,
            PixelMode::Luma | PixelMode::Palette(_) => 1,
        }
    }
}

/// Interleaved 8-bit pixels with a row stride in bytes.
#[derive(Debug, Clone)]
pub struct RawPixels {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub mode: PixelMode,
    pub data: Vec<u8>,
}

/// What the decoder needs from an opened container.
pub trait ContainerImage {
    /// EXIF attached directly to the primary image.
    fn primary_exif(&self) -> Option<Vec<u8>>;

    /// Metadata blocks found elsewhere in the container.
    fn metadata_blocks(&self) -> Vec<MetadataBlock>;

    /// Primary image pixels, without any container-level rotation applied.
    fn raw_pixels(&self) -> Result<RawPixels>;
}

/// An upright RGB image and the EXIF blob to embed alongside it.
#[derive(Debug)]
pub struct DecodedImage {
    pub pixels: DynamicImage,
    /// Bare TIFF data, GPS-free unless sanitizing failed open.
    pub exif: Option<Vec<u8>>,
    pub warnings: Vec<String>,
}

#[cfg(feature = "heif")]
mod heif {
    use super::{ContainerImage, MetadataBlock, PixelMode, RawPixels};
    use anyhow::{Context, Result, anyhow};
    use libheif_rs::{
        ColorSpace, DecodingOptions, HeifContext, ImageHandle, ItemId, LibHeif, RgbChroma,
    };
    use std::path::Path;

    const EXIF_TYPE: &[u8] = b"Exif";

    pub struct HeifContainer {
        lib: LibHeif,
        ctx: HeifContext<'static>,
    }

    impl HeifContainer {
        pub fn open(path: &Path) -> Result<Self> {
            let path_str = path.to_str().context("Invalid file path encoding")?;
            let ctx = HeifContext::read_from_file(path_str)
                .map_err(|e| anyhow!("Failed to read HEIF file {}: {e}", path.display()))?;
            Ok(Self { lib: LibHeif::new(), ctx })
        }

        fn exif_blocks(handle: &ImageHandle) -> Vec<Vec<u8>> {
            let count = handle.number_of_metadata_blocks(EXIF_TYPE);
            if count <= 0 {
                return Vec::new();
            }
            let mut ids: Vec<ItemId> = vec![0; count as usize];
            let found = handle.metadata_block_ids(&mut ids, EXIF_TYPE);
            ids.truncate(found);
            ids.into_iter()
                .filter_map(|id| handle.metadata(id).ok())
                .filter(|data| !data.is_empty())
                .collect()
        }
    }

    impl ContainerImage for HeifContainer {
        fn primary_exif(&self) -> Option<Vec<u8>> {
            let handle = self.ctx.primary_image_handle().ok()?;
            Self::exif_blocks(&handle).into_iter().next()
        }

        fn metadata_blocks(&self) -> Vec<MetadataBlock> {
            let mut ids: Vec<ItemId> = vec![0; self.ctx.number_of_top_level_images()];
            let found = self.ctx.top_level_image_ids(&mut ids);
            ids.truncate(found);

            ids.into_iter()
                .filter_map(|id| self.ctx.image_handle(id).ok())
                .flat_map(|handle| Self::exif_blocks(&handle))
                .map(|data| MetadataBlock { kind: "Exif".into(), data })
                .collect()
        }

        fn raw_pixels(&self) -> Result<RawPixels> {
            let handle = self
                .ctx
                .primary_image_handle()
                .map_err(|e| anyhow!("Failed to get primary image handle: {e}"))?;

            let (chroma, mode) = if handle.has_alpha_channel() {
                (RgbChroma::Rgba, PixelMode::Rgba)
            } else {
                (RgbChroma::Rgb, PixelMode::Rgb)
            };

            // EXIF orientation is applied by the decoder; libheif must not
            // rotate on its own as well.
            let mut options =
                DecodingOptions::new().context("Failed to allocate HEIF decoding options")?;
            options.set_ignore_transformations(true);

            let image = self
                .lib
                .decode(&handle, ColorSpace::Rgb(chroma), Some(options))
                .map_err(|e| anyhow!("Failed to decode HEIF image: {e}"))?;

            let planes = image.planes();
            let plane = planes
                .interleaved
                .context("HEIF image has no interleaved RGB data")?;

            Ok(RawPixels {
                width: plane.width,
                height: plane.height,
                stride: plane.stride,
                mode,
                data: plane.data.to_vec(),
            })
        }
    }
}

#[cfg(feature = "heif")]
pub use heif::HeifContainer;

/// Open a HEIC/HEIF file.
#[cfg(feature = "heif")]
pub fn open_container(path: &Path) -> Result<Box<dyn ContainerImage>> {
    Ok(Box::new(HeifContainer::open(path)?))
}

/// Open a HEIC/HEIF file.
#[cfg(not(feature = "heif"))]
pub fn open_container(path: &Path) -> Result<Box<dyn ContainerImage>> {
    bail!(
        "Cannot decode {}: built without HEIC/HEIF support (enable the `heif` feature)",
        path.display()
    )
}

/// The container's EXIF payload: the primary image's item, else the first
/// non-empty `Exif` metadata block.
pub fn container_exif(container: &dyn ContainerImage) -> Option<Vec<u8>> {
    container.primary_exif().filter(|b| !b.is_empty()).or_else(|| {
        container
            .metadata_blocks()
            .into_iter()
            .find(|b| b.kind.eq_ignore_ascii_case("exif") && !b.data.is_empty())
            .map(|b| b.data)
    })
}

/// Decode an opened container into an upright RGB image.
///
/// Fails when the container has no EXIF at all: such files are treated as
/// unconvertible rather than published without capture metadata.
pub fn decode_container(container: &dyn ContainerImage, strict_sanitize: bool) -> Result<DecodedImage> {
    let Some(blob) = container_exif(container) else {
        bail!("No EXIF metadata in container; file is unconvertible");
    };

    let mut warnings = Vec::new();
    let blob = sanitize_blob(&blob, strict_sanitize, &mut warnings)?;
    let raw = container.raw_pixels().context("Failed to read container pixels")?;
    let pixels = pixels_to_rgb(raw)?;

    Ok(orient(pixels, Some(blob), warnings))
}

/// Decode a JPEG, PNG, GIF or WebP with the same sanitize and orientation
/// steps as container sources.
pub fn decode_standard(path: &Path, kind: ImageKind, strict_sanitize: bool) -> Result<DecodedImage> {
    let bytes = std::fs::read(path).context("Failed to read image file")?;
    let img = image::load_from_memory(&bytes)
        .with_context(|| format!("Failed to decode {}", path.display()))?;

    let blob = match kind {
        ImageKind::Jpeg | ImageKind::Png | ImageKind::WebP => embedded_exif(&bytes)
            .unwrap_or_else(|e| {
                log::debug!("Could not locate EXIF in {}: {e:#}", path.display());
                None
            })
            .filter(|b| !b.is_empty()),
        ImageKind::Gif => None,
        ImageKind::Heif => bail!("{} is a container image", path.display()),
    };

    let mut warnings = Vec::new();
    let blob = match blob {
        Some(b) => Some(sanitize_blob(&b, strict_sanitize, &mut warnings)?),
        None => None,
    };

    let pixels = DynamicImage::ImageRgb8(img.to_rgb8());
    Ok(orient(pixels, blob, warnings))
}

/// Decode any supported input.
pub fn decode_any(path: &Path, kind: ImageKind, strict_sanitize: bool) -> Result<DecodedImage> {
    if kind.is_container() {
        let container = open_container(path)?;
        decode_container(container.as_ref(), strict_sanitize)
    } else {
        decode_standard(path, kind, strict_sanitize)
    }
}

fn sanitize_blob(blob: &[u8], strict: bool, warnings: &mut Vec<String>) -> Result<Vec<u8>> {
    match sanitize(blob) {
        Ok(clean) => Ok(clean),
        Err(p) if strict => bail!("{p}"),
        Err(p) => {
            log::warn!("{p}");
            warnings.push(p.to_string());
            Ok(normalize_payload(&p.into_blob()).to_vec())
        }
    }
}

fn pixels_to_rgb(raw: RawPixels) -> Result<DynamicImage> {
    let RawPixels { width, height, stride, mode, data } = raw;
    ensure!(width > 0 && height > 0, "Image has no pixels ({width}x{height})");

    let row = width as usize * mode.bytes_per_pixel();
    ensure!(stride >= row, "Row stride {stride} shorter than row width {row}");
    let needed = stride * (height as usize - 1) + row;
    ensure!(data.len() >= needed, "Pixel buffer too short: {} < {needed} bytes", data.len());

    let packed: Vec<u8> = if stride == row {
        data[..row * height as usize].to_vec()
    } else {
        data.chunks(stride)
            .take(height as usize)
            .flat_map(|r| &r[..row])
            .copied()
            .collect()
    };

    let rgb = match mode {
        PixelMode::Rgb => RgbImage::from_raw(width, height, packed),
        PixelMode::Rgba => RgbaImage::from_raw(width, height, packed)
            .map(|img| DynamicImage::ImageRgba8(img).to_rgb8()),
        PixelMode::Luma => GrayImage::from_raw(width, height, packed)
            .map(|img| DynamicImage::ImageLuma8(img).to_rgb8()),
        PixelMode::Palette(palette) => {
            let expanded = packed
                .iter()
                .flat_map(|idx| palette.get(*idx as usize).copied().unwrap_or([0, 0, 0]))
                .collect();
            RgbImage::from_raw(width, height, expanded)
        }
    }
    .context("Pixel buffer does not match image dimensions")?;

    Ok(DynamicImage::ImageRgb8(rgb))
}

/// Rotate/flip pixels for an EXIF orientation value.
pub fn apply_orientation(img: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Apply the blob's orientation to the pixels and reset the tag to 1.
fn orient(pixels: DynamicImage, blob: Option<Vec<u8>>, mut warnings: Vec<String>) -> DecodedImage {
    let Some(blob) = blob else {
        return DecodedImage { pixels, exif: None, warnings };
    };

    let orientation = match fields::orientation(&blob) {
        Ok(orientation) => orientation,
        Err(e) => {
            let msg = format!("Failed to apply EXIF orientation: {e:#}");
            log::warn!("{msg}");
            warnings.push(msg);
            return DecodedImage { pixels, exif: Some(blob), warnings };
        }
    };

    let Some(orientation) = orientation else {
        return DecodedImage { pixels, exif: Some(blob), warnings };
    };
    if orientation == 1 {
        return DecodedImage { pixels, exif: Some(blob), warnings };
    }

    log::debug!(
        "Applying orientation {orientation} to {}x{} image",
        pixels.width(),
        pixels.height()
    );
    let pixels = apply_orientation(pixels, orientation);

    match fields::rewrite(&blob, |_, _| true, Some(1)) {
        Ok(exif) => DecodedImage { pixels, exif: Some(exif), warnings },
        Err(e) => {
            let msg = format!("Failed to reset EXIF orientation: {e:#}");
            log::warn!("{msg}");
            warnings.push(msg);
            DecodedImage { pixels, exif: Some(blob), warnings }
        }
    }
}

/// Write the full-resolution intermediate JPEG with the blob embedded.
pub fn write_intermediate(decoded: &DecodedImage, path: &Path, quality: u8) -> Result<()> {
    let bytes = encode_jpeg(&decoded.pixels, quality, decoded.exif.as_deref())
        .with_context(|| format!("Failed to encode {}", path.display()))?;
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
