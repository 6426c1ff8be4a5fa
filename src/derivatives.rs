//! Web derivative matrix: every size tier in JPEG and WebP, plus a tiny blur
//! placeholder.
//!
//! Output names derive from the source stem:
//!
//! ```txt
//! <stem>_thumb.jpg   <stem>_thumb.webp   <stem>_blur.jpg
//! <stem>_medium.jpg  <stem>_medium.webp
//! <stem>_large.jpg   <stem>_large.webp
//! <stem>_full.jpg    <stem>_full.webp
//! ```

use anyhow::{Context, Result};
use image::DynamicImage;
use image::imageops::FilterType;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::DerivativeConfig;
use crate::container::DecodedImage;
use crate::exif::writer::{encode_jpeg, encode_webp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeTier {
    Thumb,
    Medium,
    Large,
    Full,
}

impl SizeTier {
    pub const ALL: [SizeTier; 4] = [SizeTier::Thumb, SizeTier::Medium, SizeTier::Large, SizeTier::Full];

    pub fn name(self) -> &'static str {
        match self {
            SizeTier::Thumb => "thumb",
            SizeTier::Medium => "medium",
            SizeTier::Large => "large",
            SizeTier::Full => "full",
        }
    }

    /// Square bounding box edge. `full` comes from config.
    pub fn bound(self, full_size: u32) -> u32 {
        match self {
            SizeTier::Thumb => 400,
            SizeTier::Medium => 800,
            SizeTier::Large => 1200,
            SizeTier::Full => full_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Jpeg,
    WebP,
}

impl Encoding {
    pub const ALL: [Encoding; 2] = [Encoding::Jpeg, Encoding::WebP];

    pub fn extension(self) -> &'static str {
        match self {
            Encoding::Jpeg => "jpg",
            Encoding::WebP => "webp",
        }
    }
}

/// Largest size with the source aspect ratio that fits `max_w`×`max_h`.
///
/// Never upscales. The limiting axis lands exactly on the bound, the other
/// is floored, and neither drops below 1.
pub fn fit_within(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width <= max_w && height <= max_h {
        return (width, height);
    }
    let (w, h, mw, mh) = (width as u64, height as u64, max_w as u64, max_h as u64);
    let (new_w, new_h) = if mw * h <= mh * w {
        (mw, h * mw / w)
    } else {
        (w * mh / h, mh)
    };
    (new_w.max(1) as u32, new_h.max(1) as u32)
}

fn resize_to_fit(img: &DynamicImage, max_w: u32, max_h: u32) -> DynamicImage {
    let (w, h) = fit_within(img.width(), img.height(), max_w, max_h);
    if (w, h) == (img.width(), img.height()) {
        img.clone()
    } else {
        img.resize_exact(w, h, FilterType::Lanczos3)
    }
}

/// Paths of one source's derivative matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivativeSet {
    #[serde(serialize_with = "serialize_outputs")]
    pub outputs: BTreeMap<(SizeTier, Encoding), PathBuf>,
    pub blur: PathBuf,
}

fn serialize_outputs<S: serde::Serializer>(
    outputs: &BTreeMap<(SizeTier, Encoding), PathBuf>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(outputs.values())
}

impl DerivativeSet {
    /// The paths a complete set for `stem` occupies in `dir`.
    pub fn expected(dir: &Path, stem: &str) -> Self {
        let outputs = SizeTier::ALL
            .into_iter()
            .flat_map(|tier| Encoding::ALL.into_iter().map(move |enc| (tier, enc)))
            .map(|(tier, enc)| {
                let name = format!("{stem}_{}.{}", tier.name(), enc.extension());
                ((tier, enc), dir.join(name))
            })
            .collect();
        Self { outputs, blur: dir.join(format!("{stem}_blur.jpg")) }
    }

    pub fn get(&self, tier: SizeTier, encoding: Encoding) -> Option<&Path> {
        self.outputs.get(&(tier, encoding)).map(PathBuf::as_path)
    }

    /// Every artifact path, blur last.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.outputs.values().map(PathBuf::as_path).chain(std::iter::once(self.blur.as_path()))
    }

    pub fn all_exist(&self) -> bool {
        self.paths().all(Path::exists)
    }
}

/// Write the full derivative matrix for `decoded` into `out_dir`.
///
/// JPEGs carry the decoded image's EXIF; WebPs and the blur placeholder
/// carry no metadata. Any encode or write failure aborts the set.
pub fn generate(
    decoded: &DecodedImage,
    out_dir: &Path,
    stem: &str,
    config: &DerivativeConfig,
) -> Result<DerivativeSet> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let set = DerivativeSet::expected(out_dir, stem);
    let exif = decoded.exif.as_deref();

    for tier in SizeTier::ALL {
        let bound = tier.bound(config.full_size);
        let resized = resize_to_fit(&decoded.pixels, bound, bound);
        log::debug!(
            "{stem}: {} tier {}x{}",
            tier.name(),
            resized.width(),
            resized.height()
        );

        if let Some(path) = set.get(tier, Encoding::Jpeg) {
            let bytes = encode_jpeg(&resized, config.jpeg_quality, exif)
                .with_context(|| format!("Failed to encode {}", path.display()))?;
            write(path, &bytes)?;
        }
        if let Some(path) = set.get(tier, Encoding::WebP) {
            let bytes = encode_webp(&resized, config.webp_quality)
                .with_context(|| format!("Failed to encode {}", path.display()))?;
            write(path, &bytes)?;
        }

        if tier == SizeTier::Thumb {
            let blur = resize_to_fit(&resized, config.blur_size, config.blur_size);
            let bytes = encode_jpeg(&blur, config.blur_quality, None)
                .with_context(|| format!("Failed to encode {}", set.blur.display()))?;
            write(&set.blur, &bytes)?;
        }
    }

    Ok(set)
}

fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif::reader::embedded_exif;
    use crate::exif::tags::{self, Section};
    use crate::exif::tiff::{ByteOrder, Entry, ExifBlob};
    use image::{GenericImageView, RgbImage};
    use tempfile::TempDir;

    fn decoded(width: u32, height: u32, exif: Option<Vec<u8>>) -> DecodedImage {
        let pixels = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 90])
        }));
        DecodedImage { pixels, exif, warnings: Vec::new() }
    }

    fn dims(path: &Path) -> (u32, u32) {
        image::open(path).unwrap().dimensions()
    }

    // ── fit_within ───────────────────────────────────────────────────

    #[test]
    fn fits_landscape_source() {
        assert_eq!(fit_within(3000, 2000, 400, 400), (400, 266));
        assert_eq!(fit_within(3000, 2000, 800, 800), (800, 533));
        assert_eq!(fit_within(3000, 2000, 1200, 1200), (1200, 800));
        assert_eq!(fit_within(3000, 2000, 1920, 1920), (1920, 1280));
        assert_eq!(fit_within(400, 266, 20, 20), (20, 13));
    }

    #[test]
    fn fits_portrait_source() {
        assert_eq!(fit_within(2000, 3000, 1200, 1200), (800, 1200));
    }

    #[test]
    fn never_upscales() {
        assert_eq!(fit_within(300, 200, 400, 400), (300, 200));
        assert_eq!(fit_within(400, 400, 400, 400), (400, 400));
    }

    #[test]
    fn extreme_aspect_keeps_one_pixel() {
        assert_eq!(fit_within(10_000, 3, 400, 400), (400, 1));
    }

    #[test]
    fn bound_axis_is_exact() {
        // 400/1999 is not exact in floating point.
        assert_eq!(fit_within(1999, 1000, 400, 400), (400, 200));
    }

    // ── generate ─────────────────────────────────────────────────────

    #[test]
    fn writes_full_matrix() {
        let dir = TempDir::new().unwrap();
        let set = generate(&decoded(1500, 1000, None), dir.path(), "IMG_0001", &DerivativeConfig::default())
            .unwrap();

        assert_eq!(set.paths().count(), 9);
        assert!(set.all_exist());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 9);

        assert_eq!(dims(set.get(SizeTier::Thumb, Encoding::Jpeg).unwrap()), (400, 266));
        assert_eq!(dims(set.get(SizeTier::Medium, Encoding::WebP).unwrap()), (800, 533));
        assert_eq!(dims(set.get(SizeTier::Large, Encoding::Jpeg).unwrap()), (1200, 800));
        // Smaller than the full bound: kept at source size.
        assert_eq!(dims(set.get(SizeTier::Full, Encoding::Jpeg).unwrap()), (1500, 1000));
        assert_eq!(dims(&set.blur), (20, 13));
        assert_eq!(set.blur, dir.path().join("IMG_0001_blur.jpg"));
    }

    #[test]
    fn full_bound_is_configurable() {
        let dir = TempDir::new().unwrap();
        let config = DerivativeConfig { full_size: 600, ..DerivativeConfig::default() };
        let set = generate(&decoded(900, 600, None), dir.path(), "p", &config).unwrap();
        assert_eq!(dims(set.get(SizeTier::Full, Encoding::WebP).unwrap()), (600, 400));
        assert_eq!(dims(set.get(SizeTier::Large, Encoding::Jpeg).unwrap()), (900, 600));
    }

    #[test]
    fn exif_only_in_tier_jpegs() {
        let mut blob = ExifBlob::new(ByteOrder::Little);
        blob.set(Section::Primary, Entry::ascii(tags::MAKE, "Acme"));
        let exif = blob.encode().unwrap();

        let dir = TempDir::new().unwrap();
        let set = generate(&decoded(64, 48, Some(exif.clone())), dir.path(), "p", &DerivativeConfig::default())
            .unwrap();

        for tier in SizeTier::ALL {
            let jpeg = std::fs::read(set.get(tier, Encoding::Jpeg).unwrap()).unwrap();
            assert_eq!(embedded_exif(&jpeg).unwrap(), Some(exif.clone()));
            let webp = std::fs::read(set.get(tier, Encoding::WebP).unwrap()).unwrap();
            assert_eq!(embedded_exif(&webp).unwrap(), None);
        }
        let blur = std::fs::read(&set.blur).unwrap();
        assert_eq!(embedded_exif(&blur).unwrap(), None);
    }

    #[test]
    fn expected_set_detects_missing_files() {
        let dir = TempDir::new().unwrap();
        let set = generate(&decoded(32, 32, None), dir.path(), "p", &DerivativeConfig::default()).unwrap();
        assert_eq!(DerivativeSet::expected(dir.path(), "p"), set);
        assert!(set.all_exist());

        std::fs::remove_file(set.get(SizeTier::Medium, Encoding::WebP).unwrap()).unwrap();
        assert!(!DerivativeSet::expected(dir.path(), "p").all_exist());
    }
}
