use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::container::{self, ContainerImage, decode_container, decode_standard, write_intermediate};
use crate::derivatives::{self, DerivativeSet, Encoding, SizeTier};
use crate::exif::{MetadataRecord, extract_metadata, verify_preservation};
use crate::frontmatter;

/// Supported image extensions.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "heic", "heif"];

/// Suffix of the full-resolution intermediate written for container inputs.
const TEMP_SUFFIX: &str = ".temp.jpg";

/// Input format, determined by file extension.
///
/// # Example
///
/// ```rust
/// use photo_derivatives::pipeline::ImageKind;
/// use std::path::Path;
///
/// let kind = ImageKind::from_path(Path::new("IMG_0001.HEIC"));
/// assert_eq!(kind, Some(ImageKind::Heif));
/// assert!(kind.unwrap().is_container());
///
/// let kind = ImageKind::from_path(Path::new("photo.jpg"));
/// assert_eq!(kind, Some(ImageKind::Jpeg));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    /// JPEG: EXIF in an APP1 segment
    Jpeg,
    /// PNG: EXIF in an eXIf chunk
    Png,
    /// GIF: no EXIF
    Gif,
    /// WebP: EXIF in a RIFF chunk
    WebP,
    /// HEIC/HEIF: decoded through libheif
    Heif,
}

impl ImageKind {
    /// Determine the image kind from a file path extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::WebP),
            "heic" | "heif" => Some(Self::Heif),
            _ => None,
        }
    }

    /// Whether the pixels have to be extracted from a container.
    pub fn is_container(self) -> bool {
        self == Self::Heif
    }
}

/// Per-run switches that come from the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    /// Drop hand-edited `title`/`description` when rewriting documents.
    pub force_update: bool,
    /// Regenerate derivatives even when a complete set exists.
    pub force_derivatives: bool,
}

/// The outcome of processing one photograph.
#[derive(Debug, Serialize)]
pub struct ProcessResult {
    pub path: PathBuf,
    /// The image kind detected for this file.
    pub image_kind: Option<ImageKind>,
    /// Metadata written to the document.
    pub metadata: MetadataRecord,
    pub document: Option<PathBuf>,
    pub derivatives: Option<DerivativeSet>,
    /// A complete set already existed and was left alone.
    pub derivatives_skipped: bool,
    /// Metadata preservation check, when one ran.
    pub verified: Option<bool>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl ProcessResult {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            image_kind: ImageKind::from_path(path),
            metadata: MetadataRecord::default(),
            document: None,
            derivatives: None,
            derivatives_skipped: false,
            verified: None,
            warnings: Vec::new(),
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// All per-file results of one sweep.
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub results: Vec<ProcessResult>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &ProcessResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    /// Process exit status: 1 if any file failed.
    pub fn exit_code(&self) -> i32 {
        if self.failed().next().is_some() { 1 } else { 0 }
    }
}

/// Collect supported image files in `dir`, sorted by path.
///
/// Only `dir` itself is listed unless `recursive`; a recursive walk never
/// descends into `skip` (the derivative output directory).
///
/// # Example
///
/// ```rust,no_run
/// use photo_derivatives::pipeline::collect_images;
/// use std::path::Path;
///
/// let images = collect_images(
///     Path::new("public/photographs"),
///     false,
///     Path::new("public/photographs/optimized"),
/// );
/// println!("Found {} images", images.len());
/// ```
pub fn collect_images(dir: &Path, recursive: bool, skip: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        log::warn!("Path does not exist: {}", dir.display());
        return Vec::new();
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut images: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(max_depth)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !same_path(e.path(), skip))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_supported_image(e.path()))
        .map(|e| e.into_path())
        .collect();

    images.sort();
    images
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Check if a file has a supported image extension.
fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn file_stem(path: &Path) -> Result<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .with_context(|| format!("No file name in {}", path.display()))
}

fn temp_path(optimized_dir: &Path, stem: &str) -> PathBuf {
    optimized_dir.join(format!("{stem}{TEMP_SUFFIX}"))
}

/// Process one photograph: write its document, generate missing derivatives
/// and verify metadata survived.
///
/// The document is always rewritten. Derivatives are only generated when
/// the set is incomplete or `force_derivatives` is set. Errors never
/// propagate; they end up in [`ProcessResult::error`].
pub fn process_image(path: &Path, config: &Config, options: &ProcessOptions) -> ProcessResult {
    let mut result = ProcessResult::new(path);
    if let Err(e) = process_into(path, config, options, &mut result) {
        result.error = Some(format!("Error processing {}: {e:#}", path.display()));
    }
    result
}

fn process_into(
    path: &Path,
    config: &Config,
    options: &ProcessOptions,
    result: &mut ProcessResult,
) -> Result<()> {
    let Some(kind) = result.image_kind else {
        bail!("unsupported image format");
    };
    let stem = file_stem(path)?;
    let optimized_dir = &config.paths.optimized_dir;
    let expected = DerivativeSet::expected(optimized_dir, &stem);
    let full_jpeg = expected
        .get(SizeTier::Full, Encoding::Jpeg)
        .map(Path::to_path_buf)
        .context("Derivative set has no full JPEG")?;

    // Prefer what the published derivative actually carries.
    let source_record = extract_metadata(path, kind);
    result.metadata = if full_jpeg.exists() {
        extract_metadata(&full_jpeg, ImageKind::Jpeg)
    } else {
        source_record.clone()
    };

    let md_path = config.paths.data_dir.join(format!("{stem}.md"));
    let existing = if options.force_update {
        None
    } else {
        frontmatter::read_existing(&md_path)
    };
    let image_url = format!(
        "{}/{stem}.jpg",
        config.paths.image_url_prefix.trim_end_matches('/')
    );
    let front_matter = frontmatter::build(
        &result.metadata,
        &image_url,
        &config.processing.default_background_color,
        existing.as_ref(),
    );
    frontmatter::write_document(&md_path, &front_matter)?;
    result.document = Some(md_path);

    if options.force_derivatives || !expected.all_exist() {
        let set = if kind.is_container() {
            let opened = container::open_container(path)?;
            convert_container(path, opened.as_ref(), &stem, config, &mut result.warnings)?
        } else {
            let decoded = decode_standard(path, kind, config.processing.strict_sanitize)?;
            result.warnings.extend(decoded.warnings.iter().cloned());
            derivatives::generate(&decoded, optimized_dir, &stem, &config.derivatives)?
        };
        log::info!("Optimized: {}", full_jpeg.display());
        result.derivatives = Some(set);
    } else {
        log::debug!("Derivatives for {stem} are up to date");
        result.derivatives = Some(expected);
        result.derivatives_skipped = true;
    }

    let wants_verify = kind.is_container()
        || (config.processing.verify_all && !source_record.is_empty());
    if wants_verify {
        let ok = verify_preservation(path, &full_jpeg);
        result.verified = Some(ok);
        if !ok {
            bail!("EXIF verification failed for {}", full_jpeg.display());
        }
    }

    Ok(())
}

/// Decode a container, write and verify the intermediate JPEG, then build the
/// derivative matrix from it.
///
/// A failed intermediate check aborts before any derivative is written; the
/// intermediate is left for [`cleanup_temp_files`].
pub fn convert_container(
    original: &Path,
    container: &dyn ContainerImage,
    stem: &str,
    config: &Config,
    warnings: &mut Vec<String>,
) -> Result<DerivativeSet> {
    let decoded = decode_container(container, config.processing.strict_sanitize)?;
    warnings.extend(decoded.warnings.iter().cloned());

    let optimized_dir = &config.paths.optimized_dir;
    std::fs::create_dir_all(optimized_dir)
        .with_context(|| format!("Failed to create {}", optimized_dir.display()))?;

    let temp = temp_path(optimized_dir, stem);
    write_intermediate(&decoded, &temp, config.derivatives.intermediate_quality)?;
    if !verify_preservation(original, &temp) {
        bail!("EXIF verification failed after conversion for {}", original.display());
    }

    let set = derivatives::generate(&decoded, optimized_dir, stem, &config.derivatives)?;

    if let Err(e) = std::fs::remove_file(&temp) {
        log::warn!("Failed to remove temporary file {}: {e}", temp.display());
    }
    Ok(set)
}

/// Remove leftover intermediates (`*.temp.jpg`) from `dir`.
///
/// Returns how many were removed; failures are logged and skipped.
pub fn cleanup_temp_files(dir: &Path) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::debug!("Skipping temp cleanup in {}: {e}", dir.display());
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let is_temp = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(TEMP_SUFFIX));
        if !is_temp || !path.is_file() {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                log::debug!("Cleaned up temporary file: {}", path.display());
                removed += 1;
            }
            Err(e) => log::warn!("Failed to remove temporary file {}: {e}", path.display()),
        }
    }
    removed
}

/// How many of `images` are containers this build cannot decode.
pub fn unsupported_containers(images: &[PathBuf]) -> usize {
    if cfg!(feature = "heif") {
        return 0;
    }
    images
        .iter()
        .filter(|p| ImageKind::from_path(p).is_some_and(ImageKind::is_container))
        .count()
}

/// Process every photograph in the configured directory.
pub fn run_batch(config: &Config, options: &ProcessOptions, recursive: bool) -> BatchReport {
    let paths = &config.paths;
    log::info!("Scanning for photographs in: {}", paths.photographs_dir.display());

    let images = collect_images(&paths.photographs_dir, recursive, &paths.optimized_dir);
    if images.is_empty() {
        log::warn!("No image files found in {}", paths.photographs_dir.display());
        return BatchReport::default();
    }

    let total = images.len();
    log::info!("Found {total} image(s)");

    let unsupported = unsupported_containers(&images);
    if unsupported > 0 {
        log::error!(
            "{unsupported} HEIC/HEIF file(s) will fail: built without the `heif` feature \
             (rebuild with `--features heif`, needs the system libheif)"
        );
    }

    let mut report = BatchReport::default();
    for (i, path) in images.iter().enumerate() {
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        log::info!("[{}/{}] Processing: {name}", i + 1, total);

        let result = process_image(path, config, options);
        if let Some(ref err) = result.error {
            log::error!("{err}");
        }
        report.results.push(result);
    }

    cleanup_temp_files(&paths.optimized_dir);

    log::info!("Processing complete!");
    log::info!("Successfully processed: {} image(s)", report.succeeded());
    let failed: Vec<&ProcessResult> = report.failed().collect();
    if !failed.is_empty() {
        log::warn!("Failed to process: {} image(s)", failed.len());
        log::warn!("Errors encountered:");
        for r in failed {
            log::warn!("  - {}", r.error.as_deref().unwrap_or_default());
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::tests::{camera_exif, fake_heic};
    use crate::exif::writer::encode_jpeg;
    use crate::exif::{Field, FieldValue};
    use image::{DynamicImage, GenericImageView, RgbImage};
    use tempfile::TempDir;

    struct Workspace {
        _dir: TempDir,
        config: Config,
    }

    fn workspace() -> Workspace {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.photographs_dir = dir.path().join("photographs");
        config.paths.optimized_dir = dir.path().join("photographs").join("optimized");
        config.paths.data_dir = dir.path().join("data");
        std::fs::create_dir_all(&config.paths.photographs_dir).unwrap();
        Workspace { _dir: dir, config }
    }

    fn write_jpeg(path: &Path, width: u32, height: u32, exif: Option<&[u8]>) {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 60])
        }));
        std::fs::write(path, encode_jpeg(&img, 92, exif).unwrap()).unwrap();
    }

    fn text(value: &str) -> FieldValue {
        FieldValue::Text(value.to_string())
    }

    // ── ImageKind / collect_images ───────────────────────────────────

    #[test]
    fn image_kind_from_extension() {
        assert_eq!(ImageKind::from_path(Path::new("a.JPEG")), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_path(Path::new("a.heif")), Some(ImageKind::Heif));
        assert_eq!(ImageKind::from_path(Path::new("a.gif")), Some(ImageKind::Gif));
        assert_eq!(ImageKind::from_path(Path::new("a.tiff")), None);
        assert_eq!(ImageKind::from_path(Path::new("README")), None);
        assert!(!ImageKind::Jpeg.is_container());
    }

    #[test]
    fn collects_one_level_by_default() {
        let ws = workspace();
        let photos = &ws.config.paths.photographs_dir;
        std::fs::create_dir_all(photos.join("trip")).unwrap();
        std::fs::create_dir_all(&ws.config.paths.optimized_dir).unwrap();
        for name in ["b.JPG", "a.heic", "notes.txt", "trip/c.png", "optimized/a_full.jpg"] {
            std::fs::write(photos.join(name), b"x").unwrap();
        }

        let flat = collect_images(photos, false, &ws.config.paths.optimized_dir);
        assert_eq!(flat, vec![photos.join("a.heic"), photos.join("b.JPG")]);

        let deep = collect_images(photos, true, &ws.config.paths.optimized_dir);
        assert_eq!(
            deep,
            vec![photos.join("a.heic"), photos.join("b.JPG"), photos.join("trip/c.png")]
        );
    }

    #[test]
    fn missing_directory_collects_nothing() {
        let ws = workspace();
        let missing = ws.config.paths.photographs_dir.join("nope");
        assert!(collect_images(&missing, true, &ws.config.paths.optimized_dir).is_empty());
    }

    // ── process_image ────────────────────────────────────────────────

    #[test]
    fn processes_jpeg_end_to_end() {
        let ws = workspace();
        let src = ws.config.paths.photographs_dir.join("IMG_0001.jpg");
        write_jpeg(&src, 120, 80, Some(&camera_exif(1)));

        let result = process_image(&src, &ws.config, &ProcessOptions::default());
        assert!(result.is_success(), "{:?}", result.error);
        assert!(!result.derivatives_skipped);
        assert_eq!(result.metadata.get(Field::Make), Some(&text("Acme")));

        let set = result.derivatives.as_ref().unwrap();
        assert!(set.all_exist());
        assert_eq!(set.paths().count(), 9);

        let doc = std::fs::read_to_string(ws.config.paths.data_dir.join("IMG_0001.md")).unwrap();
        assert!(doc.starts_with("---\nyear: 2023\n"));
        assert!(doc.contains("image: /photographs/optimized/IMG_0001.jpg\n"));
        assert!(doc.contains("make: Acme\n"));
        assert!(!doc.contains("GPS"));
        assert!(doc.ends_with("defaultBackgroundColor: black\n---\n"));
    }

    #[test]
    fn second_run_skips_derivatives_and_keeps_title() {
        let ws = workspace();
        let src = ws.config.paths.photographs_dir.join("IMG_0002.jpg");
        write_jpeg(&src, 64, 48, Some(&camera_exif(1)));
        assert!(process_image(&src, &ws.config, &ProcessOptions::default()).is_success());

        let md = ws.config.paths.data_dir.join("IMG_0002.md");
        let doc = std::fs::read_to_string(&md).unwrap();
        std::fs::write(&md, doc.replacen("---\n", "---\ntitle: Harbour\n", 1)).unwrap();

        let again = process_image(&src, &ws.config, &ProcessOptions::default());
        assert!(again.is_success());
        assert!(again.derivatives_skipped);
        assert!(std::fs::read_to_string(&md).unwrap().contains("title: Harbour\n"));

        let forced = ProcessOptions { force_update: true, force_derivatives: true };
        let third = process_image(&src, &ws.config, &forced);
        assert!(third.is_success());
        assert!(!third.derivatives_skipped);
        assert!(!std::fs::read_to_string(&md).unwrap().contains("title:"));
    }

    #[test]
    fn verify_all_checks_standard_inputs() {
        let mut ws = workspace();
        ws.config.processing.verify_all = true;
        let src = ws.config.paths.photographs_dir.join("IMG_0003.jpg");
        write_jpeg(&src, 50, 50, Some(&camera_exif(1)));

        let result = process_image(&src, &ws.config, &ProcessOptions::default());
        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.verified, Some(true));
    }

    #[test]
    fn undecodable_file_fails_but_writes_document() {
        let ws = workspace();
        let src = ws.config.paths.photographs_dir.join("broken.png");
        std::fs::write(&src, b"not a png").unwrap();

        let result = process_image(&src, &ws.config, &ProcessOptions::default());
        assert!(!result.is_success());
        assert!(result.document.as_ref().unwrap().exists());
        assert!(result.metadata.is_empty());
    }

    // ── container conversion ─────────────────────────────────────────

    #[test]
    fn converts_container_with_verification() {
        let ws = workspace();
        // Stand-in original whose metadata matches the fake container.
        let original = ws.config.paths.photographs_dir.join("IMG_0004.jpg");
        write_jpeg(&original, 8, 8, Some(&camera_exif(1)));

        let mut warnings = Vec::new();
        let set = convert_container(&original, &fake_heic(6, 60, 40), "IMG_0004", &ws.config, &mut warnings)
            .unwrap();
        assert!(warnings.is_empty());
        assert!(set.all_exist());

        let optimized = &ws.config.paths.optimized_dir;
        let files: Vec<_> = std::fs::read_dir(optimized).unwrap().collect();
        assert_eq!(files.len(), 9, "intermediate should be removed");

        let full = set.get(SizeTier::Full, Encoding::Jpeg).unwrap();
        assert_eq!(image::open(full).unwrap().dimensions(), (40, 60));
        let record = extract_metadata(full, ImageKind::Jpeg);
        assert_eq!(record.get(Field::Make), Some(&text("Acme")));
        assert_eq!(record.get(Field::DateTaken), Some(&text("2023-05-14T10:22:31Z")));
        assert_eq!(record.get(Field::ShutterSpeed), Some(&text("1/500s")));
    }

    #[test]
    fn intermediate_mismatch_stops_before_derivatives() {
        let ws = workspace();
        let original = ws.config.paths.photographs_dir.join("IMG_0005.jpg");
        // Original claims no metadata at all; the container carries some.
        write_jpeg(&original, 8, 8, None);

        let mut warnings = Vec::new();
        let err = convert_container(&original, &fake_heic(1, 16, 16), "IMG_0005", &ws.config, &mut warnings)
            .unwrap_err();
        assert!(format!("{err:#}").contains("verification failed"));

        let optimized = &ws.config.paths.optimized_dir;
        assert!(temp_path(optimized, "IMG_0005").exists());
        assert!(!DerivativeSet::expected(optimized, "IMG_0005").all_exist());

        assert_eq!(cleanup_temp_files(optimized), 1);
        assert!(!temp_path(optimized, "IMG_0005").exists());
    }

    // ── batch ────────────────────────────────────────────────────────

    #[test]
    fn counts_containers_only_without_heif() {
        let images = vec![PathBuf::from("a.heic"), PathBuf::from("b.JPG"), PathBuf::from("c.HEIF")];
        let expected = if cfg!(feature = "heif") { 0 } else { 2 };
        assert_eq!(unsupported_containers(&images), expected);
    }

    #[test]
    fn empty_batch_exits_zero() {
        let ws = workspace();
        let report = run_batch(&ws.config, &ProcessOptions::default(), false);
        assert!(report.results.is_empty());
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn one_failure_fails_the_batch() {
        let ws = workspace();
        let photos = &ws.config.paths.photographs_dir;
        write_jpeg(&photos.join("good.jpg"), 32, 24, Some(&camera_exif(1)));
        std::fs::write(photos.join("bad.webp"), b"garbage").unwrap();
        std::fs::create_dir_all(&ws.config.paths.optimized_dir).unwrap();
        std::fs::write(temp_path(&ws.config.paths.optimized_dir, "old"), b"x").unwrap();

        let report = run_batch(&ws.config, &ProcessOptions::default(), false);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.exit_code(), 1);
        assert!(report.failed().all(|r| r.path.ends_with("bad.webp")));
        assert!(!temp_path(&ws.config.paths.optimized_dir, "old").exists());

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"error\""));
    }
}
