use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the photo-derivatives library.
///
/// Controls where photographs are read from and written to, the derivative
/// encoding constants, and how strictly metadata is handled.
///
/// # Loading
///
/// ```rust,no_run
/// use photo_derivatives::config::Config;
///
/// // From a JSON file
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.paths.photographs_dir = "public/photographs".into();
/// config.derivatives.full_size = 2560;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Input, output and URL locations.
    pub paths: PathsConfig,
    /// Encoding constants for the derivative matrix.
    pub derivatives: DerivativeConfig,
    /// Metadata handling.
    pub processing: ProcessingConfig,
}

/// Directory layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Source photographs.
    pub photographs_dir: PathBuf,
    /// Derivative output. Skipped when walking `photographs_dir`.
    pub optimized_dir: PathBuf,
    /// Front-matter documents, one `<name>.md` per photograph.
    pub data_dir: PathBuf,
    /// Public URL prefix of `optimized_dir`, used for the document `image` field.
    pub image_url_prefix: String,
}

/// Derivative encoding constants.
///
/// # Example
///
/// ```rust
/// use photo_derivatives::config::DerivativeConfig;
///
/// let derivatives = DerivativeConfig {
///     full_size: 2560,
///     ..DerivativeConfig::default()
/// };
/// assert_eq!(derivatives.jpeg_quality, 85);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivativeConfig {
    /// Bounding box edge of the `full` tier.
    pub full_size: u32,
    pub jpeg_quality: u8,
    /// WebP quality, 0–100.
    pub webp_quality: f32,
    pub blur_quality: u8,
    /// Bounding box edge of the blur placeholder.
    pub blur_size: u32,
    /// Quality of the full-resolution intermediate JPEG written for containers.
    pub intermediate_quality: u8,
}

/// Metadata handling options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Verify metadata preservation for every input with EXIF, not only
    /// HEIC/HEIF containers.
    pub verify_all: bool,
    /// Fail a file whose EXIF cannot be sanitized instead of embedding it
    /// unchanged.
    pub strict_sanitize: bool,
    /// `defaultBackgroundColor` written to every document.
    pub default_background_color: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            photographs_dir: PathBuf::from("public/photographs"),
            optimized_dir: PathBuf::from("public/photographs/optimized"),
            data_dir: PathBuf::from("src/data/photography"),
            image_url_prefix: "/photographs/optimized".to_string(),
        }
    }
}

impl Default for DerivativeConfig {
    fn default() -> Self {
        Self {
            full_size: 1920,
            jpeg_quality: 85,
            webp_quality: 85.0,
            blur_quality: 30,
            blur_size: 20,
            intermediate_quality: 95,
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            verify_all: false,
            strict_sanitize: false,
            default_background_color: "black".to_string(),
        }
    }
}

impl Config {
    /// Resolve the config file path, next to the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// Reject values the encoders can't honour.
    pub fn validate(&self) -> Result<()> {
        let d = &self.derivatives;
        for (name, q) in [
            ("jpeg_quality", d.jpeg_quality),
            ("blur_quality", d.blur_quality),
            ("intermediate_quality", d.intermediate_quality),
        ] {
            ensure!((1..=100).contains(&q), "derivatives.{name} must be 1–100, got {q}");
        }
        ensure!(
            (0.0..=100.0).contains(&d.webp_quality),
            "derivatives.webp_quality must be 0–100, got {}",
            d.webp_quality
        );
        ensure!(d.full_size > 0, "derivatives.full_size must be positive");
        ensure!(d.blur_size > 0, "derivatives.blur_size must be positive");
        Ok(())
    }
}
