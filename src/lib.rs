//! # photo-derivatives
//!
//! Build-time image pipeline for a photography site. For every photograph it
//! writes a set of resized web derivatives (JPEG and WebP at four size tiers
//! plus a tiny blur placeholder) and a Markdown document whose YAML front
//! matter carries the camera metadata.
//!
//! Location data never leaves the original: the GPS section, sub-second
//! timing tags and timezone-offset tags are stripped before EXIF is embedded
//! in any derivative.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use photo_derivatives::config::Config;
//! use photo_derivatives::pipeline::{ProcessOptions, run_batch};
//!
//! let config = Config::load(Some("config.json".as_ref()))?;
//! let report = run_batch(&config, &ProcessOptions::default(), false);
//!
//! for result in report.failed() {
//!     eprintln!("{}", result.error.as_deref().unwrap_or_default());
//! }
//! std::process::exit(report.exit_code());
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Lower-Level Usage
//!
//! ```rust,no_run
//! use photo_derivatives::container::decode_any;
//! use photo_derivatives::config::DerivativeConfig;
//! use photo_derivatives::derivatives::generate;
//! use photo_derivatives::exif::extract_metadata;
//! use photo_derivatives::pipeline::ImageKind;
//! use std::path::Path;
//!
//! let path = Path::new("IMG_0001.jpg");
//! let record = extract_metadata(path, ImageKind::Jpeg);
//! println!("Taken: {:?}", record.get(photo_derivatives::exif::Field::DateTaken));
//!
//! let decoded = decode_any(path, ImageKind::Jpeg, false)?;
//! let set = generate(&decoded, Path::new("optimized"), "IMG_0001", &DerivativeConfig::default())?;
//! println!("Wrote {} files", set.paths().count());
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Supported Formats
//!
//! | Format | Pixels | Metadata |
//! |--------|--------|----------|
//! | JPEG (`.jpg`, `.jpeg`) | `image` | APP1 segment via `img-parts` |
//! | PNG (`.png`) | `image` | `eXIf` chunk via `img-parts` |
//! | WebP (`.webp`) | `image` | RIFF `EXIF` chunk via `img-parts` |
//! | GIF (`.gif`) | `image` | none |
//! | HEIC/HEIF (`.heic`, `.heif`) | `libheif-rs` (feature `heif`, on by default) | container EXIF item, read with `kamadak-exif` |
//!
//! HEIC support links the system libheif. Build with
//! `--no-default-features --features cli` to drop it; `.heic`/`.heif` files
//! then fail with an error naming the missing feature.
//!
//! ## Modules
//!
//! - [`config`]: Configuration types and loading/saving
//! - [`exif`]: Tag-level EXIF access, sanitizer, metadata extraction and verification
//! - [`container`]: Decoding sources into oriented pixels plus sanitized EXIF
//! - [`derivatives`]: The size tier × encoding matrix
//! - [`frontmatter`]: Markdown documents
//! - [`pipeline`]: File discovery, per-file orchestration and batch reporting

pub mod config;
pub mod container;
pub mod derivatives;
pub mod exif;
pub mod frontmatter;
pub mod pipeline;
