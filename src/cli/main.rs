use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};

use photo_derivatives::config::Config;
use photo_derivatives::exif::{Field, extract_metadata};
use photo_derivatives::pipeline::{self, ImageKind, ProcessOptions};

#[cfg(feature = "heif")]
const HEIF_HELP: &str = "HEIC/HEIF input is decoded with the system libheif.";

#[cfg(not(feature = "heif"))]
const HEIF_HELP: &str = "This build has no HEIC/HEIF support: .heic/.heif files fail. \
Rebuild with `--features heif` (needs the system libheif).";

#[derive(Parser, Debug)]
#[command(
    name = "photo-derivatives",
    version,
    about = "Generate web derivatives and front-matter documents for a photograph library",
    after_help = HEIF_HELP
)]
struct Cli {
    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Source photographs directory (overrides config)
    #[arg(long, value_name = "DIR")]
    photographs_dir: Option<PathBuf>,

    /// Derivative output directory (overrides config)
    #[arg(long, value_name = "DIR")]
    optimized_dir: Option<PathBuf>,

    /// Markdown document directory (overrides config)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Rewrite documents without keeping existing title/description
    #[arg(short, long)]
    force: bool,

    /// Regenerate derivatives even when they already exist
    #[arg(long)]
    force_derivatives: bool,

    /// Walk subdirectories of the photographs directory
    #[arg(short, long)]
    recursive: bool,

    /// Verify metadata for every input with EXIF, not only HEIC/HEIF
    #[arg(long)]
    verify_all: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Display the extracted metadata record for each photograph and exit
    #[arg(long = "show-metadata")]
    show_metadata: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    if cli.init {
        let config = Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.photographs_dir {
        config.paths.photographs_dir = dir;
    }
    if let Some(dir) = cli.optimized_dir {
        config.paths.optimized_dir = dir;
    }
    if let Some(dir) = cli.data_dir {
        config.paths.data_dir = dir;
    }
    if cli.verify_all {
        config.processing.verify_all = true;
    }

    if cli.show_metadata {
        let images = pipeline::collect_images(
            &config.paths.photographs_dir,
            cli.recursive,
            &config.paths.optimized_dir,
        );
        if images.is_empty() {
            log::warn!("No image files found in {}", config.paths.photographs_dir.display());
        }
        for path in &images {
            print_metadata(path, cli.json)?;
        }
        return Ok(());
    }

    let options = ProcessOptions {
        force_update: cli.force,
        force_derivatives: cli.force_derivatives,
    };
    let report = pipeline::run_batch(&config, &options, cli.recursive);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report.results)?);
    }

    std::process::exit(report.exit_code());
}

const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// Max width for the value column before wrapping.
const VAL_WIDTH: usize = 46;
/// Indent for continuation lines (tag column width + " : " = 25 chars + 2 leading spaces).
const INDENT: &str = "                           ";

/// Print the metadata record of one photograph, as a table or JSON.
fn print_metadata(path: &Path, json: bool) -> Result<()> {
    let Some(kind) = ImageKind::from_path(path) else {
        log::warn!("Unsupported format: {}", path.display());
        return Ok(());
    };
    let record = extract_metadata(path, kind);

    if json {
        let value = serde_json::json!({
            "path": path.display().to_string(),
            "metadata": record,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!();
    println!("{BOLD}File:{RESET} {}", path.display());
    println!("{DIM}{}{RESET}", "═".repeat(72));
    if record.is_empty() {
        println!("  {DIM}(no EXIF metadata found){RESET}");
    }
    for field in Field::ALL {
        if let Some(value) = record.get(field) {
            print_row(field.key(), &value.to_string());
        }
    }
    println!();
    Ok(())
}

/// Print a single row in the metadata table.
fn print_row(tag: &str, val: &str) {
    let tag_col = format!("{:<22}", tag);
    let lines = wrap_text(val, VAL_WIDTH);
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            println!("  {tag_col} : {line}");
        } else {
            println!("  {INDENT}{line}");
        }
    }
}

/// Wrap text at word boundaries to fit within max_width.
fn wrap_text(s: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current_line = String::new();

    for word in s.split_whitespace() {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.len() + 1 + word.len() <= max_width {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            lines.push(current_line);
            current_line = word.to_string();
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(s.to_string());
    }

    lines
}
