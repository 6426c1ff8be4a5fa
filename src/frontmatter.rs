//! Markdown documents with a YAML front-matter block, one per photograph.
//!
//! Only flat `key: scalar` maps are written or read back; that is all the
//! site consumes.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::Path;

use crate::exif::{Field, FieldValue, MetadataRecord};

/// Document key order. Keys not listed here follow in the order they were added.
const KEY_ORDER: &[&str] = &[
    "title",
    "description",
    "year",
    "dateTaken",
    "image",
    "make",
    "model",
    "focalLength",
    "aperture",
    "shutterSpeed",
    "iso",
    "lens",
    "defaultBackgroundColor",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&FieldValue> for Scalar {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Text(s) => Scalar::Str(s.clone()),
            FieldValue::Integer(v) => Scalar::Int(*v),
            FieldValue::Float(v) => Scalar::Float(*v),
        }
    }
}

/// Hand-edited values carried over from a previous document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExistingDocument {
    pub title: Option<Scalar>,
    pub description: Option<Scalar>,
}

/// An ordered front-matter map.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontMatter {
    entries: Vec<(String, Scalar)>,
}

impl FrontMatter {
    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

/// Assemble the front matter for one photograph.
///
/// `existing` supplies `title` and `description`; pass `None` to drop them
/// (forced regeneration).
pub fn build(
    record: &MetadataRecord,
    image_url: &str,
    background_color: &str,
    existing: Option<&ExistingDocument>,
) -> FrontMatter {
    let mut entries: Vec<(String, Scalar)> = Vec::new();
    let mut put = |key: &str, value: Option<Scalar>| {
        if let Some(value) = value {
            entries.push((key.to_string(), value));
        }
    };

    put("title", existing.and_then(|e| e.title.clone()));
    put("description", existing.and_then(|e| e.description.clone()));

    let date_taken = record.get(Field::DateTaken).and_then(FieldValue::as_text);
    put(
        "year",
        date_taken
            .and_then(|d| d.get(..4))
            .and_then(|y| y.parse().ok())
            .map(Scalar::Int),
    );
    put("image", Some(Scalar::Str(image_url.to_string())));
    put(
        "defaultBackgroundColor",
        Some(Scalar::Str(background_color.to_string())),
    );
    for (field, value) in record.iter() {
        put(field.key(), Some(Scalar::from(value)));
    }

    order_entries(&mut entries);
    FrontMatter { entries }
}

/// Stable sort by [`KEY_ORDER`] rank; unlisted keys keep their relative order.
fn order_entries(entries: &mut [(String, Scalar)]) {
    entries.sort_by_key(|(key, _)| {
        KEY_ORDER.iter().position(|k| *k == key.as_str()).unwrap_or(KEY_ORDER.len())
    });
}

/// Render `---\n<yaml>---\n`.
pub fn render(front_matter: &FrontMatter) -> String {
    let mut out = String::from("---\n");
    for (key, value) in &front_matter.entries {
        let _ = writeln!(out, "{key}: {}", render_scalar(value));
    }
    out.push_str("---\n");
    out
}

/// Write a document, creating its directory if needed.
pub fn write_document(path: &Path, front_matter: &FrontMatter) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, render(front_matter))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!("Generated: {}", path.display());
    Ok(())
}

/// Read `title` and `description` back from an existing document.
///
/// A missing file is `None`; an unreadable one is logged and also `None`.
pub fn read_existing(path: &Path) -> Option<ExistingDocument> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            log::warn!("Could not read existing markdown {}: {e}", path.display());
            return None;
        }
    };

    let Some(block) = front_matter_block(&content) else {
        log::warn!("No front matter in {}", path.display());
        return None;
    };

    let mut doc = ExistingDocument::default();
    for (key, raw) in top_level_entries(block) {
        match key {
            "title" => doc.title = parse_scalar(&raw),
            "description" => doc.description = parse_scalar(&raw),
            _ => {}
        }
    }
    Some(doc)
}

fn front_matter_block(content: &str) -> Option<&str> {
    let rest = content.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n"))?;
    let end = rest
        .match_indices("---")
        .map(|(i, _)| i)
        .find(|i| *i == 0 || rest[..*i].ends_with('\n'))?;
    Some(&rest[..end])
}

/// `key: value` pairs at column zero. Indented lines continue the previous
/// value: folded with spaces, or with newlines for `|` block scalars.
fn top_level_entries(block: &str) -> Vec<(&str, String)> {
    let mut entries: Vec<(&str, String)> = Vec::new();
    let mut literal = false;

    for line in block.lines() {
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            if literal {
                if let Some((_, value)) = entries.last_mut() {
                    value.push('\n');
                }
            }
            continue;
        }
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = entries.last_mut() {
                let sep = if literal { '\n' } else { ' ' };
                if !value.is_empty() {
                    value.push(sep);
                }
                value.push_str(line.trim());
            }
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        literal = value.starts_with('|');
        let value = if value.starts_with(['|', '>']) { String::new() } else { value.to_string() };
        entries.push((key.trim(), value));
    }

    for (_, value) in entries.iter_mut() {
        let trimmed = value.trim_end_matches('\n').to_string();
        *value = trimmed;
    }
    entries
}

fn parse_scalar(raw: &str) -> Option<Scalar> {
    let raw = raw.trim();
    if let Some(inner) = raw.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
        return Some(Scalar::Str(inner.replace("''", "'")));
    }
    if let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        return Some(Scalar::Str(unescape_double(inner)));
    }
    match raw {
        "" | "~" | "null" | "Null" | "NULL" => None,
        "true" | "True" | "TRUE" => Some(Scalar::Bool(true)),
        "false" | "False" | "FALSE" => Some(Scalar::Bool(false)),
        _ => {
            if let Ok(v) = raw.parse::<i64>() {
                Some(Scalar::Int(v))
            } else if let Some(v) = raw.parse::<f64>().ok().filter(|v| v.is_finite()) {
                Some(Scalar::Float(v))
            } else {
                Some(Scalar::Str(raw.to_string()))
            }
        }
    }
}

fn unescape_double(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                if let Some(ch) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    out.push(ch);
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn render_scalar(value: &Scalar) -> String {
    match value {
        Scalar::Int(v) => v.to_string(),
        Scalar::Bool(v) => v.to_string(),
        Scalar::Float(v) if !v.is_finite() => "null".to_string(),
        // 4.0 stays a float when read back
        Scalar::Float(v) if v.fract() == 0.0 && v.abs() < 1e16 => format!("{v:.1}"),
        Scalar::Float(v) => v.to_string(),
        Scalar::Str(s) => render_string(s),
    }
}

fn render_string(s: &str) -> String {
    if s.chars().any(|c| c.is_control()) {
        let mut out = String::from("\"");
        for c in s.chars() {
            match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                c if c.is_control() => {
                    let _ = write!(out, "\\u{:04x}", c as u32);
                }
                c => out.push(c),
            }
        }
        out.push('"');
        out
    } else if needs_quotes(s) {
        format!("'{}'", s.replace('\'', "''"))
    } else {
        s.to_string()
    }
}

/// Whether a plain scalar would be read back as something other than this
/// string.
fn needs_quotes(s: &str) -> bool {
    const RESERVED: &[&str] = &[
        "true", "false", "yes", "no", "on", "off", "y", "n", "null", "~",
    ];
    const INDICATORS: &[char] = &[
        '-', '?', ':', ',', '[', ']', '{', '}', '#', '&', '*', '!', '|', '>', '\'', '"', '%',
        '@', '`',
    ];

    let Some(first) = s.chars().next() else {
        return true;
    };
    s != s.trim()
        || RESERVED.contains(&s.to_ascii_lowercase().as_str())
        || INDICATORS.contains(&first)
        || s.contains(": ")
        || s.contains(" #")
        || s.ends_with(':')
        || s.parse::<f64>().is_ok()
        || (first.is_ascii_digit()
            && s.chars()
                .all(|c| c.is_ascii_hexdigit() || "xXoO_:.+-TtZz ".contains(c)))
}
