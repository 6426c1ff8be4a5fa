use std::path::Path;

use super::rational::parse_fraction_seconds;
use super::reader::extract_metadata;
use super::record::{Field, FieldValue, MetadataRecord};
use crate::pipeline::ImageKind;

const REL_TOL: f64 = 1e-3;
const ABS_TOL: f64 = 1e-6;

/// Fields checked when comparing an original against a derivative.
const CHECKED: [Field; 8] = [
    Field::DateTaken,
    Field::Make,
    Field::Model,
    Field::FocalLength,
    Field::Aperture,
    Field::ShutterSpeed,
    Field::Iso,
    Field::Lens,
];

fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= f64::max(REL_TOL * f64::max(a.abs(), b.abs()), ABS_TOL)
}

fn numeric(field: Field, value: &FieldValue) -> Option<f64> {
    match (field, value) {
        (Field::ShutterSpeed, FieldValue::Text(s)) => parse_fraction_seconds(s),
        _ => value.as_f64(),
    }
}

fn values_match(field: Field, a: &FieldValue, b: &FieldValue) -> bool {
    if a == b {
        return true;
    }
    match (numeric(field, a), numeric(field, b)) {
        (Some(x), Some(y)) => is_close(x, y),
        _ => a.to_string().trim() == b.to_string().trim(),
    }
}

/// Fields whose values differ between `original` and `derived`.
pub fn compare_records(original: &MetadataRecord, derived: &MetadataRecord) -> Vec<Field> {
    CHECKED
        .into_iter()
        .filter(|field| match (original.get(*field), derived.get(*field)) {
            (None, None) => false,
            (Some(a), Some(b)) => !values_match(*field, a, b),
            _ => true,
        })
        .collect()
}

/// Check that a derivative still carries the original's metadata.
pub fn verify_preservation(original: &Path, derivative: &Path) -> bool {
    let Some(original_kind) = ImageKind::from_path(original) else {
        log::warn!("Cannot verify {}: unsupported format", original.display());
        return false;
    };
    let Some(derived_kind) = ImageKind::from_path(derivative) else {
        log::warn!("Cannot verify {}: unsupported format", derivative.display());
        return false;
    };

    let before = extract_metadata(original, original_kind);
    let after = extract_metadata(derivative, derived_kind);
    let failed = compare_records(&before, &after);

    for field in &failed {
        log::warn!(
            "Metadata mismatch for {} in {}: {:?} → {:?}",
            field,
            derivative.display(),
            before.get(*field).map(ToString::to_string),
            after.get(*field).map(ToString::to_string),
        );
    }
    failed.is_empty()
}
