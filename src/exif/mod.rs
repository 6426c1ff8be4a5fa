//! EXIF reading, sanitizing, embedding and verification.
//!
//! - [`extract_metadata`]: normalized [`MetadataRecord`] for any supported image
//! - [`sanitize`]: strip location and timezone tags from a raw blob (fails open)
//! - [`encode_jpeg`] / [`encode_webp`]: derivative encoders, JPEG with EXIF
//! - [`verify_preservation`]: metadata round-trip check between two files
//!
//! Raw blobs are read and rewritten per sub-section through [`fields`]:
//! kamadak-exif first, the crate's own TIFF codec ([`ExifBlob`]) for blobs
//! it rejects.

pub mod fields;
pub mod rational;
pub mod reader;
pub mod record;
pub mod sanitize;
pub mod tags;
pub mod tiff;
pub mod value;
pub mod verify;
pub mod writer;

pub use rational::{RationalMode, Ratio};
pub use reader::{MetadataSource, extract_metadata};
pub use record::{Field, FieldValue, MetadataRecord};
pub use sanitize::{Passthrough, sanitize};
pub use tiff::ExifBlob;
pub use value::{TagMap, TagValue};
pub use verify::{compare_records, verify_preservation};
pub use writer::{encode_jpeg, encode_webp};
