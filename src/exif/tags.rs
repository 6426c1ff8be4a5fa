//! EXIF tag identifiers and their symbolic names per sub-section.
//!
//! The same numeric ID means different things in different sections
//! (`0x0002` is `GPSLatitude` in the GPS section and
//! `InteroperabilityVersion` in the Interop section), so every lookup is
//! keyed by [`Section`].

/// A sub-section (IFD) of an EXIF blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Section {
    /// IFD0: image-level tags (make, model, orientation, ...).
    Primary,
    /// Exif sub-IFD: capture parameters.
    Exif,
    /// GPS sub-IFD.
    Gps,
    /// Interoperability sub-IFD.
    Interop,
    /// IFD1: the embedded thumbnail's tags.
    Thumbnail,
}

impl Section {
    pub const ALL: [Section; 5] = [
        Section::Primary,
        Section::Exif,
        Section::Gps,
        Section::Interop,
        Section::Thumbnail,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Section::Primary => "0th",
            Section::Exif => "Exif",
            Section::Gps => "GPS",
            Section::Interop => "Interop",
            Section::Thumbnail => "1st",
        }
    }
}

// IFD0 / IFD1
pub const IMAGE_DESCRIPTION: u16 = 0x010E;
pub const MAKE: u16 = 0x010F;
pub const MODEL: u16 = 0x0110;
pub const ORIENTATION: u16 = 0x0112;
pub const SOFTWARE: u16 = 0x0131;
pub const DATE_TIME: u16 = 0x0132;
pub const JPEG_INTERCHANGE_FORMAT: u16 = 0x0201;
pub const JPEG_INTERCHANGE_FORMAT_LENGTH: u16 = 0x0202;

// Sub-IFD pointers
pub const EXIF_IFD_POINTER: u16 = 0x8769;
pub const GPS_IFD_POINTER: u16 = 0x8825;
pub const INTEROP_IFD_POINTER: u16 = 0xA005;

// Exif IFD
pub const EXPOSURE_TIME: u16 = 0x829A;
pub const F_NUMBER: u16 = 0x829D;
pub const ISO_SPEED_RATINGS: u16 = 0x8827;
pub const DATE_TIME_ORIGINAL: u16 = 0x9003;
pub const DATE_TIME_DIGITIZED: u16 = 0x9004;
pub const OFFSET_TIME: u16 = 0x9010;
pub const OFFSET_TIME_ORIGINAL: u16 = 0x9011;
pub const OFFSET_TIME_DIGITIZED: u16 = 0x9012;
pub const FOCAL_LENGTH: u16 = 0x920A;
pub const SUB_SEC_TIME_ORIGINAL: u16 = 0x9291;
pub const SUB_SEC_TIME_DIGITIZED: u16 = 0x9292;
pub const FOCAL_LENGTH_IN_35MM_FILM: u16 = 0xA405;
pub const LENS_MODEL: u16 = 0xA434;

// GPS IFD
pub const GPS_VERSION_ID: u16 = 0x0000;
pub const GPS_LATITUDE_REF: u16 = 0x0001;
pub const GPS_LATITUDE: u16 = 0x0002;
pub const GPS_LONGITUDE_REF: u16 = 0x0003;
pub const GPS_LONGITUDE: u16 = 0x0004;

const IMAGE_TAGS: &[(u16, &str)] = &[
    (0x00FE, "NewSubfileType"),
    (0x0100, "ImageWidth"),
    (0x0101, "ImageLength"),
    (0x0102, "BitsPerSample"),
    (0x0103, "Compression"),
    (0x0106, "PhotometricInterpretation"),
    (IMAGE_DESCRIPTION, "ImageDescription"),
    (MAKE, "Make"),
    (MODEL, "Model"),
    (0x0111, "StripOffsets"),
    (ORIENTATION, "Orientation"),
    (0x0115, "SamplesPerPixel"),
    (0x0116, "RowsPerStrip"),
    (0x0117, "StripByteCounts"),
    (0x011A, "XResolution"),
    (0x011B, "YResolution"),
    (0x011C, "PlanarConfiguration"),
    (0x0128, "ResolutionUnit"),
    (SOFTWARE, "Software"),
    (DATE_TIME, "DateTime"),
    (0x013B, "Artist"),
    (0x013C, "HostComputer"),
    (JPEG_INTERCHANGE_FORMAT, "JPEGInterchangeFormat"),
    (JPEG_INTERCHANGE_FORMAT_LENGTH, "JPEGInterchangeFormatLength"),
    (0x0211, "YCbCrCoefficients"),
    (0x0213, "YCbCrPositioning"),
    (0x0214, "ReferenceBlackWhite"),
    (0x8298, "Copyright"),
    (EXIF_IFD_POINTER, "ExifTag"),
    (GPS_IFD_POINTER, "GPSInfo"),
    (0x9C9B, "XPTitle"),
    (0x9C9C, "XPComment"),
    (0x9C9D, "XPAuthor"),
    (0x9C9E, "XPKeywords"),
    (0x9C9F, "XPSubject"),
];

const EXIF_TAGS: &[(u16, &str)] = &[
    (EXPOSURE_TIME, "ExposureTime"),
    (F_NUMBER, "FNumber"),
    (0x8822, "ExposureProgram"),
    (ISO_SPEED_RATINGS, "ISOSpeedRatings"),
    (0x8830, "SensitivityType"),
    (0x9000, "ExifVersion"),
    (DATE_TIME_ORIGINAL, "DateTimeOriginal"),
    (DATE_TIME_DIGITIZED, "DateTimeDigitized"),
    (OFFSET_TIME, "OffsetTime"),
    (OFFSET_TIME_ORIGINAL, "OffsetTimeOriginal"),
    (OFFSET_TIME_DIGITIZED, "OffsetTimeDigitized"),
    (0x9101, "ComponentsConfiguration"),
    (0x9201, "ShutterSpeedValue"),
    (0x9202, "ApertureValue"),
    (0x9203, "BrightnessValue"),
    (0x9204, "ExposureBiasValue"),
    (0x9205, "MaxApertureValue"),
    (0x9207, "MeteringMode"),
    (0x9209, "Flash"),
    (FOCAL_LENGTH, "FocalLength"),
    (0x9214, "SubjectArea"),
    (0x927C, "MakerNote"),
    (0x9286, "UserComment"),
    (0x9290, "SubSecTime"),
    (SUB_SEC_TIME_ORIGINAL, "SubSecTimeOriginal"),
    (SUB_SEC_TIME_DIGITIZED, "SubSecTimeDigitized"),
    (0xA000, "FlashpixVersion"),
    (0xA001, "ColorSpace"),
    (0xA002, "PixelXDimension"),
    (0xA003, "PixelYDimension"),
    (INTEROP_IFD_POINTER, "InteroperabilityTag"),
    (0xA217, "SensingMethod"),
    (0xA301, "SceneType"),
    (0xA402, "ExposureMode"),
    (0xA403, "WhiteBalance"),
    (0xA404, "DigitalZoomRatio"),
    (FOCAL_LENGTH_IN_35MM_FILM, "FocalLengthIn35mmFilm"),
    (0xA406, "SceneCaptureType"),
    (0xA420, "ImageUniqueID"),
    (0xA430, "CameraOwnerName"),
    (0xA431, "BodySerialNumber"),
    (0xA432, "LensSpecification"),
    (0xA433, "LensMake"),
    (LENS_MODEL, "LensModel"),
    (0xA435, "LensSerialNumber"),
];

const GPS_TAGS: &[(u16, &str)] = &[
    (GPS_VERSION_ID, "GPSVersionID"),
    (GPS_LATITUDE_REF, "GPSLatitudeRef"),
    (GPS_LATITUDE, "GPSLatitude"),
    (GPS_LONGITUDE_REF, "GPSLongitudeRef"),
    (GPS_LONGITUDE, "GPSLongitude"),
    (0x0005, "GPSAltitudeRef"),
    (0x0006, "GPSAltitude"),
    (0x0007, "GPSTimeStamp"),
    (0x0008, "GPSSatellites"),
    (0x0009, "GPSStatus"),
    (0x000A, "GPSMeasureMode"),
    (0x000B, "GPSDOP"),
    (0x000C, "GPSSpeedRef"),
    (0x000D, "GPSSpeed"),
    (0x000E, "GPSTrackRef"),
    (0x000F, "GPSTrack"),
    (0x0010, "GPSImgDirectionRef"),
    (0x0011, "GPSImgDirection"),
    (0x0012, "GPSMapDatum"),
    (0x0013, "GPSDestLatitudeRef"),
    (0x0014, "GPSDestLatitude"),
    (0x0015, "GPSDestLongitudeRef"),
    (0x0016, "GPSDestLongitude"),
    (0x0017, "GPSDestBearingRef"),
    (0x0018, "GPSDestBearing"),
    (0x0019, "GPSDestDistanceRef"),
    (0x001A, "GPSDestDistance"),
    (0x001B, "GPSProcessingMethod"),
    (0x001C, "GPSAreaInformation"),
    (0x001D, "GPSDateStamp"),
    (0x001E, "GPSDifferential"),
    (0x001F, "GPSHPositioningError"),
];

const INTEROP_TAGS: &[(u16, &str)] = &[
    (0x0001, "InteroperabilityIndex"),
    (0x0002, "InteroperabilityVersion"),
];

/// Tag names stripped from every section before metadata is stored or
/// re-embedded: location (GPS), sub-second timing and timezone offsets.
pub const EXCLUDED_TAGS: &[&str] = &[
    "GPSInfo",
    "GPSLatitudeRef",
    "GPSLatitude",
    "GPSLongitudeRef",
    "GPSLongitude",
    "GPSAltitudeRef",
    "GPSAltitude",
    "GPSTimeStamp",
    "GPSDateStamp",
    "GPSProcessingMethod",
    "GPSVersionID",
    "SubSecTimeOriginal",
    "SubSecTimeDigitized",
    "OffsetTime",
    "OffsetTimeOriginal",
    "OffsetTimeDigitized",
];

fn lookup(table: &[(u16, &'static str)], tag: u16) -> Option<&'static str> {
    table.iter().find(|(id, _)| *id == tag).map(|(_, name)| *name)
}

/// Symbolic name of `tag` within `section`.
pub fn tag_name(section: Section, tag: u16) -> Option<&'static str> {
    match section {
        Section::Primary | Section::Thumbnail => {
            lookup(IMAGE_TAGS, tag).or_else(|| lookup(EXIF_TAGS, tag))
        }
        Section::Exif => lookup(EXIF_TAGS, tag).or_else(|| lookup(IMAGE_TAGS, tag)),
        Section::Gps => lookup(GPS_TAGS, tag),
        Section::Interop => lookup(INTEROP_TAGS, tag),
    }
}

/// Name for a tag whose section is unknown (flattened readers).
///
/// Image and capture tags win; the low IDs shared by the GPS and Interop
/// sections resolve to their GPS names so they are treated as location data.
pub fn tag_name_any(tag: u16) -> Option<&'static str> {
    lookup(IMAGE_TAGS, tag)
        .or_else(|| lookup(EXIF_TAGS, tag))
        .or_else(|| lookup(GPS_TAGS, tag))
}

/// Whether a tag name is location data or a timestamp offset.
pub fn is_excluded(name: &str) -> bool {
    name.starts_with("GPS") || EXCLUDED_TAGS.contains(&name)
}
