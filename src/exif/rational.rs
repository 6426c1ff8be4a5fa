use super::value::TagValue;

/// A numerator/denominator pair as stored in RATIONAL and SRATIONAL tags.
///
/// This is not a general rational-number type: it only carries what the
/// camera wrote and knows how to render itself for the handful of tags we
/// normalize (FNumber, ExposureTime, FocalLength, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ratio {
    pub num: i64,
    pub den: i64,
}

/// How a rational value should be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RationalMode {
    /// `num / den` as a float (apertures, focal lengths).
    Decimal,
    /// `"<num>/<den>s"` (exposure times).
    FractionString,
}

impl Ratio {
    pub fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    /// Float approximation. A zero denominator yields `0.0`.
    pub fn to_decimal(self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }

    /// Fraction string with a trailing `s`.
    ///
    /// `1/<den>` is kept verbatim; anything else is reduced to lowest terms
    /// so that `487/1000` style values don't leak into the output.
    pub fn to_fraction_string(self) -> String {
        if self.num == 1 {
            return format!("1/{}s", self.den);
        }
        let reduced = self.reduced();
        format!("{}/{}s", reduced.num, reduced.den)
    }

    /// Lowest terms, with the sign carried on the numerator.
    pub fn reduced(self) -> Self {
        if self.den == 0 {
            return self;
        }
        let divisor = gcd(self.num.unsigned_abs(), self.den.unsigned_abs()) as i64;
        let (mut num, mut den) = (self.num / divisor, self.den / divisor);
        if den < 0 {
            num = -num;
            den = -den;
        }
        Self { num, den }
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

/// Normalize a tag value according to `mode`.
///
/// Rationals become [`TagValue::Float`] or [`TagValue::Text`]; a zero
/// denominator becomes `Float(0.0)` in both modes. Every other shape is
/// returned unchanged.
pub fn normalize(value: TagValue, mode: RationalMode) -> TagValue {
    match value {
        TagValue::Rational(ratio) if ratio.den == 0 => TagValue::Float(0.0),
        TagValue::Rational(ratio) => match mode {
            RationalMode::Decimal => TagValue::Float(ratio.to_decimal()),
            RationalMode::FractionString => TagValue::Text(ratio.to_fraction_string()),
        },
        other => other,
    }
}

/// Parse an exposure value back to seconds.
///
/// Accepts the fraction-string form (`"1/500s"`, `"10/3s"`) as well as plain
/// numbers (`"0.5"`, `"2"`, `"2s"`).
pub fn parse_fraction_seconds(text: &str) -> Option<f64> {
    let trimmed = text.trim().trim_end_matches('s').trim();
    match trimmed.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 { Some(0.0) } else { Some(num / den) }
        }
        None => trimmed.parse().ok(),
    }
}
