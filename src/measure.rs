//! Feet-inch display helpers shared by the review screens and the
//! product-tag cleanup step.
//!
//! Printed measurements on schedules and tags look like `28'-5 1/2"`,
//! `28'-5.5"`, `28'`, or `6"`. Curly quotes and `''` for inches show up in
//! OCR output and are accepted too.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A span as printed on a product tag: whole feet plus decimal inches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub feet: u32,
    pub inches: f64,
}

static MEASUREMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\s*(?:(?P<feet>\d+)\s*(?:'|′|’))?\s*-?\s*(?:(?P<whole>\d+(?:\.\d+)?)?\s*(?:(?P<num>\d+)\s*/\s*(?P<den>\d+))?\s*(?P<imark>"|″|”|'')?)?\s*$"#,
    )
    .expect("static regex")
});

/// Components of a parsed measurement, before any unit interpretation.
struct Components {
    feet: Option<u32>,
    inches: Option<f64>,
    has_inch_mark: bool,
}

fn parse_components(text: &str) -> Option<Components> {
    let caps = MEASUREMENT.captures(text)?;

    let feet = match caps.name("feet") {
        Some(m) => Some(m.as_str().parse::<u32>().ok()?),
        None => None,
    };
    let whole = match caps.name("whole") {
        Some(m) => Some(m.as_str().parse::<f64>().ok()?),
        None => None,
    };
    let fraction = match (caps.name("num"), caps.name("den")) {
        (Some(n), Some(d)) => {
            let num = n.as_str().parse::<f64>().ok()?;
            let den = d.as_str().parse::<f64>().ok()?;
            if den == 0.0 {
                return None;
            }
            Some(num / den)
        }
        _ => None,
    };

    let inches = match (whole, fraction) {
        (None, None) => None,
        (w, f) => Some(w.unwrap_or(0.0) + f.unwrap_or(0.0)),
    };

    if feet.is_none() && inches.is_none() {
        return None;
    }

    Some(Components {
        feet,
        inches,
        has_inch_mark: caps.name("imark").is_some() || fraction.is_some(),
    })
}

/// Format a span as `feet'-inches"`. Integral inches print without a decimal.
///
/// `format_span_for_display(28, 5.5)` → `28'-5.5"`.
pub fn format_span_for_display(feet: u32, inches: f64) -> String {
    format!("{feet}'-{inches}\"")
}

/// Parse a displayed span back into feet and inches.
///
/// A bare integer with no marks is read as feet. Returns `None` for text
/// that is not a measurement.
pub fn parse_span_from_display(text: &str) -> Option<Span> {
    let parts = parse_components(text)?;

    match (parts.feet, parts.inches) {
        (Some(feet), inches) => Some(Span {
            feet,
            inches: inches.unwrap_or(0.0),
        }),
        (None, Some(inches)) if parts.has_inch_mark => Some(Span { feet: 0, inches }),
        (None, Some(bare)) if bare.fract() == 0.0 && bare <= u32::MAX as f64 => Some(Span {
            feet: bare as u32,
            inches: 0.0,
        }),
        _ => None,
    }
}

/// Total inches of a feet-inch-fraction string (`28'-5 1/2"` → 341.5).
///
/// Unlike spans, a bare number here is read as inches.
pub fn parse_feet_inches(text: &str) -> Option<f64> {
    let parts = parse_components(text)?;
    let feet = parts.feet.map(f64::from).unwrap_or(0.0);
    Some(feet * 12.0 + parts.inches.unwrap_or(0.0))
}

/// Format total inches as feet-inch-fraction, rounded to the nearest
/// `1/denominator` inch with the fraction reduced (`341.5`, 16 → `28'-5 1/2"`).
pub fn format_feet_inches(total_inches: f64, denominator: u32) -> String {
    let denom = u64::from(denominator.max(1));
    let ticks = (total_inches.abs() * denom as f64).round() as u64;
    let sign = if total_inches < 0.0 && ticks > 0 { "-" } else { "" };

    let per_foot = 12 * denom;
    let feet = ticks / per_foot;
    let rem = ticks % per_foot;
    let whole = rem / denom;
    let frac = rem % denom;

    let inches = if frac == 0 {
        whole.to_string()
    } else {
        let g = gcd(frac, denom);
        let (n, d) = (frac / g, denom / g);
        if whole == 0 {
            format!("{n}/{d}")
        } else {
            format!("{whole} {n}/{d}")
        }
    };

    format!("{sign}{feet}'-{inches}\"")
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}
