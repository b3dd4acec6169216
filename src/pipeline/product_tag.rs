//! Product tag scans and the field cleanup tags need.
//!
//! Tags are small, hand-stamped, and read at odd angles, so the model's output
//! is re-normalized here: job-number prefixes stripped, dotted dates
//! converted, the strand suffix enforced, and the `A x B` width pattern
//! reduced to its second operand.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::job_number::extract_job_number;
use super::parser::{
    lenient_f64, lenient_opt_string, lenient_string, parse_json_object, value_as_f64,
    JsonExtractError,
};
use super::preprocess::ImageSource;
use super::prompt::PRODUCT_TAG_PROMPT;
use super::scanner::{log_failure, Scanner};
use super::types::{ProductTagData, ProductTagScanResult, RecordKind, ScanWarning};
use super::validation::normalize_us_date;
use super::vision::VisionClient;
use super::ScanError;
use crate::measure::{parse_span_from_display, Span};

/// Suffix every strand pattern carries.
pub const STRAND_SUFFIX: &str = "-70";

static WIDTH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*[\x{d7}x*]\s*(\d+(?:\.\d+)?)").expect("static regex")
});

static DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("static regex"));

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProductTag {
    #[serde(default, deserialize_with = "lenient_string")]
    project_number: String,
    #[serde(default, deserialize_with = "lenient_string")]
    mark_number: String,
    #[serde(default, deserialize_with = "lenient_string")]
    id_number: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    span_feet: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    span_inches: Option<f64>,
    /// Some models answer with a single `28'-5.5"` string instead.
    #[serde(default, deserialize_with = "lenient_opt_string")]
    span: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pour_date: String,
    #[serde(default, deserialize_with = "lenient_string")]
    strand_pattern: String,
    #[serde(default)]
    product_width: Option<Value>,
}

/// Cleaned tag plus any advisory findings.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedProductTag {
    /// `None` when nothing identifying could be read.
    pub data: Option<ProductTagData>,
    pub warnings: Vec<ScanWarning>,
}

/// Parse and clean the model's text for a product tag.
pub fn parse_product_tag_response(text: &str) -> Result<ParsedProductTag, JsonExtractError> {
    let raw: RawProductTag = parse_json_object(text)?;
    let mut warnings = Vec::new();

    let project_number = extract_job_number(&raw.project_number);
    if project_number.is_empty() && raw.mark_number.is_empty() && raw.id_number.is_empty() {
        return Ok(ParsedProductTag {
            data: None,
            warnings,
        });
    }

    let span = resolve_span(raw.span_feet, raw.span_inches, raw.span.as_deref());

    let pour_date = match normalize_us_date(&raw.pour_date) {
        Some(date) => date,
        None => {
            if !raw.pour_date.is_empty() {
                warnings.push(ScanWarning::InvalidPourDate {
                    value: raw.pour_date.clone(),
                });
            }
            raw.pour_date
        }
    };

    Ok(ParsedProductTag {
        data: Some(ProductTagData {
            project_number,
            mark_number: raw.mark_number,
            id_number: raw.id_number,
            span_feet: span.feet,
            span_inches: span.inches,
            pour_date,
            strand_pattern: normalize_strand_pattern(&raw.strand_pattern),
            product_width: raw.product_width.as_ref().and_then(parse_product_width),
        }),
        warnings,
    })
}

/// Span from explicit feet/inch fields, else from a display string.
/// Fractional feet and inches of 12 or more are carried so inches stay
/// below 12.
fn resolve_span(feet: Option<f64>, inches: Option<f64>, display: Option<&str>) -> Span {
    if feet.is_none() && inches.is_none() {
        return display.and_then(parse_span_from_display).unwrap_or_default();
    }

    let feet = feet.unwrap_or(0.0).max(0.0);
    let inches = inches.unwrap_or(0.0).max(0.0);
    let total = feet * 12.0 + inches;
    let whole_feet = (total / 12.0).floor();
    Span {
        feet: whole_feet as u32,
        inches: total - whole_feet * 12.0,
    }
}

/// Keep the numeric strand code and make sure it ends in `-70`.
///
/// `"58"` and `"58-70"` both become `"58-70"`. Text with no digits is
/// returned trimmed, and empty stays empty.
pub fn normalize_strand_pattern(raw: &str) -> String {
    let trimmed = raw.trim();
    match DIGIT_RUN.find(trimmed) {
        Some(code) => format!("{}{STRAND_SUFFIX}", code.as_str()),
        None => trimmed.to_string(),
    }
}

/// Product width in inches: a plain number, or `B` from an `A x B` pattern.
pub fn parse_product_width(value: &Value) -> Option<f64> {
    if let Value::String(text) = value {
        if let Some(caps) = WIDTH_PATTERN.captures(text) {
            return caps[2].parse().ok();
        }
    }
    value_as_f64(value).filter(|w| *w > 0.0)
}

impl<C: VisionClient> Scanner<C> {
    /// Scan a product tag.
    ///
    /// Never returns `Err`; failures are folded into the result. A tag with no
    /// readable project, mark, or ID succeeds with `data = None`.
    pub async fn parse_product_tag(
        &self,
        image: &ImageSource,
        cancel: &CancellationToken,
    ) -> ProductTagScanResult {
        let scan_id = Uuid::new_v4();
        let span = info_span!("product_tag_scan", %scan_id, source = image.kind());

        async {
            let raw_text = match self
                .extract(
                    RecordKind::ProductTag,
                    image,
                    PRODUCT_TAG_PROMPT.trim().to_string(),
                    cancel,
                )
                .await
            {
                Ok(text) => text,
                Err(err) => {
                    log_failure(RecordKind::ProductTag, &err);
                    return ProductTagScanResult::failure(&err, None);
                }
            };

            let parsed = match parse_product_tag_response(&raw_text) {
                Ok(parsed) => parsed,
                Err(err) => {
                    let err = ScanError::from(err);
                    log_failure(RecordKind::ProductTag, &err);
                    return ProductTagScanResult::failure(&err, Some(raw_text));
                }
            };

            for warning in &parsed.warnings {
                warn!(%warning, "Product tag warning");
            }
            match &parsed.data {
                Some(data) => info!(
                    project = %data.project_number,
                    mark = %data.mark_number,
                    "Product tag scan complete"
                ),
                None => info!("Product tag scan found nothing readable"),
            }

            ProductTagScanResult {
                success: true,
                data: parsed.data,
                raw_text: Some(raw_text),
                error: None,
                warnings: parsed.warnings,
            }
        }
        .instrument(span)
        .await
    }
}
