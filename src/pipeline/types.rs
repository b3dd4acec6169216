use std::fmt;

use serde::{Deserialize, Serialize};

use super::ScanError;
use crate::measure::{format_span_for_display, Span};

/// Which record shape a scan asks the vision model for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Schedule,
    ProductTag,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Schedule => f.write_str("schedule"),
            RecordKind::ProductTag => f.write_str("product_tag"),
        }
    }
}

/// One physical piece on a production schedule sheet.
///
/// Created per scan and never persisted here. `form_bed`, `department` and
/// `notes` are assigned by a person after review, never by extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    /// Row index as printed on the sheet.
    pub position: Option<u32>,
    /// Canonical numeric job number (letter prefixes stripped).
    pub job_number: String,
    pub mark_number: String,
    /// Must be unique across one scan.
    pub id_number: String,
    /// Feet-inch-fraction, as printed.
    pub length1: String,
    pub length2: String,
    /// Inches.
    pub width: Option<f64>,
    /// Degrees.
    pub angle: Option<f64>,
    pub cutback: String,
    /// Per-entry extraction confidence, 0.0 to 1.0.
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_bed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ScheduleEntry {
    /// Length 1 in total inches, if the printed value parses.
    pub fn length1_inches(&self) -> Option<f64> {
        crate::measure::parse_feet_inches(&self.length1)
    }

    pub fn length2_inches(&self) -> Option<f64> {
        crate::measure::parse_feet_inches(&self.length2)
    }

    pub fn cutback_inches(&self) -> Option<f64> {
        crate::measure::parse_feet_inches(&self.cutback)
    }
}

/// One decoded product tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductTagData {
    pub project_number: String,
    pub mark_number: String,
    pub id_number: String,
    pub span_feet: u32,
    pub span_inches: f64,
    /// MM/DD/YYYY.
    pub pour_date: String,
    /// Numeric code, always carrying the `-70` suffix.
    pub strand_pattern: String,
    /// Inches; the second operand of the printed `A x B` pattern.
    pub product_width: Option<f64>,
}

impl ProductTagData {
    pub fn span(&self) -> Span {
        Span {
            feet: self.span_feet,
            inches: self.span_inches,
        }
    }

    pub fn span_display(&self) -> String {
        format_span_for_display(self.span_feet, self.span_inches)
    }
}

/// Caller-supplied context for a schedule scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleScanOptions {
    /// Pour date the caller expects, used when the sheet's own date is unreadable.
    pub date: Option<String>,
    pub department: Option<String>,
}

/// Advisory data-quality finding. Logged and attached to the result; never
/// turns a scan into a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ScanWarning {
    /// Entry count differs from the highest printed position.
    RowCountMismatch { max_position: u32, entry_count: usize },
    /// ID numbers that appear on more than one entry.
    DuplicateIds { ids: Vec<String> },
    /// Items in the model's entry list that could not be read at all.
    SkippedEntries { count: usize },
    /// Pour date that is not a real MM/DD/YYYY date.
    InvalidPourDate { value: String },
}

impl fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanWarning::RowCountMismatch {
                max_position,
                entry_count,
            } => write!(
                f,
                "Found {entry_count} entries but the highest position is {max_position}; rows may be missing or duplicated"
            ),
            ScanWarning::DuplicateIds { ids } => {
                write!(f, "Duplicate ID numbers: {}", ids.join(", "))
            }
            ScanWarning::SkippedEntries { count } => {
                write!(f, "{count} unreadable entries were skipped")
            }
            ScanWarning::InvalidPourDate { value } => {
                write!(f, "Pour date '{value}' is not a valid MM/DD/YYYY date")
            }
        }
    }
}

/// Terminal state of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    /// Records present, with zero or more advisory warnings.
    Success,
    /// The call worked but nothing was read; callers prompt a retake.
    SuccessEmpty,
    /// Network, timeout, auth, or parse failure.
    Failure,
}

/// Result of `Scanner::parse_schedule_image`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleScanResult {
    pub success: bool,
    pub entries: Vec<ScheduleEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ScanWarning>,
}

impl ScheduleScanResult {
    pub fn failure(err: &ScanError, raw_text: Option<String>) -> Self {
        Self {
            success: false,
            entries: Vec::new(),
            date: None,
            raw_text,
            error: Some(err.to_string()),
            warnings: Vec::new(),
        }
    }

    pub fn outcome(&self) -> ScanOutcome {
        match (self.success, self.entries.is_empty()) {
            (false, _) => ScanOutcome::Failure,
            (true, true) => ScanOutcome::SuccessEmpty,
            (true, false) => ScanOutcome::Success,
        }
    }
}

/// Result of `Scanner::parse_product_tag`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductTagScanResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ProductTagData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ScanWarning>,
}

impl ProductTagScanResult {
    pub fn failure(err: &ScanError, raw_text: Option<String>) -> Self {
        Self {
            success: false,
            data: None,
            raw_text,
            error: Some(err.to_string()),
            warnings: Vec::new(),
        }
    }

    pub fn outcome(&self) -> ScanOutcome {
        match (self.success, self.data.is_some()) {
            (false, _) => ScanOutcome::Failure,
            (true, false) => ScanOutcome::SuccessEmpty,
            (true, true) => ScanOutcome::Success,
        }
    }
}

/// Entries split for import triage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryPartition {
    /// Entries carrying a job number.
    pub valid: Vec<ScheduleEntry>,
    /// Entries missing one; the reviewer must fill it in or drop them.
    pub invalid: Vec<ScheduleEntry>,
}
