//! Production schedule scans.

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::parser::{
    lenient_confidence, lenient_f64, lenient_opt_string, lenient_string, lenient_u32,
    parse_array_lenient, parse_json_object, JsonExtractError,
};
use super::preprocess::ImageSource;
use super::prompt::build_schedule_prompt;
use super::scanner::{log_failure, Scanner};
use super::types::{RecordKind, ScanWarning, ScheduleEntry, ScheduleScanOptions, ScheduleScanResult};
use super::validation::{normalize_us_date, reconcile_schedule};
use super::vision::VisionClient;
use super::ScanError;

#[derive(Debug, Deserialize)]
struct RawScheduleResponse {
    #[serde(default, deserialize_with = "lenient_opt_string")]
    date: Option<String>,
    /// Models sometimes answer `null` for an empty sheet.
    #[serde(default)]
    entries: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScheduleEntry {
    #[serde(default, deserialize_with = "lenient_u32")]
    position: Option<u32>,
    #[serde(default, deserialize_with = "lenient_string")]
    job_number: String,
    #[serde(default, deserialize_with = "lenient_string")]
    mark_number: String,
    #[serde(default, deserialize_with = "lenient_string")]
    id_number: String,
    #[serde(default, deserialize_with = "lenient_string")]
    length1: String,
    #[serde(default, deserialize_with = "lenient_string")]
    length2: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    width: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    angle: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    cutback: String,
    #[serde(default, deserialize_with = "lenient_confidence")]
    confidence: f32,
}

impl From<RawScheduleEntry> for ScheduleEntry {
    fn from(raw: RawScheduleEntry) -> Self {
        // Form bed, department and notes are assigned during review.
        ScheduleEntry {
            position: raw.position,
            job_number: raw.job_number,
            mark_number: raw.mark_number,
            id_number: raw.id_number,
            length1: raw.length1,
            length2: raw.length2,
            width: raw.width,
            angle: raw.angle,
            cutback: raw.cutback,
            confidence: raw.confidence,
            form_bed: None,
            department: None,
            notes: None,
        }
    }
}

/// Schedule sheet as read from the model, before reconciliation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSchedule {
    /// Sheet date, normalized to MM/DD/YYYY when it is a real date.
    pub date: Option<String>,
    pub entries: Vec<ScheduleEntry>,
    /// Entry items that were not objects and could not be read.
    pub skipped: usize,
}

/// Parse the model's text into schedule entries.
///
/// The enclosing object must be well-formed JSON; individual entries are read
/// leniently and unreadable ones are counted in `skipped`.
pub fn parse_schedule_response(text: &str) -> Result<ParsedSchedule, JsonExtractError> {
    let raw: RawScheduleResponse = parse_json_object(text)?;
    let items = raw.entries.unwrap_or_default();
    let (entries, skipped) = parse_array_lenient::<RawScheduleEntry>(&items);

    let date = raw
        .date
        .map(|d| normalize_us_date(&d).unwrap_or(d));

    Ok(ParsedSchedule {
        date,
        entries: entries.into_iter().map(ScheduleEntry::from).collect(),
        skipped,
    })
}

impl<C: VisionClient> Scanner<C> {
    /// Scan a production schedule sheet.
    ///
    /// Never panics or returns `Err`: every failure is folded into the
    /// result's `error` with `success = false`.
    pub async fn parse_schedule_image(
        &self,
        image: &ImageSource,
        options: &ScheduleScanOptions,
        cancel: &CancellationToken,
    ) -> ScheduleScanResult {
        let scan_id = Uuid::new_v4();
        let span = info_span!("schedule_scan", %scan_id, source = image.kind());

        async {
            let prompt = build_schedule_prompt(options);
            let raw_text = match self
                .extract(RecordKind::Schedule, image, prompt, cancel)
                .await
            {
                Ok(text) => text,
                Err(err) => {
                    log_failure(RecordKind::Schedule, &err);
                    return ScheduleScanResult::failure(&err, None);
                }
            };

            let parsed = match parse_schedule_response(&raw_text) {
                Ok(parsed) => parsed,
                Err(err) => {
                    let err = ScanError::from(err);
                    log_failure(RecordKind::Schedule, &err);
                    return ScheduleScanResult::failure(&err, Some(raw_text));
                }
            };

            let mut warnings = Vec::new();
            if parsed.skipped > 0 {
                warn!(skipped = parsed.skipped, "Skipped unreadable schedule entries");
                warnings.push(ScanWarning::SkippedEntries {
                    count: parsed.skipped,
                });
            }

            let reconciled = reconcile_schedule(parsed.entries);
            warnings.extend(reconciled.warnings);

            let date = parsed.date.or_else(|| {
                options
                    .date
                    .as_deref()
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(|d| normalize_us_date(d).unwrap_or_else(|| d.to_string()))
            });

            info!(
                entries = reconciled.entries.len(),
                warnings = warnings.len(),
                "Schedule scan complete"
            );

            ScheduleScanResult {
                success: true,
                entries: reconciled.entries,
                date,
                raw_text: Some(raw_text),
                error: None,
                warnings,
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ScanConfig;
    use crate::pipeline::types::ScanOutcome;
    use crate::pipeline::vision::MockVisionClient;

    const IMAGE: &str = "data:image/jpeg;base64,QUJD";

    fn scanner(response: &str) -> Scanner<MockVisionClient> {
        Scanner::new(
            MockVisionClient::new(response),
            ScanConfig::proxy("http://localhost:8787/vision"),
        )
    }

    async fn scan(scanner: &Scanner<MockVisionClient>) -> ScheduleScanResult {
        scanner
            .parse_schedule_image(
                &ImageSource::parse(IMAGE),
                &ScheduleScanOptions::default(),
                &CancellationToken::new(),
            )
            .await
    }

    const THREE_ROWS: &str = r#"Here is the schedule:
```json
{
  "date": "03.14.2025",
  "entries": [
    {"position": 1, "jobNumber": "E-255096", "markNumber": "H105", "idNumber": "17",
     "length1": "28'-5 1/2\"", "length2": "", "width": 48, "angle": 0, "cutback": "", "confidence": 0.95},
    {"position": 2, "jobNumber": "255096", "markNumber": "H106", "idNumber": "18",
     "length1": "30'-0\"", "length2": "29'-11\"", "width": "48\"", "angle": "22.5", "cutback": "6\"", "confidence": 0.8},
    {"position": 3, "jobNumber": "255096", "markNumber": "H107", "idNumber": "19",
     "length1": "24'-2 3/4\"", "length2": "", "width": 24, "angle": null, "cutback": "", "confidence": 1.4}
  ]
}
```"#;

    #[test]
    fn parse_reads_lenient_fields() {
        let parsed = parse_schedule_response(THREE_ROWS).unwrap();
        assert_eq!(parsed.date.as_deref(), Some("03/14/2025"));
        assert_eq!(parsed.skipped, 0);
        assert_eq!(parsed.entries.len(), 3);

        let second = &parsed.entries[1];
        assert_eq!(second.width, Some(48.0));
        assert_eq!(second.angle, Some(22.5));
        assert_eq!(second.cutback_inches(), Some(6.0));
        assert_eq!(parsed.entries[2].angle, None);
        assert_eq!(parsed.entries[2].confidence, 1.0);
    }

    #[test]
    fn parse_never_assigns_review_fields() {
        let parsed = parse_schedule_response(
            r#"{"entries": [{"position": 1, "jobNumber": "255096", "formBed": "Bed 4",
                "department": "Hollowcore", "notes": "rush"}]}"#,
        )
        .unwrap();
        let entry = &parsed.entries[0];
        assert_eq!(entry.form_bed, None);
        assert_eq!(entry.department, None);
        assert_eq!(entry.notes, None);
    }

    #[test]
    fn parse_skips_unreadable_items() {
        let parsed = parse_schedule_response(
            r#"{"entries": [{"position": 1, "jobNumber": "255096"}, "garbage", 42]}"#,
        )
        .unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.skipped, 2);
    }

    #[test]
    fn parse_keeps_unrecognized_date_text() {
        let parsed = parse_schedule_response(r#"{"date": "Friday", "entries": []}"#).unwrap();
        assert_eq!(parsed.date.as_deref(), Some("Friday"));
    }

    #[test]
    fn parse_malformed_is_error() {
        assert!(parse_schedule_response("no json here").is_err());
        assert!(parse_schedule_response(r#"{"entries": [1, 2,]}"#).is_err());
    }

    #[tokio::test]
    async fn clean_scan_succeeds_without_warnings() {
        let result = scan(&scanner(THREE_ROWS)).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.outcome(), ScanOutcome::Success);
        assert_eq!(result.entries.len(), 3);
        assert_eq!(result.entries[0].job_number, "255096");
        assert_eq!(result.date.as_deref(), Some("03/14/2025"));
        assert!(result.warnings.is_empty());
        assert!(result.raw_text.is_some());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn missing_row_and_duplicate_id_are_warnings() {
        let result = scan(&scanner(
            r#"{"entries": [
                {"position": 1, "jobNumber": "255096", "idNumber": "17"},
                {"position": 3, "jobNumber": "255096", "idNumber": "17"}
            ]}"#,
        ))
        .await;
        assert!(result.success);
        assert_eq!(result.entries.len(), 2);
        assert_eq!(
            result.warnings,
            vec![
                ScanWarning::RowCountMismatch {
                    max_position: 3,
                    entry_count: 2
                },
                ScanWarning::DuplicateIds {
                    ids: vec!["17".into()]
                },
            ]
        );
    }

    #[tokio::test]
    async fn skipped_entries_warning_comes_first() {
        let result = scan(&scanner(
            r#"{"entries": [{"position": 1, "jobNumber": "255096", "idNumber": "1"}, "?"]}"#,
        ))
        .await;
        assert!(result.success);
        assert_eq!(result.warnings[0], ScanWarning::SkippedEntries { count: 1 });
    }

    #[tokio::test]
    async fn empty_sheet_is_success_empty() {
        let result = scan(&scanner(r#"{"date": null, "entries": []}"#)).await;
        assert!(result.success);
        assert_eq!(result.outcome(), ScanOutcome::SuccessEmpty);
    }

    #[test]
    fn parse_null_entries_as_empty() {
        let parsed = parse_schedule_response(r#"{"date": null, "entries": null}"#).unwrap();
        assert!(parsed.entries.is_empty());
        assert_eq!(parsed.skipped, 0);
        assert_eq!(parsed.date, None);
    }

    #[tokio::test]
    async fn null_entries_is_success_empty() {
        let result = scan(&scanner(r#"{"date": null, "entries": null}"#)).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.outcome(), ScanOutcome::SuccessEmpty);
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn malformed_response_keeps_raw_text() {
        let result = scan(&scanner("Sorry, I can't read this image.")).await;
        assert!(!result.success);
        assert_eq!(result.outcome(), ScanOutcome::Failure);
        assert!(result.entries.is_empty());
        assert_eq!(result.raw_text.as_deref(), Some("Sorry, I can't read this image."));
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn caller_date_is_fallback() {
        let scanner = scanner(r#"{"entries": [{"position": 1, "jobNumber": "255096"}]}"#);
        let result = scanner
            .parse_schedule_image(
                &ImageSource::parse(IMAGE),
                &ScheduleScanOptions {
                    date: Some("3.4.2025".into()),
                    department: Some("Hollowcore".into()),
                },
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.date.as_deref(), Some("03/04/2025"));
        assert_eq!(result.entries[0].department, None);

        let prompt = &scanner.client().requests()[0].prompt;
        assert!(prompt.contains("Hollowcore"));
    }

    #[tokio::test]
    async fn client_failure_becomes_result() {
        let scanner = Scanner::new(
            MockVisionClient::failing(ScanError::Unauthorized),
            ScanConfig::proxy("http://localhost:8787/vision"),
        );
        let result = scan(&scanner).await;
        assert!(!result.success);
        assert!(result.raw_text.is_none());
        assert!(result.error.unwrap().contains("401"));
    }

    #[tokio::test]
    async fn timeout_is_reported_distinctly() {
        let scanner = Scanner::new(
            MockVisionClient::new("{}").with_delay(Duration::from_secs(5)),
            ScanConfig::proxy("http://localhost:8787/vision").with_timeout(Duration::from_millis(50)),
        );
        let result = scan(&scanner).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }
}
