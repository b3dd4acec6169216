//! Reconciliation validator for schedule scans.
//!
//! Both consistency checks are advisory. A person reviews every scan before
//! import, so a mismatch is surfaced as a `ScanWarning` and logged, never
//! turned into a failure.

use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::warn;

use super::job_number::extract_job_number;
use super::types::{EntryPartition, ScanWarning, ScheduleEntry};

/// Cleaned entries plus the advisory findings about them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    pub entries: Vec<ScheduleEntry>,
    pub warnings: Vec<ScanWarning>,
}

/// Canonicalize job numbers, then run the row-count and uniqueness checks.
pub fn reconcile_schedule(mut entries: Vec<ScheduleEntry>) -> Reconciled {
    for entry in &mut entries {
        entry.job_number = extract_job_number(&entry.job_number);
    }

    let mut warnings = Vec::new();

    if let Some(warning) = check_row_count(&entries) {
        if let ScanWarning::RowCountMismatch {
            max_position,
            entry_count,
        } = &warning
        {
            warn!(
                max_position,
                entry_count, "Entry count does not match highest position; rows may be missing or duplicated"
            );
        }
        warnings.push(warning);
    }

    if let Some(warning) = check_unique_ids(&entries) {
        if let ScanWarning::DuplicateIds { ids } = &warning {
            warn!(duplicates = ?ids, "Duplicate ID numbers in scan");
        }
        warnings.push(warning);
    }

    Reconciled { entries, warnings }
}

/// Compare the entry count with the highest printed position.
///
/// `None` when they agree, or when no entry carries a position at all.
pub fn check_row_count(entries: &[ScheduleEntry]) -> Option<ScanWarning> {
    let max_position = entries.iter().filter_map(|e| e.position).max()?;
    if max_position as usize == entries.len() {
        return None;
    }
    Some(ScanWarning::RowCountMismatch {
        max_position,
        entry_count: entries.len(),
    })
}

/// Non-empty ID numbers that occur more than once, each listed once in
/// first-seen order.
pub fn find_duplicate_ids(entries: &[ScheduleEntry]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();

    for id in entries
        .iter()
        .map(|e| e.id_number.trim())
        .filter(|id| !id.is_empty())
    {
        let count = counts.entry(id).or_insert(0);
        if *count == 0 {
            order.push(id);
        }
        *count += 1;
    }

    order
        .into_iter()
        .filter(|id| counts.get(id).copied().unwrap_or(0) > 1)
        .map(str::to_string)
        .collect()
}

pub fn check_unique_ids(entries: &[ScheduleEntry]) -> Option<ScanWarning> {
    let ids = find_duplicate_ids(entries);
    if ids.is_empty() {
        None
    } else {
        Some(ScanWarning::DuplicateIds { ids })
    }
}

/// Split entries into importable (has a job number) and not.
/// The two sides are disjoint and together cover the input.
pub fn validate_parsed_entries(entries: &[ScheduleEntry]) -> EntryPartition {
    let (valid, invalid) = entries
        .iter()
        .cloned()
        .partition(|e| !e.job_number.trim().is_empty());
    EntryPartition { valid, invalid }
}

/// Normalize a US date (`MM.DD.YYYY`, `M-D-YY`, `MM/DD/YYYY`) or an ISO
/// `YYYY-MM-DD` date to zero-padded `MM/DD/YYYY`. `None` if it is not a real
/// calendar date.
pub fn normalize_us_date(raw: &str) -> Option<String> {
    let parts: Vec<&str> = raw
        .trim()
        .split(['/', '.', '-'])
        .map(str::trim)
        .collect();
    // A leading four-digit year means year-month-day order.
    let [month, day, year] = match parts.as_slice() {
        [year, month, day] if year.len() == 4 => [*month, *day, *year],
        [month, day, year] => [*month, *day, *year],
        _ => return None,
    };

    let month: u32 = month.parse().ok()?;
    let day: u32 = day.parse().ok()?;
    let year: i32 = match year.len() {
        2 => 2000 + year.parse::<i32>().ok()?,
        4 => year.parse().ok()?,
        _ => return None,
    };

    NaiveDate::from_ymd_opt(year, month, day).map(|d| d.format("%m/%d/%Y").to_string())
}
