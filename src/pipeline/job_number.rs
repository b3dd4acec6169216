//! Job-number canonicalization.
//!
//! Plant job numbers are six digits whose 2nd and 3rd digits repeat
//! (`255096`, `233104`). Schedules print them with letter prefixes or revision
//! suffixes (`E-255096`, `Job 255096 Rev2`), and OCR sometimes merges
//! neighbouring digits into the field.

/// Canonical job-number length.
pub const JOB_NUMBER_LEN: usize = 6;

/// Strip everything but digits and pick the canonical 6-digit job number.
///
/// - 6 digits or fewer: returned as-is (no padding).
/// - More: the first 6-digit window whose 2nd and 3rd digits match,
///   else the first 6 digits.
pub fn extract_job_number(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= JOB_NUMBER_LEN {
        return digits;
    }

    let bytes = digits.as_bytes();
    let start = bytes
        .windows(JOB_NUMBER_LEN)
        .position(|w| w[1] == w[2])
        .unwrap_or(0);

    // ASCII digits only, so byte offsets are char boundaries
    digits[start..start + JOB_NUMBER_LEN].to_string()
}
