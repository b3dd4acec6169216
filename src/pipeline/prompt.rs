//! Field-extraction instructions sent with each image.
//!
//! The prompts are the contract with the vision model: field names, JSON
//! shape, and per-field formatting rules. The post-processing in
//! `validation` and `product_tag` re-applies the rules that matter, since the
//! model does not always follow them.

use super::types::ScheduleScanOptions;

pub const SCHEDULE_PROMPT: &str = r#"
You are reading a photo of a printed precast concrete PRODUCTION SCHEDULE sheet.
Each row of the sheet describes one piece to be cast. Extract EVERY row.

For each row output one entry with these fields:
- "position": the row number printed in the position column (integer). Do not renumber.
- "jobNumber": the job number as DIGITS ONLY. Strip any letter prefix or suffix
  (e.g. "E-255096" -> "255096", "Job 255096 Rev2" -> "255096").
- "markNumber": the piece mark exactly as printed (e.g. "H105").
- "idNumber": the piece ID exactly as printed. IDs are unique on a sheet; read carefully.
- "length1": first length in feet-inch-fraction notation exactly as printed (e.g. "28'-5 1/2\"").
- "length2": second length in the same notation, or "" if blank.
- "width": width in inches as a number (e.g. 48).
- "angle": skew angle in degrees as a number; 0 if the piece is square.
- "cutback": cutback in feet-inch-fraction notation, or "" if blank.
- "confidence": your confidence in this row's values, from 0.0 to 1.0.

Also output "date": the pour date printed on the sheet as MM/DD/YYYY
(convert "MM.DD.YYYY" to "MM/DD/YYYY"), or null if none is printed.

RULES:
1. Extract ONLY what is printed. Never invent rows or values.
2. If a field is unreadable, output "" (or null for numbers) and lower the confidence.
3. Do not skip rows, even partially unreadable ones. Do not merge rows.
4. Do not output form bed, department, or notes.

Respond with ONLY a JSON object, no prose:
{
  "date": "MM/DD/YYYY",
  "entries": [
    {
      "position": 1,
      "jobNumber": "255096",
      "markNumber": "H105",
      "idNumber": "17",
      "length1": "28'-5 1/2\"",
      "length2": "",
      "width": 48,
      "angle": 0,
      "cutback": "",
      "confidence": 0.95
    }
  ]
}
"#;

pub const PRODUCT_TAG_PROMPT: &str = r#"
You are reading a photo of a precast concrete PRODUCT TAG attached to a finished piece.
Extract the following fields:

- "projectNumber": the project/job number as DIGITS ONLY. Strip any letter prefix
  (e.g. "E-255096" -> "255096").
- "markNumber": the piece mark exactly as printed (e.g. "H105").
- "idNumber": the piece ID exactly as printed.
- "spanFeet": whole feet of the span (integer).
- "spanInches": remaining inches of the span as a decimal number (e.g. 5.5 for 5 1/2").
- "pourDate": the pour date as MM/DD/YYYY. Tags print it as "MM.DD.YYYY"; convert the dots to slashes.
- "strandPattern": the numeric strand pattern code followed by "-70" (e.g. "58" -> "58-70").
  ALWAYS append "-70" if it is not already printed.
- "productWidth": the tag prints a pattern like "A x B". IGNORE the first number A.
  Output the SECOND number B as the product width in inches (e.g. "8 x 48" -> 48).

RULES:
1. Extract ONLY what is printed. Never guess.
2. Use "" for unreadable text fields and null for unreadable numbers.

Respond with ONLY a JSON object, no prose:
{
  "projectNumber": "255096",
  "markNumber": "H105",
  "idNumber": "17",
  "spanFeet": 28,
  "spanInches": 5.5,
  "pourDate": "03/14/2025",
  "strandPattern": "58-70",
  "productWidth": 48
}
"#;

/// Build the schedule prompt, adding whatever the caller already knows.
pub fn build_schedule_prompt(options: &ScheduleScanOptions) -> String {
    let mut context = String::new();
    if let Some(date) = options.date.as_deref().filter(|d| !d.trim().is_empty()) {
        context.push_str(&format!(
            "CONTEXT: This schedule is expected to be for {}. Use the date printed on the sheet if it differs.\n",
            date.trim()
        ));
    }
    if let Some(department) = options
        .department
        .as_deref()
        .filter(|d| !d.trim().is_empty())
    {
        context.push_str(&format!(
            "CONTEXT: This schedule belongs to the {} department.\n",
            department.trim()
        ));
    }

    if context.is_empty() {
        SCHEDULE_PROMPT.trim().to_string()
    } else {
        format!("{context}\n{}", SCHEDULE_PROMPT.trim())
    }
}
