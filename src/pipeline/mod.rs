//! Scan-and-validate pipeline: image normalizer, extraction client,
//! reconciliation validator, and the `Scanner` that chains them.

pub mod types;
pub mod preprocess;
pub mod prompt;
pub mod vision;
pub mod parser;
pub mod job_number;
pub mod validation;
pub mod scanner;
pub mod schedule;
pub mod product_tag;

pub use types::*;
pub use preprocess::{normalize_image, EncodedImage, ImageSource, NormalizeOptions};
pub use vision::{HttpVisionClient, MockVisionClient, VisionClient, VisionRequest};
pub use parser::{extract_json_object, parse_json_object, JsonExtractError};
pub use job_number::extract_job_number;
pub use validation::*;
pub use scanner::Scanner;
pub use schedule::{parse_schedule_response, ParsedSchedule};
pub use product_tag::{
    normalize_strand_pattern, parse_product_tag_response, parse_product_width, ParsedProductTag,
};

use std::time::Duration;

use thiserror::Error;

/// Every way a scan can fail. Converted into the uniform result shape at the
/// scanner boundary, so callers only ever see the message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    #[error("Could not load image: {0}")]
    ImageFetch(String),

    #[error("Could not process image: {0}")]
    ImageDecode(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Scan timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("Vision API rejected the credentials (HTTP 401). Check the configured API key.")]
    Unauthorized,

    #[error("Vision API returned an error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Vision API response contained no content")]
    EmptyResponse,

    #[error("Could not read extraction result: {0}")]
    Parse(#[from] JsonExtractError),

    #[error("Scan cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_duration() {
        let err = ScanError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Scan timed out after 30s");
    }

    #[test]
    fn timeout_message_differs_from_network() {
        let timeout = ScanError::Timeout(Duration::from_secs(30)).to_string();
        let network = ScanError::Network("connection reset".into()).to_string();
        assert!(timeout.contains("timed out"));
        assert!(!network.contains("timed out"));
    }

    #[test]
    fn unauthorized_message_is_a_hint() {
        let msg = ScanError::Unauthorized.to_string();
        assert!(msg.contains("401"));
        assert!(msg.contains("API key"));
    }

    #[test]
    fn parse_error_converts_from_json_error() {
        let err: ScanError = JsonExtractError::NoObject.into();
        assert!(matches!(err, ScanError::Parse(JsonExtractError::NoObject)));
    }
}
