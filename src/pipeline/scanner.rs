//! `Scanner`: chains normalizer → extraction client for both record kinds.
//!
//! Each scan is one linear async call chain. Image retrieval and the
//! extraction call are each bounded by the configured timeout, and the whole
//! chain is raced against the caller's cancellation token, so leaving a scan
//! screen aborts the in-flight request instead of leaking it.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::preprocess::{normalize_image, ImageSource};
use super::types::RecordKind;
use super::vision::{HttpVisionClient, VisionClient, VisionRequest};
use super::ScanError;
use crate::config::ScanConfig;

pub struct Scanner<C> {
    client: C,
    config: ScanConfig,
    http: reqwest::Client,
}

impl Scanner<HttpVisionClient> {
    /// Production scanner talking to the configured endpoint.
    pub fn from_config(config: ScanConfig) -> Result<Self, ScanError> {
        config.validate()?;
        let client = HttpVisionClient::new(&config)?;
        Ok(Self::new(client, config))
    }
}

impl<C: VisionClient> Scanner<C> {
    pub fn new(client: C, config: ScanConfig) -> Self {
        Self {
            client,
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Normalize the image and run one extraction call; returns the model's
    /// raw text.
    pub(crate) async fn extract(
        &self,
        kind: RecordKind,
        image: &ImageSource,
        prompt: String,
        cancel: &CancellationToken,
    ) -> Result<String, ScanError> {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let work = async {
            let timeout = self.config.request_timeout;
            let encoded = tokio::time::timeout(
                timeout,
                normalize_image(image, &self.config.normalize, &self.http),
            )
            .await
            .map_err(|_| {
                ScanError::ImageFetch(format!(
                    "Image retrieval timed out after {}s",
                    timeout.as_secs_f32()
                ))
            })??;
            debug!(
                kind = %kind,
                mime = %encoded.mime,
                payload_len = encoded.base64.len(),
                "Image ready for extraction"
            );

            let request = VisionRequest {
                prompt,
                image: encoded,
                max_tokens: self.config.max_tokens_for(kind),
                temperature: self.config.temperature,
            };

            let start = Instant::now();
            let result =
                match tokio::time::timeout(self.config.request_timeout, self.client.complete(&request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ScanError::Timeout(self.config.request_timeout)),
                };
            debug!(
                kind = %kind,
                elapsed_ms = %start.elapsed().as_millis(),
                ok = result.is_ok(),
                "Extraction call finished"
            );
            result
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ScanError::Cancelled),
            result = work => result,
        }
    }
}

/// Log a scan failure at the level it deserves.
pub(crate) fn log_failure(kind: RecordKind, err: &ScanError) {
    match err {
        ScanError::Cancelled => warn!(kind = %kind, "Scan cancelled by caller"),
        _ => error!(kind = %kind, error = %err, "Scan failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::pipeline::vision::MockVisionClient;

    const IMAGE: &str = "data:image/jpeg;base64,QUJD";

    fn config() -> ScanConfig {
        ScanConfig::proxy("http://localhost:8787/vision")
    }

    #[tokio::test]
    async fn extract_passes_prompt_and_image() {
        let scanner = Scanner::new(MockVisionClient::new("{}"), config());
        let text = scanner
            .extract(
                RecordKind::ProductTag,
                &ImageSource::parse(IMAGE),
                "prompt".into(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(text, "{}");

        let seen = scanner.client().requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].prompt, "prompt");
        assert_eq!(seen[0].image.base64, "QUJD");
        assert_eq!(seen[0].max_tokens, scanner.config().product_tag_max_tokens);
    }

    #[tokio::test]
    async fn extract_times_out_with_distinct_error() {
        let scanner = Scanner::new(
            MockVisionClient::new("{}").with_delay(Duration::from_secs(10)),
            config().with_timeout(Duration::from_millis(50)),
        );
        let err = scanner
            .extract(
                RecordKind::Schedule,
                &ImageSource::parse(IMAGE),
                "prompt".into(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ScanError::Timeout(Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn extract_aborts_on_cancel() {
        let scanner = Scanner::new(
            MockVisionClient::new("{}").with_delay(Duration::from_secs(10)),
            config(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = scanner
            .extract(
                RecordKind::Schedule,
                &ImageSource::parse(IMAGE),
                "prompt".into(),
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err, ScanError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn extract_skips_call_when_already_cancelled() {
        let scanner = Scanner::new(MockVisionClient::new("{}"), config());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = scanner
            .extract(
                RecordKind::Schedule,
                &ImageSource::parse(IMAGE),
                "prompt".into(),
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err, ScanError::Cancelled);
        assert!(scanner.client().requests().is_empty());
    }

    #[tokio::test]
    async fn image_errors_propagate() {
        let scanner = Scanner::new(MockVisionClient::new("{}"), config());
        let err = scanner
            .extract(
                RecordKind::Schedule,
                &ImageSource::parse("data:text/plain,hello"),
                "prompt".into(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::ImageDecode(_)));
        assert!(scanner.client().requests().is_empty());
    }

    #[tokio::test]
    async fn stalled_image_host_is_bounded_by_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and never answer.
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let scanner = Scanner::new(
            MockVisionClient::new("{}"),
            config().with_timeout(Duration::from_millis(200)),
        );
        let started = Instant::now();
        let err = tokio::time::timeout(
            Duration::from_secs(3),
            scanner.extract(
                RecordKind::Schedule,
                &ImageSource::Url(format!("http://{addr}/sheet.jpg")),
                "prompt".into(),
                &CancellationToken::new(),
            ),
        )
        .await
        .expect("image retrieval must respect the request timeout")
        .unwrap_err();

        match err {
            ScanError::ImageFetch(msg) => assert!(msg.contains("timed out")),
            other => panic!("expected ImageFetch, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(scanner.client().requests().is_empty());
    }

    #[test]
    fn from_config_rejects_bad_endpoint() {
        let result = Scanner::from_config(ScanConfig::proxy("not-a-url"));
        assert!(matches!(result, Err(ScanError::Config(_))));
    }
}
