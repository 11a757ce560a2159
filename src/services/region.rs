use anyhow::Result;
use serde::Deserialize;

use super::ServiceConfig;
use crate::detection::{DetectFuture, DetectionFailure, RegionRequest, RegionTextDetector};

const DETECT_REGION_PATH: &str = "/api/detect-region";

#[derive(Debug, Deserialize)]
struct RegionResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    detected_text: Option<String>,
}

/// Region text detection over HTTP. There is no retry, and the client has
/// no timeout of its own: the bridge's hard deadline bounds the attempt.
pub struct HttpRegionDetector {
    client: reqwest::Client,
    url: String,
    deadline_secs: u64,
}

impl HttpRegionDetector {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            client: config.client(None)?,
            url: config.endpoint(DETECT_REGION_PATH),
            deadline_secs: config.detection_timeout.as_secs(),
        })
    }

    fn failure(&self, err: reqwest::Error) -> DetectionFailure {
        if err.is_timeout() {
            DetectionFailure::TimedOut(self.deadline_secs)
        } else {
            DetectionFailure::Unavailable(err.to_string())
        }
    }
}

impl RegionTextDetector for HttpRegionDetector {
    fn detect(&self, request: RegionRequest) -> DetectFuture<'_> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.url)
                .json(&request)
                .send()
                .await
                .map_err(|err| self.failure(err))?;
            let status = response.status();
            if !status.is_success() {
                return Err(DetectionFailure::Unavailable(format!("HTTP {}", status)));
            }
            let body: RegionResponse = response.json().await.map_err(|err| self.failure(err))?;
            Ok(interpret(body))
        })
    }
}

fn interpret(body: RegionResponse) -> Option<String> {
    if !body.success {
        return None;
    }
    body.detected_text.filter(|text| !text.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::AutoDetectionBridge;
    use crate::geometry::PercentRect;
    use crate::services::API_BASE_ENV;
    use image::DynamicImage;
    use std::net::TcpListener;
    use std::time::Duration;

    /// Accepts connections and holds them open without answering.
    fn silent_listener() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let address = listener.local_addr().expect("local addr");
        std::thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming().flatten() {
                held.push(stream);
            }
        });
        format!("http://{}", address)
    }

    #[tokio::test]
    async fn unanswered_requests_time_out_instead_of_unavailable() {
        let config = ServiceConfig {
            base_url: silent_listener(),
            detection_timeout: Duration::from_secs(1),
            ..ServiceConfig::default()
        };
        if std::env::var(API_BASE_ENV).is_ok() {
            return;
        }
        let bridge = AutoDetectionBridge::new(HttpRegionDetector::new(&config).unwrap())
            .with_timeout(config.detection_timeout);
        let page = DynamicImage::new_rgb8(200, 100);
        for _ in 0..3 {
            let result = bridge.detect(&page, PercentRect::new(10.0, 10.0, 20.0, 20.0)).await;
            assert_eq!(result, Err(DetectionFailure::TimedOut(1)));
        }
    }

    #[tokio::test]
    async fn refused_connections_are_unavailable() {
        let address = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("local addr")
        };
        let config = ServiceConfig {
            base_url: format!("http://{}", address),
            ..ServiceConfig::default()
        };
        if std::env::var(API_BASE_ENV).is_ok() {
            return;
        }
        let bridge = AutoDetectionBridge::new(HttpRegionDetector::new(&config).unwrap());
        let page = DynamicImage::new_rgb8(200, 100);
        let result = bridge.detect(&page, PercentRect::new(10.0, 10.0, 20.0, 20.0)).await;
        assert!(matches!(result, Err(DetectionFailure::Unavailable(_))));
    }

    fn parse(body: &str) -> Option<String> {
        interpret(serde_json::from_str(body).unwrap())
    }

    #[test]
    fn unsuccessful_or_empty_answers_carry_no_text() {
        assert_eq!(parse(r#"{"success": false}"#), None);
        assert_eq!(parse(r#"{"success": true, "detected_text": "  "}"#), None);
        assert_eq!(parse(r#"{"success": true}"#), None);
        assert_eq!(
            parse(r#"{"success": true, "detected_text": "Ø.250 ±.005"}"#),
            Some("Ø.250 ±.005".to_string())
        );
    }
}
