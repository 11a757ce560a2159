//! HTTP clients for the document processing, region detection, revision
//! compare and report export services.

use anyhow::{Context, Result};
use std::time::Duration;

mod compare;
mod document;
mod region;
mod report;
mod retry;

pub use compare::{ComparedDimension, CompareResponse, RevisionComparer};
pub use document::{DocumentProcessor, ProcessedPage, ProcessingResult};
pub use region::HttpRegionDetector;
pub use report::{ExportArtifact, ExportFormat, ReportExporter};

pub const API_BASE_ENV: &str = "AUTOBALLOON_API_BASE";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub detection_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(120),
            detection_timeout: Duration::from_secs(30),
        }
    }
}

impl ServiceConfig {
    /// Endpoint root, with `AUTOBALLOON_API_BASE` taking precedence over the
    /// configured value.
    pub fn base_url(&self) -> String {
        let base = std::env::var(API_BASE_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| self.base_url.clone());
        base.trim().trim_end_matches('/').to_string()
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url(), path.trim_start_matches('/'))
    }

    /// HTTP client with an overall request timeout, or none when the caller
    /// enforces its own deadline.
    fn client(&self, timeout: Option<Duration>) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        builder
            .build()
            .with_context(|| "failed to build HTTP client")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_endpoint_paths() {
        let config = ServiceConfig {
            base_url: "http://inspect.local:9000/".to_string(),
            ..ServiceConfig::default()
        };
        if std::env::var(API_BASE_ENV).is_err() {
            assert_eq!(
                config.endpoint("/api/process"),
                "http://inspect.local:9000/api/process"
            );
        }
    }
}
