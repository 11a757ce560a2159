use anyhow::{Context, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::ServiceConfig;
use super::retry::send_with_retry;
use crate::detection::encode_png_base64;
use crate::dimension::RawDimension;
use crate::revision::{ChangeStatus, ChangeSummary};

const COMPARE_PATH: &str = "/api/compare";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparedDimension {
    #[serde(flatten)]
    pub dimension: RawDimension,
    pub status: ChangeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
}

/// Revision compare answer: Rev B dimensions with a status each, plus the
/// Rev A dimensions that disappeared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompareResponse {
    #[serde(default)]
    pub dimensions: Vec<ComparedDimension>,
    #[serde(default)]
    pub removed_dimensions: Vec<RawDimension>,
    #[serde(default)]
    pub summary: ChangeSummary,
}

pub struct RevisionComparer {
    client: reqwest::Client,
    url: String,
}

impl RevisionComparer {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            client: config.client(Some(config.request_timeout))?,
            url: config.endpoint(COMPARE_PATH),
        })
    }

    pub async fn compare(
        &self,
        rev_a: &DynamicImage,
        rev_b: &DynamicImage,
    ) -> Result<CompareResponse> {
        let body = json!({
            "image_a": encode_png_base64(rev_a).with_context(|| "failed to encode revision A")?,
            "image_b": encode_png_base64(rev_b).with_context(|| "failed to encode revision B")?,
        });
        let reply = send_with_retry("revision compare", || {
            self.client.post(&self.url).json(&body)
        })
        .await?;
        let response: CompareResponse = serde_json::from_slice(&reply.body)
            .with_context(|| "failed to parse revision compare response")?;
        info!(
            "revision compare: {} added, {} modified, {} removed, {} unchanged",
            response.summary.added,
            response.summary.modified,
            response.summary.removed,
            response.summary.unchanged
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_statuses_and_old_values() {
        let body = r#"{
            "dimensions": [
                {"id": 3, "value": "0.455", "bounding_box": {"xmin": 100, "ymin": 200, "xmax": 300, "ymax": 400}, "status": "modified", "old_value": "0.450"},
                {"id": 9, "value": "R.06", "bounding_box": {"xmin": 500, "ymin": 500, "xmax": 520, "ymax": 520}, "status": "added"}
            ],
            "removed_dimensions": [],
            "summary": {"added": 1, "modified": 1, "removed": 0, "unchanged": 0}
        }"#;
        let response: CompareResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.dimensions[0].status, ChangeStatus::Modified);
        assert_eq!(response.dimensions[0].old_value.as_deref(), Some("0.450"));
        assert_eq!(response.dimensions[1].status, ChangeStatus::Added);
        assert_eq!(response.summary.added, 1);
    }
}
