use anyhow::{Context, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::info;

use super::ServiceConfig;
use super::retry::send_with_retry;
use crate::detection::encode_png_base64;
use crate::dimension::RawDimension;

const PROCESS_PATH: &str = "/api/process";

/// Detection output for a drawing: either a single page of dimensions or a
/// per-page breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    #[serde(default)]
    pub dimensions: Vec<RawDimension>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<ProcessedPage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedPage {
    pub page_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub dimensions: Vec<RawDimension>,
}

impl ProcessingResult {
    pub fn page_count(&self) -> u32 {
        let listed = self
            .pages
            .as_ref()
            .and_then(|pages| pages.iter().map(|page| page.page_number).max())
            .unwrap_or(1);
        self.total_pages.unwrap_or(listed).max(listed).max(1)
    }

    /// Raw dimensions for one page. Single-page results answer for page 1.
    pub fn page_dimensions(&self, page: u32) -> Vec<RawDimension> {
        match &self.pages {
            Some(pages) => pages
                .iter()
                .find(|entry| entry.page_number == page)
                .map(|entry| entry.dimensions.clone())
                .unwrap_or_default(),
            None if page == 1 => self.dimensions.clone(),
            None => Vec::new(),
        }
    }
}

pub struct DocumentProcessor {
    client: reqwest::Client,
    url: String,
}

impl DocumentProcessor {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            client: config.client(Some(config.request_timeout))?,
            url: config.endpoint(PROCESS_PATH),
        })
    }

    pub async fn process(&self, page: &DynamicImage) -> Result<ProcessingResult> {
        let image = encode_png_base64(page).with_context(|| "failed to encode page image")?;
        let body = json!({
            "image": image,
            "width": page.width(),
            "height": page.height(),
        });
        let reply = send_with_retry("document processing", || {
            self.client.post(&self.url).json(&body)
        })
        .await?;
        let result: ProcessingResult = serde_json::from_slice(&reply.body)
            .with_context(|| "failed to parse document processing response")?;
        info!(
            "document processing returned {} dimensions over {} pages",
            result.dimensions.len()
                + result
                    .pages
                    .iter()
                    .flatten()
                    .map(|page| page.dimensions.len())
                    .sum::<usize>(),
            result.page_count()
        );
        Ok(result)
    }
}
