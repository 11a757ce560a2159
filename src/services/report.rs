use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use super::ServiceConfig;
use super::retry::send_with_retry;
use crate::dimension::{CmmResult, Dimension};

const EXPORT_PATH: &str = "/api/export";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Pdf,
    Excel,
    Zip,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Excel => "xlsx",
            ExportFormat::Zip => "zip",
        }
    }

    fn default_content_type(&self) -> &'static str {
        match self {
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Excel => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ExportFormat::Zip => "application/zip",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(ExportFormat::Pdf),
            "xlsx" | "excel" => Ok(ExportFormat::Excel),
            "zip" => Ok(ExportFormat::Zip),
            other => Err(anyhow!("unknown export format: {}", other)),
        }
    }
}

/// Opaque report produced by the export service.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub format: ExportFormat,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ExportArtifact {
    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.bytes)
            .with_context(|| format!("failed to write report: {}", path.display()))
    }
}

#[derive(Serialize)]
struct ExportRequest<'a> {
    format: &'static str,
    dimensions: &'a [Dimension],
    cmm_results: BTreeMap<String, &'a CmmResult>,
}

pub struct ReportExporter {
    client: reqwest::Client,
    url: String,
}

impl ReportExporter {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            client: config.client(Some(config.request_timeout))?,
            url: config.endpoint(EXPORT_PATH),
        })
    }

    pub async fn export(
        &self,
        format: ExportFormat,
        dimensions: &[Dimension],
        cmm_results: &BTreeMap<u32, CmmResult>,
    ) -> Result<ExportArtifact> {
        let request = ExportRequest {
            format: format.as_str(),
            dimensions,
            cmm_results: cmm_results
                .iter()
                .map(|(id, result)| (id.to_string(), result))
                .collect(),
        };
        let reply = send_with_retry("report export", || {
            self.client.post(&self.url).json(&request)
        })
        .await?;
        if reply.body.is_empty() {
            return Err(anyhow!("report export returned an empty {}", format.as_str()));
        }
        Ok(ExportArtifact {
            format,
            content_type: reply
                .content_type
                .unwrap_or_else(|| format.default_content_type().to_string()),
            bytes: reply.body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_format_names() {
        assert_eq!("PDF".parse::<ExportFormat>().unwrap(), ExportFormat::Pdf);
        assert_eq!("excel".parse::<ExportFormat>().unwrap(), ExportFormat::Excel);
        assert_eq!(" zip ".parse::<ExportFormat>().unwrap(), ExportFormat::Zip);
        assert!("docx".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn writes_artifact_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.pdf");
        let artifact = ExportArtifact {
            format: ExportFormat::Pdf,
            content_type: "application/pdf".to_string(),
            bytes: b"%PDF-1.7".to_vec(),
        };
        artifact.write_to(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"%PDF-1.7");
    }
}
