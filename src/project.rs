//! `.ab` project files: a zip archive holding a single `state.json`.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::dimension::{CmmResult, Dimension};
use crate::services::ProcessingResult;

pub const STATE_ENTRY: &str = "state.json";
pub const FORMAT_VERSION: &str = "1.0";
pub const PROJECT_EXTENSION: &str = "ab";

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    pub version: String,
    pub timestamp: String,
    #[serde(default)]
    pub result: Option<ProcessingResult>,
    /// Dimensions of every page, each tagged with its page number.
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub bom_items: Vec<Value>,
    #[serde(default)]
    pub spec_items: Vec<Value>,
    #[serde(default = "one")]
    pub total_pages: u32,
    /// CMM results by page, then by dimension id.
    #[serde(default)]
    pub cmm_results: BTreeMap<u32, BTreeMap<u32, CmmResult>>,
}

impl ProjectState {
    pub fn new(timestamp: String) -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            timestamp,
            result: None,
            dimensions: Vec::new(),
            bom_items: Vec::new(),
            spec_items: Vec::new(),
            total_pages: 1,
            cmm_results: BTreeMap::new(),
        }
    }
}

pub fn now_timestamp() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .with_context(|| "failed to format project timestamp")
}

pub fn state_json(state: &ProjectState) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(state).with_context(|| "failed to serialize project state")
}

pub fn to_bytes(state: &ProjectState) -> Result<Vec<u8>> {
    let json = state_json(state)?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    writer
        .start_file(STATE_ENTRY, options)
        .with_context(|| "failed to start project entry")?;
    writer
        .write_all(&json)
        .with_context(|| "failed to write project entry")?;
    let bytes = writer
        .finish()
        .with_context(|| "failed to finish project archive")?
        .into_inner();
    Ok(bytes)
}

pub fn from_bytes(bytes: &[u8]) -> Result<ProjectState> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).with_context(|| "failed to read project archive")?;
    let mut entry = archive
        .by_name(STATE_ENTRY)
        .map_err(|_| anyhow!("project archive has no {}", STATE_ENTRY))?;
    let mut json = String::new();
    entry
        .read_to_string(&mut json)
        .with_context(|| "failed to read project state")?;
    serde_json::from_str(&json).with_context(|| "failed to parse project state")
}

pub fn save(path: &Path, state: &ProjectState) -> Result<()> {
    let bytes = to_bytes(state)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write project: {}", path.display()))
}

pub fn load(path: &Path) -> Result<ProjectState> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read project: {}", path.display()))?;
    from_bytes(&bytes).with_context(|| format!("invalid project file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::{CmmStatus, RawDimension};
    use crate::store::AnnotationStore;
    use crate::geometry::NormalizedBox;
    use serde_json::json;

    fn sample_state() -> ProjectState {
        let raw = vec![
            RawDimension {
                id: 1,
                value: "Ø0.450 ±0.002".to_string(),
                bounding_box: NormalizedBox::new(100.0, 200.0, 300.0, 400.0),
                zone: Some("G3".to_string()),
                confidence: Some(0.87),
                method: None,
                parsed: None,
                page: None,
            },
            RawDimension {
                id: 2,
                value: "0.1 + 0.2".to_string(),
                bounding_box: NormalizedBox::new(333.3, 666.6, 350.1, 680.7),
                zone: None,
                confidence: None,
                method: None,
                parsed: Some(serde_json::from_value(json!({"units": "in", "vendor_flag": [1, 2.5]})).unwrap()),
                page: None,
            },
        ];
        let mut store = AnnotationStore::new(1);
        store.load(&raw).unwrap();
        let mut state = ProjectState::new("2026-10-14T09:30:00Z".to_string());
        state.dimensions = store.take();
        state.result = Some(ProcessingResult {
            dimensions: raw,
            total_pages: Some(2),
            ..ProcessingResult::default()
        });
        state.bom_items = vec![json!({"part": "BRKT-01", "qty": 2})];
        state.total_pages = 2;
        state.cmm_results.entry(1).or_default().insert(
            1,
            CmmResult {
                actual: 0.4513,
                status: CmmStatus::Pass,
                deviation: 0.4513 - 0.45,
            },
        );
        state
    }

    #[test]
    fn state_json_round_trips_byte_for_byte() {
        let state = sample_state();
        let first = state_json(&state).unwrap();
        let reparsed: ProjectState = serde_json::from_slice(&first).unwrap();
        let second = state_json(&reparsed).unwrap();
        assert_eq!(first, second);
        assert_eq!(reparsed, state);
    }

    #[test]
    fn archive_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("bracket.ab");
        let state = sample_state();
        save(&path, &state).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded, state);
        assert_eq!(state_json(&loaded).unwrap(), state_json(&state).unwrap());
    }

    #[test]
    fn archive_without_state_is_rejected() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("other.json", FileOptions::default())
            .unwrap();
        writer.write_all(b"{}").unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        let err = from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("state.json"));
        assert!(from_bytes(b"not a zip").is_err());
    }

    #[test]
    fn missing_optional_fields_take_defaults() {
        let state: ProjectState =
            serde_json::from_str(r#"{"version": "1.0", "timestamp": "2026-01-01T00:00:00Z"}"#)
                .unwrap();
        assert_eq!(state.total_pages, 1);
        assert!(state.result.is_none());
        assert!(state.cmm_results.is_empty());
    }

    #[test]
    fn timestamp_is_rfc3339() {
        let stamp = now_timestamp().unwrap();
        assert!(OffsetDateTime::parse(&stamp, &Rfc3339).is_ok());
    }
}
