//! Local inspection table export (AS9102 Form 3 layout) as CSV.

use std::collections::BTreeMap;
use std::io::Write;

use crate::dimension::{CmmResult, Dimension};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV serialization error: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV output is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub type ExportResult<T> = Result<T, ExportError>;

#[derive(Debug, Clone)]
pub struct InspectionTableConfig {
    pub include_headers: bool,
    pub delimiter: u8,
    /// Fixed decimal places for numeric columns.
    pub decimals: usize,
}

impl Default for InspectionTableConfig {
    fn default() -> Self {
        Self {
            include_headers: true,
            delimiter: b',',
            decimals: 4,
        }
    }
}

const HEADERS: [&str; 12] = [
    "Balloon",
    "Page",
    "Zone",
    "Characteristic",
    "Type",
    "Nominal",
    "Lower Limit",
    "Upper Limit",
    "Method",
    "Actual",
    "Deviation",
    "Result",
];

/// Writes one row per dimension. `results` holds CMM results by page, then
/// by dimension id; results whose dimension is absent are never written.
pub fn write_inspection_csv<W: Write>(
    writer: W,
    dimensions: &[Dimension],
    results: &BTreeMap<u32, BTreeMap<u32, CmmResult>>,
    config: &InspectionTableConfig,
) -> ExportResult<()> {
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(config.delimiter)
        .has_headers(config.include_headers)
        .from_writer(writer);

    if config.include_headers {
        csv_writer.write_record(HEADERS)?;
    }

    let number = |value: Option<f64>| {
        value
            .map(|value| format!("{:.*}", config.decimals, value))
            .unwrap_or_default()
    };

    for dimension in dimensions {
        let (lower, upper) = limits(dimension);
        let result = results
            .get(&dimension.page)
            .and_then(|page| page.get(&dimension.id));
        csv_writer.write_record(&[
            dimension.id.to_string(),
            dimension.page.to_string(),
            dimension.zone.clone().unwrap_or_default(),
            dimension.value.clone(),
            dimension
                .parsed
                .subtype
                .as_ref()
                .map(|subtype| subtype.as_str().to_string())
                .unwrap_or_default(),
            number(dimension.nominal()),
            number(lower),
            number(upper),
            dimension.method.as_str().to_string(),
            number(result.map(|result| result.actual)),
            number(result.map(|result| result.deviation)),
            result
                .map(|result| result.status.as_str().to_string())
                .unwrap_or_default(),
        ])?;
    }

    csv_writer.flush()?;
    Ok(())
}

pub fn inspection_csv_string(
    dimensions: &[Dimension],
    results: &BTreeMap<u32, BTreeMap<u32, CmmResult>>,
    config: &InspectionTableConfig,
) -> ExportResult<String> {
    let mut buffer = Vec::new();
    write_inspection_csv(&mut buffer, dimensions, results, config)?;
    Ok(String::from_utf8(buffer)?)
}

fn limits(dimension: &Dimension) -> (Option<f64>, Option<f64>) {
    let parsed = &dimension.parsed;
    if parsed.lower_limit.is_some() || parsed.upper_limit.is_some() {
        return (parsed.lower_limit, parsed.upper_limit);
    }
    match (dimension.nominal(), parsed.plus_tolerance, parsed.minus_tolerance) {
        (Some(nominal), Some(plus), Some(minus)) => {
            (Some(nominal - minus.abs()), Some(nominal + plus.abs()))
        }
        _ => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::{CmmStatus, RawDimension};
    use crate::geometry::NormalizedBox;
    use crate::store::AnnotationStore;

    fn dimensions() -> Vec<Dimension> {
        let raw = vec![
            RawDimension {
                id: 1,
                value: "0.450 ±0.002".to_string(),
                bounding_box: NormalizedBox::new(100.0, 200.0, 300.0, 400.0),
                zone: Some("G3".to_string()),
                confidence: None,
                method: None,
                parsed: None,
                page: None,
            },
            RawDimension {
                id: 2,
                value: "NOTE 4, TYP".to_string(),
                bounding_box: NormalizedBox::new(500.0, 500.0, 600.0, 550.0),
                zone: None,
                confidence: None,
                method: None,
                parsed: None,
                page: None,
            },
        ];
        let mut store = AnnotationStore::new(1);
        store.load(&raw).unwrap();
        store.take()
    }

    #[test]
    fn writes_rows_with_attached_results() {
        let mut results = BTreeMap::new();
        results.entry(1).or_insert_with(BTreeMap::new).insert(
            1,
            CmmResult {
                actual: 0.4513,
                status: CmmStatus::Pass,
                deviation: 0.0013,
            },
        );
        let csv = inspection_csv_string(&dimensions(), &results, &InspectionTableConfig::default())
            .unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Balloon,Page,Zone,Characteristic"));
        assert_eq!(
            lines[1],
            "1,1,G3,0.450 ±0.002,Linear,0.4500,0.4480,0.4520,Micrometer,0.4513,0.0013,PASS"
        );
        assert!(lines[2].starts_with("2,1,,\"NOTE 4, TYP\",Note,4.0000,,,Visual,,,"));
    }

    #[test]
    fn results_from_another_page_are_ignored() {
        let mut results = BTreeMap::new();
        results.entry(2).or_insert_with(BTreeMap::new).insert(
            1,
            CmmResult {
                actual: 9.0,
                status: CmmStatus::Fail,
                deviation: 8.55,
            },
        );
        let config = InspectionTableConfig {
            include_headers: false,
            ..InspectionTableConfig::default()
        };
        let csv = inspection_csv_string(&dimensions(), &results, &config).unwrap();
        assert!(!csv.contains("FAIL"));
        assert_eq!(csv.lines().count(), 2);
    }
}
