use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use crate::dimension::CmmStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Tab,
    Comma,
    /// Columns separated by runs of two or more spaces.
    Spaces,
}

impl Delimiter {
    fn detect(line: &str) -> Self {
        if line.contains('\t') {
            Delimiter::Tab
        } else if line.contains(',') {
            Delimiter::Comma
        } else {
            Delimiter::Spaces
        }
    }

    fn split(&self, line: &str) -> Vec<String> {
        match self {
            Delimiter::Tab => split_delimited(line, b'\t'),
            Delimiter::Comma => split_delimited(line, b','),
            Delimiter::Spaces => {
                let cells: Vec<String> = spaces_re()
                    .split(line.trim())
                    .filter(|cell| !cell.is_empty())
                    .map(str::to_string)
                    .collect();
                if cells.len() > 1 {
                    cells
                } else {
                    line.split_whitespace().map(str::to_string).collect()
                }
            }
        }
    }
}

/// One measurement line of a CMM report.
#[derive(Debug, Clone, PartialEq)]
pub struct CmmRow {
    /// 1-based line number in the report.
    pub line: usize,
    pub feature: String,
    pub nominal: Option<f64>,
    pub actual: f64,
    pub plus_tolerance: Option<f64>,
    pub minus_tolerance: Option<f64>,
    pub deviation: Option<f64>,
    pub status: Option<CmmStatus>,
}

impl CmmRow {
    pub fn tolerance_band(&self) -> Option<f64> {
        match (self.plus_tolerance, self.minus_tolerance) {
            (Some(plus), Some(minus)) => Some(plus + minus),
            _ => None,
        }
    }

    fn status_from_tolerance(&self) -> Option<CmmStatus> {
        let nominal = self.nominal?;
        let plus = self.plus_tolerance.or(self.minus_tolerance)?;
        let minus = self.minus_tolerance.unwrap_or(plus);
        let within = self.actual >= nominal - minus && self.actual <= nominal + plus;
        Some(if within {
            CmmStatus::Pass
        } else {
            CmmStatus::Fail
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CmmReport {
    pub delimiter: Delimiter,
    pub has_header: bool,
    pub rows: Vec<CmmRow>,
    /// Lines after the header that could not be read as a measurement.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Feature,
    Nominal,
    Actual,
    PlusTolerance,
    MinusTolerance,
    Tolerance,
    Deviation,
    Status,
    OutOfTolerance,
}

#[derive(Debug, Clone, Default)]
struct Layout {
    feature: Option<usize>,
    nominal: Option<usize>,
    actual: Option<usize>,
    plus: Option<usize>,
    minus: Option<usize>,
    tolerance: Option<usize>,
    deviation: Option<usize>,
    status: Option<usize>,
    out_of_tolerance: Option<usize>,
}

impl Layout {
    fn from_header(cells: &[String]) -> Option<Self> {
        let mut layout = Layout::default();
        for (index, cell) in cells.iter().enumerate() {
            let slot = match classify_header(cell) {
                Some(Column::Feature) => &mut layout.feature,
                Some(Column::Nominal) => &mut layout.nominal,
                Some(Column::Actual) => &mut layout.actual,
                Some(Column::PlusTolerance) => &mut layout.plus,
                Some(Column::MinusTolerance) => &mut layout.minus,
                Some(Column::Tolerance) => &mut layout.tolerance,
                Some(Column::Deviation) => &mut layout.deviation,
                Some(Column::Status) => &mut layout.status,
                Some(Column::OutOfTolerance) => &mut layout.out_of_tolerance,
                None => continue,
            };
            if slot.is_none() {
                *slot = Some(index);
            }
        }
        let is_header =
            layout.actual.is_some() && (layout.feature.is_some() || layout.nominal.is_some());
        is_header.then_some(layout)
    }
}

fn spaces_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s{2,}").expect("invalid spacing regex"))
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*[Ø⌀]?\s*([+-]?(?:\d+\.?\d*|\.\d+))\s*(?:mm|in|"|°)?\s*$"#)
            .expect("invalid cell number regex")
    })
}

fn split_delimited(line: &str, delimiter: u8) -> Vec<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .delimiter(delimiter)
        .from_reader(line.as_bytes());
    reader
        .records()
        .next()
        .and_then(|record| record.ok())
        .map(|record| record.iter().map(str::to_string).collect())
        .unwrap_or_default()
}

fn classify_header(cell: &str) -> Option<Column> {
    let lower = cell.trim().to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect();
    let has = |token: &str| words.contains(&token);
    let starts = |prefix: &str| words.iter().any(|word| word.starts_with(prefix));

    if starts("status") || has("result") || has("pass") {
        Some(Column::Status)
    } else if has("oot") || starts("outtol") || (has("out") && starts("tol")) {
        Some(Column::OutOfTolerance)
    } else if starts("dev") || has("error") {
        Some(Column::Deviation)
    } else if starts("actual") || starts("meas") {
        Some(Column::Actual)
    } else if starts("nom") {
        Some(Column::Nominal)
    } else if lower.starts_with('+') || has("plus") || has("utol") || (has("upper") && starts("tol"))
    {
        Some(Column::PlusTolerance)
    } else if lower.starts_with('-')
        || has("minus")
        || has("ltol")
        || (has("lower") && starts("tol"))
    {
        Some(Column::MinusTolerance)
    } else if starts("tol") {
        Some(Column::Tolerance)
    } else if starts("feat")
        || starts("char")
        || has("id")
        || has("name")
        || has("label")
        || has("balloon")
        || has("dim")
        || has("item")
    {
        Some(Column::Feature)
    } else {
        None
    }
}

fn number(cell: &str) -> Option<f64> {
    number_re()
        .captures(cell)
        .and_then(|caps| caps.get(1))
        .and_then(|found| found.as_str().parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

fn status_word(cell: &str) -> Option<CmmStatus> {
    match cell.trim().to_ascii_uppercase().as_str() {
        "PASS" | "OK" | "IN" | "GOOD" | "ACCEPT" => Some(CmmStatus::Pass),
        "FAIL" | "NG" | "NOK" | "OUT" | "OOT" | "REJECT" | "BAD" => Some(CmmStatus::Fail),
        _ => None,
    }
}

/// Reads an out-of-tolerance flag column: blank, zero or "no" pass; a
/// nonzero amount or a marker fails.
fn out_of_tolerance_flag(cell: &str) -> Option<CmmStatus> {
    let lower = cell.trim().to_lowercase();
    match lower.as_str() {
        "" | "0" | "-" | "no" | "n" | "false" => return Some(CmmStatus::Pass),
        "yes" | "y" | "true" | "x" | "oot" => return Some(CmmStatus::Fail),
        _ => {}
    }
    if let Some(amount) = number(&lower) {
        return Some(if amount.abs() > 0.0 {
            CmmStatus::Fail
        } else {
            CmmStatus::Pass
        });
    }
    if lower.contains('*') || lower.contains('#') {
        return Some(CmmStatus::Fail);
    }
    status_word(&lower)
}

fn cell<'a>(cells: &'a [String], index: Option<usize>) -> Option<&'a str> {
    index.and_then(|index| cells.get(index)).map(String::as_str)
}

fn row_from_layout(line: usize, cells: &[String], layout: &Layout) -> Option<CmmRow> {
    let feature = cell(cells, layout.feature.or(Some(0)))?.trim().to_string();
    let actual = cell(cells, layout.actual).and_then(number)?;
    if feature.is_empty() {
        return None;
    }
    let tolerance = cell(cells, layout.tolerance).and_then(number).map(f64::abs);
    let mut row = CmmRow {
        line,
        feature,
        nominal: cell(cells, layout.nominal).and_then(number),
        actual,
        plus_tolerance: cell(cells, layout.plus)
            .and_then(number)
            .map(f64::abs)
            .or(tolerance),
        minus_tolerance: cell(cells, layout.minus)
            .and_then(number)
            .map(f64::abs)
            .or(tolerance),
        deviation: cell(cells, layout.deviation).and_then(number),
        status: None,
    };
    row.status = cell(cells, layout.status)
        .and_then(status_word)
        .or_else(|| cell(cells, layout.out_of_tolerance).and_then(out_of_tolerance_flag))
        .or_else(|| row.status_from_tolerance());
    Some(row)
}

/// Headerless rows: feature, nominal, actual, then optional plus/minus
/// tolerances and a status word in any trailing cell.
fn row_from_position(line: usize, cells: &[String]) -> Option<CmmRow> {
    let feature = cells.first()?.trim().to_string();
    if feature.is_empty() {
        return None;
    }
    let (nominal, actual) = match cells.len() {
        0 | 1 => return None,
        2 => (None, number(&cells[1])?),
        _ => (number(&cells[1]), number(&cells[2])?),
    };
    let mut row = CmmRow {
        line,
        feature,
        nominal,
        actual,
        plus_tolerance: None,
        minus_tolerance: None,
        deviation: None,
        status: None,
    };
    for extra in cells.iter().skip(3) {
        if let Some(status) = status_word(extra) {
            row.status = Some(status);
        } else if let Some(value) = number(extra) {
            if row.plus_tolerance.is_none() {
                row.plus_tolerance = Some(value.abs());
            } else if row.minus_tolerance.is_none() {
                row.minus_tolerance = Some(value.abs());
            }
        }
    }
    if row.status.is_none() {
        row.status = row.status_from_tolerance();
    }
    Some(row)
}

/// Parses a CSV, tab-delimited or space-aligned measurement report. The header
/// may sit anywhere; lines above it are treated as report preamble.
pub fn parse_report(text: &str) -> CmmReport {
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim_end_matches('\r')))
        .filter(|(_, line)| !line.trim().is_empty())
        .collect();

    let candidates: Vec<(usize, Delimiter, Layout)> = lines
        .iter()
        .enumerate()
        .filter_map(|(position, (_, line))| {
            let delimiter = Delimiter::detect(line);
            Layout::from_header(&delimiter.split(line)).map(|layout| (position, delimiter, layout))
        })
        .collect();
    // A preamble line can look like a header; the real one is followed by a
    // line that reads as a measurement under its layout.
    let leads_data = |(position, delimiter, layout): &(usize, Delimiter, Layout)| {
        lines.get(position + 1).is_some_and(|(line_number, line)| {
            row_from_layout(*line_number, &delimiter.split(line), layout).is_some()
        })
    };
    let chosen = candidates
        .iter()
        .position(leads_data)
        .or_else(|| candidates.len().checked_sub(1));
    let header = chosen.and_then(|index| candidates.into_iter().nth(index));

    let (data, delimiter, layout) = match header {
        Some((position, delimiter, layout)) => (&lines[position + 1..], delimiter, Some(layout)),
        None => {
            let delimiter = lines
                .first()
                .map(|(_, line)| Delimiter::detect(line))
                .unwrap_or(Delimiter::Comma);
            (&lines[..], delimiter, None)
        }
    };

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for (line_number, line) in data {
        let cells = delimiter.split(line);
        let row = match &layout {
            Some(layout) => row_from_layout(*line_number, &cells, layout),
            None => row_from_position(*line_number, &cells),
        };
        match row {
            Some(row) => rows.push(row),
            None => {
                debug!("CMM report line {} skipped: {}", line_number, line.trim());
                skipped += 1;
            }
        }
    }

    CmmReport {
        delimiter,
        has_header: layout.is_some(),
        rows,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_headerless_csv_by_position() {
        let report = parse_report("10,0.450,0.449\n11,1.250,1.262,0.005,0.005\n");
        assert!(!report.has_header);
        assert_eq!(report.delimiter, Delimiter::Comma);
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].feature, "10");
        assert_eq!(report.rows[0].nominal, Some(0.450));
        assert_eq!(report.rows[0].actual, 0.449);
        assert_eq!(report.rows[0].status, None);
        assert_eq!(report.rows[1].tolerance_band(), Some(0.01));
        assert_eq!(report.rows[1].status, Some(CmmStatus::Fail));
    }

    #[test]
    fn finds_header_below_preamble_in_tab_report() {
        let text = "PC-DMIS Report\tPart: 1234-A\n\
                    Date\t2026-10-14\n\
                    \n\
                    Feature\tNominal\t+Tol\t-Tol\tMeas\tDev\tOutTol\n\
                    DIM_010\t0.4500\t0.0020\t-0.0020\t0.4510\t0.0010\t0\n\
                    DIM_011\t1.2500\t0.0050\t-0.0050\t1.2620\t0.0120\t0.0070\n";
        let report = parse_report(text);
        assert!(report.has_header);
        assert_eq!(report.delimiter, Delimiter::Tab);
        assert_eq!(report.rows.len(), 2);
        let first = &report.rows[0];
        assert_eq!(first.line, 5);
        assert_eq!(first.feature, "DIM_010");
        assert_eq!(first.minus_tolerance, Some(0.002));
        assert_eq!(first.deviation, Some(0.001));
        assert_eq!(first.status, Some(CmmStatus::Pass));
        assert_eq!(report.rows[1].status, Some(CmmStatus::Fail));
    }

    #[test]
    fn header_like_preamble_is_passed_over() {
        let text = "Measurement Report,Part Name: X\n\
                    Operator,J. Smith\n\
                    Feature,Nominal,Actual,Status\n\
                    10,0.450,0.451,PASS\n\
                    11,1.250,1.262,FAIL\n";
        let report = parse_report(text);
        assert!(report.has_header);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].line, 4);
        assert_eq!(report.rows[0].feature, "10");
        assert_eq!(report.rows[0].nominal, Some(0.450));
        assert_eq!(report.rows[0].actual, 0.451);
        assert_eq!(report.rows[1].status, Some(CmmStatus::Fail));
    }

    #[test]
    fn header_without_rows_is_still_recognized() {
        let report = parse_report("Feature,Nominal,Actual\n");
        assert!(report.has_header);
        assert!(report.rows.is_empty());
        assert_eq!(report.skipped, 0);
    }

    #[test]
    fn splits_space_aligned_columns() {
        let text = "Char No   Nominal    Actual    Status\n\
                    4          0.250      0.251     PASS\n\
                    5          Ø.125      .131      FAIL\n";
        let report = parse_report(text);
        assert_eq!(report.delimiter, Delimiter::Spaces);
        assert_eq!(report.rows[0].feature, "4");
        assert_eq!(report.rows[1].nominal, Some(0.125));
        assert_eq!(report.rows[1].actual, 0.131);
        assert_eq!(report.rows[1].status, Some(CmmStatus::Fail));
    }

    #[test]
    fn status_column_wins_over_tolerance() {
        let text = "feature,nominal,actual,tol,result\n7,1.000,1.010,0.001,OK\n";
        let report = parse_report(text);
        assert_eq!(report.rows[0].status, Some(CmmStatus::Pass));
        assert_eq!(report.rows[0].tolerance_band(), Some(0.002));
    }

    #[test]
    fn repeated_headers_and_junk_are_skipped() {
        let text = "Feature,Nominal,Actual\n1,0.5,0.5\nFeature,Nominal,Actual\n--- page 2 ---\n2,0.75,0.751\n";
        let report = parse_report(text);
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.skipped, 2);
    }

    #[test]
    fn quoted_csv_cells_are_unwrapped() {
        let report = parse_report("\"Feature\",\"Actual\"\n\"CIR 3, DIA\",\"0.2501\"\n");
        assert_eq!(report.rows[0].feature, "CIR 3, DIA");
        assert_eq!(report.rows[0].actual, 0.2501);
        assert_eq!(report.rows[0].nominal, None);
    }
}
