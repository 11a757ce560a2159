use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;
use tracing::{debug, info};

use super::MatchConfig;
use super::parse::CmmRow;
use crate::dimension::{CmmResult, CmmStatus, Dimension};

pub const NOMINAL_SCORE: u32 = 50;
pub const FEATURE_ID_SCORE: u32 = 30;
pub const TOLERANCE_SCORE: u32 = 20;

fn digits_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("invalid digit regex"))
}

fn without_leading_zeros(digits: &str) -> &str {
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() && !digits.is_empty() {
        "0"
    } else {
        trimmed
    }
}

/// True when the report's feature label names balloon `id`: its digits read
/// as the id, or its first or last digit group does.
///
/// Prefix and suffix matching work on whole digit groups only. A group that
/// merely starts or ends with the id's digits (`101` for balloon 10) does not
/// count, nor does a middle group (`A1_2_3` for balloon 2); labels like
/// `CIR3_10` carry a feature counter next to the balloon number, and partial
/// digit matches would tie them to the wrong balloon. Leading zeros are
/// ignored.
pub fn feature_matches(feature: &str, id: u32) -> bool {
    let id = id.to_string();
    let groups: Vec<&str> = digits_re()
        .find_iter(feature)
        .map(|found| found.as_str())
        .collect();
    let (Some(first), Some(last)) = (groups.first(), groups.last()) else {
        return false;
    };
    let joined = groups.concat();
    without_leading_zeros(&joined) == id
        || without_leading_zeros(first) == id
        || without_leading_zeros(last) == id
}

pub fn score_row(row: &CmmRow, dimension: &Dimension, config: &MatchConfig) -> u32 {
    let mut score = 0;
    if let (Some(nominal), Some(expected)) = (row.nominal, dimension.nominal())
        && (nominal - expected).abs() <= config.nominal_epsilon
    {
        score += NOMINAL_SCORE;
    }
    if feature_matches(&row.feature, dimension.id) {
        score += FEATURE_ID_SCORE;
    }
    if let (Some(band), Some(expected)) = (row.tolerance_band(), dimension.parsed.tolerance_band())
        && (band - expected).abs() <= config.tolerance_epsilon
    {
        score += TOLERANCE_SCORE;
    }
    score
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub dimension_id: u32,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowMatch {
    pub row: CmmRow,
    /// Every dimension with a nonzero score, best first.
    pub candidates: Vec<Candidate>,
    pub assigned: Option<u32>,
}

impl RowMatch {
    pub fn best(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    pub fn score_for(&self, dimension_id: u32) -> u32 {
        self.candidates
            .iter()
            .find(|candidate| candidate.dimension_id == dimension_id)
            .map(|candidate| candidate.score)
            .unwrap_or(0)
    }
}

/// Proposed row-to-dimension assignment, open to manual override before
/// commit.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchPlan {
    rows: Vec<RowMatch>,
    threshold: u32,
}

impl MatchPlan {
    /// Scores every row against every dimension and assigns greedily by
    /// score, one row per dimension. Rows whose best free candidate falls
    /// below the threshold stay unmatched.
    pub fn build(rows: Vec<CmmRow>, dimensions: &[Dimension], config: &MatchConfig) -> Self {
        let mut matches: Vec<RowMatch> = rows
            .into_iter()
            .map(|row| {
                let mut candidates: Vec<Candidate> = dimensions
                    .iter()
                    .map(|dimension| Candidate {
                        dimension_id: dimension.id,
                        score: score_row(&row, dimension, config),
                    })
                    .filter(|candidate| candidate.score > 0)
                    .collect();
                candidates.sort_by(|a, b| {
                    b.score
                        .cmp(&a.score)
                        .then(a.dimension_id.cmp(&b.dimension_id))
                });
                RowMatch {
                    row,
                    candidates,
                    assigned: None,
                }
            })
            .collect();

        let mut pairs: Vec<(u32, usize, u32)> = matches
            .iter()
            .enumerate()
            .flat_map(|(index, entry)| {
                entry
                    .candidates
                    .iter()
                    .filter(|candidate| candidate.score >= config.accept_threshold)
                    .map(move |candidate| (candidate.score, index, candidate.dimension_id))
            })
            .collect();
        pairs.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut taken = HashSet::new();
        for (_, index, dimension_id) in pairs {
            if matches[index].assigned.is_none() && taken.insert(dimension_id) {
                matches[index].assigned = Some(dimension_id);
            }
        }
        for entry in &matches {
            if entry.assigned.is_none() {
                debug!(
                    "CMM row {} ({}) unmatched; best score {}",
                    entry.row.line,
                    entry.row.feature,
                    entry.best().map(|candidate| candidate.score).unwrap_or(0)
                );
            }
        }

        let plan = Self {
            rows: matches,
            threshold: config.accept_threshold,
        };
        info!(
            "CMM match: {} of {} rows matched",
            plan.matched_count(),
            plan.rows.len()
        );
        plan
    }

    pub fn rows(&self) -> &[RowMatch] {
        &self.rows
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn matched_count(&self) -> usize {
        self.rows.iter().filter(|entry| entry.assigned.is_some()).count()
    }

    /// Rows that need review.
    pub fn unmatched(&self) -> impl Iterator<Item = &RowMatch> {
        self.rows.iter().filter(|entry| entry.assigned.is_none())
    }

    /// Overrides the assignment of one row. A dimension already assigned to
    /// another row is released from it first. Returns false for an unknown
    /// row index.
    pub fn assign(&mut self, row: usize, dimension_id: Option<u32>) -> bool {
        if row >= self.rows.len() {
            return false;
        }
        if let Some(id) = dimension_id {
            for entry in &mut self.rows {
                if entry.assigned == Some(id) {
                    entry.assigned = None;
                }
            }
        }
        self.rows[row].assigned = dimension_id;
        true
    }

    /// Assigned rows with no status of their own whose dimension carries no
    /// limits either. Commit leaves them out; they need a manual verdict.
    pub fn needs_verdict<'a>(
        &'a self,
        dimensions: &'a [Dimension],
    ) -> impl Iterator<Item = &'a RowMatch> + 'a {
        self.rows.iter().filter(move |entry| {
            entry.row.status.is_none()
                && entry
                    .assigned
                    .and_then(|id| dimensions.iter().find(|dimension| dimension.id == id))
                    .is_some_and(|dimension| dimension_limits(dimension).is_none())
        })
    }

    /// CMM results for every assigned row whose dimension still exists and
    /// whose verdict is known. Dimension fields are never touched.
    pub fn commit(&self, dimensions: &[Dimension]) -> BTreeMap<u32, CmmResult> {
        let mut results = BTreeMap::new();
        for entry in &self.rows {
            let Some(id) = entry.assigned else {
                continue;
            };
            let Some(dimension) = dimensions.iter().find(|dimension| dimension.id == id) else {
                debug!("CMM row {} assigned to missing dimension {}", entry.row.line, id);
                continue;
            };
            match result_for(&entry.row, dimension) {
                Some(result) => {
                    results.insert(id, result);
                }
                None => debug!(
                    "CMM row {}: dimension {} has no tolerance and the row no status; left for review",
                    entry.row.line, id
                ),
            }
        }
        results
    }
}

fn result_for(row: &CmmRow, dimension: &Dimension) -> Option<CmmResult> {
    let status = row
        .status
        .or_else(|| status_from_dimension(row.actual, dimension))?;
    let nominal = row.nominal.or_else(|| dimension.nominal());
    let deviation = row
        .deviation
        .or_else(|| nominal.map(|nominal| row.actual - nominal))
        .unwrap_or(0.0);
    Some(CmmResult {
        actual: row.actual,
        status,
        deviation,
    })
}

fn dimension_limits(dimension: &Dimension) -> Option<(f64, f64)> {
    let parsed = &dimension.parsed;
    match (parsed.lower_limit, parsed.upper_limit) {
        (Some(lower), Some(upper)) => Some((lower, upper)),
        _ => dimension.nominal().and_then(|nominal| {
            match (parsed.plus_tolerance, parsed.minus_tolerance) {
                (Some(plus), Some(minus)) => Some((nominal - minus.abs(), nominal + plus.abs())),
                _ => None,
            }
        }),
    }
}

/// None when the dimension carries no limits to judge against.
fn status_from_dimension(actual: f64, dimension: &Dimension) -> Option<CmmStatus> {
    let (lower, upper) = dimension_limits(dimension)?;
    if actual < lower || actual > upper {
        Some(CmmStatus::Fail)
    } else {
        Some(CmmStatus::Pass)
    }
}
