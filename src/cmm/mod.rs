//! CMM report import: parse heterogeneous measurement reports, score rows
//! against the working set and commit accepted matches as CMM results.

mod matcher;
mod parse;

pub use matcher::{
    Candidate, FEATURE_ID_SCORE, MatchPlan, NOMINAL_SCORE, RowMatch, TOLERANCE_SCORE,
    feature_matches, score_row,
};
pub use parse::{CmmReport, CmmRow, Delimiter, parse_report};

use crate::dimension::Dimension;

pub const DEFAULT_ACCEPT_THRESHOLD: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchConfig {
    pub nominal_epsilon: f64,
    pub tolerance_epsilon: f64,
    /// Minimum score for an automatic match, inclusive.
    pub accept_threshold: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            nominal_epsilon: 0.0005,
            tolerance_epsilon: 0.0001,
            accept_threshold: DEFAULT_ACCEPT_THRESHOLD,
        }
    }
}

/// Parses `text` and builds a match plan against `dimensions`.
pub fn plan_import(text: &str, dimensions: &[Dimension], config: &MatchConfig) -> MatchPlan {
    let report = parse_report(text);
    MatchPlan::build(report.rows, dimensions, config)
}
