//! Matches dimensions across two drawing revisions and ports balloon ids.
//!
//! A Rev B dimension matches a Rev A dimension when their bounding-box
//! centers lie within `position_tolerance` on both axes. Candidate pairs are
//! assigned nearest first, one to one, so the result does not depend on list
//! order beyond index tie-breaks.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::dimension::{Dimension, RawDimension};
use crate::geometry::NORMALIZED_EXTENT;
use crate::services::CompareResponse;
use crate::store::{AnnotationStore, BalloonLayout, IdSequence, StoreError};

pub const DEFAULT_POSITION_TOLERANCE: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Modified,
    Removed,
    Unchanged,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Added => "added",
            ChangeStatus::Modified => "modified",
            ChangeStatus::Removed => "removed",
            ChangeStatus::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    #[serde(default)]
    pub added: usize,
    #[serde(default)]
    pub modified: usize,
    #[serde(default)]
    pub removed: usize,
    #[serde(default)]
    pub unchanged: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcileOptions {
    /// Maximum center offset per axis, in normalized units.
    pub position_tolerance: f64,
    /// Page-height fraction below which dimensions are treated as title
    /// block: left out of the comparison but kept in the working set.
    pub title_block_cutoff: Option<f64>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            position_tolerance: DEFAULT_POSITION_TOLERANCE,
            title_block_cutoff: None,
        }
    }
}

impl ReconcileOptions {
    /// Splits into (compared, title block), keeping order.
    fn split<'a>(&self, dimensions: &'a [Dimension]) -> (Vec<&'a Dimension>, Vec<&'a Dimension>) {
        dimensions.iter().partition(|dimension| self.in_scope(dimension))
    }

    fn in_scope(&self, dimension: &Dimension) -> bool {
        match self.title_block_cutoff {
            Some(cutoff) if cutoff > 0.0 && cutoff < 1.0 => {
                dimension.bounding_box.center().y <= cutoff * NORMALIZED_EXTENT
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledDimension {
    pub dimension: Dimension,
    pub status: ChangeStatus,
    /// Rev A value of a modified dimension.
    pub previous_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    /// Rev B dimensions in Rev B order, carrying ported ids.
    pub dimensions: Vec<ReconciledDimension>,
    /// Rev A dimensions with no Rev B counterpart.
    pub removed: Vec<Dimension>,
    /// Rev B title-block dimensions, carried over without a change status.
    /// A Rev A title-block dimension at the same spot lends its id.
    pub excluded: Vec<Dimension>,
    pub summary: ChangeSummary,
    /// Rev A dimensions left out by the title-block cutoff.
    pub excluded_a: usize,
}

impl ReconcileReport {
    /// The new working set: compared dimensions, then the title block.
    pub fn into_dimensions(self) -> Vec<Dimension> {
        self.dimensions
            .into_iter()
            .map(|entry| entry.dimension)
            .chain(self.excluded)
            .collect()
    }
}

/// One-to-one assignment of Rev B indices to Rev A indices, nearest center
/// first. Ties go to the lower Rev B index, then the lower Rev A index.
fn match_by_position(
    rev_a: &[&Dimension],
    rev_b: &[&Dimension],
    tolerance: f64,
) -> Vec<Option<usize>> {
    let mut pairs = Vec::new();
    for (b_index, b) in rev_b.iter().enumerate() {
        for (a_index, a) in rev_a.iter().enumerate() {
            if b.bounding_box.centers_within(&a.bounding_box, tolerance) {
                let distance = b.bounding_box.center_distance(&a.bounding_box);
                pairs.push((distance, b_index, a_index));
            }
        }
    }
    pairs.sort_by(|left, right| {
        left.0
            .total_cmp(&right.0)
            .then(left.1.cmp(&right.1))
            .then(left.2.cmp(&right.2))
    });

    let mut assigned = vec![None; rev_b.len()];
    let mut taken = vec![false; rev_a.len()];
    for (_, b_index, a_index) in pairs {
        if assigned[b_index].is_none() && !taken[a_index] {
            assigned[b_index] = Some(a_index);
            taken[a_index] = true;
        }
    }
    assigned
}

fn same_value(a: &str, b: &str) -> bool {
    a.trim() == b.trim()
}

/// Title-block dimensions of Rev B keep the id of a Rev A title-block
/// dimension at the same position, or get a fresh one.
fn carry_excluded(
    excluded_a: &[&Dimension],
    excluded_b: &[&Dimension],
    tolerance: f64,
    ids: &mut IdSequence,
) -> Result<Vec<Dimension>, StoreError> {
    let assigned = match_by_position(excluded_a, excluded_b, tolerance);
    excluded_b
        .iter()
        .zip(assigned)
        .map(|(b, matched)| {
            let mut dimension = (*b).clone();
            dimension.id = match matched {
                Some(a_index) => excluded_a[a_index].id,
                None => ids.next_id()?,
            };
            Ok(dimension)
        })
        .collect()
}

fn removed_from(scoped_a: &[&Dimension], matched_a: &HashSet<usize>) -> Vec<Dimension> {
    scoped_a
        .iter()
        .enumerate()
        .filter(|(index, _)| !matched_a.contains(index))
        .map(|(_, a)| (*a).clone())
        .collect()
}

fn log_summary(report: &ReconcileReport) {
    let summary = report.summary;
    info!(
        "reconciled revisions: {} added, {} modified, {} removed, {} unchanged ({} title block)",
        summary.added,
        summary.modified,
        summary.removed,
        summary.unchanged,
        report.excluded.len() + report.excluded_a
    );
}

/// Reconciles a fresh Rev B detection against the Rev A working set.
pub fn reconcile(
    rev_a: &[Dimension],
    rev_b: &[Dimension],
    options: &ReconcileOptions,
) -> Result<ReconcileReport, StoreError> {
    let (scoped_a, excluded_a) = options.split(rev_a);
    let (scoped_b, excluded_b) = options.split(rev_b);
    let assigned = match_by_position(&scoped_a, &scoped_b, options.position_tolerance);

    let mut ids = IdSequence::after(rev_a.iter().map(|d| d.id));
    let mut summary = ChangeSummary::default();
    let mut dimensions = Vec::with_capacity(scoped_b.len());
    let mut matched_a = HashSet::new();

    for (b, matched) in scoped_b.iter().zip(&assigned) {
        let mut dimension = (*b).clone();
        let entry = match matched {
            Some(a_index) => {
                let a = scoped_a[*a_index];
                matched_a.insert(*a_index);
                dimension.id = a.id;
                if same_value(&a.value, &b.value) {
                    // Unchanged callouts keep the metadata edited on Rev A.
                    dimension.method = a.method.clone();
                    dimension.parsed = a.parsed.clone();
                    summary.unchanged += 1;
                    ReconciledDimension {
                        dimension,
                        status: ChangeStatus::Unchanged,
                        previous_value: None,
                    }
                } else {
                    summary.modified += 1;
                    ReconciledDimension {
                        dimension,
                        status: ChangeStatus::Modified,
                        previous_value: Some(a.value.clone()),
                    }
                }
            }
            None => {
                dimension.id = ids.next_id()?;
                summary.added += 1;
                ReconciledDimension {
                    dimension,
                    status: ChangeStatus::Added,
                    previous_value: None,
                }
            }
        };
        dimensions.push(entry);
    }

    let removed = removed_from(&scoped_a, &matched_a);
    summary.removed = removed.len();
    let excluded = carry_excluded(
        &excluded_a,
        &excluded_b,
        options.position_tolerance,
        &mut ids,
    )?;

    let report = ReconcileReport {
        dimensions,
        removed,
        excluded,
        summary,
        excluded_a: excluded_a.len(),
    };
    log_summary(&report);
    Ok(report)
}

/// Ports Rev A ids onto a revision compare response. The service's status is
/// kept; ids come from the local proximity matcher, and the summary is
/// recounted from the lists. Entries the service marks removed never reach
/// the working set.
pub fn reconcile_server_result(
    rev_a: &[Dimension],
    response: &CompareResponse,
    page: u32,
    layout: BalloonLayout,
    options: &ReconcileOptions,
) -> Result<ReconcileReport, StoreError> {
    let raw: Vec<RawDimension> = response
        .dimensions
        .iter()
        .map(|entry| entry.dimension.clone())
        .collect();
    let mut scratch = AnnotationStore::new(page).with_layout(layout);
    scratch.load(&raw)?;
    let initialized = scratch.take();

    let mut live = Vec::with_capacity(initialized.len());
    let mut title_block = Vec::new();
    for (entry, dimension) in response.dimensions.iter().zip(initialized) {
        if entry.status == ChangeStatus::Removed {
            debug!("compare entry {} marked removed; left out", entry.dimension.id);
        } else if options.in_scope(&dimension) {
            live.push((entry, dimension));
        } else {
            title_block.push(dimension);
        }
    }

    let (scoped_a, excluded_a) = options.split(rev_a);
    let candidates: Vec<&Dimension> = live.iter().map(|(_, dimension)| dimension).collect();
    let assigned = match_by_position(&scoped_a, &candidates, options.position_tolerance);

    let mut ids = IdSequence::after(rev_a.iter().map(|d| d.id));
    let mut summary = ChangeSummary::default();
    let mut dimensions = Vec::with_capacity(live.len());
    let mut matched_a = HashSet::new();

    for ((entry, mut dimension), matched) in live.into_iter().zip(assigned) {
        let ported = match (entry.status, matched) {
            (ChangeStatus::Added, _) => None,
            (_, Some(a_index)) => Some(a_index),
            (status, None) => {
                warn!(
                    "{} dimension {} has no Rev A counterpart; treating as added",
                    status.as_str(),
                    entry.dimension.id
                );
                None
            }
        };
        let reconciled = match ported {
            Some(a_index) => {
                let a = scoped_a[a_index];
                matched_a.insert(a_index);
                dimension.id = a.id;
                if entry.status == ChangeStatus::Unchanged {
                    dimension.method = a.method.clone();
                    dimension.parsed = a.parsed.clone();
                    summary.unchanged += 1;
                    ReconciledDimension {
                        dimension,
                        status: ChangeStatus::Unchanged,
                        previous_value: None,
                    }
                } else {
                    summary.modified += 1;
                    ReconciledDimension {
                        dimension,
                        status: ChangeStatus::Modified,
                        previous_value: entry.old_value.clone().or_else(|| Some(a.value.clone())),
                    }
                }
            }
            None => {
                dimension.id = ids.next_id()?;
                summary.added += 1;
                ReconciledDimension {
                    dimension,
                    status: ChangeStatus::Added,
                    previous_value: None,
                }
            }
        };
        dimensions.push(reconciled);
    }

    let removed = removed_from(&scoped_a, &matched_a);
    summary.removed = removed.len();
    if summary != response.summary {
        warn!(
            "revision compare summary {:?} disagrees with recounted {:?}",
            response.summary, summary
        );
    }
    let title_block: Vec<&Dimension> = title_block.iter().collect();
    let excluded = carry_excluded(
        &excluded_a,
        &title_block,
        options.position_tolerance,
        &mut ids,
    )?;

    let report = ReconcileReport {
        dimensions,
        removed,
        excluded,
        summary,
        excluded_a: excluded_a.len(),
    };
    log_summary(&report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::InspectionMethod;
    use crate::geometry::NormalizedBox;
    use crate::services::ComparedDimension;
    use proptest::prelude::*;

    fn dim(id: u32, value: &str, cx: f64, cy: f64) -> Dimension {
        let raw = RawDimension {
            id,
            value: value.to_string(),
            bounding_box: NormalizedBox::new(cx - 10.0, cy - 5.0, cx + 10.0, cy + 5.0),
            zone: None,
            confidence: None,
            method: None,
            parsed: None,
            page: None,
        };
        let mut store = AnnotationStore::new(1);
        store.load(&[raw]).unwrap();
        store.take().remove(0)
    }

    #[test]
    fn classifies_and_ports_ids() {
        let rev_a = vec![
            dim(1, "0.450", 100.0, 100.0),
            dim(2, "1.250", 400.0, 100.0),
            dim(7, "R.06", 700.0, 700.0),
        ];
        let rev_b = vec![
            dim(1, "1.255", 410.0, 95.0),
            dim(2, "0.450", 105.0, 102.0),
            dim(3, "Ø.125", 900.0, 200.0),
        ];
        let report = reconcile(&rev_a, &rev_b, &ReconcileOptions::default()).unwrap();

        let statuses: Vec<(u32, ChangeStatus)> = report
            .dimensions
            .iter()
            .map(|entry| (entry.dimension.id, entry.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                (2, ChangeStatus::Modified),
                (1, ChangeStatus::Unchanged),
                (8, ChangeStatus::Added),
            ]
        );
        assert_eq!(report.dimensions[0].previous_value.as_deref(), Some("1.250"));
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.removed[0].id, 7);
        assert_eq!(
            report.summary,
            ChangeSummary {
                added: 1,
                modified: 1,
                removed: 1,
                unchanged: 1
            }
        );
    }

    #[test]
    fn nearest_center_wins_ties() {
        let rev_a = vec![dim(1, "A", 100.0, 100.0), dim(2, "B", 120.0, 100.0)];
        // Both Rev A centers are within tolerance of this one; id 2 is nearer.
        let rev_b = vec![dim(1, "B", 118.0, 100.0)];
        let report = reconcile(&rev_a, &rev_b, &ReconcileOptions::default()).unwrap();
        assert_eq!(report.dimensions[0].dimension.id, 2);
        assert_eq!(report.dimensions[0].status, ChangeStatus::Unchanged);
        assert_eq!(report.removed[0].id, 1);
    }

    #[test]
    fn one_rev_a_dimension_ports_to_one_rev_b_dimension() {
        let rev_a = vec![dim(5, "0.450", 100.0, 100.0)];
        let rev_b = vec![dim(1, "0.450", 104.0, 100.0), dim(2, "0.450", 101.0, 100.0)];
        let report = reconcile(&rev_a, &rev_b, &ReconcileOptions::default()).unwrap();
        assert_eq!(report.dimensions[1].dimension.id, 5);
        assert_eq!(report.dimensions[0].dimension.id, 6);
        assert_eq!(report.dimensions[0].status, ChangeStatus::Added);
    }

    #[test]
    fn tolerance_applies_per_axis() {
        let rev_a = vec![dim(1, "0.450", 100.0, 100.0)];
        let rev_b = vec![dim(1, "0.450", 120.0, 126.0)];
        let report = reconcile(&rev_a, &rev_b, &ReconcileOptions::default()).unwrap();
        assert_eq!(report.summary.added, 1);
        assert_eq!(report.summary.removed, 1);
    }

    #[test]
    fn unchanged_keeps_rev_a_metadata() {
        let mut a = dim(4, "0.450 ±0.002", 100.0, 100.0);
        a.method = InspectionMethod::Cmm;
        a.parsed.lot_size = Some(25);
        let b = dim(1, "0.450 ±0.002", 102.0, 100.0);
        let report = reconcile(&[a], &[b], &ReconcileOptions::default()).unwrap();
        let ported = &report.dimensions[0].dimension;
        assert_eq!(ported.method, InspectionMethod::Cmm);
        assert_eq!(ported.parsed.lot_size, Some(25));
    }

    #[test]
    fn title_block_is_carried_over_unclassified() {
        let rev_a = vec![dim(1, "0.450", 100.0, 100.0), dim(2, "REV C", 900.0, 950.0)];
        let rev_b = vec![dim(1, "0.450", 100.0, 100.0), dim(2, "REV D", 900.0, 950.0)];
        let options = ReconcileOptions {
            title_block_cutoff: Some(0.85),
            ..ReconcileOptions::default()
        };
        let report = reconcile(&rev_a, &rev_b, &options).unwrap();
        assert_eq!(report.dimensions.len(), 1);
        assert_eq!(report.summary.modified, 0);
        assert_eq!(report.excluded_a, 1);
        assert_eq!(report.excluded.len(), 1);
        assert_eq!(report.excluded[0].id, 2);
        let working: Vec<String> = report
            .into_dimensions()
            .into_iter()
            .map(|dimension| dimension.value)
            .collect();
        assert_eq!(working, vec!["0.450".to_string(), "REV D".to_string()]);

        // Added ids still skip past every Rev A id.
        let rev_b = vec![dim(1, "NEW", 500.0, 500.0), dim(2, "DWG 7", 100.0, 990.0)];
        let report = reconcile(&rev_a, &rev_b, &options).unwrap();
        assert_eq!(report.dimensions[0].dimension.id, 3);
        assert_eq!(report.excluded[0].id, 4);
    }

    #[test]
    fn fresh_ids_survive_the_top_of_the_id_range() {
        let rev_a = vec![dim(u32::MAX, "0.450", 100.0, 100.0)];
        let rev_b = vec![dim(1, "0.450", 100.0, 100.0), dim(2, "R.06", 600.0, 600.0)];
        let report = reconcile(&rev_a, &rev_b, &ReconcileOptions::default()).unwrap();
        assert_eq!(report.dimensions[0].dimension.id, u32::MAX);
        assert_eq!(report.dimensions[1].dimension.id, 1);
    }

    #[test]
    fn server_result_keeps_status_and_ports_ids() {
        let rev_a = vec![dim(10, "0.450", 100.0, 100.0), dim(11, "R.06", 600.0, 600.0)];
        let compared = |id: u32, value: &str, cx: f64, status: ChangeStatus| ComparedDimension {
            dimension: RawDimension {
                id,
                value: value.to_string(),
                bounding_box: NormalizedBox::new(cx - 10.0, 95.0, cx + 10.0, 105.0),
                zone: None,
                confidence: None,
                method: None,
                parsed: None,
                page: None,
            },
            status,
            old_value: None,
        };
        let response = CompareResponse {
            dimensions: vec![
                compared(1, "0.455", 103.0, ChangeStatus::Modified),
                compared(2, "Ø.250", 300.0, ChangeStatus::Added),
            ],
            removed_dimensions: Vec::new(),
            summary: ChangeSummary {
                added: 1,
                modified: 1,
                removed: 1,
                unchanged: 0,
            },
        };
        let report = reconcile_server_result(
            &rev_a,
            &response,
            1,
            BalloonLayout::default(),
            &ReconcileOptions::default(),
        )
        .unwrap();
        assert_eq!(report.dimensions[0].dimension.id, 10);
        assert_eq!(report.dimensions[0].status, ChangeStatus::Modified);
        assert_eq!(report.dimensions[0].previous_value.as_deref(), Some("0.450"));
        assert_eq!(report.dimensions[1].dimension.id, 12);
        assert_eq!(report.removed[0].id, 11);
        assert_eq!(report.summary, response.summary);
    }

    fn compared(id: u32, value: &str, cx: f64, cy: f64, status: ChangeStatus) -> ComparedDimension {
        ComparedDimension {
            dimension: RawDimension {
                id,
                value: value.to_string(),
                bounding_box: NormalizedBox::new(cx - 10.0, cy - 5.0, cx + 10.0, cy + 5.0),
                zone: None,
                confidence: None,
                method: None,
                parsed: None,
                page: None,
            },
            status,
            old_value: None,
        }
    }

    #[test]
    fn server_removed_entries_stay_out_of_the_working_set() {
        let rev_a = vec![dim(1, "0.450", 100.0, 100.0), dim(2, "R.06", 600.0, 600.0)];
        let response = CompareResponse {
            dimensions: vec![
                compared(1, "0.450", 100.0, 100.0, ChangeStatus::Unchanged),
                compared(2, "R.06", 600.0, 600.0, ChangeStatus::Removed),
            ],
            removed_dimensions: Vec::new(),
            summary: ChangeSummary {
                removed: 1,
                unchanged: 1,
                ..ChangeSummary::default()
            },
        };
        let report = reconcile_server_result(
            &rev_a,
            &response,
            1,
            BalloonLayout::default(),
            &ReconcileOptions::default(),
        )
        .unwrap();
        assert_eq!(report.dimensions.len(), 1);
        assert_eq!(report.summary, response.summary);
        assert_eq!(report.removed.iter().map(|d| d.id).collect::<Vec<_>>(), vec![2]);
        let working: Vec<u32> = report.into_dimensions().iter().map(|d| d.id).collect();
        assert_eq!(working, vec![1]);
    }

    #[test]
    fn server_result_honors_title_block_cutoff() {
        let rev_a = vec![dim(1, "0.450", 100.0, 100.0), dim(2, "REV C", 900.0, 950.0)];
        let response = CompareResponse {
            dimensions: vec![
                compared(1, "0.450", 100.0, 100.0, ChangeStatus::Unchanged),
                compared(2, "REV D", 900.0, 950.0, ChangeStatus::Modified),
            ],
            removed_dimensions: Vec::new(),
            summary: ChangeSummary::default(),
        };
        let options = ReconcileOptions {
            title_block_cutoff: Some(0.85),
            ..ReconcileOptions::default()
        };
        let report =
            reconcile_server_result(&rev_a, &response, 1, BalloonLayout::default(), &options)
                .unwrap();
        assert_eq!(report.summary.unchanged, 1);
        assert_eq!(report.summary.modified, 0);
        assert!(report.removed.is_empty());
        assert_eq!(report.excluded_a, 1);
        assert_eq!(report.excluded.len(), 1);
        assert_eq!(report.excluded[0].id, 2);
        assert_eq!(report.excluded[0].value, "REV D");
    }

    fn revision() -> impl Strategy<Value = Vec<(String, f64, f64)>> {
        prop::collection::vec(
            (
                prop::sample::select(vec!["0.450", "1.250", "R.06"]).prop_map(str::to_string),
                0.0..1000.0f64,
                0.0..1000.0f64,
            ),
            0..12,
        )
    }

    proptest! {
        #[test]
        fn summary_accounts_for_every_dimension(
            a in revision(),
            b in revision(),
            cutoff in prop::option::of(0.1..0.95f64),
        ) {
            let rev_a: Vec<Dimension> = a
                .iter()
                .enumerate()
                .map(|(i, (v, x, y))| dim(i as u32 + 1, v, *x, *y))
                .collect();
            let rev_b: Vec<Dimension> = b
                .iter()
                .enumerate()
                .map(|(i, (v, x, y))| dim(i as u32 + 1, v, *x, *y))
                .collect();
            let options = ReconcileOptions {
                title_block_cutoff: cutoff,
                ..ReconcileOptions::default()
            };
            let report = reconcile(&rev_a, &rev_b, &options).unwrap();
            let s = report.summary;
            prop_assert_eq!(
                s.added + s.modified + s.unchanged + report.excluded.len(),
                rev_b.len()
            );
            prop_assert_eq!(
                s.removed + s.modified + s.unchanged + report.excluded_a,
                rev_a.len()
            );
            let working = report.into_dimensions();
            prop_assert_eq!(working.len(), rev_b.len());
            let mut ids = HashSet::new();
            for dimension in &working {
                prop_assert!(ids.insert(dimension.id));
            }
        }
    }
}
