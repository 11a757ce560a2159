//! Pointer-driven placement: drawing new regions, clearing areas, and
//! dragging existing balloons.

use thiserror::Error;
use tracing::debug;

use crate::detection::DetectionFailure;
use crate::dimension::{Dimension, MANUAL_CONFIDENCE};
use crate::geometry::{PercentPoint, PercentRect, ZoneGrid, PERCENT_EXTENT};
use crate::store::{AnnotationStore, NewDimension, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawMode {
    AddBalloon,
    ClearArea,
}

/// What the pointer went down on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerTarget {
    Canvas,
    Balloon(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacementConfig {
    /// Pointer travel (percent) below which a gesture counts as a click.
    pub click_threshold: f64,
    /// Smallest accepted rectangle side (percent).
    pub min_size: f64,
    /// Size of the rectangle synthesized for click-to-add.
    pub click_width: f64,
    pub click_height: f64,
    pub zone_grid: ZoneGrid,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            click_threshold: 1.0,
            min_size: 0.5,
            click_width: 8.0,
            click_height: 4.0,
            zone_grid: ZoneGrid::default(),
        }
    }
}

/// Identifies the page and navigation generation a detection request was
/// issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionTicket {
    pub page: u32,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectionStatus {
    Pending,
    Detected(String),
    Failed(DetectionFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingRegion {
    pub rect: PercentRect,
    pub ticket: DetectionTicket,
    pub status: DetectionStatus,
    /// Editable value shown to the user; pre-filled on detection success.
    pub draft: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlacementState {
    Idle,
    Drawing {
        mode: DrawMode,
        start: PercentPoint,
        current: PercentPoint,
    },
    AwaitingValue(PendingRegion),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlacementOutcome {
    Ignored,
    DrawStarted,
    DrawUpdated(PercentRect),
    /// Run the detection bridge for `rect` and report back with `ticket`.
    DetectionRequested {
        rect: PercentRect,
        ticket: DetectionTicket,
    },
    Cleared(Vec<u32>),
    Discarded,
    DragStarted(u32),
    Dragged(u32),
    DragEnded(u32),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlacementError {
    #[error("value is empty")]
    EmptyValue,
    #[error("no region is waiting for a value")]
    NotAwaitingValue,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy)]
struct DragTracker {
    id: u32,
    last: PercentPoint,
}

pub struct PlacementEngine {
    config: PlacementConfig,
    mode: Option<DrawMode>,
    state: PlacementState,
    drag: Option<DragTracker>,
    page: u32,
    generation: u64,
}

impl PlacementEngine {
    pub fn new(config: PlacementConfig, page: u32) -> Self {
        Self {
            config,
            mode: None,
            state: PlacementState::Idle,
            drag: None,
            page,
            generation: 0,
        }
    }

    pub fn state(&self) -> &PlacementState {
        &self.state
    }

    pub fn mode(&self) -> Option<DrawMode> {
        self.mode
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Switching modes abandons an in-progress drag or rectangle. A region
    /// already waiting for a value is kept.
    pub fn set_mode(&mut self, mode: Option<DrawMode>) {
        self.mode = mode;
        self.drag = None;
        if matches!(self.state, PlacementState::Drawing { .. }) {
            self.state = PlacementState::Idle;
        }
    }

    /// Page navigation invalidates every outstanding detection request.
    pub fn on_page_change(&mut self, page: u32) {
        self.page = page;
        self.generation += 1;
        self.drag = None;
        if !matches!(self.state, PlacementState::Idle) {
            debug!("page changed to {}: pending placement discarded", page);
        }
        self.state = PlacementState::Idle;
    }

    pub fn pointer_down(
        &mut self,
        store: &AnnotationStore,
        point: PercentPoint,
        target: PointerTarget,
    ) -> PlacementOutcome {
        if !point.is_finite() {
            return PlacementOutcome::Ignored;
        }
        if let Some(mode) = self.mode {
            if !matches!(self.state, PlacementState::Idle) || !inside_canvas(point) {
                return PlacementOutcome::Ignored;
            }
            self.state = PlacementState::Drawing {
                mode,
                start: point,
                current: point,
            };
            return PlacementOutcome::DrawStarted;
        }
        match target {
            PointerTarget::Balloon(id) if store.contains(id) => {
                self.drag = Some(DragTracker { id, last: point });
                PlacementOutcome::DragStarted(id)
            }
            _ => PlacementOutcome::Ignored,
        }
    }

    pub fn pointer_move(
        &mut self,
        store: &mut AnnotationStore,
        point: PercentPoint,
    ) -> Result<PlacementOutcome, PlacementError> {
        if !point.is_finite() {
            return Ok(PlacementOutcome::Ignored);
        }
        if let PlacementState::Drawing { start, current, .. } = &mut self.state {
            *current = point.clamped();
            return Ok(PlacementOutcome::DrawUpdated(PercentRect::from_corners(
                *start, *current,
            )));
        }
        let Some(drag) = self.drag.as_mut() else {
            return Ok(PlacementOutcome::Ignored);
        };
        let dx = point.x - drag.last.x;
        let dy = point.y - drag.last.y;
        drag.last = point;
        let id = drag.id;
        store.translate(id, dx, dy)?;
        Ok(PlacementOutcome::Dragged(id))
    }

    pub fn pointer_up(
        &mut self,
        store: &mut AnnotationStore,
        point: PercentPoint,
    ) -> Result<PlacementOutcome, PlacementError> {
        if let Some(drag) = self.drag.take() {
            if point.is_finite() {
                store.translate(drag.id, point.x - drag.last.x, point.y - drag.last.y)?;
            }
            return Ok(PlacementOutcome::DragEnded(drag.id));
        }
        let PlacementState::Drawing {
            mode,
            start,
            current,
        } = self.state
        else {
            return Ok(PlacementOutcome::Ignored);
        };
        let end = if point.is_finite() {
            point.clamped()
        } else {
            current
        };
        self.state = PlacementState::Idle;

        let is_click = start.distance_to(&end) < self.config.click_threshold;
        let rect = if is_click {
            match mode {
                DrawMode::AddBalloon => self.click_rect(start),
                DrawMode::ClearArea => {
                    debug!("clear-area click discarded");
                    return Ok(PlacementOutcome::Discarded);
                }
            }
        } else {
            let rect = PercentRect::from_corners(start, end);
            if rect.width < self.config.min_size || rect.height < self.config.min_size {
                debug!(
                    "rectangle {:.2}x{:.2} below minimum size, discarded",
                    rect.width, rect.height
                );
                return Ok(PlacementOutcome::Discarded);
            }
            rect
        };

        match mode {
            DrawMode::ClearArea => Ok(PlacementOutcome::Cleared(store.clear_in_region(rect))),
            DrawMode::AddBalloon => {
                let ticket = self.ticket();
                self.state = PlacementState::AwaitingValue(PendingRegion {
                    rect,
                    ticket,
                    status: DetectionStatus::Pending,
                    draft: String::new(),
                });
                Ok(PlacementOutcome::DetectionRequested { rect, ticket })
            }
        }
    }

    /// Feeds a finished detection back in. Returns false when the response
    /// belongs to a request that is no longer pending.
    pub fn apply_detection(
        &mut self,
        ticket: DetectionTicket,
        result: Result<String, DetectionFailure>,
    ) -> bool {
        let PlacementState::AwaitingValue(pending) = &mut self.state else {
            debug!("detection response with no pending region dropped");
            return false;
        };
        if pending.ticket != ticket {
            debug!(
                "stale detection response for page {} generation {} dropped",
                ticket.page, ticket.generation
            );
            return false;
        }
        match result {
            Ok(value) => {
                if pending.draft.trim().is_empty() {
                    pending.draft = value.clone();
                }
                pending.status = DetectionStatus::Detected(value);
            }
            Err(failure) => pending.status = DetectionStatus::Failed(failure),
        }
        true
    }

    pub fn set_draft(&mut self, value: impl Into<String>) -> Result<(), PlacementError> {
        let PlacementState::AwaitingValue(pending) = &mut self.state else {
            return Err(PlacementError::NotAwaitingValue);
        };
        pending.draft = value.into();
        Ok(())
    }

    /// Creates the dimension for the pending region using the current draft.
    /// An empty draft leaves the engine waiting.
    pub fn confirm(&mut self, store: &mut AnnotationStore) -> Result<Dimension, PlacementError> {
        let PlacementState::AwaitingValue(pending) = &self.state else {
            return Err(PlacementError::NotAwaitingValue);
        };
        let value = pending.draft.trim().to_string();
        if value.is_empty() {
            return Err(PlacementError::EmptyValue);
        }
        let center = pending.rect.center();
        let new = NewDimension {
            value,
            bounding_box: pending.rect.to_normalized(),
            zone: Some(self.config.zone_grid.zone_at(center)),
            confidence: Some(MANUAL_CONFIDENCE),
            ..NewDimension::default()
        };
        let dimension = store.create(new)?;
        self.state = PlacementState::Idle;
        Ok(dimension)
    }

    pub fn cancel(&mut self) {
        if matches!(self.state, PlacementState::AwaitingValue(_)) {
            debug!("pending region cancelled");
        }
        self.state = PlacementState::Idle;
    }

    fn ticket(&self) -> DetectionTicket {
        DetectionTicket {
            page: self.page,
            generation: self.generation,
        }
    }

    fn click_rect(&self, center: PercentPoint) -> PercentRect {
        let mut rect =
            PercentRect::centered_on(center, self.config.click_width, self.config.click_height);
        rect.x = rect.x.clamp(0.0, (PERCENT_EXTENT - rect.width).max(0.0));
        rect.y = rect.y.clamp(0.0, (PERCENT_EXTENT - rect.height).max(0.0));
        rect
    }
}

fn inside_canvas(point: PercentPoint) -> bool {
    (0.0..=PERCENT_EXTENT).contains(&point.x) && (0.0..=PERCENT_EXTENT).contains(&point.y)
}
