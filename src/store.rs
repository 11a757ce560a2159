//! Authoritative working set of dimensions for the active page.
//!
//! Every mutation of a [`Dimension`] goes through [`AnnotationStore`]: the
//! placement engine, revision porting and bulk loads all call into the command
//! methods here, which is where id uniqueness and coordinate finiteness are
//! enforced.

use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

use crate::dimension::{
    DETECTED_CONFIDENCE, Dimension, DimensionPatch, InspectionMethod, MANUAL_CONFIDENCE, Parsed,
    RawDimension,
};
use crate::geometry::{NormalizedBox, PercentRect};
use crate::inference::MethodInference;
use crate::tolerance;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("no dimension with id {0}")]
    UnknownId(u32),
    #[error("non-finite coordinate for dimension {0}")]
    NonFinite(u32),
    #[error("no free dimension id left")]
    IdsExhausted,
}

/// Hands out dimension ids above every id already in use. Past `u32::MAX`
/// it falls back to the lowest unused id.
#[derive(Debug, Clone)]
pub(crate) struct IdSequence {
    used: HashSet<u32>,
    next: Option<u32>,
    gap: u32,
}

impl IdSequence {
    pub(crate) fn after(ids: impl IntoIterator<Item = u32>) -> Self {
        let used: HashSet<u32> = ids.into_iter().collect();
        let next = match used.iter().max() {
            Some(max) => max.checked_add(1),
            None => Some(1),
        };
        Self { used, next, gap: 1 }
    }

    pub(crate) fn next_id(&mut self) -> Result<u32, StoreError> {
        let id = match self.next {
            Some(id) => {
                self.next = id.checked_add(1);
                id
            }
            None => {
                let id = (self.gap..=u32::MAX)
                    .find(|id| !self.used.contains(id))
                    .ok_or(StoreError::IdsExhausted)?;
                self.gap = id.saturating_add(1);
                id
            }
        };
        self.used.insert(id);
        Ok(id)
    }
}

/// What to do when a command names an id that is not in the working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingIdPolicy {
    /// Log and carry on.
    #[default]
    Ignore,
    /// Return [`StoreError::UnknownId`].
    Report,
}

/// Offset from anchor to balloon for freshly initialized dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalloonLayout {
    pub offset_x: f64,
    pub offset_y: f64,
}

impl Default for BalloonLayout {
    fn default() -> Self {
        Self {
            offset_x: 4.0,
            offset_y: -4.0,
        }
    }
}

/// Input for [`AnnotationStore::create`]. Unset fields get defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewDimension {
    pub value: String,
    pub bounding_box: NormalizedBox,
    pub zone: Option<String>,
    pub method: Option<InspectionMethod>,
    pub confidence: Option<f64>,
    pub parsed: Option<Parsed>,
}

pub struct AnnotationStore {
    page: u32,
    dimensions: Vec<Dimension>,
    selected: Option<u32>,
    layout: BalloonLayout,
    inference: MethodInference,
    policy: MissingIdPolicy,
}

impl Default for AnnotationStore {
    fn default() -> Self {
        Self::new(1)
    }
}

impl AnnotationStore {
    pub fn new(page: u32) -> Self {
        Self {
            page,
            dimensions: Vec::new(),
            selected: None,
            layout: BalloonLayout::default(),
            inference: MethodInference::default(),
            policy: MissingIdPolicy::default(),
        }
    }

    pub fn with_layout(mut self, layout: BalloonLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_policy(mut self, policy: MissingIdPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&Dimension> {
        self.dimensions.iter().find(|dimension| dimension.id == id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    pub fn selected(&self) -> Option<u32> {
        self.selected
    }

    pub fn select(&mut self, id: Option<u32>) -> Result<(), StoreError> {
        match id {
            Some(id) if !self.contains(id) => self.missing(id, "select"),
            _ => {
                self.selected = id;
                Ok(())
            }
        }
    }

    pub fn next_id(&self) -> Result<u32, StoreError> {
        IdSequence::after(self.dimensions.iter().map(|dimension| dimension.id)).next_id()
    }

    /// Adds a manually placed dimension under the next free id.
    pub fn create(&mut self, new: NewDimension) -> Result<Dimension, StoreError> {
        let id = self.next_id()?;
        let dimension = self.initialize(
            id,
            new.value,
            new.bounding_box,
            new.zone,
            new.method,
            new.confidence.unwrap_or(MANUAL_CONFIDENCE),
            new.parsed,
        )?;
        debug!("created dimension {} on page {}", id, self.page);
        self.dimensions.push(dimension.clone());
        Ok(dimension)
    }

    pub fn update(&mut self, id: u32, patch: DimensionPatch) -> Result<(), StoreError> {
        let finite = patch.balloon.is_none_or(|balloon| balloon.is_finite())
            && patch.bounding_box.is_none_or(|bbox| bbox.is_finite())
            && patch.confidence.is_none_or(f64::is_finite);
        if !finite {
            return Err(StoreError::NonFinite(id));
        }
        let Some(dimension) = self.dimensions.iter_mut().find(|d| d.id == id) else {
            return self.missing(id, "update");
        };
        if let Some(value) = patch.value {
            dimension.value = value;
        }
        if let Some(zone) = patch.zone {
            dimension.zone = Some(zone);
        }
        if let Some(bounding_box) = patch.bounding_box {
            dimension.bounding_box = bounding_box;
        }
        if let Some(balloon) = patch.balloon {
            dimension.balloon_x = balloon.x;
            dimension.balloon_y = balloon.y;
        }
        if let Some(method) = patch.method {
            dimension.method = method;
        }
        if let Some(confidence) = patch.confidence {
            dimension.confidence = confidence.clamp(0.0, 1.0);
        }
        if let Some(page) = patch.page {
            dimension.page = page;
        }
        if let Some(parsed) = patch.parsed {
            dimension.parsed.merge(parsed);
        }
        Ok(())
    }

    /// Removes a dimension. CMM results keyed by this id are left alone.
    pub fn delete(&mut self, id: u32) -> Result<(), StoreError> {
        let before = self.dimensions.len();
        self.dimensions.retain(|dimension| dimension.id != id);
        if self.dimensions.len() == before {
            return self.missing(id, "delete");
        }
        if self.selected == Some(id) {
            self.selected = None;
        }
        Ok(())
    }

    /// Moves anchor and balloon together by a percentage delta.
    pub fn translate(&mut self, id: u32, dx: f64, dy: f64) -> Result<(), StoreError> {
        if !dx.is_finite() || !dy.is_finite() {
            warn!("ignoring non-finite drag delta for dimension {}", id);
            return Err(StoreError::NonFinite(id));
        }
        let Some(dimension) = self.dimensions.iter_mut().find(|d| d.id == id) else {
            return self.missing(id, "translate");
        };
        dimension.anchor_x += dx;
        dimension.anchor_y += dy;
        dimension.balloon_x += dx;
        dimension.balloon_y += dy;
        Ok(())
    }

    /// Deletes every dimension whose balloon lies inside `rect` (inclusive).
    /// Returns the removed ids.
    pub fn clear_in_region(&mut self, rect: PercentRect) -> Vec<u32> {
        let removed = self
            .dimensions
            .iter()
            .filter(|dimension| rect.contains(dimension.balloon()))
            .map(|dimension| dimension.id)
            .collect::<Vec<_>>();
        if removed.is_empty() {
            return removed;
        }
        self.dimensions
            .retain(|dimension| !rect.contains(dimension.balloon()));
        if let Some(selected) = self.selected {
            if removed.contains(&selected) {
                self.selected = None;
            }
        }
        debug!("cleared {} dimensions in region", removed.len());
        removed
    }

    /// Merges a fresh detection of this page into the working set. Entities
    /// whose id is already present keep their edited state; new ids are
    /// initialized, and entities the incoming list no longer mentions stay.
    pub fn resync(&mut self, incoming: &[RawDimension]) -> Result<(), StoreError> {
        let mut merged = Vec::with_capacity(incoming.len().max(self.dimensions.len()));
        let mut seen = HashSet::new();
        for raw in incoming {
            if !seen.insert(raw.id) {
                warn!("duplicate incoming dimension id {} dropped", raw.id);
                continue;
            }
            match self.get(raw.id) {
                Some(existing) => merged.push(existing.clone()),
                None => merged.push(self.initialize_raw(raw)?),
            }
        }
        for existing in &self.dimensions {
            if !seen.contains(&existing.id) {
                merged.push(existing.clone());
            }
        }
        self.dimensions = merged;
        Ok(())
    }

    /// Initializes a bulk detection result. Ids repeated in the input are
    /// renumbered past the current maximum so the set stays unique.
    pub fn load(&mut self, incoming: &[RawDimension]) -> Result<(), StoreError> {
        let mut dimensions: Vec<Dimension> = Vec::with_capacity(incoming.len());
        let mut seen = HashSet::new();
        let mut ids = IdSequence::after(incoming.iter().map(|raw| raw.id));
        for raw in incoming {
            let mut dimension = self.initialize_raw(raw)?;
            if !seen.insert(dimension.id) {
                let next = ids.next_id()?;
                warn!(
                    "duplicate dimension id {} renumbered to {}",
                    dimension.id, next
                );
                dimension.id = next;
                seen.insert(next);
            }
            dimensions.push(dimension);
        }
        self.dimensions = dimensions;
        self.selected = None;
        Ok(())
    }

    /// Replaces the working set with already-initialized dimensions (a ported
    /// revision or a restored page). Duplicates are renumbered the same way as
    /// [`Self::load`].
    pub fn replace_all(&mut self, page: u32, dimensions: Vec<Dimension>) {
        let mut seen = HashSet::new();
        let mut ids = IdSequence::after(dimensions.iter().map(|d| d.id));
        let mut unique = Vec::with_capacity(dimensions.len());
        for mut dimension in dimensions {
            if !seen.insert(dimension.id) {
                let Ok(next) = ids.next_id() else {
                    warn!("no free id for duplicate dimension {}; dropped", dimension.id);
                    continue;
                };
                warn!(
                    "duplicate dimension id {} renumbered to {}",
                    dimension.id, next
                );
                dimension.id = next;
                seen.insert(next);
            }
            dimension.page = page;
            unique.push(dimension);
        }
        self.page = page;
        self.dimensions = unique;
        self.selected = None;
    }

    /// Empties the store and returns its contents.
    pub fn take(&mut self) -> Vec<Dimension> {
        self.selected = None;
        std::mem::take(&mut self.dimensions)
    }

    fn initialize_raw(&self, raw: &RawDimension) -> Result<Dimension, StoreError> {
        self.initialize(
            raw.id,
            raw.value.clone(),
            raw.bounding_box,
            raw.zone.clone(),
            raw.method.clone(),
            raw.confidence.unwrap_or(DETECTED_CONFIDENCE),
            raw.parsed.clone(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn initialize(
        &self,
        id: u32,
        value: String,
        bounding_box: NormalizedBox,
        zone: Option<String>,
        method: Option<InspectionMethod>,
        confidence: f64,
        parsed: Option<Parsed>,
    ) -> Result<Dimension, StoreError> {
        if !bounding_box.is_finite() || !confidence.is_finite() {
            return Err(StoreError::NonFinite(id));
        }
        let anchor = bounding_box.center().to_percent();
        let balloon = anchor.offset(self.layout.offset_x, self.layout.offset_y);
        let parsed = parsed.unwrap_or_else(|| tolerance::parse_callout(&value));
        let method = method
            .or_else(|| parsed.inspection_method.clone())
            .unwrap_or_else(|| self.inference.infer(&value, &parsed));
        Ok(Dimension {
            id,
            value,
            zone,
            bounding_box,
            anchor_x: anchor.x,
            anchor_y: anchor.y,
            balloon_x: balloon.x,
            balloon_y: balloon.y,
            method,
            confidence: confidence.clamp(0.0, 1.0),
            parsed,
            page: self.page,
        })
    }

    fn missing(&self, id: u32, op: &str) -> Result<(), StoreError> {
        match self.policy {
            MissingIdPolicy::Ignore => {
                debug!("{} ignored: no dimension with id {}", op, id);
                Ok(())
            }
            MissingIdPolicy::Report => Err(StoreError::UnknownId(id)),
        }
    }
}
