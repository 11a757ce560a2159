//! Multi-page working state around the active page's [`AnnotationStore`].
//!
//! Only the active page lives in the store. Other pages are stashed as they
//! were left and restored on return; a page visited for the first time is
//! initialized from its raw detection.

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

use crate::dimension::{CmmResult, Dimension, RawDimension};
use crate::project::{FORMAT_VERSION, ProjectState};
use crate::services::ProcessingResult;
use crate::store::{AnnotationStore, BalloonLayout, MissingIdPolicy, StoreError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("page {page} is outside 1..={total}")]
    PageOutOfRange { page: u32, total: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Session {
    store: AnnotationStore,
    layout: BalloonLayout,
    policy: MissingIdPolicy,
    stashed: BTreeMap<u32, Vec<Dimension>>,
    detections: BTreeMap<u32, Vec<RawDimension>>,
    cmm_results: BTreeMap<u32, BTreeMap<u32, CmmResult>>,
    result: Option<ProcessingResult>,
    total_pages: u32,
    bom_items: Vec<Value>,
    spec_items: Vec<Value>,
}

impl Session {
    pub fn new(layout: BalloonLayout, policy: MissingIdPolicy) -> Self {
        Self {
            store: Self::make_store(1, layout, policy),
            layout,
            policy,
            stashed: BTreeMap::new(),
            detections: BTreeMap::new(),
            cmm_results: BTreeMap::new(),
            result: None,
            total_pages: 1,
            bom_items: Vec::new(),
            spec_items: Vec::new(),
        }
    }

    fn make_store(page: u32, layout: BalloonLayout, policy: MissingIdPolicy) -> AnnotationStore {
        AnnotationStore::new(page)
            .with_layout(layout)
            .with_policy(policy)
    }

    /// Starts a session on page 1 of a document processing result.
    pub fn from_processing(
        result: ProcessingResult,
        layout: BalloonLayout,
        policy: MissingIdPolicy,
    ) -> Result<Self, SessionError> {
        let mut session = Self::new(layout, policy);
        session.total_pages = result.page_count();
        for page in 1..=session.total_pages {
            session.detections.insert(page, result.page_dimensions(page));
        }
        session.result = Some(result);
        let first = session.detections.get(&1).cloned().unwrap_or_default();
        session.store.load(&first)?;
        Ok(session)
    }

    /// Restores a saved project. Every page is treated as visited, so the
    /// saved dimensions are authoritative even where a page was emptied.
    pub fn from_project(
        state: ProjectState,
        layout: BalloonLayout,
        policy: MissingIdPolicy,
    ) -> Self {
        let mut session = Self::new(layout, policy);
        session.total_pages = state
            .total_pages
            .max(state.dimensions.iter().map(|d| d.page).max().unwrap_or(1))
            .max(1);
        if let Some(result) = &state.result {
            for page in 1..=session.total_pages {
                session.detections.insert(page, result.page_dimensions(page));
            }
        }
        for page in 1..=session.total_pages {
            session.stashed.insert(page, Vec::new());
        }
        for dimension in state.dimensions {
            session
                .stashed
                .entry(dimension.page)
                .or_default()
                .push(dimension);
        }
        let first = session.stashed.remove(&1).unwrap_or_default();
        session.store.replace_all(1, first);
        session.result = state.result;
        session.bom_items = state.bom_items;
        session.spec_items = state.spec_items;
        session.cmm_results = state.cmm_results;
        session
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut AnnotationStore {
        &mut self.store
    }

    pub fn page(&self) -> u32 {
        self.store.page()
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn result(&self) -> Option<&ProcessingResult> {
        self.result.as_ref()
    }

    /// Switches the active page. Callers driving a placement engine must also
    /// tell it about the change so in-flight detections are dropped.
    pub fn goto_page(&mut self, page: u32) -> Result<(), SessionError> {
        if page == 0 || page > self.total_pages {
            return Err(SessionError::PageOutOfRange {
                page,
                total: self.total_pages,
            });
        }
        if page == self.page() {
            return Ok(());
        }
        let restored = self.stashed.remove(&page);
        let leaving = self.page();
        let left = self.store.take();
        self.stashed.insert(leaving, left);
        match restored {
            Some(dimensions) => self.store.replace_all(page, dimensions),
            None => {
                self.store.replace_all(page, Vec::new());
                let raw = self.detections.get(&page).cloned().unwrap_or_default();
                self.store.load(&raw)?;
            }
        }
        info!(
            "page {} active with {} dimensions",
            page,
            self.store.len()
        );
        Ok(())
    }

    /// Records a fresh detection for `page` and merges it into whatever that
    /// page already holds.
    pub fn apply_detection(
        &mut self,
        page: u32,
        incoming: Vec<RawDimension>,
    ) -> Result<(), SessionError> {
        if page == 0 {
            return Err(SessionError::PageOutOfRange {
                page,
                total: self.total_pages,
            });
        }
        self.total_pages = self.total_pages.max(page);
        if page == self.page() {
            self.store.resync(&incoming)?;
        } else if let Some(stash) = self.stashed.remove(&page) {
            let mut scratch = Self::make_store(page, self.layout, self.policy);
            scratch.replace_all(page, stash);
            let merged = scratch.resync(&incoming).map(|_| scratch.take());
            match merged {
                Ok(merged) => {
                    self.stashed.insert(page, merged);
                }
                Err(err) => {
                    self.stashed.insert(page, scratch.take());
                    return Err(err.into());
                }
            }
        }
        self.detections.insert(page, incoming);
        Ok(())
    }

    /// Replaces the active page's dimensions, e.g. with a reconciled revision.
    pub fn replace_working_set(&mut self, dimensions: Vec<Dimension>) {
        let page = self.page();
        self.store.replace_all(page, dimensions);
    }

    /// Attaches CMM results to the active page. Existing results for the same
    /// ids are overwritten; dimensions are not touched.
    pub fn merge_cmm_results(&mut self, results: BTreeMap<u32, CmmResult>) {
        let page = self.page();
        self.cmm_results.entry(page).or_default().extend(results);
    }

    /// Every stored CMM result by page, then dimension id.
    pub fn cmm_results(&self) -> &BTreeMap<u32, BTreeMap<u32, CmmResult>> {
        &self.cmm_results
    }

    /// CMM results stored for `page`, orphans included.
    pub fn stored_cmm_results(&self, page: u32) -> Option<&BTreeMap<u32, CmmResult>> {
        self.cmm_results.get(&page)
    }

    /// Results of the active page whose dimension still exists.
    pub fn attached_results(&self) -> BTreeMap<u32, CmmResult> {
        self.cmm_results
            .get(&self.page())
            .map(|results| {
                results
                    .iter()
                    .filter(|(id, _)| self.store.contains(**id))
                    .map(|(id, result)| (*id, result.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every page's dimensions, ordered by page.
    pub fn all_dimensions(&self) -> Vec<Dimension> {
        let mut pages: BTreeMap<u32, &[Dimension]> = self
            .stashed
            .iter()
            .map(|(page, dimensions)| (*page, dimensions.as_slice()))
            .collect();
        pages.insert(self.page(), self.store.dimensions());
        pages
            .into_values()
            .flat_map(|dimensions| dimensions.iter().cloned())
            .collect()
    }

    pub fn to_project(&self, timestamp: String) -> ProjectState {
        ProjectState {
            version: FORMAT_VERSION.to_string(),
            timestamp,
            result: self.result.clone(),
            dimensions: self.all_dimensions(),
            bom_items: self.bom_items.clone(),
            spec_items: self.spec_items.clone(),
            total_pages: self.total_pages,
            cmm_results: self.cmm_results.clone(),
        }
    }
}
