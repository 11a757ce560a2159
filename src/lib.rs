use anyhow::{Context, Result, anyhow};
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};

pub mod cmm;
pub mod detection;
pub mod dimension;
pub mod export;
pub mod geometry;
pub mod inference;
pub mod logging;
pub mod placement;
pub mod project;
pub mod revision;
pub mod services;
pub mod session;
pub mod settings;
pub mod store;
mod test_util;
pub mod tolerance;

pub use dimension::{CmmResult, CmmStatus, Dimension, InspectionMethod, Parsed, RawDimension};
pub use geometry::{NormalizedBox, PercentPoint, PercentRect};
pub use session::Session;
pub use store::AnnotationStore;

use detection::AutoDetectionBridge;
use placement::{DetectionStatus, DrawMode, PlacementEngine, PlacementOutcome, PlacementState, PointerTarget};
use revision::ReconcileReport;
use services::{DocumentProcessor, ExportFormat, HttpRegionDetector, ReportExporter, RevisionComparer};
use settings::Settings;

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// `.ab` project to open.
    pub project: Option<PathBuf>,
    /// Drawing page raster to run document processing on.
    pub process: Option<PathBuf>,
    /// Page raster for region detection and as Rev A for server compare.
    pub image: Option<PathBuf>,
    /// `x,y,width,height` in percent of the page.
    pub detect_region: Option<String>,
    /// Value to confirm when detection finds nothing.
    pub value: Option<String>,
    pub import_cmm: Option<PathBuf>,
    pub commit: bool,
    /// Rev B raster, reconciled locally against the active page.
    pub compare: Option<PathBuf>,
    /// Rev B raster, sent with `image` to the revision compare service.
    pub compare_server: Option<PathBuf>,
    pub export_csv: Option<PathBuf>,
    /// Report path; the format follows the extension.
    pub export: Option<PathBuf>,
    /// Where to save the project; defaults to `project`.
    pub output: Option<PathBuf>,
    pub page: Option<u32>,
    pub settings_path: Option<String>,
}

pub async fn run(config: Config) -> Result<String> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let settings = settings::load_settings(settings_path)?;
    let mut report = Vec::new();
    let mut changed = false;

    let mut session = match &config.project {
        Some(path) => Session::from_project(
            project::load(path)?,
            settings.layout,
            settings.missing_id_policy(),
        ),
        None => Session::new(settings.layout, settings.missing_id_policy()),
    };

    if let Some(path) = &config.process {
        let page = open_image(path)?;
        let result = DocumentProcessor::new(&settings.services)?.process(&page).await?;
        if config.project.is_some() {
            for number in 1..=result.page_count() {
                session.apply_detection(number, result.page_dimensions(number))?;
            }
        } else {
            session =
                Session::from_processing(result, settings.layout, settings.missing_id_policy())?;
        }
        changed = true;
    }

    if let Some(page) = config.page {
        session.goto_page(page)?;
    }
    report.push(format!(
        "page {}/{}: {} dimensions",
        session.page(),
        session.total_pages(),
        session.store().len()
    ));

    if let Some(region) = &config.detect_region {
        let path = config
            .image
            .as_ref()
            .or(config.process.as_ref())
            .ok_or_else(|| anyhow!("--detect-region needs --image or --process"))?;
        let page = open_image(path)?;
        let line = place_detected(&settings, &mut session, &page, region, config.value.as_deref())
            .await?;
        changed |= line.starts_with("added");
        report.push(line);
    }

    if let Some(path) = &config.compare {
        let rev_b = open_image(path)?;
        let result = DocumentProcessor::new(&settings.services)?.process(&rev_b).await?;
        let mut scratch = AnnotationStore::new(session.page()).with_layout(settings.layout);
        scratch.load(&result.page_dimensions(1))?;
        let reconciled = revision::reconcile(
            session.store().dimensions(),
            scratch.dimensions(),
            &settings.revision,
        )?;
        report.push(summary_line(&reconciled));
        session.replace_working_set(reconciled.into_dimensions());
        changed = true;
    }

    if let Some(path) = &config.compare_server {
        let rev_a_path = config
            .image
            .as_ref()
            .ok_or_else(|| anyhow!("--compare-server needs --image for revision A"))?;
        let rev_a = open_image(rev_a_path)?;
        let rev_b = open_image(path)?;
        let response = RevisionComparer::new(&settings.services)?
            .compare(&rev_a, &rev_b)
            .await?;
        let reconciled = revision::reconcile_server_result(
            session.store().dimensions(),
            &response,
            session.page(),
            settings.layout,
            &settings.revision,
        )?;
        report.push(summary_line(&reconciled));
        session.replace_working_set(reconciled.into_dimensions());
        changed = true;
    }

    if let Some(path) = &config.import_cmm {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read CMM report: {}", path.display()))?;
        let plan = cmm::plan_import(&text, session.store().dimensions(), &settings.cmm);
        report.push(format!(
            "cmm: {} of {} rows matched (threshold {})",
            plan.matched_count(),
            plan.rows().len(),
            plan.threshold()
        ));
        for entry in plan.unmatched() {
            report.push(format!(
                "  needs review: line {} {} (best score {})",
                entry.row.line,
                entry.row.feature,
                entry.best().map(|candidate| candidate.score).unwrap_or(0)
            ));
        }
        for entry in plan.needs_verdict(session.store().dimensions()) {
            report.push(format!(
                "  needs review: line {} {} (no status and no tolerance on balloon {})",
                entry.row.line,
                entry.row.feature,
                entry.assigned.unwrap_or_default()
            ));
        }
        if config.commit {
            let results = plan.commit(session.store().dimensions());
            report.push(format!("cmm: committed {} results", results.len()));
            session.merge_cmm_results(results);
            changed = true;
        }
    }

    if let Some(path) = &config.export_csv {
        let file = fs::File::create(path)
            .with_context(|| format!("failed to create CSV: {}", path.display()))?;
        export::write_inspection_csv(
            file,
            &session.all_dimensions(),
            session.cmm_results(),
            &export::InspectionTableConfig::default(),
        )
        .with_context(|| format!("failed to write CSV: {}", path.display()))?;
        report.push(format!("wrote {}", path.display()));
    }

    if let Some(path) = &config.export {
        let format: ExportFormat = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| anyhow!("report path needs an extension: {}", path.display()))?
            .parse()?;
        let artifact = ReportExporter::new(&settings.services)?
            .export(format, session.store().dimensions(), &session.attached_results())
            .await?;
        artifact.write_to(path)?;
        report.push(format!(
            "wrote {} ({}, {} bytes)",
            path.display(),
            artifact.content_type,
            artifact.bytes.len()
        ));
    }

    let save_to = config.output.as_ref().or(config.project.as_ref());
    if let Some(path) = save_to
        && (changed || config.output.is_some())
    {
        project::save(path, &session.to_project(project::now_timestamp()?))?;
        report.push(format!("saved {}", path.display()));
    }

    Ok(report.join("\n"))
}

fn open_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).with_context(|| format!("failed to open image: {}", path.display()))
}

fn summary_line(report: &ReconcileReport) -> String {
    let summary = report.summary;
    format!(
        "revision: {} added, {} modified, {} removed, {} unchanged, {} title block kept",
        summary.added,
        summary.modified,
        summary.removed,
        summary.unchanged,
        report.excluded.len()
    )
}

pub fn parse_rect(region: &str) -> Result<PercentRect> {
    let values = region
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("invalid region: {}", region))?;
    match values.as_slice() {
        [x, y, width, height] if values.iter().all(|v| v.is_finite()) => {
            Ok(PercentRect::new(*x, *y, *width, *height))
        }
        _ => Err(anyhow!("region must be x,y,width,height: {}", region)),
    }
}

/// Draws `region` through the placement engine, runs region detection and
/// confirms the detected value (or `fallback`).
async fn place_detected(
    settings: &Settings,
    session: &mut Session,
    page: &DynamicImage,
    region: &str,
    fallback: Option<&str>,
) -> Result<String> {
    let rect = parse_rect(region)?;
    let mut engine = PlacementEngine::new(settings.placement.clone(), session.page());
    engine.set_mode(Some(DrawMode::AddBalloon));
    let store = session.store_mut();
    engine.pointer_down(store, PercentPoint::new(rect.x, rect.y), PointerTarget::Canvas);
    let corner = PercentPoint::new(rect.x + rect.width, rect.y + rect.height);
    engine.pointer_move(store, corner)?;
    let PlacementOutcome::DetectionRequested { rect, ticket } = engine.pointer_up(store, corner)?
    else {
        return Ok(format!("region {} discarded", region));
    };

    let bridge = AutoDetectionBridge::new(HttpRegionDetector::new(&settings.services)?)
        .with_padding(settings.padding)
        .with_timeout(settings.services.detection_timeout);
    let detected = bridge.detect(page, rect).await;
    engine.apply_detection(ticket, detected);

    let failure = match engine.state() {
        PlacementState::AwaitingValue(pending) => match &pending.status {
            DetectionStatus::Failed(failure) => Some(failure.reason()),
            _ => None,
        },
        _ => None,
    };
    if let Some(value) = fallback
        && failure.is_some()
    {
        engine.set_draft(value)?;
    }
    match engine.confirm(store) {
        Ok(dimension) => Ok(format!(
            "added {} \"{}\" in zone {}",
            dimension.id,
            dimension.value,
            dimension.zone.as_deref().unwrap_or("-")
        )),
        Err(placement::PlacementError::EmptyValue) => {
            engine.cancel();
            Ok(format!(
                "detection {}; pass --value to enter it manually",
                failure.unwrap_or("returned nothing")
            ))
        }
        Err(err) => Err(err.into()),
    }
}
