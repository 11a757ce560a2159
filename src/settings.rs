use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cmm::MatchConfig;
use crate::detection::PaddingPolicy;
use crate::placement::PlacementConfig;
use crate::revision::ReconcileOptions;
use crate::services::ServiceConfig;
use crate::store::{BalloonLayout, MissingIdPolicy};

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub services: ServiceConfig,
    pub placement: PlacementConfig,
    pub layout: BalloonLayout,
    pub padding: PaddingPolicy,
    pub revision: ReconcileOptions,
    pub cmm: MatchConfig,
    pub strict_ids: bool,
}

impl Settings {
    pub fn missing_id_policy(&self) -> MissingIdPolicy {
        if self.strict_ids {
            MissingIdPolicy::Report
        } else {
            MissingIdPolicy::Ignore
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    services: Option<ServicesSettings>,
    placement: Option<PlacementSettings>,
    detection: Option<DetectionSettings>,
    revision: Option<RevisionSettings>,
    cmm: Option<CmmSettings>,
    store: Option<StoreSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct ServicesSettings {
    base_url: Option<String>,
    request_timeout_secs: Option<u64>,
    detection_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PlacementSettings {
    balloon_offset_x: Option<f64>,
    balloon_offset_y: Option<f64>,
    click_threshold: Option<f64>,
    min_size: Option<f64>,
    click_width: Option<f64>,
    click_height: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct DetectionSettings {
    padding_fraction: Option<f64>,
    padding_min_px: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct RevisionSettings {
    position_tolerance: Option<f64>,
    title_block_cutoff: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct CmmSettings {
    nominal_epsilon: Option<f64>,
    tolerance_epsilon: Option<f64>,
    accept_threshold: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct StoreSettings {
    strict_ids: Option<bool>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    ensure_home_settings_file()?;

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings.merge_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
        }
    }

    Ok(settings)
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|value| value.is_finite() && *value > 0.0)
}

impl Settings {
    fn merge_str(&mut self, content: &str) -> Result<()> {
        let parsed: SettingsFile = toml::from_str(content)?;
        self.merge(parsed);
        Ok(())
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(services) = incoming.services {
            if let Some(url) = services.base_url
                && !url.trim().is_empty()
            {
                self.services.base_url = url.trim().to_string();
            }
            if let Some(secs) = services.request_timeout_secs
                && secs > 0
            {
                self.services.request_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = services.detection_timeout_secs
                && secs > 0
            {
                self.services.detection_timeout = Duration::from_secs(secs);
            }
        }
        if let Some(placement) = incoming.placement {
            if let Some(x) = placement.balloon_offset_x.filter(|x| x.is_finite()) {
                self.layout.offset_x = x;
            }
            if let Some(y) = placement.balloon_offset_y.filter(|y| y.is_finite()) {
                self.layout.offset_y = y;
            }
            if let Some(threshold) = positive(placement.click_threshold) {
                self.placement.click_threshold = threshold;
            }
            if let Some(size) = positive(placement.min_size) {
                self.placement.min_size = size;
            }
            if let Some(width) = positive(placement.click_width) {
                self.placement.click_width = width;
            }
            if let Some(height) = positive(placement.click_height) {
                self.placement.click_height = height;
            }
        }
        if let Some(detection) = incoming.detection {
            if let Some(fraction) = detection.padding_fraction.filter(|f| f.is_finite() && *f >= 0.0)
            {
                self.padding.fraction = fraction;
            }
            if let Some(min_px) = detection.padding_min_px {
                self.padding.min_px = min_px;
            }
        }
        if let Some(revision) = incoming.revision {
            if let Some(tolerance) = positive(revision.position_tolerance) {
                self.revision.position_tolerance = tolerance;
            }
            if let Some(cutoff) = revision.title_block_cutoff {
                self.revision.title_block_cutoff =
                    (cutoff > 0.0 && cutoff < 1.0).then_some(cutoff);
            }
        }
        if let Some(cmm) = incoming.cmm {
            if let Some(epsilon) = positive(cmm.nominal_epsilon) {
                self.cmm.nominal_epsilon = epsilon;
            }
            if let Some(epsilon) = positive(cmm.tolerance_epsilon) {
                self.cmm.tolerance_epsilon = epsilon;
            }
            if let Some(threshold) = cmm.accept_threshold
                && threshold > 0
            {
                self.cmm.accept_threshold = threshold;
            }
        }
        if let Some(store) = incoming.store
            && let Some(strict) = store.strict_ids
        {
            self.strict_ids = strict;
        }
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".autoballoon-rust"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_temp_home;

    #[test]
    fn embedded_defaults_match_built_in_defaults() {
        let mut settings = Settings::default();
        settings.merge_str(DEFAULT_SETTINGS_TOML).unwrap();
        let defaults = Settings::default();
        assert_eq!(settings.services, defaults.services);
        assert_eq!(settings.placement, defaults.placement);
        assert_eq!(settings.layout, defaults.layout);
        assert_eq!(settings.padding, defaults.padding);
        assert_eq!(settings.revision, defaults.revision);
        assert_eq!(settings.cmm, defaults.cmm);
        assert!(!settings.strict_ids);
    }

    #[test]
    fn merge_ignores_blank_and_invalid_values() {
        let mut settings = Settings::default();
        settings
            .merge_str(
                r#"
                [services]
                base_url = "   "
                detection_timeout_secs = 0

                [placement]
                min_size = -1.0
                click_width = 10.0

                [revision]
                title_block_cutoff = 1.5
                "#,
            )
            .unwrap();
        assert_eq!(settings.services.base_url, ServiceConfig::default().base_url);
        assert_eq!(settings.services.detection_timeout, Duration::from_secs(30));
        assert_eq!(settings.placement.min_size, 0.5);
        assert_eq!(settings.placement.click_width, 10.0);
        assert_eq!(settings.revision.title_block_cutoff, None);
    }

    #[test]
    fn layers_home_and_extra_files() {
        with_temp_home(|home| {
            let app_home = home.join(".autoballoon-rust");
            fs::create_dir_all(&app_home).expect("create home");
            fs::write(
                app_home.join("settings.local.toml"),
                "[revision]\nposition_tolerance = 40.0\n\n[store]\nstrict_ids = true\n",
            )
            .expect("write local");
            let extra = home.join("extra.toml");
            fs::write(&extra, "[revision]\ntitle_block_cutoff = 0.85\n").expect("write extra");

            let settings = load_settings(Some(&extra)).unwrap();
            assert!(app_home.join("settings.toml").exists());
            assert_eq!(settings.revision.position_tolerance, 40.0);
            assert_eq!(settings.revision.title_block_cutoff, Some(0.85));
            assert_eq!(settings.missing_id_policy(), MissingIdPolicy::Report);
        });
    }

    #[test]
    fn missing_extra_file_is_an_error() {
        with_temp_home(|home| {
            let err = load_settings(Some(&home.join("nope.toml"))).unwrap_err();
            assert!(err.to_string().contains("settings file not found"));
        });
    }
}
