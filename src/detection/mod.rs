//! Crop-and-send round trip to the region text detection service.

use image::DynamicImage;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::geometry::PercentRect;

mod crop;

pub use crop::{CropWindow, PaddingPolicy, crop_window};
pub(crate) use crop::encode_png_base64;

pub const DEFAULT_DETECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a detection attempt produced no value. Each variant is shown to the
/// user, who can always type the value instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectionFailure {
    #[error("detection timed out after {0}s")]
    TimedOut(u64),
    #[error("detection service unavailable: {0}")]
    Unavailable(String),
    #[error("no text found in the selected region")]
    NoTextFound,
    #[error("selected region is outside the page image")]
    InvalidRegion,
    #[error("failed to encode region image: {0}")]
    Encode(String),
}

impl DetectionFailure {
    /// Short label for the pending-value UI.
    pub fn reason(&self) -> &'static str {
        match self {
            DetectionFailure::TimedOut(_) => "timed out",
            DetectionFailure::Unavailable(_) => "unavailable",
            DetectionFailure::NoTextFound => "no text found",
            DetectionFailure::InvalidRegion => "invalid region",
            DetectionFailure::Encode(_) => "encode failed",
        }
    }
}

/// Body sent to the region text detection service.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RegionRequest {
    /// Base64-encoded PNG of the padded crop.
    pub image: String,
    pub width: u32,
    pub height: u32,
}

pub type DetectFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<String>, DetectionFailure>> + Send + 'a>>;

/// A service that reads the text inside a cropped image. `Ok(None)` means
/// the service answered but found nothing.
pub trait RegionTextDetector: Send + Sync {
    fn detect(&self, request: RegionRequest) -> DetectFuture<'_>;
}

pub struct AutoDetectionBridge<D> {
    detector: D,
    padding: PaddingPolicy,
    timeout: Duration,
}

impl<D: RegionTextDetector> AutoDetectionBridge<D> {
    pub fn new(detector: D) -> Self {
        Self {
            detector,
            padding: PaddingPolicy::default(),
            timeout: DEFAULT_DETECTION_TIMEOUT,
        }
    }

    pub fn with_padding(mut self, padding: PaddingPolicy) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }

    /// Crops `rect` out of `image` with padding and asks the detector for
    /// its text. The returned value only pre-fills the pending dimension.
    pub async fn detect(
        &self,
        image: &DynamicImage,
        rect: PercentRect,
    ) -> Result<String, DetectionFailure> {
        let window = crop_window(image.width(), image.height(), rect, &self.padding)
            .ok_or(DetectionFailure::InvalidRegion)?;
        let cropped = crop::crop(image, window);
        let request = RegionRequest {
            image: crop::encode_png_base64(&cropped)
                .map_err(|err| DetectionFailure::Encode(err.to_string()))?,
            width: cropped.width(),
            height: cropped.height(),
        };
        debug!(
            "detecting text in {}x{} crop at ({}, {})",
            window.width, window.height, window.x, window.y
        );

        match tokio::time::timeout(self.timeout, self.detector.detect(request)).await {
            Err(_) => {
                warn!("region detection timed out after {:?}", self.timeout);
                Err(DetectionFailure::TimedOut(self.timeout.as_secs()))
            }
            Ok(Err(failure)) => {
                warn!("region detection failed: {}", failure);
                Err(failure)
            }
            Ok(Ok(Some(text))) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            Ok(Ok(_)) => Err(DetectionFailure::NoTextFound),
        }
    }
}
