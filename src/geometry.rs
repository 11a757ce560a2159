use serde::{Deserialize, Serialize};

/// Upper bound of the normalized detection space.
pub const NORMALIZED_EXTENT: f64 = 1000.0;
/// Upper bound of the percentage space used for on-screen placement.
pub const PERCENT_EXTENT: f64 = 100.0;

const NORMALIZED_PER_PERCENT: f64 = NORMALIZED_EXTENT / PERCENT_EXTENT;

/// Point in the 0-1000 space the document processing service reports in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn to_percent(self) -> PercentPoint {
        PercentPoint::new(
            self.x / NORMALIZED_PER_PERCENT,
            self.y / NORMALIZED_PER_PERCENT,
        )
    }

    pub fn distance_to(&self, other: &NormalizedPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned box in normalized 0-1000 space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl NormalizedBox {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn width(&self) -> f64 {
        (self.xmax - self.xmin).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.ymax - self.ymin).max(0.0)
    }

    pub fn center(&self) -> NormalizedPoint {
        NormalizedPoint::new(
            (self.xmin + self.xmax) / 2.0,
            (self.ymin + self.ymax) / 2.0,
        )
    }

    pub fn is_finite(&self) -> bool {
        self.xmin.is_finite() && self.ymin.is_finite() && self.xmax.is_finite() && self.ymax.is_finite()
    }

    pub fn to_percent(&self) -> PercentRect {
        PercentRect::new(
            self.xmin / NORMALIZED_PER_PERCENT,
            self.ymin / NORMALIZED_PER_PERCENT,
            self.width() / NORMALIZED_PER_PERCENT,
            self.height() / NORMALIZED_PER_PERCENT,
        )
    }

    /// True when both centers lie within `tolerance` of each other on each axis.
    pub fn centers_within(&self, other: &NormalizedBox, tolerance: f64) -> bool {
        let a = self.center();
        let b = other.center();
        (a.x - b.x).abs() <= tolerance && (a.y - b.y).abs() <= tolerance
    }

    pub fn center_distance(&self, other: &NormalizedBox) -> f64 {
        self.center().distance_to(&other.center())
    }
}

pub fn iou(a: &NormalizedBox, b: &NormalizedBox) -> f64 {
    let ix1 = a.xmin.max(b.xmin);
    let iy1 = a.ymin.max(b.ymin);
    let ix2 = a.xmax.min(b.xmax);
    let iy2 = a.ymax.min(b.ymax);

    if ix2 <= ix1 || iy2 <= iy1 {
        return 0.0;
    }
    let inter = (ix2 - ix1) * (iy2 - iy1);
    let area_a = a.width() * a.height();
    let area_b = b.width() * b.height();
    let union = area_a + area_b - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Point in 0-100 percentage space relative to the page image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentPoint {
    pub x: f64,
    pub y: f64,
}

impl PercentPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn clamped(self) -> Self {
        Self {
            x: clamp_percent(self.x),
            y: clamp_percent(self.y),
        }
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    pub fn to_normalized(self) -> NormalizedPoint {
        NormalizedPoint::new(
            self.x * NORMALIZED_PER_PERCENT,
            self.y * NORMALIZED_PER_PERCENT,
        )
    }

    pub fn distance_to(&self, other: &PercentPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Rectangle in percentage space, stored as origin plus size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PercentRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle spanned by two corners in any order.
    pub fn from_corners(a: PercentPoint, b: PercentPoint) -> Self {
        let x = a.x.min(b.x);
        let y = a.y.min(b.y);
        Self {
            x,
            y,
            width: (a.x - b.x).abs(),
            height: (a.y - b.y).abs(),
        }
    }

    pub fn centered_on(center: PercentPoint, width: f64, height: f64) -> Self {
        Self {
            x: center.x - width / 2.0,
            y: center.y - height / 2.0,
            width,
            height,
        }
    }

    pub fn center(&self) -> PercentPoint {
        PercentPoint::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Inclusive containment test.
    pub fn contains(&self, point: PercentPoint) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }

    pub fn to_normalized(&self) -> NormalizedBox {
        NormalizedBox::new(
            self.x * NORMALIZED_PER_PERCENT,
            self.y * NORMALIZED_PER_PERCENT,
            (self.x + self.width) * NORMALIZED_PER_PERCENT,
            (self.y + self.height) * NORMALIZED_PER_PERCENT,
        )
    }
}

/// Pointer or image position in device pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Pixel size of whatever surface percentages are measured against
/// (the rendered container for pointer input, the raster for cropping).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Converts a pixel position into percent. A degenerate viewport maps to
    /// the origin so callers never see NaN.
    pub fn to_percent(&self, point: PixelPoint) -> PercentPoint {
        if self.width <= 0.0 || self.height <= 0.0 {
            return PercentPoint::new(0.0, 0.0);
        }
        PercentPoint::new(
            point.x / self.width * PERCENT_EXTENT,
            point.y / self.height * PERCENT_EXTENT,
        )
    }

    pub fn to_pixels(&self, point: PercentPoint) -> PixelPoint {
        PixelPoint::new(
            point.x / PERCENT_EXTENT * self.width,
            point.y / PERCENT_EXTENT * self.height,
        )
    }

    pub fn delta_to_percent(&self, dx: f64, dy: f64) -> (f64, f64) {
        if self.width <= 0.0 || self.height <= 0.0 {
            return (0.0, 0.0);
        }
        (
            dx / self.width * PERCENT_EXTENT,
            dy / self.height * PERCENT_EXTENT,
        )
    }
}

pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, PERCENT_EXTENT)
}

/// Drawing-sheet zone grid. Columns run right-to-left alphabetically
/// (H at the left edge), rows count down from the top.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneGrid {
    columns: Vec<String>,
    rows: Vec<String>,
}

impl Default for ZoneGrid {
    fn default() -> Self {
        Self {
            columns: ["H", "G", "F", "E", "D", "C", "B", "A"]
                .iter()
                .map(|label| label.to_string())
                .collect(),
            rows: ["4", "3", "2", "1"]
                .iter()
                .map(|label| label.to_string())
                .collect(),
        }
    }
}

impl ZoneGrid {
    pub fn new(columns: Vec<String>, rows: Vec<String>) -> Option<Self> {
        if columns.is_empty() || rows.is_empty() {
            return None;
        }
        Some(Self { columns, rows })
    }

    /// Zone label of a pixel position on a sheet of the given size.
    pub fn zone_at_pixel(&self, point: PixelPoint, sheet: Viewport) -> String {
        let cell_w = sheet.width / self.columns.len() as f64;
        let cell_h = sheet.height / self.rows.len() as f64;
        let col = cell_index(point.x, cell_w, self.columns.len());
        let row = cell_index(point.y, cell_h, self.rows.len());
        format!("{}{}", self.columns[col], self.rows[row])
    }

    /// Zone label of a percentage position; equivalent to [`Self::zone_at_pixel`]
    /// on a 100x100 sheet.
    pub fn zone_at(&self, point: PercentPoint) -> String {
        self.zone_at_pixel(
            PixelPoint::new(point.x, point.y),
            Viewport::new(PERCENT_EXTENT, PERCENT_EXTENT),
        )
    }
}

fn cell_index(coord: f64, cell: f64, count: usize) -> usize {
    if !coord.is_finite() || cell <= 0.0 || coord <= 0.0 {
        return 0;
    }
    let idx = (coord / cell).floor() as usize;
    idx.min(count - 1)
}

/// Zone of a percentage position on the default 8x4 sheet grid.
pub fn derive_zone(point: PercentPoint) -> String {
    ZoneGrid::default().zone_at(point)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_box_center_converts_to_percent() {
        let bbox = NormalizedBox::new(100.0, 200.0, 300.0, 400.0);
        let center = bbox.center().to_percent();
        assert_eq!(center, PercentPoint::new(20.0, 30.0));
    }

    #[test]
    fn percent_rect_round_trips_through_normalized_space() {
        let rect = PercentRect::new(10.0, 20.0, 8.0, 4.0);
        let back = rect.to_normalized().to_percent();
        assert!((back.x - rect.x).abs() < 1e-9);
        assert!((back.width - rect.width).abs() < 1e-9);
        assert!((back.height - rect.height).abs() < 1e-9);
    }

    #[test]
    fn contains_is_inclusive() {
        let rect = PercentRect::new(10.0, 10.0, 10.0, 10.0);
        assert!(rect.contains(PercentPoint::new(10.0, 20.0)));
        assert!(rect.contains(PercentPoint::new(20.0, 10.0)));
        assert!(!rect.contains(PercentPoint::new(20.01, 15.0)));
    }

    #[test]
    fn viewport_conversion_never_yields_nan() {
        let viewport = Viewport::new(0.0, 0.0);
        let point = viewport.to_percent(PixelPoint::new(10.0, 10.0));
        assert!(point.is_finite());
    }

    #[test]
    fn zone_grid_corners_and_clamping() {
        assert_eq!(derive_zone(PercentPoint::new(0.0, 0.0)), "H4");
        assert_eq!(derive_zone(PercentPoint::new(99.9, 99.9)), "A1");
        assert_eq!(derive_zone(PercentPoint::new(100.0, 100.0)), "A1");
        assert_eq!(derive_zone(PercentPoint::new(-5.0, 150.0)), "H1");
        assert_eq!(derive_zone(PercentPoint::new(70.0, 40.0)), "C3");
    }

    #[test]
    fn zone_at_pixel_uses_sheet_cells() {
        let grid = ZoneGrid::default();
        let sheet = Viewport::new(1700.0, 1100.0);
        assert_eq!(grid.zone_at_pixel(PixelPoint::new(220.0, 300.0), sheet), "G3");
    }

    #[test]
    fn zone_is_deterministic() {
        let point = PercentPoint::new(37.5, 62.5);
        let first = derive_zone(point);
        for _ in 0..10 {
            assert_eq!(derive_zone(point), first);
        }
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = NormalizedBox::new(0.0, 0.0, 10.0, 10.0);
        let b = NormalizedBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(iou(&a, &b), 0.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-9);
    }
}
