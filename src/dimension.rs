use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::geometry::{NormalizedBox, PercentPoint};
use crate::tolerance;

pub const DETECTED_CONFIDENCE: f64 = 0.95;
pub const MANUAL_CONFIDENCE: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InspectionMethod {
    Caliper,
    Micrometer,
    Cmm,
    Visual,
    GageBlock,
    /// Any method name the upstream service sends that is not modelled here.
    Other(String),
}

impl InspectionMethod {
    pub fn as_str(&self) -> &str {
        match self {
            InspectionMethod::Caliper => "Caliper",
            InspectionMethod::Micrometer => "Micrometer",
            InspectionMethod::Cmm => "CMM",
            InspectionMethod::Visual => "Visual",
            InspectionMethod::GageBlock => "Gage Block",
            InspectionMethod::Other(name) => name,
        }
    }
}

impl From<String> for InspectionMethod {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "caliper" => InspectionMethod::Caliper,
            "micrometer" => InspectionMethod::Micrometer,
            "cmm" => InspectionMethod::Cmm,
            "visual" => InspectionMethod::Visual,
            "gage block" | "gauge block" => InspectionMethod::GageBlock,
            _ => InspectionMethod::Other(value),
        }
    }
}

impl From<InspectionMethod> for String {
    fn from(value: InspectionMethod) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ToleranceType {
    Bilateral,
    Limit,
    Basic,
    Fit,
    Other(String),
}

impl ToleranceType {
    pub fn as_str(&self) -> &str {
        match self {
            ToleranceType::Bilateral => "bilateral",
            ToleranceType::Limit => "limit",
            ToleranceType::Basic => "basic",
            ToleranceType::Fit => "fit",
            ToleranceType::Other(name) => name,
        }
    }
}

impl From<String> for ToleranceType {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "bilateral" => ToleranceType::Bilateral,
            "limit" => ToleranceType::Limit,
            "basic" => ToleranceType::Basic,
            "fit" => ToleranceType::Fit,
            _ => ToleranceType::Other(value),
        }
    }
}

impl From<ToleranceType> for String {
    fn from(value: ToleranceType) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Subtype {
    Linear,
    Diameter,
    Radius,
    Angle,
    Thread,
    Gdt,
    Note,
    Weld,
    Finish,
    Other(String),
}

impl Subtype {
    pub fn as_str(&self) -> &str {
        match self {
            Subtype::Linear => "Linear",
            Subtype::Diameter => "Diameter",
            Subtype::Radius => "Radius",
            Subtype::Angle => "Angle",
            Subtype::Thread => "Thread",
            Subtype::Gdt => "GD&T",
            Subtype::Note => "Note",
            Subtype::Weld => "Weld",
            Subtype::Finish => "Finish",
            Subtype::Other(name) => name,
        }
    }
}

impl From<String> for Subtype {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "linear" => Subtype::Linear,
            "diameter" => Subtype::Diameter,
            "radius" => Subtype::Radius,
            "angle" => Subtype::Angle,
            "thread" => Subtype::Thread,
            "gd&t" | "gdt" => Subtype::Gdt,
            "note" => Subtype::Note,
            "weld" => Subtype::Weld,
            "finish" => Subtype::Finish,
            _ => Subtype::Other(value),
        }
    }
}

impl From<Subtype> for String {
    fn from(value: Subtype) -> Self {
        value.as_str().to_string()
    }
}

/// Engineering metadata attached to a dimension.
///
/// `minus_tolerance` is stored as a magnitude: `0.450 +0.002/-0.001` has
/// `plus_tolerance = 0.002` and `minus_tolerance = 0.001`. Keys this model does
/// not know are kept in `extra` so a save/load cycle is lossless.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parsed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance_type: Option<ToleranceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nominal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plus_tolerance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minus_tolerance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_limit: Option<f64>,
    #[serde(default)]
    pub is_gdt: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<Subtype>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspection_method: Option<InspectionMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aql: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lot_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Parsed {
    /// True when both sides of a tolerance band are known.
    pub fn has_tolerance(&self) -> bool {
        self.tolerance_band().is_some()
    }

    /// Total width of the tolerance band, from limits or from +/- values.
    pub fn tolerance_band(&self) -> Option<f64> {
        if let (Some(lower), Some(upper)) = (self.lower_limit, self.upper_limit) {
            return Some((upper - lower).abs());
        }
        match (self.plus_tolerance, self.minus_tolerance) {
            (Some(plus), Some(minus)) => Some(plus.abs() + minus.abs()),
            _ => None,
        }
    }

    /// Field-by-field merge: set fields in the patch overwrite, everything
    /// else survives.
    pub fn merge(&mut self, patch: ParsedPatch) {
        if let Some(units) = patch.units {
            self.units = Some(units);
        }
        if let Some(kind) = patch.tolerance_type {
            self.tolerance_type = Some(kind);
        }
        if let Some(nominal) = patch.nominal {
            self.nominal = Some(nominal);
        }
        if let Some(plus) = patch.plus_tolerance {
            self.plus_tolerance = Some(plus);
        }
        if let Some(minus) = patch.minus_tolerance {
            self.minus_tolerance = Some(minus);
        }
        if let Some(lower) = patch.lower_limit {
            self.lower_limit = Some(lower);
        }
        if let Some(upper) = patch.upper_limit {
            self.upper_limit = Some(upper);
        }
        if let Some(is_gdt) = patch.is_gdt {
            self.is_gdt = is_gdt;
        }
        if let Some(subtype) = patch.subtype {
            self.subtype = Some(subtype);
        }
        if let Some(method) = patch.inspection_method {
            self.inspection_method = Some(method);
        }
        if let Some(aql) = patch.aql {
            self.aql = Some(aql);
        }
        if let Some(lot_size) = patch.lot_size {
            self.lot_size = Some(lot_size);
        }
        if let Some(sample_size) = patch.sample_size {
            self.sample_size = Some(sample_size);
        }
        for (key, value) in patch.extra {
            self.extra.insert(key, value);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPatch {
    pub units: Option<String>,
    pub tolerance_type: Option<ToleranceType>,
    pub nominal: Option<f64>,
    pub plus_tolerance: Option<f64>,
    pub minus_tolerance: Option<f64>,
    pub lower_limit: Option<f64>,
    pub upper_limit: Option<f64>,
    pub is_gdt: Option<bool>,
    pub subtype: Option<Subtype>,
    pub inspection_method: Option<InspectionMethod>,
    pub aql: Option<f64>,
    pub lot_size: Option<u32>,
    pub sample_size: Option<u32>,
    pub extra: BTreeMap<String, Value>,
}

/// Partial update for [`Dimension`]. `parsed` is deep-merged, the rest
/// overwrites.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DimensionPatch {
    pub value: Option<String>,
    pub zone: Option<String>,
    pub bounding_box: Option<NormalizedBox>,
    pub balloon: Option<PercentPoint>,
    pub method: Option<InspectionMethod>,
    pub confidence: Option<f64>,
    pub page: Option<u32>,
    pub parsed: Option<ParsedPatch>,
}

fn default_page() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimension {
    pub id: u32,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(alias = "bounding_box")]
    pub bounding_box: NormalizedBox,
    pub anchor_x: f64,
    pub anchor_y: f64,
    pub balloon_x: f64,
    pub balloon_y: f64,
    pub method: InspectionMethod,
    pub confidence: f64,
    #[serde(default)]
    pub parsed: Parsed,
    #[serde(default = "default_page")]
    pub page: u32,
}

impl Dimension {
    pub fn anchor(&self) -> PercentPoint {
        PercentPoint::new(self.anchor_x, self.anchor_y)
    }

    pub fn balloon(&self) -> PercentPoint {
        PercentPoint::new(self.balloon_x, self.balloon_y)
    }

    /// Nominal value, from parsed metadata or the callout text.
    pub fn nominal(&self) -> Option<f64> {
        self.parsed
            .nominal
            .or_else(|| tolerance::leading_number(&self.value))
    }
}

/// Dimension record as the document processing service reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDimension {
    pub id: u32,
    pub value: String,
    pub bounding_box: NormalizedBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<InspectionMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed: Option<Parsed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl From<&Dimension> for RawDimension {
    fn from(dimension: &Dimension) -> Self {
        Self {
            id: dimension.id,
            value: dimension.value.clone(),
            bounding_box: dimension.bounding_box,
            zone: dimension.zone.clone(),
            confidence: Some(dimension.confidence),
            method: Some(dimension.method.clone()),
            parsed: Some(dimension.parsed.clone()),
            page: Some(dimension.page),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CmmStatus {
    Pass,
    Fail,
}

impl CmmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CmmStatus::Pass => "PASS",
            CmmStatus::Fail => "FAIL",
        }
    }
}

/// Measured result attached to a dimension id, stored outside the dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmmResult {
    pub actual: f64,
    pub status: CmmStatus,
    pub deviation: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_names_round_trip_through_strings() {
        let method: InspectionMethod = serde_json::from_value(json!("Gage Block")).unwrap();
        assert_eq!(method, InspectionMethod::GageBlock);
        let other: InspectionMethod = serde_json::from_value(json!("Height Gage")).unwrap();
        assert_eq!(
            serde_json::to_value(&other).unwrap(),
            json!("Height Gage")
        );
    }

    #[test]
    fn parsed_keeps_unknown_keys() {
        let raw = json!({"units": "in", "nominal": 0.45, "datum": "A"});
        let parsed: Parsed = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.extra.get("datum"), Some(&json!("A")));
        let back = serde_json::to_value(&parsed).unwrap();
        assert_eq!(back["datum"], json!("A"));
    }

    #[test]
    fn merge_only_touches_patched_fields() {
        let mut parsed = Parsed {
            units: Some("in".to_string()),
            nominal: Some(0.45),
            plus_tolerance: Some(0.002),
            minus_tolerance: Some(0.002),
            subtype: Some(Subtype::Diameter),
            ..Parsed::default()
        };
        parsed.merge(ParsedPatch {
            units: Some("mm".to_string()),
            ..ParsedPatch::default()
        });
        assert_eq!(parsed.units.as_deref(), Some("mm"));
        assert_eq!(parsed.nominal, Some(0.45));
        assert_eq!(parsed.plus_tolerance, Some(0.002));
        assert_eq!(parsed.subtype, Some(Subtype::Diameter));
    }

    #[test]
    fn tolerance_band_prefers_limits() {
        let parsed = Parsed {
            plus_tolerance: Some(0.1),
            minus_tolerance: Some(0.1),
            lower_limit: Some(0.448),
            upper_limit: Some(0.452),
            ..Parsed::default()
        };
        let band = parsed.tolerance_band().unwrap();
        assert!((band - 0.004).abs() < 1e-12);
    }

    #[test]
    fn dimension_accepts_snake_case_bounding_box() {
        let raw = json!({
            "id": 3,
            "value": "1.00",
            "bounding_box": {"xmin": 1.0, "ymin": 2.0, "xmax": 3.0, "ymax": 4.0},
            "anchorX": 0.2,
            "anchorY": 0.3,
            "balloonX": 4.2,
            "balloonY": -3.7,
            "method": "Caliper",
            "confidence": 1.0
        });
        let dimension: Dimension = serde_json::from_value(raw).unwrap();
        assert_eq!(dimension.page, 1);
        assert_eq!(dimension.bounding_box.xmax, 3.0);
    }
}
