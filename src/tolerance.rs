use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use crate::dimension::{Parsed, Subtype, ToleranceType};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LimitViolation {
    #[error("lower limit {lower} is above upper limit {upper}")]
    Inverted { lower: f64, upper: f64 },
    #[error("nominal {nominal} is below lower limit {lower}")]
    BelowLower { nominal: f64, lower: f64 },
    #[error("nominal {nominal} is above upper limit {upper}")]
    AboveUpper { nominal: f64, upper: f64 },
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d*\.?\d+").expect("invalid number regex"))
}

fn quantity_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\d+\s*[xX×]\s+").expect("invalid quantity regex"))
}

pub(crate) fn thread_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bUN[CFEJRS]?\b|\bUN[CFEJRS]?-|NPTF?|\bM\d+(?:\.\d+)?(?:[xX×]|\b)")
            .expect("invalid thread regex")
    })
}

fn bilateral_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:±|\+/-|\+-)\s*(\d*\.?\d+)").expect("invalid bilateral regex"))
}

fn unequal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\+\s*(\d*\.?\d+)\s*/?\s*-\s*(\d*\.?\d+)").expect("invalid unequal regex")
    })
}

fn limit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d*\.\d+|\d+)\s*[-/]\s*(\d*\.\d+|\d+)$").expect("invalid limit regex")
    })
}

fn fit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d\s*[A-Za-z]{1,2}\d{1,2}\b").expect("invalid fit regex"))
}

fn finish_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bRa\b|\bRa\s*\d").expect("invalid finish regex"))
}

fn radius_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^S?R\s?\d*\.?\d").expect("invalid radius regex"))
}

const GDT_SYMBOLS: &[char] = &[
    '⌖', '⏥', '⌭', '⊥', '∥', '⌒', '⌓', '◎', '↗', '⌯', '▱', '○', '∠', '⟂',
];

/// First numeric value in a callout, skipping a leading quantity like `2X`.
pub fn leading_number(value: &str) -> Option<f64> {
    let stripped = quantity_prefix_re().replace(value, "");
    number_re()
        .find(&stripped)
        .and_then(|found| found.as_str().parse::<f64>().ok())
}

pub fn classify_subtype(value: &str) -> Subtype {
    let trimmed = quantity_prefix_re().replace(value.trim(), "").to_string();
    let upper = trimmed.to_uppercase();
    if trimmed.chars().any(|ch| GDT_SYMBOLS.contains(&ch)) || trimmed.starts_with('|') {
        return Subtype::Gdt;
    }
    if thread_re().is_match(&trimmed) {
        return Subtype::Thread;
    }
    if finish_re().is_match(&trimmed) || trimmed.contains('√') {
        return Subtype::Finish;
    }
    if upper.contains("NOTE") {
        return Subtype::Note;
    }
    if upper.contains("WELD") {
        return Subtype::Weld;
    }
    if trimmed.starts_with('Ø') || trimmed.starts_with('⌀') || upper.contains("DIA") {
        return Subtype::Diameter;
    }
    if radius_re().is_match(&trimmed) {
        return Subtype::Radius;
    }
    if trimmed.contains('°') {
        return Subtype::Angle;
    }
    Subtype::Linear
}

/// Derives engineering metadata from the callout text.
pub fn parse_callout(value: &str) -> Parsed {
    let subtype = classify_subtype(value);
    let mut parsed = Parsed {
        is_gdt: subtype == Subtype::Gdt,
        nominal: leading_number(value),
        subtype: Some(subtype.clone()),
        ..Parsed::default()
    };
    if matches!(subtype, Subtype::Gdt | Subtype::Thread | Subtype::Note | Subtype::Finish) {
        return parsed;
    }

    let text = value.trim();
    let upper = text.to_uppercase();
    if (text.starts_with('[') && text.ends_with(']')) || upper.contains("BASIC") || upper.contains("BSC")
    {
        parsed.tolerance_type = Some(ToleranceType::Basic);
        return parsed;
    }

    if let Some(caps) = bilateral_re().captures(text) {
        if let Some(tol) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) {
            parsed.tolerance_type = Some(ToleranceType::Bilateral);
            parsed.plus_tolerance = Some(tol);
            parsed.minus_tolerance = Some(tol);
            fill_limits(&mut parsed);
            return parsed;
        }
    }

    if let Some(caps) = unequal_re().captures(text) {
        let plus = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok());
        let minus = caps.get(2).and_then(|m| m.as_str().parse::<f64>().ok());
        if let (Some(plus), Some(minus)) = (plus, minus) {
            parsed.tolerance_type = Some(ToleranceType::Bilateral);
            parsed.plus_tolerance = Some(plus);
            parsed.minus_tolerance = Some(minus);
            fill_limits(&mut parsed);
            return parsed;
        }
    }

    let bare = text.trim_start_matches(['Ø', '⌀', 'R', ' ']);
    if let Some(caps) = limit_re().captures(bare) {
        let a = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok());
        let b = caps.get(2).and_then(|m| m.as_str().parse::<f64>().ok());
        if let (Some(a), Some(b)) = (a, b) {
            let lower = a.min(b);
            let upper = a.max(b);
            parsed.tolerance_type = Some(ToleranceType::Limit);
            parsed.lower_limit = Some(lower);
            parsed.upper_limit = Some(upper);
            parsed.nominal = Some((lower + upper) / 2.0);
            parsed.plus_tolerance = Some((upper - lower) / 2.0);
            parsed.minus_tolerance = Some((upper - lower) / 2.0);
            return parsed;
        }
    }

    if fit_re().is_match(text) {
        parsed.tolerance_type = Some(ToleranceType::Fit);
    }
    parsed
}

fn fill_limits(parsed: &mut Parsed) {
    if let (Some(nominal), Some(plus), Some(minus)) =
        (parsed.nominal, parsed.plus_tolerance, parsed.minus_tolerance)
    {
        parsed.lower_limit = Some(nominal - minus);
        parsed.upper_limit = Some(nominal + plus);
    }
}

/// Checks `lower_limit <= nominal <= upper_limit` for whatever limits are set.
pub fn validate_limits(parsed: &Parsed) -> Result<(), LimitViolation> {
    if let (Some(lower), Some(upper)) = (parsed.lower_limit, parsed.upper_limit) {
        if lower > upper {
            return Err(LimitViolation::Inverted { lower, upper });
        }
    }
    let Some(nominal) = parsed.nominal else {
        return Ok(());
    };
    if let Some(lower) = parsed.lower_limit {
        if nominal < lower {
            return Err(LimitViolation::BelowLower { nominal, lower });
        }
    }
    if let Some(upper) = parsed.upper_limit {
        if nominal > upper {
            return Err(LimitViolation::AboveUpper { nominal, upper });
        }
    }
    Ok(())
}
