use crate::dimension::{InspectionMethod, Parsed, Subtype, ToleranceType};
use crate::tolerance::thread_re;

/// Everything a rule may look at.
#[derive(Debug, Clone, Copy)]
pub struct InferenceInput<'a> {
    pub value: &'a str,
    pub parsed: &'a Parsed,
}

pub struct Rule {
    pub name: &'static str,
    pub method: InspectionMethod,
    pub applies: fn(&InferenceInput<'_>) -> bool,
}

/// Rules are evaluated top to bottom; the first one that applies wins.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule {
            name: "gdt",
            method: InspectionMethod::Cmm,
            applies: |input| input.parsed.is_gdt || input.parsed.subtype == Some(Subtype::Gdt),
        },
        Rule {
            name: "thread",
            method: InspectionMethod::Cmm,
            applies: |input| {
                input.parsed.subtype == Some(Subtype::Thread) || thread_re().is_match(input.value)
            },
        },
        Rule {
            name: "surface-finish",
            method: InspectionMethod::Visual,
            applies: |input| input.parsed.subtype == Some(Subtype::Finish) || input.value.contains("Ra"),
        },
        Rule {
            name: "note",
            method: InspectionMethod::Visual,
            applies: |input| {
                input.parsed.subtype == Some(Subtype::Note)
                    || input.value.to_uppercase().contains("NOTE")
            },
        },
        Rule {
            name: "tight-band",
            method: InspectionMethod::GageBlock,
            applies: |input| band_below(input.parsed, 0.001),
        },
        Rule {
            name: "precision-band",
            method: InspectionMethod::Micrometer,
            applies: |input| band_below(input.parsed, 0.01),
        },
        Rule {
            name: "basic",
            method: InspectionMethod::Cmm,
            applies: |input| input.parsed.tolerance_type == Some(ToleranceType::Basic),
        },
        Rule {
            name: "diameter-radius",
            method: InspectionMethod::Caliper,
            applies: |input| {
                let value = input.value.trim_start();
                value.starts_with('Ø')
                    || value.starts_with('⌀')
                    || value.starts_with('R')
                    || matches!(
                        input.parsed.subtype,
                        Some(Subtype::Diameter) | Some(Subtype::Radius)
                    )
            },
        },
    ]
}

fn band_below(parsed: &Parsed, limit: f64) -> bool {
    parsed
        .tolerance_band()
        .map(|band| band > 0.0 && band < limit)
        .unwrap_or(false)
}

pub struct MethodInference {
    rules: Vec<Rule>,
    fallback: InspectionMethod,
}

impl Default for MethodInference {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            fallback: InspectionMethod::Caliper,
        }
    }
}

impl MethodInference {
    pub fn with_rules(rules: Vec<Rule>, fallback: InspectionMethod) -> Self {
        Self { rules, fallback }
    }

    pub fn infer(&self, value: &str, parsed: &Parsed) -> InspectionMethod {
        self.matching_rule(value, parsed)
            .map(|rule| rule.method.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn matching_rule(&self, value: &str, parsed: &Parsed) -> Option<&Rule> {
        let input = InferenceInput { value, parsed };
        self.rules.iter().find(|rule| (rule.applies)(&input))
    }
}

pub fn infer_method(value: &str, parsed: &Parsed) -> InspectionMethod {
    MethodInference::default().infer(value, parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tolerance::parse_callout;

    fn infer(value: &str) -> InspectionMethod {
        infer_method(value, &parse_callout(value))
    }

    #[test]
    fn rule_chain_examples() {
        assert_eq!(infer("⊥ 0.05 A"), InspectionMethod::Cmm);
        assert_eq!(infer("M10x1.5"), InspectionMethod::Cmm);
        assert_eq!(infer("Ra 3.2"), InspectionMethod::Visual);
        assert_eq!(infer("NOTE 4"), InspectionMethod::Visual);
        assert_eq!(infer("0.2500 ±0.0002"), InspectionMethod::GageBlock);
        assert_eq!(infer("0.450 ±0.002"), InspectionMethod::Micrometer);
        assert_eq!(infer("[1.000]"), InspectionMethod::Cmm);
        assert_eq!(infer("Ø1.50 ±0.05"), InspectionMethod::Caliper);
        assert_eq!(infer("12.5"), InspectionMethod::Caliper);
    }

    #[test]
    fn first_matching_rule_wins() {
        // GD&T beats the tight band that would otherwise pick a gage block.
        let parsed = Parsed {
            is_gdt: true,
            plus_tolerance: Some(0.0001),
            minus_tolerance: Some(0.0001),
            ..Parsed::default()
        };
        let inference = MethodInference::default();
        assert_eq!(inference.matching_rule("0.5", &parsed).map(|r| r.name), Some("gdt"));
    }

    #[test]
    fn rules_can_be_reordered() {
        let mut rules = default_rules();
        let band = rules.remove(4);
        rules.insert(0, band);
        let inference = MethodInference::with_rules(rules, InspectionMethod::Visual);
        let parsed = Parsed {
            is_gdt: true,
            plus_tolerance: Some(0.0001),
            minus_tolerance: Some(0.0001),
            ..Parsed::default()
        };
        assert_eq!(inference.infer("0.5", &parsed), InspectionMethod::GageBlock);
        assert_eq!(inference.infer("x", &Parsed::default()), InspectionMethod::Visual);
    }
}
