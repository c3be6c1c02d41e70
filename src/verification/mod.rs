//! Deterministic grounding checks
//!
//! Rules run before the model judge. They are cheap and exact, so a draft
//! that cites a figure absent from the evidence fails without a model call.

use crate::models::{PassageRef, RuleCheck};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use tracing::info;

lazy_static! {
    static ref CITATION: Regex = Regex::new(r"\[\d+(?:\s*,\s*\d+)*\]").unwrap();
    static ref LIST_ORDINAL: Regex = Regex::new(r"(?m)^\s*\d+[.)]\s").unwrap();
    static ref FIGURE: Regex = Regex::new(r"\d[\d,]*(?:\.\d+)?").unwrap();
}

/// What a rule gets to look at.
pub struct GroundingInput<'a> {
    pub draft: &'a str,
    pub passages: &'a [PassageRef],
    /// Passage text plus rendered enrichment
    pub evidence: &'a str,
}

pub struct VerificationCheckResult {
    pub passed: bool,
    pub details: String,
    /// Claims this rule could not ground
    pub unsupported: Vec<String>,
}

impl VerificationCheckResult {
    fn pass(details: impl Into<String>) -> Self {
        Self {
            passed: true,
            details: details.into(),
            unsupported: Vec::new(),
        }
    }
}

pub trait VerificationRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn verify(&self, input: &GroundingInput<'_>) -> VerificationCheckResult;
}

/// Combined outcome of every rule.
#[derive(Debug, Clone)]
pub struct GroundingReport {
    pub checks: Vec<RuleCheck>,
    pub issues: Vec<String>,
    pub unsupported_claims: Vec<String>,
}

impl GroundingReport {
    pub fn passed(&self) -> bool {
        self.issues.is_empty()
    }
}

pub struct VerificationEngine {
    rules: Vec<Box<dyn VerificationRule>>,
}

impl VerificationEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn VerificationRule>) {
        self.rules.push(rule);
    }

    pub fn verify(&self, input: &GroundingInput<'_>) -> GroundingReport {
        let mut checks = Vec::with_capacity(self.rules.len());
        let mut issues = Vec::new();
        let mut unsupported_claims = Vec::new();

        for rule in &self.rules {
            let result = rule.verify(input);

            if !result.passed {
                issues.push(format!("{}: {}", rule.name(), result.details));
                unsupported_claims.extend(result.unsupported);
            }

            checks.push(RuleCheck {
                rule_name: rule.name().to_string(),
                passed: result.passed,
                details: result.details,
            });
        }

        info!(
            rule_count = self.rules.len(),
            grounded = issues.is_empty(),
            "Grounding rules evaluated"
        );

        GroundingReport {
            checks,
            issues,
            unsupported_claims,
        }
    }
}

impl Default for VerificationEngine {
    fn default() -> Self {
        Self::new()
    }
}

//
// ========== Grounding Rules ==========
//

/// Rule: an answer needs at least one retrieved passage behind it
pub struct EvidencePresentRule;

impl VerificationRule for EvidencePresentRule {
    fn name(&self) -> &'static str {
        "evidence_present"
    }

    fn verify(&self, input: &GroundingInput<'_>) -> VerificationCheckResult {
        if input.passages.is_empty() {
            VerificationCheckResult {
                passed: false,
                details: "No passages were retrieved for this query".to_string(),
                unsupported: vec![],
            }
        } else {
            VerificationCheckResult::pass(format!("{} passages retrieved", input.passages.len()))
        }
    }
}

/// Rule: every figure quoted in the draft must occur in the evidence
pub struct FigureGroundingRule;

impl VerificationRule for FigureGroundingRule {
    fn name(&self) -> &'static str {
        "figures_grounded"
    }

    fn verify(&self, input: &GroundingInput<'_>) -> VerificationCheckResult {
        let known: HashSet<String> = extract_figures(input.evidence).into_iter().collect();
        let cited = extract_figures(&strip_markers(input.draft));

        let mut missing: Vec<String> = Vec::new();
        for figure in cited {
            if !known.contains(&figure) && !missing.contains(&figure) {
                missing.push(figure);
            }
        }

        if missing.is_empty() {
            VerificationCheckResult::pass("All figures appear in the evidence")
        } else {
            VerificationCheckResult {
                passed: false,
                details: format!("Figures not found in evidence: {}", missing.join(", ")),
                unsupported: missing
                    .into_iter()
                    .map(|f| format!("figure {}", f))
                    .collect(),
            }
        }
    }
}

/// Remove citation markers like `[2]` and line-leading list ordinals.
fn strip_markers(text: &str) -> String {
    let without_citations = CITATION.replace_all(text, " ");
    LIST_ORDINAL.replace_all(&without_citations, " ").into_owned()
}

/// Normalised figures: thousands separators dropped, trailing decimal zeros
/// trimmed. Bare single-digit integers are ignored.
pub fn extract_figures(text: &str) -> Vec<String> {
    FIGURE
        .find_iter(text)
        .filter_map(|m| {
            let raw = m.as_str().trim_end_matches(',').replace(',', "");
            let normalized = match raw.split_once('.') {
                Some((whole, frac)) => {
                    let frac = frac.trim_end_matches('0');
                    if frac.is_empty() {
                        whole.to_string()
                    } else {
                        format!("{}.{}", whole, frac)
                    }
                }
                None => raw,
            };

            if normalized.len() == 1 {
                None
            } else {
                Some(normalized)
            }
        })
        .collect()
}

/// Engine with the standard grounding rules.
pub fn create_default_verification_engine() -> VerificationEngine {
    let mut engine = VerificationEngine::new();
    engine.add_rule(Box::new(EvidencePresentRule));
    engine.add_rule(Box::new(FigureGroundingRule));
    engine
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(text: &str) -> PassageRef {
        PassageRef {
            text: text.to_string(),
            source_locator: "page-1/chunk-0".to_string(),
            score: 0.9,
        }
    }

    #[test]
    fn test_figures_are_normalised() {
        assert_eq!(
            extract_figures("Revenue was $394,328 million, up 7.80% in 2022."),
            vec!["394328", "7.8", "2022"]
        );
        assert!(extract_figures("3 segments").is_empty());
    }

    #[test]
    fn test_grounded_draft_passes() {
        let passages = vec![passage("Total net sales were $394.3 billion in fiscal 2022.")];
        let input = GroundingInput {
            draft: "Revenue was $394.3 billion [1] in fiscal 2022.",
            passages: &passages,
            evidence: &passages[0].text,
        };

        let report = create_default_verification_engine().verify(&input);
        assert!(report.passed());
        assert_eq!(report.checks.len(), 2);
    }

    #[test]
    fn test_ungrounded_figure_fails_with_name() {
        let passages = vec![passage("Total net sales were $394.3 billion.")];
        let input = GroundingInput {
            draft: "1. Revenue was $410.0 billion [1].\n2. Margins held.",
            passages: &passages,
            evidence: &passages[0].text,
        };

        let report = create_default_verification_engine().verify(&input);
        assert!(!report.passed());
        assert_eq!(report.unsupported_claims, vec!["figure 410"]);
        assert!(report.issues[0].contains("410"));
    }

    #[test]
    fn test_no_passages_fails() {
        let input = GroundingInput {
            draft: "Nothing to say.",
            passages: &[],
            evidence: "",
        };

        let report = create_default_verification_engine().verify(&input);
        assert!(!report.passed());
        assert!(report.issues[0].starts_with("evidence_present"));
    }
}
