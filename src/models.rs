//! Core data models for document analysis

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

//
// ================= Scope & Passages =================
//

/// Namespace of indexed document(s) a request searches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentScope(String);

impl DocumentScope {
    pub fn new(scope: impl Into<String>) -> Self {
        Self(scope.into())
    }

    /// Fresh namespace, unique per call, for an ad-hoc upload.
    pub fn ephemeral(suffix: &str) -> Self {
        Self(format!("ephemeral/{}/{}", suffix, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_ephemeral(&self) -> bool {
        self.0.starts_with("ephemeral/")
    }
}

impl fmt::Display for DocumentScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extracted text fragment ready for indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub locator: String,
}

impl Chunk {
    pub fn new(text: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            locator: locator.into(),
        }
    }
}

/// A retrieved passage. `score` orders results of one query only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageRef {
    pub text: String,
    pub source_locator: String,
    pub score: f32,
}

//
// ================= Enrichment =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Severity {
    #[serde(rename = "LOW", alias = "Low", alias = "low")]
    Low,
    #[serde(rename = "MED", alias = "MEDIUM", alias = "Med", alias = "Medium", alias = "med", alias = "medium")]
    Med,
    #[serde(rename = "HIGH", alias = "High", alias = "high")]
    High,
}

impl Severity {
    fn rank(&self) -> u8 {
        match self {
            Severity::Low => 0,
            Severity::Med => 1,
            Severity::High => 2,
        }
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "LOW",
            Severity::Med => "MED",
            Severity::High => "HIGH",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSignal {
    pub source: String,
    pub description: String,
    pub severity: Severity,
}

/// External risk context for one detected entity (country or region).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentBundle {
    pub entity: String,
    pub risk_signals: Vec<RiskSignal>,
}

impl EnrichmentBundle {
    /// Prompt-ready rendering of the bundle.
    pub fn render(&self) -> String {
        if self.risk_signals.is_empty() {
            return format!("No external risk signals available for {}.", self.entity);
        }

        let mut lines = vec![format!("Geopolitical Risk Assessment for {}:", self.entity)];
        for signal in &self.risk_signals {
            lines.push(format!(
                "- [{}] {} (source: {})",
                signal.severity, signal.description, signal.source
            ));
        }
        lines.join("\n")
    }
}

//
// ================= Verification =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerificationStatus {
    Pass,
    Fail,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationStatus::Pass => write!(f, "PASS"),
            VerificationStatus::Fail => write!(f, "FAIL"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCheck {
    pub rule_name: String,
    pub passed: bool,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub status: VerificationStatus,
    /// Names the unsupported claim or missing fact on FAIL
    pub reason: String,
    #[serde(default)]
    pub unsupported_claims: Vec<String>,
    #[serde(default)]
    pub missing_facts: Vec<String>,
    #[serde(default)]
    pub checks: Vec<RuleCheck>,
    pub verified_at: DateTime<Utc>,
}

impl Verification {
    pub fn passed(&self) -> bool {
        self.status == VerificationStatus::Pass
    }
}

//
// ================= Intelligence Report =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HighlightIcon {
    Chart,
    Growth,
    Calendar,
    Alert,
    #[default]
    Check,
    Globe,
    Chain,
    Dollar,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Highlight {
    #[serde(default)]
    pub icon: HighlightIcon,
    pub text: String,
    #[serde(default)]
    pub metric_value: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SentimentDirection {
    Improving,
    Stable,
    Declining,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sentiment {
    /// 0–100
    pub score: u8,
    pub direction: SentimentDirection,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RiskLevel {
    #[serde(rename = "LOW", alias = "Low", alias = "low")]
    Low,
    #[serde(rename = "MED", alias = "MEDIUM", alias = "MODERATE", alias = "Moderate", alias = "Medium", alias = "med")]
    Med,
    #[serde(rename = "HIGH", alias = "High", alias = "high")]
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskFactor {
    pub name: String,
    pub severity: Severity,
}

/// Structured insights. Either complete or absent, never partial.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntelligenceReport {
    #[serde(alias = "key_highlights")]
    pub highlights: Vec<Highlight>,
    pub sentiment: Sentiment,
    pub risk_level: RiskLevel,
    pub risk_factors: Vec<RiskFactor>,
    pub suggested_questions: Vec<String>,
}

//
// ================= Final Result =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub request_id: Uuid,
    pub answer: String,
    pub verification_status: VerificationStatus,
    pub verification_reason: String,
    /// Set when retries were exhausted without a PASS
    pub low_confidence: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insights: Option<IntelligenceReport>,
    pub retrieved_source_locators: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentBundle>,
    pub retry_count: u32,
    pub audit_id: Uuid,
    pub reasoning_trace: Vec<String>,
}
