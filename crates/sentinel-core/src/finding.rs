use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::Event;

/// Tier of a single piece of evidence. `Result::severity` collapses
/// `Critical` into `High` — there is no `critical` severity, only findings
/// carry that tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Low,
    Medium,
    High,
    Critical,
}

/// One piece of evidence contributing to a [`Result`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub category: Category,
    #[serde(rename = "type")]
    pub finding_type: String,
    pub matched_text: String,
    pub reason: String,
    /// Present on findings where the detector matched a specific regex
    /// (command injection); other detectors leave it `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Grab-bag for engine-specific fields (e.g. the exfiltration engine's
    /// origin annotations) that don't warrant their own struct field.
    #[serde(flatten, skip_serializing_if = "Value::is_null")]
    pub extra: Value,
}

impl Finding {
    pub fn new(
        category: Category,
        finding_type: impl Into<String>,
        matched_text: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            category,
            finding_type: finding_type.into(),
            matched_text: matched_text.into(),
            reason: reason.into(),
            pattern: None,
            extra: Value::Null,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = extra;
        self
    }
}

/// Overall severity of a [`Result`]. No `critical` member — findings carry
/// that tier, results cap out at `high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
}

impl Severity {
    /// Collapse a finding's category into a result severity.
    pub fn from_category(category: Category) -> Self {
        match category {
            Category::Low => Severity::Low,
            Category::Medium => Severity::Medium,
            Category::High | Category::Critical => Severity::High,
        }
    }

    pub fn max(self, other: Self) -> Self {
        if self >= other { self } else { other }
    }
}

/// The body of a detection result, carried inside a [`ResultEnvelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detector: String,
    pub severity: Severity,
    pub evaluation: u8,
    pub findings: Vec<Finding>,
    pub event_type: String,
    pub producer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracked_emails_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_text: Option<String>,
    pub original_event: Value,
}

/// `{reference, result}` — what an engine hands back to the hub and the hub
/// persists via `insert_engine_result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub reference: Vec<String>,
    pub result: DetectionResult,
}

impl ResultEnvelope {
    /// Build the envelope's `reference` list and `original_event` payload
    /// from the triggering event, the way every engine does it.
    pub fn for_event(
        event: &Event,
        detector: impl Into<String>,
        severity: Severity,
        evaluation: u8,
        findings: Vec<Finding>,
    ) -> Self {
        let reference = vec![format!("id-{}", event.ts)];
        let original_event = serde_json::to_value(event).unwrap_or(Value::Null);
        Self {
            reference,
            result: DetectionResult {
                detector: detector.into(),
                severity,
                evaluation,
                findings,
                event_type: format!("{:?}", event.event_type),
                producer: format!("{:?}", event.producer).to_lowercase(),
                tool_name: None,
                tracked_emails_count: None,
                analysis_text: None,
                original_event,
            },
        }
    }
}
