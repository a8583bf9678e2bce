//! Zero-click data exfiltration detector (§4.7).
//!
//! Tracks email addresses surfacing in MCP tool-call *responses* (where a
//! poisoned tool description or result can plant one), then flags any
//! later `send_email`-style tool call whose recipient matches a tracked
//! address — the LLM relaying an address it was never given by the user.
//! The tracking table is this engine's own state: process-local, never
//! persisted, and it only grows for the life of the process (§5).

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use crate::engine::Engine;
use crate::event::{Event, EventType, Producer, Task};
use crate::finding::{Category, Finding, ResultEnvelope, Severity};

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap());

const EMAIL_TOOL_KEYWORDS: &[&str] = &["send_email", "gmail_send_email"];
const RECIPIENT_FIELDS: &[&str] = &["to", "cc", "bcc", "recipient_email"];

#[derive(Debug, Clone)]
struct TrackedEmail {
    source: String,
    mcp_tag: String,
    timestamp: i64,
    context: String,
}

fn is_email_tool(tool_name: &str) -> bool {
    if tool_name.is_empty() {
        return false;
    }
    let lowered = tool_name.to_lowercase();
    EMAIL_TOOL_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

/// Recursively flattens every string value in a JSON structure into one
/// space-joined blob, bounded by `max_depth` to cap pathological nesting.
fn extract_text_from_dict(value: &Value, max_depth: u8) -> String {
    if max_depth == 0 {
        return String::new();
    }

    let mut parts = Vec::new();
    match value {
        Value::Object(map) => {
            for v in map.values() {
                match v {
                    Value::String(s) => parts.push(s.clone()),
                    Value::Object(_) | Value::Array(_) => {
                        parts.push(extract_text_from_dict(v, max_depth - 1))
                    }
                    _ => {}
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::String(s) => parts.push(s.clone()),
                    Value::Object(_) | Value::Array(_) => {
                        parts.push(extract_text_from_dict(item, max_depth - 1))
                    }
                    _ => {}
                }
            }
        }
        Value::String(s) => parts.push(s.clone()),
        _ => {}
    }
    parts.join(" ")
}

fn context_window(text: &str, start: usize, len: usize, radius: usize) -> String {
    let lo = text
        .char_indices()
        .rev()
        .find(|(i, _)| *i <= start.saturating_sub(radius))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let hi_target = start + len + radius;
    let hi = text
        .char_indices()
        .map(|(i, _)| i)
        .find(|i| *i >= hi_target)
        .unwrap_or(text.len());
    text.get(lo..hi).unwrap_or(text).to_string()
}

fn extract_recipient_emails(arguments: &Value) -> Vec<(String, String)> {
    let mut recipients = Vec::new();
    let Some(arguments) = arguments.as_object() else {
        return recipients;
    };

    for field in RECIPIENT_FIELDS {
        let Some(value) = arguments.get(*field) else {
            continue;
        };
        match value {
            Value::String(s) => {
                for m in EMAIL_PATTERN.find_iter(s) {
                    recipients.push((field.to_string(), m.as_str().to_string()));
                }
            }
            Value::Array(items) => {
                for item in items {
                    if let Some(s) = item.as_str() {
                        for m in EMAIL_PATTERN.find_iter(s) {
                            recipients.push((field.to_string(), m.as_str().to_string()));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    recipients
}

pub struct DataExfiltrationEngine {
    event_types: Vec<EventType>,
    producers: Vec<Producer>,
    registry: DashMap<String, TrackedEmail>,
}

impl Default for DataExfiltrationEngine {
    fn default() -> Self {
        Self {
            event_types: vec![EventType::Mcp],
            producers: vec![Producer::Local, Producer::Remote],
            registry: DashMap::new(),
        }
    }
}

impl DataExfiltrationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of addresses currently tracked, for result metadata and tests.
    pub fn tracked_email_count(&self) -> usize {
        self.registry.len()
    }

    fn track_emails_from_response(&self, result: &Value, event: &Event) {
        let text = extract_text_from_dict(result, 10);
        if text.is_empty() {
            return;
        }

        let mcp_tag = event.mcp_tag();
        for m in EMAIL_PATTERN.find_iter(&text) {
            let email = m.as_str();
            let context = context_window(&text, m.start(), email.len(), 50);
            self.registry.insert(
                email.to_lowercase(),
                TrackedEmail {
                    source: "tool_response".to_string(),
                    mcp_tag: mcp_tag.clone(),
                    timestamp: event.ts,
                    context,
                },
            );
        }
    }

    fn detect_exfiltration_in_tool_call(&self, message: &Value, event: &Event) -> Option<ResultEnvelope> {
        let params = message.get("params");
        let tool_name = params
            .and_then(|p| p.get("name"))
            .and_then(|v| v.as_str())
            .or_else(|| params.and_then(|p| p.get("tool_slug")).and_then(|v| v.as_str()))
            .unwrap_or("")
            .to_string();

        if !is_email_tool(&tool_name) {
            return None;
        }

        let arguments = params.and_then(|p| p.get("arguments")).cloned().unwrap_or(Value::Null);
        let recipients = extract_recipient_emails(&arguments);
        if recipients.is_empty() {
            return None;
        }

        let mut findings = Vec::new();
        for (field, email) in recipients {
            let lower = email.to_lowercase();
            let Some(tracked) = self.registry.get(&lower) else {
                continue;
            };
            let reason = format!(
                "Email '{email}' in '{field}' field originated from {} - zero-click exfiltration detected",
                tracked.source
            );
            let finding = Finding::new(Category::Critical, "zero_click_exfiltration", &email, reason).with_extra(json!({
                "tool_name": tool_name,
                "field": field,
                "origin_source": tracked.source,
                "origin_mcp_tag": tracked.mcp_tag,
                "origin_timestamp": tracked.timestamp,
                "origin_context": tracked.context,
            }));
            findings.push(finding);
        }

        if findings.is_empty() {
            return None;
        }

        // Zero-click exfiltration is always high severity (§4.7).
        let severity = Severity::High;
        let evaluation = self.calculate_score(findings.len());

        let mut envelope = ResultEnvelope::for_event(event, "DataExfiltration", severity, evaluation, findings);
        envelope.result.tool_name = Some(tool_name);
        envelope.result.tracked_emails_count = Some(self.registry.len());
        Some(envelope)
    }

    fn calculate_score(&self, findings_count: usize) -> u8 {
        let base: i32 = 95;
        let bonus = (findings_count as i32).min(5);
        (base + bonus).min(100) as u8
    }
}

#[async_trait]
impl Engine for DataExfiltrationEngine {
    fn name(&self) -> &str {
        "DataExfiltrationEngine"
    }

    fn event_types(&self) -> &[EventType] {
        &self.event_types
    }

    fn producers(&self) -> &[Producer] {
        &self.producers
    }

    async fn process(&self, event: &Event) -> anyhow::Result<Option<ResultEnvelope>> {
        let Some(message) = event.message() else {
            return Ok(None);
        };
        let task = event.task();
        let method = event.method().unwrap_or("");

        if task == Some(Task::Recv) && message.get("result").is_some() {
            self.track_emails_from_response(message.get("result").unwrap(), event);
            return Ok(None);
        }

        if method == "tools/call" && task == Some(Task::Send) {
            return Ok(self.detect_exfiltration_in_tool_call(message, event));
        }

        Ok(None)
    }
}
