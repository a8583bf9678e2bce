//! Path-exposure detector: flags MCP tool-call arguments that reference
//! system, credential, or otherwise sensitive filesystem paths (§4.5).

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::engine::Engine;
use crate::event::{Event, EventType, Producer};
use crate::finding::{Category, Finding, ResultEnvelope, Severity};

const PATH_FIELDS: &[&str] = &["path", "file", "filepath", "directory", "folder", "location"];

const CRITICAL_EXACT: &[&str] = &[
    "/etc/passwd",
    "/etc/shadow",
    "/etc/sudoers",
    "C:\\Windows\\System32\\config\\SAM",
    "C:\\boot.ini",
];

const CRITICAL_PREFIX: &[&str] = &["/root/.ssh/", "/proc/self/", "C:\\Windows\\SysWOW64\\"];

const DANGEROUS_EXTENSIONS: &[&str] = &[".key", ".pem", ".env", ".ini"];

const TRAVERSAL_SUBSTRINGS: &[&str] = &["../", "..\\", "%2e%2e%2f", "%252e%252e%252f"];

static CREDENTIAL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"\.ssh/id_").unwrap(),
        Regex::new(r"\.aws/credentials").unwrap(),
        Regex::new(r"\.kube/config").unwrap(),
        Regex::new(r"\.docker/config\.json").unwrap(),
    ]
});

fn is_critical(path: &str) -> bool {
    CRITICAL_EXACT.contains(&path) || CRITICAL_PREFIX.iter().any(|prefix| path.starts_with(prefix))
}

fn is_credential(path: &str) -> bool {
    CREDENTIAL_PATTERNS.iter().any(|pattern| pattern.is_match(path))
}

fn is_dangerous_extension(path: &str) -> bool {
    DANGEROUS_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn is_traversal(path: &str) -> bool {
    let lowered = path.to_lowercase();
    TRAVERSAL_SUBSTRINGS.iter().any(|needle| lowered.contains(needle))
}

/// Each path segment beyond 4 contributes a small bonus to the score.
fn depth_bonus(path: &str) -> i32 {
    let segments = path
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty())
        .count() as i32;
    (segments - 4).max(0) * 3
}

fn walk_for_paths(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                if PATH_FIELDS.contains(&key.as_str()) {
                    match v {
                        Value::String(s) => out.push(s.clone()),
                        Value::Array(items) => {
                            for item in items {
                                if let Some(s) = item.as_str() {
                                    out.push(s.to_string());
                                }
                            }
                        }
                        _ => {}
                    }
                }
                walk_for_paths(v, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_for_paths(item, out);
            }
        }
        _ => {}
    }
}

pub struct FileSystemExposureEngine {
    event_types: Vec<EventType>,
    producers: Vec<Producer>,
}

impl Default for FileSystemExposureEngine {
    fn default() -> Self {
        Self {
            event_types: vec![EventType::Mcp],
            producers: vec![Producer::Local, Producer::Remote],
        }
    }
}

impl FileSystemExposureEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn extract_paths_from_fields(&self, event: &Event) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(params) = event.message().and_then(|m| m.get("params")) {
            walk_for_paths(params, &mut out);
        }
        out
    }

    /// Aggregate score and matched-rule names for a single path, used for
    /// quick triage independent of the full findings-with-reasons path.
    fn check_system_keywords(&self, path: &str) -> (i32, Vec<String>) {
        let mut matches = Vec::new();
        let mut score = 0;
        if is_critical(path) {
            score += 50;
            matches.push("critical_system_path".to_string());
        }
        if is_credential(path) {
            score += 30;
            matches.push("credential_file".to_string());
        }
        if is_dangerous_extension(path) {
            score += 15;
            matches.push("dangerous_extension".to_string());
        }
        (score, matches)
    }

    fn calculate_depth_score(&self, path: &str) -> i32 {
        depth_bonus(path)
    }

    fn findings_for_path(&self, path: &str) -> Vec<Finding> {
        let mut findings = Vec::new();

        if is_critical(path) {
            findings.push(Finding::new(
                Category::High,
                "critical_system_path",
                path,
                "path matches a critical system file",
            ));
        }
        if is_credential(path) {
            findings.push(Finding::new(
                Category::Medium,
                "credential_file",
                path,
                "path matches a credential or key file pattern",
            ));
        }
        if is_dangerous_extension(path) {
            findings.push(Finding::new(
                Category::Low,
                "dangerous_extension",
                path,
                "path has a dangerous file extension",
            ));
        }
        if is_traversal(path) {
            findings.push(Finding::new(
                Category::High,
                "path_traversal",
                path,
                "path contains a traversal sequence",
            ));
        }
        let depth = depth_bonus(path);
        if depth > 0 {
            findings.push(Finding::new(
                Category::Low,
                "path_depth",
                path,
                format!("path depth exceeds threshold (+{depth})"),
            ));
        }

        findings
    }

    fn calculate_score(&self, severity: Severity, findings_count: usize) -> u8 {
        let base: i32 = match severity {
            Severity::High => 85,
            Severity::Medium => 50,
            Severity::Low => 25,
            Severity::None => 0,
        };
        let bonus = (5 * findings_count as i32).min(15);
        (base + bonus).min(100) as u8
    }
}

#[async_trait]
impl Engine for FileSystemExposureEngine {
    fn name(&self) -> &str {
        "FileSystemExposureEngine"
    }

    fn event_types(&self) -> &[EventType] {
        &self.event_types
    }

    fn producers(&self) -> &[Producer] {
        &self.producers
    }

    async fn process(&self, event: &Event) -> anyhow::Result<Option<ResultEnvelope>> {
        let paths = self.extract_paths_from_fields(event);
        if paths.is_empty() {
            return Ok(None);
        }

        let mut findings = Vec::new();
        for path in &paths {
            findings.extend(self.findings_for_path(path));
        }

        if findings.is_empty() {
            return Ok(None);
        }

        let severity = findings
            .iter()
            .map(|f| Severity::from_category(f.category))
            .fold(Severity::None, Severity::max);

        let evaluation = self.calculate_score(severity, findings.len());
        let envelope =
            ResultEnvelope::for_event(event, "FileSystemExposure", severity, evaluation, findings);
        Ok(Some(envelope))
    }
}
