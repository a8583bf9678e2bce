//! Static pattern matcher for shell/command injection payloads riding
//! inside MCP tool-call arguments (§4.4).

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::engine::Engine;
use crate::event::{Event, EventType, Producer};
use crate::finding::{Category, Finding, ResultEnvelope, Severity};

struct Tier {
    category: Category,
    pattern: Regex,
}

static CRITICAL_PATTERNS: Lazy<Vec<Tier>> = Lazy::new(|| {
    vec![
        Tier {
            category: Category::Critical,
            pattern: Regex::new(r"(;|\||&&)\s*rm\b").unwrap(),
        },
        Tier {
            category: Category::Critical,
            pattern: Regex::new(r"eval\s*\(").unwrap(),
        },
        Tier {
            category: Category::Critical,
            pattern: Regex::new(r"`[^`]*\b(curl|wget|sh)\b[^`]*`").unwrap(),
        },
    ]
});

static HIGH_PATTERNS: Lazy<Vec<Tier>> = Lazy::new(|| {
    vec![
        Tier {
            category: Category::High,
            pattern: Regex::new(r"(;|\||&&)\s*(wget|curl|bash|nc)\b").unwrap(),
        },
        Tier {
            category: Category::High,
            pattern: Regex::new(r"\$\([^)]*\)").unwrap(),
        },
        Tier {
            category: Category::High,
            pattern: Regex::new(r"`[^`]*`").unwrap(),
        },
    ]
});

static MEDIUM_PATTERNS: Lazy<Vec<Tier>> = Lazy::new(|| {
    vec![
        Tier {
            category: Category::Medium,
            pattern: Regex::new(r"(?i)\bcmd\s*/c\b").unwrap(),
        },
        Tier {
            category: Category::Medium,
            pattern: Regex::new(r"\bbash\s+-c\b").unwrap(),
        },
        Tier {
            category: Category::Medium,
            pattern: Regex::new(r"(?i)\bpowershell\b").unwrap(),
        },
        Tier {
            category: Category::Medium,
            pattern: Regex::new(r"\bping\s+-t\b").unwrap(),
        },
    ]
});

const DANGEROUS_COMMANDS: &[&str] = &["rm", "del", "wget", "curl", "nc", "chmod"];

static DANGEROUS_PATTERNS: Lazy<Vec<(String, Regex)>> = Lazy::new(|| {
    DANGEROUS_COMMANDS
        .iter()
        .map(|cmd| {
            let pattern = Regex::new(&format!(r"\b{cmd}\b")).unwrap();
            (cmd.to_string(), pattern)
        })
        .collect()
});

pub struct CommandInjectionEngine {
    event_types: Vec<EventType>,
    producers: Vec<Producer>,
}

impl Default for CommandInjectionEngine {
    fn default() -> Self {
        Self {
            event_types: vec![EventType::Mcp],
            producers: vec![Producer::Local, Producer::Remote],
        }
    }
}

impl CommandInjectionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenate `data.task`, `message.method`, and the serialized
    /// `message.params` into one analysis string.
    fn extract_analysis_text(&self, event: &Event) -> String {
        let task = event
            .data
            .get("task")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let method = event.method().unwrap_or("");
        let params = event
            .message()
            .and_then(|m| m.get("params"))
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let params_text = serde_json::to_string(&params).unwrap_or_default();
        format!("{task} {method} {params_text}")
    }

    fn find_findings(&self, text: &str) -> Vec<Finding> {
        let mut findings = Vec::new();

        for tier in CRITICAL_PATTERNS.iter().chain(HIGH_PATTERNS.iter()).chain(MEDIUM_PATTERNS.iter()) {
            if let Some(m) = tier.pattern.find(text) {
                findings.push(
                    Finding::new(
                        tier.category,
                        "command_injection",
                        m.as_str(),
                        format!("matched {:?}-tier command-injection pattern", tier.category),
                    )
                    .with_pattern(tier.pattern.as_str()),
                );
            }
        }

        for (name, pattern) in DANGEROUS_PATTERNS.iter() {
            if let Some(m) = pattern.find(text) {
                findings.push(
                    Finding::new(
                        Category::Medium,
                        "dangerous_command",
                        m.as_str(),
                        format!("bare invocation of dangerous command '{name}'"),
                    )
                    .with_pattern(pattern.as_str()),
                );
            }
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
        let bonus = (3 * findings_count as i32).min(15);
        (base + bonus).min(100) as u8
    }
}

#[async_trait]
impl Engine for CommandInjectionEngine {
    fn name(&self) -> &str {
        "CommandInjectionEngine"
    }

    fn event_types(&self) -> &[EventType] {
        &self.event_types
    }

    fn producers(&self) -> &[Producer] {
        &self.producers
    }

    async fn process(&self, event: &Event) -> anyhow::Result<Option<ResultEnvelope>> {
        let text = self.extract_analysis_text(event);
        let findings = self.find_findings(&text);

        if findings.is_empty() {
            return Ok(None);
        }

        let severity = findings
            .iter()
            .map(|f| Severity::from_category(f.category))
            .fold(Severity::None, Severity::max);

        let evaluation = self.calculate_score(severity, findings.len());
        let mut envelope =
            ResultEnvelope::for_event(event, "CommandInjection", severity, evaluation, findings);
        envelope.result.analysis_text = Some(text);
        Ok(Some(envelope))
    }
}
