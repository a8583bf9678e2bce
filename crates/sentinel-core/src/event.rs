use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Origin tag for an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    #[serde(rename = "MCP")]
    Mcp,
    File,
    Process,
    Other,
}

/// Where an event originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Producer {
    Local,
    Remote,
    Unknown,
}

/// JSON-RPC direction tag carried under `data.task` for MCP events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Task {
    #[serde(rename = "SEND")]
    Send,
    #[serde(rename = "RECV")]
    Recv,
}

/// One observed message on the wire. Immutable once handed to the hub, except
/// for `raw_event_id`, which persistence fills in during dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "eventType")]
    pub event_type: EventType,
    pub producer: Producer,
    pub ts: i64,
    #[serde(rename = "mcpTag", skip_serializing_if = "Option::is_none")]
    pub mcp_tag: Option<String>,
    pub data: Value,
    #[serde(rename = "raw_event_id", skip_serializing_if = "Option::is_none")]
    pub raw_event_id: Option<i64>,
}

impl Event {
    /// Parse one line of newline-delimited JSON into an `Event`.
    ///
    /// Returns `None` (never an error) on malformed input or a missing
    /// `eventType` field, per the source's "skip this line" contract.
    pub fn from_line(line: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(line).ok()?;
        if value.get("eventType").is_none() {
            return None;
        }
        serde_json::from_value(value).ok()
    }

    /// `data.task`, if present and well-formed.
    pub fn task(&self) -> Option<Task> {
        self.data
            .get("task")
            .and_then(|v| v.as_str())
            .and_then(|s| match s {
                "SEND" => Some(Task::Send),
                "RECV" => Some(Task::Recv),
                _ => None,
            })
    }

    /// `data.message`, if present.
    pub fn message(&self) -> Option<&Value> {
        self.data.get("message")
    }

    /// `data.message.method`, if present.
    pub fn method(&self) -> Option<&str> {
        self.message()?.get("method")?.as_str()
    }

    /// Resolve the owning MCP server tag. Local producers carry it at the top
    /// level; remote producers carry it nested under `data`; anything else
    /// falls back to whichever is present.
    pub fn mcp_tag(&self) -> String {
        match self.producer {
            Producer::Local => self
                .mcp_tag
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            Producer::Remote => self
                .data
                .get("mcpTag")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
            Producer::Unknown => self
                .mcp_tag
                .clone()
                .or_else(|| {
                    self.data
                        .get("mcpTag")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string())
                })
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }

    /// `eventType` as the lowercase string persistence dispatch keys on.
    pub fn event_type_key(&self) -> &'static str {
        match self.event_type {
            EventType::Mcp => "mcp",
            EventType::File => "file",
            EventType::Process => "process",
            EventType::Other => "other",
        }
    }
}

/// Metadata a server advertises via `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub mcp_tag: String,
    pub producer: Producer,
    pub tool_slug: String,
    pub title: Option<String>,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    pub annotations: Option<Value>,
}

impl ToolDescriptor {
    /// The `(mcpTag, producer, tool_slug)` dedup key.
    pub fn key(&self) -> (String, Producer, String) {
        (self.mcp_tag.clone(), self.producer, self.tool_slug.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_line_rejects_malformed_json() {
        assert!(Event::from_line("not json").is_none());
    }

    #[test]
    fn from_line_rejects_missing_event_type() {
        assert!(Event::from_line(r#"{"producer":"local"}"#).is_none());
    }

    #[test]
    fn from_line_parses_valid_event() {
        let line = r#"{"eventType":"MCP","producer":"local","ts":1,"mcpTag":"srv","data":{"task":"SEND"}}"#;
        let event = Event::from_line(line).expect("should parse");
        assert_eq!(event.task(), Some(Task::Send));
        assert_eq!(event.mcp_tag(), "srv");
    }

    #[test]
    fn mcp_tag_falls_back_to_nested_for_remote() {
        let line = r#"{"eventType":"MCP","producer":"remote","ts":1,"data":{"mcpTag":"nested-srv"}}"#;
        let event = Event::from_line(line).unwrap();
        assert_eq!(event.mcp_tag(), "nested-srv");
    }
}
