//! Central dispatch point (§4.2): persists each event, then fans it out to
//! every interested engine concurrently, then persists whatever results
//! come back. Events are processed one at a time — the hub never starts
//! persisting event N+1 before event N's engine fan-out has completed —
//! but within a single event, engines run concurrently and are joined at
//! the event boundary (§5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::engine::{Engine, ToolCatalogEngine};
use crate::event::{Event, Producer, Task, ToolDescriptor};
use crate::finding::ResultEnvelope;
use crate::persistence::Persistence;

fn extract_tool_descriptors(event: &Event) -> Vec<ToolDescriptor> {
    let mcp_tag = event.mcp_tag();
    let producer = event.producer;
    let Some(tools) = event
        .message()
        .and_then(|m| m.get("result"))
        .and_then(|r| r.get("tools"))
        .and_then(|t| t.as_array())
    else {
        return Vec::new();
    };

    tools
        .iter()
        .filter_map(|tool| {
            let tool_slug = tool.get("name")?.as_str()?.to_string();
            let description = tool.get("description").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let title = tool.get("title").and_then(|v| v.as_str()).map(|s| s.to_string());
            let input_schema = tool.get("inputSchema").cloned().unwrap_or(Value::Null);
            let annotations = tool.get("annotations").cloned();
            Some(ToolDescriptor {
                mcp_tag: mcp_tag.clone(),
                producer,
                tool_slug,
                title,
                description,
                input_schema,
                annotations,
            })
        })
        .collect()
}

pub struct EventHub {
    engines: Vec<Arc<dyn Engine>>,
    tool_catalog_engine: Option<Arc<dyn ToolCatalogEngine>>,
    persistence: Arc<dyn Persistence>,
    running: AtomicBool,
    /// `ts` → `raw_event_id`, for results that need to resolve their event
    /// id but didn't get it stamped onto `original_event` directly.
    event_id_map: DashMap<i64, i64>,
}

impl EventHub {
    pub fn new(
        engines: Vec<Arc<dyn Engine>>,
        tool_catalog_engine: Option<Arc<dyn ToolCatalogEngine>>,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            engines,
            tool_catalog_engine,
            persistence,
            running: AtomicBool::new(false),
            event_id_map: DashMap::new(),
        }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("event hub started");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("event hub stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Process a single event end to end: persist it, fan out to engines,
    /// persist whatever they found. Never propagates an engine or storage
    /// failure — each stage logs and moves on, matching the "one bad event
    /// never wedges the pipeline" contract (§5).
    pub async fn process_event(&self, mut event: Event) {
        if !self.is_running() {
            return;
        }

        let raw_event_id = self.persistence.insert_raw_event(&event).await;
        match raw_event_id {
            Some(id) => {
                event.raw_event_id = Some(id);
                self.event_id_map.insert(event.ts, id);
                self.save_type_specific(&event, id).await;
            }
            None => {
                tracing::warn!(ts = event.ts, "failed to persist raw event");
            }
        }

        let mut handles = Vec::new();
        for engine in &self.engines {
            if !engine.should_process(&event) {
                continue;
            }
            let engine = Arc::clone(engine);
            let event_clone = event.clone();
            handles.push(tokio::spawn(async move { engine.handle_event(&event_clone).await }));
        }

        for handle in handles {
            match handle.await {
                Ok(Some(envelope)) => self.save_result(envelope).await,
                Ok(None) => {}
                Err(err) => tracing::warn!(error = %err, "engine task panicked"),
            }
        }
    }

    async fn save_type_specific(&self, event: &Event, raw_event_id: i64) {
        match event.event_type_key() {
            "mcp" => {
                self.persistence.insert_rpc_event(event, raw_event_id).await;
                self.maybe_process_tool_catalog(event).await;
            }
            "file" => self.persistence.insert_file_event(event, raw_event_id).await,
            "process" => self.persistence.insert_process_event(event, raw_event_id).await,
            _ => {}
        }
    }

    /// If this is a `tools/list` RECV carrying a tool catalog, insert it and
    /// hand any newly-inserted descriptors straight to the tool-poisoning
    /// engine's bulk entry point — it never sees individual events (§4.6).
    async fn maybe_process_tool_catalog(&self, event: &Event) {
        if event.task() != Some(Task::Recv) {
            return;
        }
        let descriptors = extract_tool_descriptors(event);
        if descriptors.is_empty() {
            return;
        }

        let inserted = self.persistence.insert_tool_catalog(descriptors).await;
        if inserted.is_empty() {
            return;
        }

        let Some(engine) = &self.tool_catalog_engine else {
            return;
        };

        tracing::info!(count = inserted.len(), "dispatching newly inserted tools to catalog engine");
        for envelope in engine.process_tools(inserted, event).await {
            self.save_result(envelope).await;
        }
    }

    async fn save_result(&self, envelope: ResultEnvelope) {
        let raw_event_id = envelope
            .result
            .original_event
            .get("raw_event_id")
            .and_then(|v| v.as_i64())
            .or_else(|| {
                envelope
                    .result
                    .original_event
                    .get("ts")
                    .and_then(|v| v.as_i64())
                    .and_then(|ts| self.event_id_map.get(&ts).map(|id| *id))
            });

        let server_name = envelope
            .result
            .original_event
            .get("mcpTag")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let producer = envelope
            .result
            .original_event
            .get("producer")
            .and_then(|v| v.as_str())
            .and_then(|s| match s {
                "local" => Some(Producer::Local),
                "remote" => Some(Producer::Remote),
                _ => Some(Producer::Unknown),
            })
            .unwrap_or(Producer::Unknown);

        match self
            .persistence
            .insert_engine_result(&envelope, raw_event_id, server_name, producer)
            .await
        {
            Ok(id) => tracing::info!(
                id,
                detector = envelope.result.detector,
                severity = ?envelope.result.severity,
                "saved detection result"
            ),
            Err(err) => tracing::warn!(error = %err, "failed to save detection result"),
        }
    }
}
