use async_trait::async_trait;

use crate::event::{Event, EventType, Producer, ToolDescriptor};
use crate::finding::ResultEnvelope;

/// Shared filter + dispatch contract every detector implements.
///
/// `should_process`/`handle_event` form a hard boundary: whatever `process`
/// does internally, a panic or error inside it must never reach the hub.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Stable name used for logging and for the hub's catalog-insert
    /// special case (see `ToolCatalogEngine`).
    fn name(&self) -> &str;

    /// Event types this engine wants to see. An empty slice means
    /// unconstrained (matches any type).
    fn event_types(&self) -> &[EventType];

    /// Producers this engine wants to see. An empty slice means
    /// unconstrained (matches any producer).
    fn producers(&self) -> &[Producer];

    /// Default filter: event type and producer must both match (or be
    /// unconstrained). Engines needing finer filtering override this.
    fn should_process(&self, event: &Event) -> bool {
        let type_ok = self.event_types().is_empty() || self.event_types().contains(&event.event_type);
        let producer_ok = self.producers().is_empty() || self.producers().contains(&event.producer);
        type_ok && producer_ok
    }

    /// The engine's actual analysis. May fail; failures are caught by
    /// `handle_event` and turned into `None`.
    async fn process(&self, event: &Event) -> anyhow::Result<Option<ResultEnvelope>>;

    /// Filters, then processes, catching any error from `process`. This is
    /// the only entry point the hub calls.
    async fn handle_event(&self, event: &Event) -> Option<ResultEnvelope> {
        if !self.should_process(event) {
            return None;
        }
        match self.process(event).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(engine = self.name(), error = %err, "engine processing error");
                None
            }
        }
    }
}

/// Bulk entry point for engines that never see individual events through
/// `should_process`/`handle_event` at all — the tool-poisoning engine's
/// `should_process` is always `false`; the hub instead calls this directly
/// once per batch of newly-inserted tool descriptors, right after a
/// `tools/list` response is persisted (§4.2, §4.6, §9). Kept as a distinct
/// trait rather than a method on `Engine` so ordinary per-event engines
/// never need a no-op implementation of it.
#[async_trait]
pub trait ToolCatalogEngine: Send + Sync {
    async fn process_tools(&self, tools: Vec<ToolDescriptor>, event: &Event) -> Vec<ResultEnvelope>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use async_trait::async_trait;

    struct ConcreteEngine {
        name: String,
        event_types: Vec<EventType>,
        producers: Vec<Producer>,
    }

    #[async_trait]
    impl Engine for ConcreteEngine {
        fn name(&self) -> &str {
            &self.name
        }
        fn event_types(&self) -> &[EventType] {
            &self.event_types
        }
        fn producers(&self) -> &[Producer] {
            &self.producers
        }
        async fn process(&self, _event: &Event) -> anyhow::Result<Option<ResultEnvelope>> {
            Ok(None)
        }
    }

    struct FailingEngine;

    #[async_trait]
    impl Engine for FailingEngine {
        fn name(&self) -> &str {
            "FailingEngine"
        }
        fn event_types(&self) -> &[EventType] {
            &[]
        }
        fn producers(&self) -> &[Producer] {
            &[]
        }
        async fn process(&self, _event: &Event) -> anyhow::Result<Option<ResultEnvelope>> {
            anyhow::bail!("intentional error")
        }
    }

    fn sample_event(event_type: EventType, producer: Producer) -> Event {
        Event {
            event_type,
            producer,
            ts: 1,
            mcp_tag: Some("srv".to_string()),
            data: serde_json::json!({}),
            raw_event_id: None,
        }
    }

    #[test]
    fn should_process_matching_event_type() {
        let engine = ConcreteEngine {
            name: "TestEngine".into(),
            event_types: vec![EventType::Mcp],
            producers: vec![],
        };
        assert!(engine.should_process(&sample_event(EventType::Mcp, Producer::Local)));
    }

    #[test]
    fn should_not_process_non_matching_event_type() {
        let engine = ConcreteEngine {
            name: "TestEngine".into(),
            event_types: vec![EventType::File],
            producers: vec![],
        };
        assert!(!engine.should_process(&sample_event(EventType::Mcp, Producer::Local)));
    }

    #[test]
    fn should_process_with_no_filters() {
        let engine = ConcreteEngine {
            name: "TestEngine".into(),
            event_types: vec![],
            producers: vec![],
        };
        assert!(engine.should_process(&sample_event(EventType::Mcp, Producer::Local)));
    }

    #[tokio::test]
    async fn handle_event_rejects_filtered_event() {
        let engine = ConcreteEngine {
            name: "TestEngine".into(),
            event_types: vec![EventType::File],
            producers: vec![],
        };
        let result = engine
            .handle_event(&sample_event(EventType::Mcp, Producer::Local))
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn handle_event_swallows_errors() {
        let engine = FailingEngine;
        let result = engine
            .handle_event(&sample_event(EventType::Mcp, Producer::Local))
            .await;
        assert!(result.is_none());
    }
}
