use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::PersistenceError;
use crate::event::{Event, Producer, ToolDescriptor};
use crate::finding::ResultEnvelope;

/// Abstract contract over the store (C6). A production implementation
/// (relational database, UI fan-out) lives outside this crate; what's here
/// is the interface plus one in-memory implementation good enough for
/// tests, `replay`, and standalone operation.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn insert_raw_event(&self, event: &Event) -> Option<i64>;
    async fn insert_rpc_event(&self, event: &Event, raw_event_id: i64);
    async fn insert_file_event(&self, event: &Event, raw_event_id: i64);
    async fn insert_process_event(&self, event: &Event, raw_event_id: i64);

    /// Upsert tool descriptors discovered on this event. Returns only the
    /// descriptors that were newly inserted — load-bearing for the
    /// tool-poisoning engine's once-per-tool contract (§4.2, §9).
    async fn insert_tool_catalog(&self, descriptors: Vec<ToolDescriptor>) -> Vec<ToolDescriptor>;

    async fn insert_engine_result(
        &self,
        result: &ResultEnvelope,
        raw_event_id: Option<i64>,
        server_name: Option<String>,
        producer: Producer,
    ) -> Result<i64, PersistenceError>;

    async fn query_tools_by(&self, mcp_tag: &str, producer: Producer) -> Vec<ToolDescriptor>;
}

/// `DashMap`-backed reference implementation. Thread-safe, process-local,
/// unbounded — fine for tests and single-session standalone operation.
#[derive(Default)]
pub struct InMemoryStore {
    next_event_id: AtomicI64,
    next_result_id: AtomicI64,
    raw_events: DashMap<i64, Event>,
    tool_catalog: DashMap<(String, Producer, String), ToolDescriptor>,
    results: Mutex<Vec<ResultEnvelope>>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All results persisted so far, for test assertions.
    pub fn results(&self) -> Vec<ResultEnvelope> {
        self.results.lock().clone()
    }
}

#[async_trait]
impl Persistence for InMemoryStore {
    async fn insert_raw_event(&self, event: &Event) -> Option<i64> {
        let id = self.next_event_id.fetch_add(1, Ordering::SeqCst);
        self.raw_events.insert(id, event.clone());
        Some(id)
    }

    async fn insert_rpc_event(&self, _event: &Event, _raw_event_id: i64) {}
    async fn insert_file_event(&self, _event: &Event, _raw_event_id: i64) {}
    async fn insert_process_event(&self, _event: &Event, _raw_event_id: i64) {}

    async fn insert_tool_catalog(&self, descriptors: Vec<ToolDescriptor>) -> Vec<ToolDescriptor> {
        let mut inserted = Vec::new();
        for descriptor in descriptors {
            let key = descriptor.key();
            if self.tool_catalog.contains_key(&key) {
                continue;
            }
            self.tool_catalog.insert(key, descriptor.clone());
            inserted.push(descriptor);
        }
        inserted
    }

    async fn insert_engine_result(
        &self,
        result: &ResultEnvelope,
        _raw_event_id: Option<i64>,
        _server_name: Option<String>,
        _producer: Producer,
    ) -> Result<i64, PersistenceError> {
        let id = self.next_result_id.fetch_add(1, Ordering::SeqCst);
        self.results.lock().push(result.clone());
        Ok(id)
    }

    async fn query_tools_by(&self, mcp_tag: &str, producer: Producer) -> Vec<ToolDescriptor> {
        self.tool_catalog
            .iter()
            .filter(|entry| {
                let (tag, prod, _) = entry.key();
                tag == mcp_tag && *prod == producer
            })
            .map(|entry| entry.value().clone())
            .collect()
    }
}
