//! Event ingestion, fan-out, and stateful detection engines for inline MCP
//! traffic monitoring.
//!
//! This crate owns the pipeline from raw process/file/MCP events through to
//! persisted detection results: [`source`] reads events in, [`hub`] routes
//! them to [`engine`] implementations, and [`persistence`]/[`classifier`]
//! define the interfaces a deployment wires up to its own store and LLM
//! backend. A relational store, an HTTP/SSE proxy front-end, and WebSocket
//! fan-out to UI clients all live outside this crate.

pub mod classifier;
pub mod config;
pub mod engine;
pub mod engines;
pub mod error;
pub mod event;
pub mod finding;
pub mod hub;
pub mod persistence;
pub mod retry;
pub mod source;

pub use classifier::{Classifier, ClassifierInput, HttpClassifier, ScriptedClassifier};
pub use config::SentinelConfig;
pub use engine::{Engine, ToolCatalogEngine};
pub use error::{ClassifierError, PersistenceError, SourceError};
pub use event::{Event, EventType, Producer, Task, ToolDescriptor};
pub use finding::{Category, DetectionResult, Finding, ResultEnvelope, Severity};
pub use hub::EventHub;
pub use persistence::{InMemoryStore, Persistence};
pub use retry::RetryConfig;
pub use source::EventSource;
