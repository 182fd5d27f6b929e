//! Aggregation subsystem: record extraction, the write-back cache engine,
//! the incremental file processor, and the durable store.
//!
//! Data flow: the collector appends OTLP export requests to the role
//! files; the [`processor`] tails them and parses each line through
//! [`otlp`]; the [`engine`] folds the typed records into cached
//! per-session state; a periodic flush upserts the cache into the
//! [`store`], which the query API reads.

pub mod engine;
pub mod models;
pub mod otlp;
pub mod processor;
pub mod store;

pub use engine::Engine;
pub use models::{Session, SessionModel, SessionPrompt, SessionTool};
pub use processor::{FileRole, Processor, WatchedFile};
pub use store::Store;
