//! OTLP/HTTP collector: receives export requests from instrumented
//! clients and appends them, one JSON line each, to the role files the
//! processor tails.

pub mod handlers;
pub mod writer;

pub use handlers::CollectorState;
pub use writer::FileWriter;
