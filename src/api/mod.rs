//! Read-only query API over the aggregated store.
//!
//! Pure projections: nothing here recomputes aggregates. The health
//! endpoint flushes the engine first, so responses observe a state at
//! least as recent as the last successful flush.

pub mod aggregates;
pub mod health;
pub mod sessions;

use crate::aggregator::{Engine, Store};
use std::sync::Arc;

/// Shared state for the query API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<Store>,
    pub engine: Arc<Engine>,
}

/// Clamp a caller-supplied page size into `[1, 100]`, defaulting to 10.
pub(crate) fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(10).clamp(1, 100)
}
