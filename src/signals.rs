//! Process signal handling.
//!
//! SIGTERM and SIGINT request a graceful shutdown, announced on a
//! broadcast channel that every subsystem subscribes to. SIGHUP flushes
//! the aggregation cache without stopping anything, which makes the store
//! inspectable mid-session.

use crate::aggregator::Engine;
use std::sync::Arc;
use tokio::sync::broadcast;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Reason a shutdown was requested, carried on the broadcast channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Drain connections, complete in-flight work, flush, close the store.
    Graceful,
}

/// Install the process signal task.
///
/// Returns the shutdown broadcast sender (subscribe for notifications)
/// and the handle of the task that owns the signal streams.
#[cfg(unix)]
pub fn setup_signal_handlers(
    engine: Option<Arc<Engine>>,
) -> (
    broadcast::Sender<ShutdownSignal>,
    tokio::task::JoinHandle<()>,
) {
    let (shutdown_tx, _) = broadcast::channel(8);
    let notifier = shutdown_tx.clone();

    let handle = tokio::spawn(async move {
        let streams = (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
            signal(SignalKind::hangup()),
        );
        let (Ok(mut terminate), Ok(mut interrupt), Ok(mut hangup)) = streams else {
            tracing::error!("cannot install unix signal handlers, shutdown only via kill -9");
            return;
        };

        let stopped_by = loop {
            tokio::select! {
                _ = hangup.recv() => {
                    match &engine {
                        Some(engine) => {
                            tracing::info!(signal = "SIGHUP", "flushing aggregation cache on request");
                            engine.flush().await;
                        }
                        None => {
                            tracing::debug!(signal = "SIGHUP", "ignored, aggregator is disabled");
                        }
                    }
                }
                _ = terminate.recv() => break "SIGTERM",
                _ = interrupt.recv() => break "SIGINT",
            }
        };

        tracing::info!(signal = stopped_by, "stop requested, beginning graceful shutdown");
        let _ = notifier.send(ShutdownSignal::Graceful);
    });

    (shutdown_tx, handle)
}

/// Fallback for platforms without unix signals: Ctrl+C only, no
/// out-of-band flush.
#[cfg(not(unix))]
pub fn setup_signal_handlers(
    _engine: Option<Arc<Engine>>,
) -> (
    broadcast::Sender<ShutdownSignal>,
    tokio::task::JoinHandle<()>,
) {
    let (shutdown_tx, _) = broadcast::channel(8);
    let notifier = shutdown_tx.clone();

    let handle = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(signal = "ctrl-c", "stop requested, beginning graceful shutdown");
            let _ = notifier.send(ShutdownSignal::Graceful);
        }
    });

    (shutdown_tx, handle)
}
