use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    aggregator::{Engine, FileRole, Processor, Store, WatchedFile},
    api::{self, ApiState},
    collector::{handlers, CollectorState, FileWriter},
    config::Config,
    signals::setup_signal_handlers,
};

/// Start the telemetry station.
///
/// This function:
/// 1. Opens the store and runs migrations (fatal on failure)
/// 2. Sets up signal handlers for graceful shutdown and manual flush
/// 3. Starts the OTLP collector listener
/// 4. Starts the processor loop, flush timer, and query API
/// 5. On shutdown: drains connections, completes the in-flight file pass,
///    runs one final flush, and closes the store, bounded by the
///    configured deadline
pub async fn start_server(config: Config) -> Result<()> {
    let mut store: Option<Arc<Store>> = None;
    let mut engine: Option<Arc<Engine>> = None;

    if config.aggregator.enabled {
        let opened = Arc::new(Store::open(&config.aggregator.db_path).await?);
        engine = Some(Arc::new(Engine::new(
            opened.clone(),
            &config.aggregator.event_prefix,
        )));
        store = Some(opened);
    } else {
        info!("aggregator disabled, running collector only");
    }

    // SIGTERM/SIGINT for shutdown; SIGHUP flushes the cache on demand.
    let (shutdown_tx, signal_handle) = setup_signal_handlers(engine.clone());

    let collector_state = CollectorState {
        metrics: Arc::new(FileWriter::new(
            config.collector.output_dir.join(&config.collector.metric_file),
        )?),
        logs: Arc::new(FileWriter::new(
            config.collector.output_dir.join(&config.collector.log_file),
        )?),
        traces: Arc::new(FileWriter::new(
            config.collector.output_dir.join(&config.collector.trace_file),
        )?),
    };

    let mut server_handles = Vec::new();

    let collector_addr = SocketAddr::from(([0, 0, 0, 0], config.collector.port));
    let collector_listener = tokio::net::TcpListener::bind(collector_addr).await?;
    info!(
        addr = %collector_addr,
        output_dir = %config.collector.output_dir.display(),
        "OTLP collector listening"
    );

    {
        let app = create_collector_router(collector_state);
        let mut rx = shutdown_tx.subscribe();
        server_handles.push(tokio::spawn(async move {
            let result = axum::serve(collector_listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.recv().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "collector server error");
            }
        }));
    }

    let mut processor_handle = None;
    let mut flush_handle = None;

    if let (Some(store), Some(engine)) = (&store, &engine) {
        let processor = Processor::new(
            config.collector.output_dir.clone(),
            watched_files(&config),
            store.clone(),
            engine.clone(),
        );
        let interval = Duration::from_secs(config.aggregator.processing_interval_seconds);
        let rx = shutdown_tx.subscribe();
        processor_handle = Some(tokio::spawn(async move {
            processor.run(interval, rx).await;
        }));

        let flush_engine = engine.clone();
        let flush_interval = Duration::from_secs(config.aggregator.flush_interval_seconds);
        let mut rx = shutdown_tx.subscribe();
        flush_handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        flush_engine.flush().await;
                    }
                    _ = rx.recv() => {
                        info!("flush timer stopped");
                        break;
                    }
                }
            }
        }));

        let api_addr = SocketAddr::from(([0, 0, 0, 0], config.aggregator.port));
        let api_listener = tokio::net::TcpListener::bind(api_addr).await?;
        info!(addr = %api_addr, "query API listening");

        let app = create_api_router(ApiState {
            store: store.clone(),
            engine: engine.clone(),
        });
        let mut rx = shutdown_tx.subscribe();
        server_handles.push(tokio::spawn(async move {
            let result = axum::serve(api_listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.recv().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "query API server error");
            }
        }));
    }

    // Block until a shutdown signal drains the listeners.
    for handle in server_handles {
        let _ = handle.await;
    }
    let _ = signal_handle.await;

    info!("shutting down services");

    let finalize = async {
        if let Some(handle) = processor_handle {
            let _ = handle.await; // in-flight file pass completes
        }
        if let Some(handle) = flush_handle {
            let _ = handle.await;
        }
        if let Some(engine) = &engine {
            engine.flush().await;
        }
        if let Some(store) = &store {
            store.close().await;
        }
    };

    let deadline = Duration::from_secs(config.shutdown_timeout_seconds);
    if tokio::time::timeout(deadline, finalize).await.is_err() {
        tracing::warn!(
            timeout_seconds = config.shutdown_timeout_seconds,
            "shutdown deadline exceeded, forcing exit"
        );
    } else {
        info!("all services stopped gracefully");
    }

    Ok(())
}

/// The three role files, each bound to its extractor.
fn watched_files(config: &Config) -> Vec<WatchedFile> {
    vec![
        WatchedFile {
            name: config.collector.metric_file.clone(),
            role: FileRole::Metrics,
        },
        WatchedFile {
            name: config.collector.log_file.clone(),
            role: FileRole::Logs,
        },
        WatchedFile {
            name: config.collector.trace_file.clone(),
            role: FileRole::Traces,
        },
    ]
}

/// OTLP ingest routes.
fn create_collector_router(state: CollectorState) -> Router {
    Router::new()
        .route("/v1/metrics", post(handlers::ingest_metrics))
        .route("/v1/logs", post(handlers::ingest_logs))
        .route("/v1/traces", post(handlers::ingest_traces))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Read-only query routes.
fn create_api_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(api::health::health_check))
        .route("/api/v2/sessions/:session_id", get(api::sessions::get_session))
        .route(
            "/api/v2/sessions/:session_id/prompts",
            get(api::sessions::get_session_prompts),
        )
        .route(
            "/api/v2/users/:user_id/sessions",
            get(api::sessions::list_user_sessions),
        )
        .route(
            "/api/v2/orgs/:org_id/sessions",
            get(api::sessions::list_org_sessions),
        )
        .route("/api/v2/models", get(api::aggregates::list_models))
        .route("/api/v2/tools", get(api::aggregates::list_tools))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
