use std::sync::Arc;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod api;
mod blob;
mod config;
mod db;
mod embeddings;
mod error;
mod ingestion;
mod queue;
mod service;
#[cfg(test)]
mod testing;
mod vector_index;
mod websocket;

use crate::blob::FsBlobStore;
use crate::config::load_config;
use crate::db::Database;
use crate::embeddings::{Embedder, HttpEmbedder};
use crate::ingestion::{PdfiumBackend, TesseractEngine};
use crate::queue::{JobQueue, RetryPolicy, WorkerPool};
use crate::service::{
    FolioService, HardDeleteWorker, IngestionWorker, JobDispatcher, Reconciler, StatusRelay,
};
use crate::vector_index::SqliteVectorIndex;
use crate::websocket::LiveRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_logging();

    info!("Starting Folio service v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    let settings = config.validate()?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        data_dir = %config.storage.data_dir.display(),
        "Configuration loaded"
    );

    config.storage.ensure_dirs()?;

    let db = Arc::new(Database::open(&config.storage.database_path())?);
    let vectors = Arc::new(SqliteVectorIndex::open(&config.storage.vector_database_path())?);
    let blobs = Arc::new(FsBlobStore::new(config.storage.blobs_dir()));
    let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(&config.embeddings)?);
    info!(path = %config.storage.database_path().display(), "Storage initialized");

    let pdf = PdfiumBackend;
    if let Err(e) = pdf.check_available() {
        warn!(error = %e, "PDFium is not available; ingestion jobs will fail until it is installed");
    }
    let ocr_engine = Arc::new(TesseractEngine::new(&config.ocr));

    let prometheus = PrometheusBuilder::new().install_recorder()?;

    // Queue events flow to the status relay
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let queue = Arc::new(JobQueue::new(
        db.clone(),
        RetryPolicy::from(&settings.workers),
        events_tx,
    ));
    match queue.requeue_interrupted() {
        Ok(count) if count > 0 => info!(count, "Requeued jobs interrupted by the last shutdown"),
        Err(e) => warn!(error = %e, "Failed to requeue interrupted jobs"),
        _ => {}
    }

    let shutdown = CancellationToken::new();
    let mut background = Vec::new();

    // The relay outlives the workers so their final events are delivered
    let relay_shutdown = CancellationToken::new();
    let registry = Arc::new(LiveRegistry::new());
    let relay = Arc::new(StatusRelay::new(db.clone(), registry.clone()));
    let relay_handle = tokio::spawn(relay.clone().run(events_rx, relay_shutdown.clone()));

    let reconciler = Arc::new(Reconciler::new(
        db.clone(),
        vectors.clone(),
        relay,
        settings.reconciler,
    ));
    if let Some(interval) = settings.reconciler.interval {
        background.push(reconciler.clone().spawn_periodic(interval, shutdown.clone()));
    }

    let ingest = IngestionWorker::new(
        db.clone(),
        blobs.clone(),
        vectors.clone(),
        embedder.clone(),
        Arc::new(pdf),
        ocr_engine,
        settings.ocr.clone(),
        settings.chunking,
        config.storage.scratch_dir(),
    );
    let hard_delete = HardDeleteWorker::new(db.clone(), blobs.clone(), vectors);
    let dispatcher = Arc::new(JobDispatcher::new(ingest, hard_delete));
    background.extend(
        WorkerPool::new(
            queue.clone(),
            dispatcher,
            settings.workers.concurrency,
            settings.workers.poll_interval,
        )
        .start(shutdown.clone()),
    );
    info!(
        concurrency = settings.workers.concurrency,
        max_attempts = settings.workers.max_attempts,
        "Job workers started"
    );

    let service = Arc::new(FolioService::new(db, blobs, queue, reconciler));
    let state = Arc::new(api::AppState {
        service,
        registry,
        embedder,
        prometheus,
        start_time: Instant::now(),
    });
    let app = api::router(state, config.server.max_upload_bytes);

    // Start the server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    // Let in-flight jobs finish
    shutdown.cancel();
    for handle in background {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
    relay_shutdown.cancel();
    if let Err(e) = relay_handle.await {
        warn!(error = %e, "Status relay ended abnormally");
    }
    info!("Folio service stopped");

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("folio_service=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
