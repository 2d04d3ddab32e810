//! genstream engine - main entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::HeaderName;
use axum::http::{HeaderValue, Method};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genstream_domain::GenerationJob;
use genstream_engine::api::{self, auth::USER_ID_HEADER};
use genstream_engine::infrastructure::{
    asset_store::FileAssetStore,
    clock::{SystemClock, SystemRandom},
    config::AppConfig,
    event_bus::InProcessEventBus,
    gemini::GeminiClient,
    ports::{ClockPort, QueuePort, RandomPort},
    queues::{QueueFactory, GENERATION_QUEUE},
    state_cache::TtlStateCache,
};
use genstream_engine::use_cases::tasks::GenerationWorker;
use genstream_engine::App;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from repo root (the engine may be run from `crates/engine`).
    load_dotenv_from_repo_root();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genstream_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting genstream engine");

    let config = AppConfig::from_env()?;

    let clock: Arc<dyn ClockPort> = Arc::new(SystemClock::new());
    let random: Arc<dyn RandomPort> = Arc::new(SystemRandom::new());

    // Queue
    let factory = QueueFactory::new(config.queue.clone(), clock.clone(), random).await?;
    let queue = Arc::new(factory.create_queue::<GenerationJob>(GENERATION_QUEUE).await?);
    let recovered = queue.requeue_processing().await?;
    if recovered > 0 {
        tracing::info!(count = recovered, "Requeued generation jobs interrupted by a restart");
    }
    let notifier = Arc::new(queue.notifier());

    // State cache + bus
    let cache = Arc::new(TtlStateCache::new(config.cache.ttl));
    let bus = Arc::new(InProcessEventBus::new(config.bus_subscriber_buffer));

    // Generative backend + asset store
    tracing::info!(
        base_url = %config.gemini.base_url,
        model = %config.gemini.model,
        "Generative backend configured"
    );
    let generator = Arc::new(GeminiClient::new(&config.gemini)?);
    let assets = Arc::new(FileAssetStore::from_config(&config.assets));
    tracing::info!(root = %assets.root().display(), "Asset store configured");

    let app = Arc::new(App::new(
        queue.clone(),
        cache.clone(),
        bus.clone(),
        config.bridge.clone(),
    ));
    let shutdown = app.shutdown.clone();
    setup_shutdown_signal(shutdown.clone());

    // Generation worker
    let worker = Arc::new(GenerationWorker::new(
        queue.clone(),
        notifier,
        cache.clone(),
        bus,
        generator,
        assets,
        clock,
        config.worker.clone(),
    ));
    let worker_handle = tokio::spawn(worker.run(shutdown.clone()));

    // Queue history cleanup
    let cleanup_queue = queue.clone();
    let cleanup_cancel = shutdown.clone();
    let retention = Duration::from_secs(config.queue.history_retention_hours * 3600);
    let queue_cleanup_interval = Duration::from_secs(config.queue.cleanup_interval_seconds.max(1));
    let queue_cleanup_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(queue_cleanup_interval);
        loop {
            tokio::select! {
                _ = cleanup_cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            match cleanup_queue.cleanup(retention).await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "Cleaned up settled generation jobs"),
                Err(e) => tracing::warn!(error = %e, "Failed to clean up generation queue"),
            }
        }
    });

    // Expired task snapshot cleanup
    let cleanup_cache = cache.clone();
    let cleanup_cancel = shutdown.clone();
    let cache_cleanup_interval = config.cache.cleanup_interval;
    let cache_cleanup_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(cache_cleanup_interval);
        loop {
            tokio::select! {
                _ = cleanup_cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let removed = cleanup_cache.cleanup_expired().await;
            if removed > 0 {
                tracing::debug!(count = removed, "Evicted expired task snapshots");
            }
        }
    });

    // Build router
    let mut router = api::http::routes()
        .with_state(app)
        .nest_service("/assets", ServeDir::new(&config.assets.storage_dir))
        .layer(TraceLayer::new_for_http());

    if let Some(cors) = build_cors_layer(&config.cors_allowed_origins) {
        router = router.layer(cors);
    }

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_cancel = shutdown.clone();
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        server_cancel.cancelled().await;
        tracing::info!("HTTP server received shutdown signal");
    });

    if let Err(e) = server.await {
        tracing::error!("Server error: {}", e);
        shutdown.cancel();
    }

    tracing::info!("Waiting for workers to complete...");
    let drained = tokio::time::timeout(Duration::from_secs(30), async {
        let _ = worker_handle.await;
        let _ = queue_cleanup_handle.await;
        let _ = cache_cleanup_handle.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Timed out waiting for in-flight generation jobs; they will be redelivered");
    }

    tracing::info!("genstream engine stopped");
    Ok(())
}

/// Cancels `cancel_token` on SIGTERM/SIGINT.
fn setup_shutdown_signal(cancel_token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut s) => {
                    s.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }

        cancel_token.cancel();
    });
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    // Prefer local overrides.
    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}

fn build_cors_layer(allowed_origins: &[String]) -> Option<CorsLayer> {
    if allowed_origins.is_empty() {
        return None;
    }

    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        // Clients send X-User-Id and JSON content types which trigger CORS preflights.
        .allow_headers([
            HeaderName::from_static(USER_ID_HEADER),
            axum::http::header::CONTENT_TYPE,
        ]);

    if allowed_origins.iter().any(|origin| origin == "*") {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|s| HeaderValue::from_str(s).ok())
            .collect();

        if origins.is_empty() {
            return None;
        }

        cors = cors.allow_origin(origins);
    }

    Some(cors)
}
