//! Consume vision processing events from redis, and serve the enqueue, analytics and
//! subscription API.
use std::sync::Arc;

use envconfig::Envconfig;
use eyre::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vision_common::analytics::AnalyticsStore;
use vision_common::cache::ResultCache;
use vision_common::event::EventKind;
use vision_common::health::HealthRegistry;
use vision_common::metrics::{serve, setup_metrics_recorder};
use vision_common::queue::EventQueue;
use vision_common::redis::RedisClient;
use vision_worker::aggregator::Aggregator;
use vision_worker::config::Config;
use vision_worker::handlers::{app, AppState};
use vision_worker::lifecycle::ProcessorManager;
use vision_worker::notify::Notifier;
use vision_worker::registry::{PayloadPolicy, StrategyRegistry};
use vision_worker::strategy::{inference_client, HttpStrategy};
use vision_worker::worker::BatchWorker;

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(error) => {
            error!("failed to listen for shutdown signal: {}", error);
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::init_from_env()?;

    let redis = Arc::new(RedisClient::new(
        config.redis_url.clone(),
        config.redis_timeout.0,
    )?);

    let client = inference_client(config.vision.timeout.0)?;
    let registry = EventKind::KNOWN.iter().fold(
        StrategyRegistry::new(
            ResultCache::new(
                redis.clone(),
                std::time::Duration::from_secs(config.cache_ttl_secs),
            ),
            PayloadPolicy::new(
                config.vision.max_image_size,
                config.vision.supported_formats.0.clone(),
            ),
            config.vision.timeout.0,
        ),
        |registry, kind| {
            registry.register(Arc::new(HttpStrategy::new(
                kind.clone(),
                config.vision.inference_url.as_str(),
                client.clone(),
            )))
        },
    );

    let history_limit = config.history_limit.get();
    let store = AnalyticsStore::new(redis.clone(), history_limit);
    let history = match store.load_history(history_limit).await {
        Ok(history) => history,
        Err(error) => {
            warn!("starting without analytics history: {}", error);
            Vec::new()
        }
    };

    let queue = EventQueue::new(config.queue_key.as_str(), redis);
    let notifier = Notifier::new(config.notification_capacity);

    // A single iteration may wait on a full dispatch timeout, then on a backoff.
    let deadline = time::Duration::try_from(
        config.vision.timeout.0 + config.error_backoff.0 + config.poll_interval.0,
    )? + time::Duration::seconds(30);
    let liveness = HealthRegistry::new("liveness");
    let worker_liveness = liveness.register("worker".to_string(), deadline).await;

    let worker = BatchWorker::new(
        queue.clone(),
        Arc::new(registry),
        Aggregator::with_history(history_limit, history),
        notifier.clone(),
        store,
        config.batch_size.get(),
        config.poll_interval.0,
        config.error_backoff.0,
        worker_liveness,
    );
    let manager = ProcessorManager::new(worker);
    manager.start().await?;

    let (shutdown, shutting_down) = watch::channel(false);
    let state = AppState {
        queue,
        analytics: manager.analytics(),
        notifier,
        shutdown: shutting_down,
    };
    let router = app(
        state,
        liveness,
        Some(setup_metrics_recorder()?),
        config.max_request_body_bytes,
    );

    let bind = config.bind();
    info!("listening on {}", bind);
    let signal = async move {
        shutdown_signal().await;
        shutdown.send_replace(true);
    };
    let served = serve(router, &bind, signal).await;

    manager.stop().await;
    served?;

    Ok(())
}
