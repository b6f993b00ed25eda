use axum::routing::{delete, get, post};
use axum::{middleware as axum_middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cache::{cache_middleware, invalidation_middleware};
use crate::config::Config;
use crate::error::Result;
use crate::handlers;
use crate::middleware::{admission_middleware, logging_middleware};
use crate::policy::PolicySet;
use crate::resolver::PolicyResolver;
use crate::store::{CounterStore, MemoryStore, RedisStore};

/// Composition root state: the store client and resolver are built once
/// and handed to every middleware by value, no process-wide singletons.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CounterStore>,
    pub resolver: Arc<PolicyResolver>,
    pub key_prefix: String,
    pub fail_open: bool,
    pub cache_ttl: Duration,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        store: Arc<dyn CounterStore>,
        resolver: Arc<PolicyResolver>,
        key_prefix: &str,
        fail_open: bool,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            resolver,
            key_prefix: key_prefix.to_string(),
            fail_open,
            cache_ttl,
            started_at: Instant::now(),
        }
    }
}

/// Assembles the router. Layer order, outermost first: trace/cors/logging,
/// admission, cache invalidation, response cache, routes.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/api/items", get(handlers::list_items))
        .route("/api/items", post(handlers::create_item))
        .route("/api/search", get(handlers::search))
        .route("/api/reports/:id", get(handlers::get_report))
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/admin/limits/:identity", delete(handlers::reset_limits))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            cache_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            invalidation_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            admission_middleware,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(axum_middleware::from_fn(logging_middleware)),
        )
        .with_state(state)
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn CounterStore> = match &config.redis_url {
            Some(url) => {
                let store =
                    RedisStore::connect(url, config.store_timeout, config.store_retries).await?;
                tracing::info!(url = %url, "connected to redis counter store");
                Arc::new(store)
            }
            None => {
                tracing::warn!("no redis url configured, using in-process memory store");
                Arc::new(MemoryStore::new())
            }
        };

        let policy_set = match &config.policy_file {
            Some(path) => PolicySet::from_file(path)?,
            None => PolicySet::sample(),
        };
        let resolver = Arc::new(PolicyResolver::from_policy_set(
            &config.key_prefix,
            &policy_set,
        )?);
        tracing::info!(rules = resolver.len(), "loaded admission policies");

        let state = AppState::new(
            store,
            resolver,
            &config.key_prefix,
            config.fail_open,
            config.cache_ttl,
        );

        Ok(Self {
            app: create_app(state),
            bind_addr: config.bind_addr,
        })
    }

    pub async fn run(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr)
            .await
            .map_err(|e| crate::error::Error::Config(format!("failed to bind {}: {e}", self.bind_addr)))?;

        tracing::info!("gatekeep listening on {}", self.bind_addr);

        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| crate::error::Error::Config(format!("server error: {e}")))?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("received terminate signal, initiating graceful shutdown");
        },
    }
}
