use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Body;
use axum::http::Request;
use axum::routing::{get, post};
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::configuration::Settings;
use crate::rate_limit::{limit_requests, run_eviction_until_stopped, ClientRateLimiter};
use crate::routes::{api_docs_json, check, health_check, home, subscribe, unsubscribe};
use crate::store::{build_store, SubscriberStore};
use crate::subscription_service::SubscriptionService;
use crate::AppState;

pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    store: Arc<dyn SubscriberStore>,
    eviction: Option<JoinHandle<()>>,
}

impl Application {
    /// Opens the subscriber store and binds the listener. Fails fast if the
    /// store cannot be opened.
    pub async fn build(configuration: Settings) -> anyhow::Result<Self> {
        let store = build_store(&configuration.storage);
        store
            .open()
            .await
            .context("Failed to open the subscriber store.")?;

        let rate_limiter = if configuration.rate_limit.enabled {
            Some(Arc::new(ClientRateLimiter::new(
                &configuration.rate_limit,
                configuration.application.trust_proxy,
            )?))
        } else {
            None
        };

        let address = format!(
            "{}:{}",
            configuration.application.host, configuration.application.port
        );
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("Failed to bind {address}"))?;
        let port = listener.local_addr()?.port();
        tracing::info!("listening on {}", listener.local_addr()?);

        let eviction = rate_limiter.as_ref().map(|limiter| {
            tokio::spawn(run_eviction_until_stopped(
                Arc::clone(limiter),
                configuration.rate_limit.window(),
            ))
        });

        let app_state = AppState {
            subscription_service: SubscriptionService::new(Arc::clone(&store)),
            rate_limiter,
            application_base_url: Arc::new(configuration.application.base_url),
        };

        Ok(Self {
            port,
            listener,
            router: router(app_state),
            store,
            eviction,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serves until Ctrl-C or SIGTERM.
    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serves until `shutdown` resolves, then stops the background eviction
    /// task and closes the store.
    pub async fn run_until<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let served = axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error");

        if let Some(eviction) = self.eviction {
            eviction.abort();
        }

        tracing::info!("Shutting down, closing the subscriber store");
        self.store.close().await?;
        served
    }
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/health_check", get(health_check))
        .route("/api-docs-json", get(api_docs_json))
        .route("/newsletter", post(subscribe))
        .route("/newsletter/:email", get(check).delete(unsubscribe))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            limit_requests,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                        let request_id = request
                            .headers()
                            .get("x-request-id")
                            .and_then(|value| value.to_str().ok())
                            .unwrap_or_default();
                        tracing::info_span!(
                            "http_request",
                            method = %request.method(),
                            uri = %request.uri(),
                            request_id = %request_id,
                        )
                    }),
                )
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CorsLayer::permissive()),
        )
        .with_state(app_state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
