use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, routing::get};
use carekey_auth::audit::AuditChain;
use carekey_auth::clock::system_clock;
use carekey_auth::session::SessionManager;
use carekey_auth::{AuthState, AuthStores};
use carekey_auth_postgres::PostgresAuthStorage;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::config::{AppConfig, ServerConfig, StorageBackend};

pub struct CarekeyServer {
    addr: SocketAddr,
    app: Router,
    sweeper: JoinHandle<()>,
    audit: AuditChain,
}

/// Assembles the HTTP surface: the identity-core routes plus `/health`,
/// wrapped in CORS, compression, request tracing and a body limit.
pub fn build_app(state: AuthState, cfg: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(carekey_auth::routes(state))
        // SMART apps call /token from the browser.
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(cfg.body_limit_bytes))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Runs `clean_expired_sessions` every `every` until the task is aborted.
pub fn spawn_session_sweep(sessions: Arc<SessionManager>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match sessions.clean_expired_sessions().await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "expired sessions swept"),
                Err(e) => tracing::warn!(error = %e, "session sweep failed"),
            }
        }
    })
}

async fn open_stores(cfg: &AppConfig) -> anyhow::Result<AuthStores> {
    match cfg.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage; all state is lost on restart");
            Ok(AuthStores::in_memory())
        }
        StorageBackend::Postgres => {
            let pg = &cfg.storage.postgres;
            let storage = PostgresAuthStorage::connect(&pg.url, pg.pool_size).await?;
            storage.run_migrations().await?;
            Ok(storage.stores())
        }
    }
}

pub struct ServerBuilder {
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Opens the configured stores, wires the identity core and starts the
    /// session sweep.
    pub async fn build(self) -> anyhow::Result<CarekeyServer> {
        let stores = open_stores(&self.config).await?;
        let state = AuthState::build(&self.config.auth, stores, system_clock()).await?;
        let sweeper = spawn_session_sweep(
            state.sessions.clone(),
            self.config.auth.sessions.sweep_interval,
        );
        let audit = state.audit.clone();
        let app = build_app(state, &self.config.server);
        Ok(CarekeyServer {
            addr: self.config.addr(),
            app,
            sweeper,
            audit,
        })
    }
}

impl CarekeyServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        let app = self.app.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        self.sweeper.abort();
        // Persist events still queued on the audit writer.
        self.audit.flush().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
