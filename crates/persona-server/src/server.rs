//! Router assembly and server lifecycle.

use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use persona_core::ContentProvider;
use persona_integrations::{DocumentExporter, Mailer};
use persona_llm::DeadlineProvider;
use persona_store::{CharacterRepo, CharacterStore, Database, UserRepo};

use crate::api::{self, ApiError};
use crate::auth::AuthSessions;
use crate::config::ServerConfig;
use crate::relay::{serve_connection, Relay, SessionRegistry, SocketSettings};
use crate::shutdown::ShutdownCoordinator;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Collaborators the server is built from.
pub struct Services {
    pub db: Database,
    pub provider: Arc<dyn ContentProvider>,
    pub exporter: Option<Arc<dyn DocumentExporter>>,
    pub mailer: Arc<dyn Mailer>,
}

/// Shared application state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub characters: CharacterRepo,
    pub users: Arc<UserRepo>,
    /// Provider with the configured deadline applied.
    pub provider: Arc<dyn ContentProvider>,
    pub relay: Arc<Relay>,
    pub exporter: Option<Arc<dyn DocumentExporter>>,
    pub mailer: Arc<dyn Mailer>,
    pub sessions: Arc<AuthSessions>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ServerConfig, services: Services, shutdown: CancellationToken) -> Self {
        let characters = CharacterRepo::new(services.db.clone());
        let provider: Arc<dyn ContentProvider> =
            Arc::new(DeadlineProvider::new(services.provider, config.provider_timeout()));
        let registry = Arc::new(SessionRegistry::new(config.max_send_queue));
        let store: Arc<dyn CharacterStore> = Arc::new(characters.clone());
        let relay = Arc::new(Relay::new(registry, store, Arc::clone(&provider)));

        Self {
            sessions: Arc::new(AuthSessions::new(config.session_ttl())),
            config: Arc::new(config),
            users: Arc::new(UserRepo::new(services.db)),
            characters,
            provider,
            relay,
            exporter: services.exporter,
            mailer: services.mailer,
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.relay.registry()
    }
}

/// Build the router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .nest("/api", api::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_cancelled() {
        return ApiError::Unavailable("Server is shutting down".into()).into_response();
    }
    let settings = SocketSettings {
        ping_interval: state.config.heartbeat_interval(),
        idle_timeout: state.config.heartbeat_timeout(),
    };
    let relay = Arc::clone(&state.relay);
    let shutdown = state.shutdown.clone();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| serve_connection(socket, relay, settings, shutdown))
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let registry = state.registry();
    Json(json!({
        "status": "healthy",
        "sessions": registry.session_count(),
        "connections": registry.connection_count(),
    }))
}

/// Bind, serve and start background tasks.
pub async fn start(config: ServerConfig, services: Services) -> Result<ServerHandle, std::io::Error> {
    let coordinator = ShutdownCoordinator::new();
    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(config, services, coordinator.token());
    let registry = Arc::clone(state.registry());
    let sessions = Arc::clone(&state.sessions);

    let handshake_timeout = state.config.handshake_timeout();

    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "persona server started");

    let router = build_router(state);
    let server = tokio::spawn(accept_loop(listener, router, handshake_timeout, coordinator.token()));

    let sweeper = spawn_session_sweeper(sessions, SESSION_SWEEP_INTERVAL, coordinator.token());

    Ok(ServerHandle {
        addr: local_addr,
        coordinator,
        registry,
        tasks: vec![server, sweeper],
    })
}

/// Accept connections until `shutdown` fires.
///
/// Each connection must deliver a complete request head within
/// `handshake_timeout` or hyper drops it, so a half-open WebSocket handshake
/// never reaches the router.
async fn accept_loop(listener: TcpListener, router: Router, handshake_timeout: Duration, shutdown: CancellationToken) {
    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
            () = shutdown.cancelled() => break,
        };

        let service = TowerToHyperService::new(router.clone());
        let closing = shutdown.clone();
        tokio::spawn(async move {
            let mut builder = Builder::new(TokioExecutor::new());
            builder
                .http1()
                .timer(TokioTimer::new())
                .header_read_timeout(handshake_timeout);
            let mut conn = pin!(builder.serve_connection_with_upgrades(TokioIo::new(stream), service));

            let result = tokio::select! {
                result = conn.as_mut() => result,
                () = closing.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    conn.as_mut().await
                }
            };
            if let Err(e) = result {
                debug!(%peer, error = %e, "connection ended with error");
            }
        });
    }
    info!("listener closed");
}

fn spawn_session_sweeper(sessions: Arc<AuthSessions>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sessions.purge_expired();
                }
                () = cancel.cancelled() => break,
            }
        }
    })
}

/// Handle returned by [`start`]. Keeps the server running until `shutdown`.
pub struct ServerHandle {
    addr: SocketAddr,
    coordinator: ShutdownCoordinator,
    registry: Arc<SessionRegistry>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Stop accepting requests, close every WebSocket and wait for background tasks.
    pub async fn shutdown(self) {
        info!("shutting down");
        self.coordinator.shutdown();
        self.registry.close_all();
        self.coordinator.graceful_shutdown(self.tasks, None).await;
        info!("shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use persona_integrations::LogMailer;
    use persona_llm::OfflineProvider;
    use tower::ServiceExt;

    fn state() -> AppState {
        let services = Services {
            db: Database::in_memory().unwrap(),
            provider: Arc::new(OfflineProvider::new()),
            exporter: None,
            mailer: Arc::new(LogMailer),
        };
        AppState::new(ServerConfig::default(), services, CancellationToken::new())
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let app = build_router(state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["sessions"], 0);
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = build_router(state());
        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn notion_status_without_exporter() {
        let app = build_router(state());
        let response = app
            .oneshot(Request::builder().uri("/api/notion/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await, json!({"available": false}));
    }

    #[tokio::test]
    async fn notion_databases_unavailable_without_exporter() {
        let app = build_router(state());
        let response = app
            .oneshot(Request::builder().uri("/api/notion/databases").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn invalid_character_id_is_400() {
        let app = build_router(state());
        let response = app
            .oneshot(Request::builder().uri("/api/characters/abc").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["message"], "Invalid character ID");
    }

    #[tokio::test]
    async fn malformed_json_body_is_400_with_message() {
        let app = build_router(state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/characters")
                    .header("content-type", "application/json")
                    .body(Body::from("{\"name\":"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["message"].is_string());
    }

    #[tokio::test]
    async fn current_user_requires_token() {
        let app = build_router(state());
        let response = app
            .oneshot(Request::builder().uri("/api/user").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn start_binds_ephemeral_port_and_shuts_down() {
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        let services = Services {
            db: Database::in_memory().unwrap(),
            provider: Arc::new(OfflineProvider::new()),
            exporter: None,
            mailer: Arc::new(LogMailer),
        };
        let handle = start(config, services).await.unwrap();
        assert!(handle.port() > 0);
        handle.shutdown().await;
    }
}
