//! # Server Configuration
//!
//! Router, shared state and startup for the connector's HTTP service.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::Request,
    http::{HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::handlers;
use crate::oauth::{OAuthClient, StateStore};
use crate::telemetry::{self, TRACE_ID_HEADER, TraceContext};

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub states: Arc<StateStore>,
    /// `None` when GitHub credentials are not configured
    pub oauth: Option<Arc<OAuthClient>>,
}

impl AppState {
    pub fn from_config(config: AppConfig) -> Self {
        let states = StateStore::new(
            Duration::from_secs(config.oauth_state.ttl_seconds),
            config.oauth_state.capacity,
        );
        let oauth = OAuthClient::from_config(&config).map(Arc::new);
        if oauth.is_none() {
            warn!("GitHub OAuth credentials missing; /authorize and /travis_token are disabled");
        }

        Self {
            config: Arc::new(config),
            states: Arc::new(states),
            oauth,
        }
    }
}

/// Attach a trace context to every request and echo its ID back.
async fn trace_context_middleware(mut request: Request, next: Next) -> Response {
    let inbound = request
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|value| value.to_str().ok());
    let context = TraceContext::from_inbound(inbound);
    let trace_id = context.trace_id.clone();
    request.extensions_mut().insert(context.clone());

    let mut response = telemetry::with_trace_context(context, next.run(request)).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let static_dir = state.config.static_dir.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let router = Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/authorize", get(handlers::oauth::authorize))
        .route("/validate_state", get(handlers::oauth::validate_state))
        .route("/travis_token", post(handlers::oauth::travis_token))
        .route("/api/schema", get(handlers::refresh::list_schemas))
        .route("/api/schema/{table}", get(handlers::refresh::get_schema))
        .route("/api/refresh", post(handlers::refresh::refresh))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()));

    // The connector page and its assets are served from disk when configured.
    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Starts the server with the given configuration
pub async fn run_server(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;
    let profile = config.profile.clone();

    let app = create_app(AppState::from_config(config));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, %profile, "Travis connector listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::oauth::authorize,
        crate::handlers::oauth::validate_state,
        crate::handlers::oauth::travis_token,
        crate::handlers::refresh::list_schemas,
        crate::handlers::refresh::get_schema,
        crate::handlers::refresh::refresh,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::HealthResponse,
            crate::models::StateValidation,
            crate::oauth::TravisTokenResponse,
            crate::connectors::TableSchema,
            crate::connectors::ColumnHeader,
            crate::connectors::ColumnType,
            crate::connectors::TableId,
            crate::connectors::ConnectionData,
            crate::connectors::RefreshRequest,
            crate::connectors::RefreshOutcome,
            crate::connectors::travis::BuildRecord,
            crate::connectors::travis::CommitRecord,
            crate::connectors::travis::JobRecord,
            crate::error::ApiError,
            crate::error::UpstreamError,
        )
    ),
    tags(
        (name = "root", description = "Service information"),
        (name = "oauth", description = "GitHub OAuth proxy for Travis CI tokens"),
        (name = "connector", description = "Table schema and refreshes"),
    ),
    info(
        title = "Travis CI Connector API",
        description = "OAuth proxy and data endpoints for the Travis CI build connector",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
