/// Actix-web HTTP server for the tracking service
///
/// Endpoints:
/// - GET /health - Dependency status and hub counters
/// - WebSocket /ws/{session_id} - Live point stream for a session
/// - POST /api/v1/tracking/sessions - Start a session
/// - POST /api/v1/tracking/sessions/{id}/points - Ingest a fix
/// - POST /api/v1/tracking/sessions/{id}/end - End a session
/// - GET /api/v1/tracking/sessions/{id}/summary - Session statistics
/// - GET /api/v1/tracking/sessions/{id}/points - Recorded points
use crate::aggregator::TrackingAggregator;
use crate::error::TrackingError;
use crate::models::{Fix, StartSessionRequest};
use crate::stream::BroadcastHub;
use crate::websocket::LiveSessionSocket;
use actix_web::{error, get, post, web, App, HttpRequest, HttpResponse, HttpServer, Responder};
use actix_web_actors::ws;
use std::sync::Arc;
use summithub_core::{DatabasePool, ServiceConfig};

/// Server state shared across handlers
pub struct ServerState {
    pub aggregator: Arc<TrackingAggregator>,
    pub hub: Arc<BroadcastHub>,

    /// Checked by the health endpoint when present
    pub database: Option<DatabasePool>,
}

impl ServerState {
    pub fn new(aggregator: Arc<TrackingAggregator>, hub: Arc<BroadcastHub>) -> Self {
        Self {
            aggregator,
            hub,
            database: None,
        }
    }

    pub fn with_database(mut self, database: DatabasePool) -> Self {
        self.database = Some(database);
        self
    }
}

type HandlerResult = Result<HttpResponse, TrackingError>;

/// Health check endpoint
#[get("/health")]
async fn health_check(state: web::Data<ServerState>) -> impl Responder {
    let database = match &state.database {
        Some(db) => {
            let stats = db.stats();
            Some((db.is_healthy().await, stats))
        }
        None => None,
    };
    let relay_healthy = state.hub.relay_healthy().await;

    let degraded = matches!(database, Some((false, _))) || relay_healthy == Some(false);
    let status = if degraded { "degraded" } else { "healthy" };

    HttpResponse::Ok().json(serde_json::json!({
        "status": status,
        "service": "summithub-tracking",
        "version": env!("CARGO_PKG_VERSION"),
        "database": database.map(|(healthy, stats)| serde_json::json!({
            "healthy": healthy,
            "pool_size": stats.size,
            "pool_idle": stats.idle,
        })),
        "relay": {
            "enabled": state.hub.has_relay(),
            "healthy": relay_healthy,
        },
        "live_sessions": state.hub.session_count(),
        "hub": state.hub.metrics(),
    }))
}

/// WebSocket live stream endpoint
#[get("/ws/{session_id}")]
async fn live_socket(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    state: web::Data<ServerState>,
) -> actix_web::Result<HttpResponse> {
    let socket = LiveSessionSocket::new(path.into_inner(), state.hub.clone());
    ws::start(socket, &req, stream)
}

#[post("/sessions")]
async fn start_session(
    body: web::Json<StartSessionRequest>,
    state: web::Data<ServerState>,
) -> HandlerResult {
    let session = state.aggregator.start_session(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(session))
}

#[post("/sessions/{id}/points")]
async fn add_point(
    path: web::Path<String>,
    body: web::Json<Fix>,
    state: web::Data<ServerState>,
) -> HandlerResult {
    let point = state
        .aggregator
        .add_point(&path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(point))
}

#[post("/sessions/{id}/end")]
async fn end_session(path: web::Path<String>, state: web::Data<ServerState>) -> HandlerResult {
    let session = state.aggregator.end_session(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(session))
}

#[get("/sessions/{id}/summary")]
async fn session_summary(path: web::Path<String>, state: web::Data<ServerState>) -> HandlerResult {
    let summary = state.aggregator.summary(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(summary))
}

#[get("/sessions/{id}/points")]
async fn session_points(path: web::Path<String>, state: web::Data<ServerState>) -> HandlerResult {
    let points = state.aggregator.points(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(points))
}

/// Malformed JSON bodies get the same error shape as validation failures
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let body = serde_json::json!({ "error": err.to_string() });
        error::InternalError::from_response(err, HttpResponse::BadRequest().json(body)).into()
    })
}

/// Register all tracking routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .service(health_check)
        .service(live_socket)
        .service(
            web::scope("/api/v1/tracking")
                .service(start_session)
                .service(add_point)
                .service(end_session)
                .service(session_summary)
                .service(session_points),
        );
}

/// Start the tracking server
pub async fn start_server(config: &ServiceConfig, state: web::Data<ServerState>) -> std::io::Result<()> {
    tracing::info!(
        host = %config.host,
        port = config.port,
        workers = config.workers,
        "Starting SummitHub tracking service"
    );

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(configure)
            .wrap(actix_web::middleware::Logger::default())
    })
    .workers(config.workers)
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
