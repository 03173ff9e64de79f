//! HTTP boundary for the firesafe inspection engine
//!
//! Routing, principal headers and payload deserialization live here;
//! every lifecycle decision is delegated to the `firesafe` library and
//! its tagged errors are mapped exhaustively onto HTTP status codes.
//! Authentication itself is an upstream collaborator: this server
//! trusts the resolved `X-User-Id` / `X-User-Role` / `X-Factory-Id`
//! headers it is handed.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, patch, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use firesafe::database::{
    BatchInspectionCoordinator, DatabaseConfig, DatabaseManager, InspectionRecordManager,
    IssueLifecycleManager,
};
use firesafe::models::{
    AuditRequest, BatchInspectionRequest, BatchInspectionResult, FinalizeOutcome, FinalizeRequest,
    HandleRequest, InspectionDetail, InspectionLog, Issue, IssueDetail, Principal, Role,
};
use firesafe::EngineError;

// Application state
#[derive(Clone)]
pub struct AppState {
    pub inspections: InspectionRecordManager,
    pub issues: IssueLifecycleManager,
    pub batches: BatchInspectionCoordinator,
}

// API envelope
#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateEmptyRequest {
    pub equipment_id: i64,
}

#[derive(Deserialize)]
pub struct AppendImageRequest {
    pub image_url: String,
}

#[derive(Deserialize)]
pub struct RemoveImageQuery {
    pub url: String,
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<()>>)>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "firesafe_web_server=info,firesafe=info,tower_http=debug".into()),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Database connection and schema
    let manager = DatabaseManager::new(DatabaseConfig::default()).await?;
    manager.run_migrations().await?;

    let app_state = AppState {
        inspections: manager.inspection_manager(),
        issues: manager.issue_manager(),
        batches: manager.batch_coordinator(),
    };

    let app = create_router(app_state);

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse::<u16>()
        .unwrap_or(3000);

    let addr = format!("0.0.0.0:{}", port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/inspections/empty", post(create_empty_inspection))
        .route(
            "/api/inspections/:id/images",
            post(append_image).delete(remove_image),
        )
        .route("/api/inspections/:id/finalize", patch(finalize_inspection))
        .route("/api/inspections/:id", get(get_inspection))
        .route("/api/inspections/batch", post(create_batch))
        .route("/api/issues/:id/handle", put(handle_issue))
        .route("/api/issues/:id/audit", put(audit_issue))
        .route("/api/issues/:id", get(get_issue))
        .route("/api/equipment/:id/issues", get(list_equipment_issues))
        .route(
            "/api/equipment/:id/inspections",
            get(list_equipment_inspections),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}

// Health check endpoint
async fn health_check() -> Json<ApiResponse<String>> {
    Json(ApiResponse {
        success: true,
        data: Some("OK".to_string()),
        error: None,
    })
}

async fn create_empty_inspection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateEmptyRequest>,
) -> ApiResult<InspectionLog> {
    let principal = resolve_principal(&headers)?;
    state
        .inspections
        .create_empty_inspection(body.equipment_id, principal.id)
        .await
        .map(ok)
        .map_err(fail)
}

async fn append_image(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<AppendImageRequest>,
) -> ApiResult<Vec<String>> {
    let principal = resolve_principal(&headers)?;
    state
        .inspections
        .append_image(id, &body.image_url, &principal)
        .await
        .map(ok)
        .map_err(fail)
}

async fn remove_image(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Query(query): Query<RemoveImageQuery>,
) -> ApiResult<Vec<String>> {
    let principal = resolve_principal(&headers)?;
    state
        .inspections
        .remove_image(id, &query.url, &principal)
        .await
        .map(ok)
        .map_err(fail)
}

async fn finalize_inspection(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<FinalizeRequest>,
) -> ApiResult<FinalizeOutcome> {
    let principal = resolve_principal(&headers)?;
    state
        .inspections
        .finalize(id, &body, &principal)
        .await
        .map(ok)
        .map_err(fail)
}

async fn get_inspection(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<InspectionDetail> {
    state.inspections.get_inspection(id).await.map(ok).map_err(fail)
}

async fn create_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<BatchInspectionRequest>,
) -> ApiResult<BatchInspectionResult> {
    let principal = resolve_principal(&headers)?;
    state
        .batches
        .create_for_location(&body, principal.id)
        .await
        .map(ok)
        .map_err(fail)
}

async fn handle_issue(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<HandleRequest>,
) -> ApiResult<Issue> {
    let principal = resolve_principal(&headers)?;
    state
        .issues
        .handle(id, &body, &principal)
        .await
        .map(ok)
        .map_err(fail)
}

async fn audit_issue(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<AuditRequest>,
) -> ApiResult<Issue> {
    let principal = resolve_principal(&headers)?;
    state
        .issues
        .audit(id, &body, &principal)
        .await
        .map(ok)
        .map_err(fail)
}

async fn get_issue(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<IssueDetail> {
    state.issues.get_issue(id).await.map(ok).map_err(fail)
}

async fn list_equipment_issues(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<IssueDetail>> {
    state
        .issues
        .list_issues_for_equipment(id)
        .await
        .map(ok)
        .map_err(fail)
}

async fn list_equipment_inspections(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<InspectionLog>> {
    state
        .inspections
        .list_inspections_for_equipment(id)
        .await
        .map(ok)
        .map_err(fail)
}

fn ok<T>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data: Some(data),
        error: None,
    })
}

fn fail<T>(error: EngineError) -> (StatusCode, Json<ApiResponse<T>>) {
    let status = error_status(&error);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!("Internal error: {:?}", error);
    }
    (
        status,
        Json(ApiResponse {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }),
    )
}

/// Exhaustive tagged-error to status mapping; no message sniffing.
fn error_status(error: &EngineError) -> StatusCode {
    match error {
        EngineError::EquipmentNotFound { .. }
        | EngineError::InspectionNotFound { .. }
        | EngineError::IssueNotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
        EngineError::InvalidState { .. }
        | EngineError::ImageAlreadyExists { .. }
        | EngineError::ImageNotFound { .. } => StatusCode::CONFLICT,
        EngineError::Validation { .. } => StatusCode::BAD_REQUEST,
        EngineError::Database(_) | EngineError::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Read the principal resolved by the upstream auth middleware
fn resolve_principal(
    headers: &HeaderMap,
) -> Result<Principal, (StatusCode, Json<ApiResponse<()>>)> {
    let unauthorized = || {
        (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse {
                success: false,
                data: None,
                error: Some("Missing or malformed principal headers".to_string()),
            }),
        )
    };

    let id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(unauthorized)?;

    let role = headers
        .get("x-user-role")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<Role>().ok())
        .ok_or_else(unauthorized)?;

    let factory_id = match headers.get("x-factory-id") {
        Some(v) => Some(
            v.to_str()
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .ok_or_else(unauthorized)?,
        ),
        None => None,
    };

    Ok(Principal {
        id,
        role,
        factory_id,
    })
}
