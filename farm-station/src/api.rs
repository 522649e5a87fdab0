use crate::models::{
    CommandRequest, CommandResponse, ErrorResponse, StatsResponse, TelemetryResponse,
};
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use gateway::{Gateway, GatewayError};
use line_protocol::{Channel, ChannelId, Command};
use log::{info, warn};
use serde_json::json;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// # API Documentation
///
/// OpenAPI description of the farm station: live sensor readings and
/// pump/light control, both served by the serial gateway.
#[derive(OpenApi)]
#[openapi(
    paths(root, sensor_data, sensor_data_by_channel, send_command, stats),
    components(schemas(
        CommandRequest,
        CommandResponse,
        ErrorResponse,
        StatsResponse,
        TelemetryResponse
    )),
    tags(
        (name = "Farm Station", description = "Sensor readings and actuator control for the farm node")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(root))
        .route("/sensor-data", get(sensor_data))
        .route("/sensor-data/{channel}/{source_id}", get(sensor_data_by_channel))
        .route("/command", post(send_command))
        .route("/stats", get(stats))
        .with_state(state)
}

/// Failure of an API call, rendered as an [`ErrorResponse`].
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        let status = match e {
            GatewayError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
            GatewayError::CommandTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::LinkWriteFailed(_) | GatewayError::LinkUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse::new(self.message))).into_response()
    }
}

#[utoipa::path(get, path = "/", tag = "Farm Station", responses())]
pub async fn root() -> impl IntoResponse {
    Json(json!({ "status": "ok", "message": "Farm station API is running" }))
}

/// Newest reading of every sensor heard from since start-up.
#[utoipa::path(
    get,
    path = "/sensor-data",
    tag = "Farm Station",
    responses(
        (status = 200, description = "Latest reading per sensor", body = Vec<TelemetryResponse>)
    )
)]
pub async fn sensor_data(State(state): State<AppState>) -> Json<Vec<TelemetryResponse>> {
    let records = state.gateway.latest_all();
    Json(records.iter().map(TelemetryResponse::from).collect())
}

#[utoipa::path(
    get,
    path = "/sensor-data/{channel}/{source_id}",
    tag = "Farm Station",
    params(
        ("channel" = String, Path, description = "`air`, `soil` or `combined`", example = "air"),
        ("source_id" = u8, Path, description = "Sensor id on that channel (0 for combined)", example = 1),
    ),
    responses(
        (status = 200, description = "Latest reading", body = TelemetryResponse),
        (status = 400, description = "Unknown channel", body = ErrorResponse),
        (status = 404, description = "Nothing received on that sensor yet", body = ErrorResponse)
    )
)]
pub async fn sensor_data_by_channel(
    State(state): State<AppState>,
    Path((channel, source_id)): Path<(String, u8)>,
) -> Result<Json<TelemetryResponse>, ApiError> {
    let channel = channel
        .parse::<Channel>()
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
    let id = ChannelId::new(channel, source_id);

    match state.gateway.latest_by_channel(id) {
        Some(record) => Ok(Json(TelemetryResponse::from(&record))),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("no reading from {} yet", id),
        )),
    }
}

/// Sends one command to the node and waits for its acknowledgement.
#[utoipa::path(
    post,
    path = "/command",
    tag = "Farm Station",
    request_body = CommandRequest,
    responses(
        (status = 200, description = "Node acknowledged the command", body = CommandResponse),
        (status = 400, description = "Invalid command", body = ErrorResponse),
        (status = 422, description = "Node rejected the command", body = CommandResponse),
        (status = 503, description = "Serial link unavailable", body = ErrorResponse),
        (status = 504, description = "No acknowledgement in time; node state unknown", body = ErrorResponse)
    )
)]
pub async fn send_command(
    State(state): State<AppState>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) =
        payload.map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?;
    let command = Command::try_from(request)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;

    info!("[API] command `{}` requested", command);
    let ack = state.gateway.send_command(command).await.map_err(|e| {
        warn!("[API] command `{}` failed: {}", command, e);
        ApiError::from(e)
    })?;

    let status = if ack.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(CommandResponse::from(ack))).into_response())
}

#[utoipa::path(
    get,
    path = "/stats",
    tag = "Farm Station",
    responses(
        (status = 200, description = "Gateway counters", body = StatsResponse)
    )
)]
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::new(
        state.gateway.link_state(),
        state.gateway.stats(),
    ))
}
