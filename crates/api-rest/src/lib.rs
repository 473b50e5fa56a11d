//! # API REST
//!
//! REST API implementation for the test data management service.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, CORS, status mapping)
//!
//! Uses `api-shared` for request/response bodies and `tdm-core` for every data operation.
//! Database work runs on the blocking pool, one session per request.

#![warn(rust_2018_idioms)]

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequest, FromRequestParts, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use api_shared::{
    ColumnMeta, CreateIntakeReq, CreateIntakeRes, ErrorRes, ExternalCallReq, Field, GenerateReq,
    GenerateRes, HealthRes, HealthService, ServiceExecuteReq, ServiceExecuteRes,
    ServiceSchemaQuery, ServiceSchemaRes, TableSchemaQuery, TableSchemaRes,
};
use tdm_core::constants::NO_DATA_MESSAGE;
use tdm_core::{
    execute_service_query, generate_rows, render, service_schema, table_schema, with_session,
    CoreConfig, ExternalApiClient, ExternalApiType, ExternalResponse, IntakeCreator,
    IntakeOverrides, OutputFormat, SchemaMode, SessionSource, TestDataError, TestDataResult,
};
use tdm_types::{Environment, ServiceType};

/// Application state shared across REST API handlers
///
/// Holds the startup configuration, the session source for every environment and the
/// external API client. Everything is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<CoreConfig>,
    pub sessions: Arc<dyn SessionSource>,
    pub external: ExternalApiClient,
}

impl AppState {
    /// Build state around an already constructed session source.
    pub fn new(cfg: Arc<CoreConfig>, sessions: Arc<dyn SessionSource>) -> TestDataResult<Self> {
        let external = ExternalApiClient::new(cfg.external())?;
        Ok(Self {
            cfg,
            sessions,
            external,
        })
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        get_table_schema,
        get_service_schema,
        service_execute,
        service_create,
        create_intake_data,
        generate,
        external_call,
    ),
    components(schemas(
        HealthRes,
        ErrorRes,
        ColumnMeta,
        Field,
        TableSchemaRes,
        ServiceSchemaRes,
        ServiceExecuteReq,
        ServiceExecuteRes,
        CreateIntakeReq,
        CreateIntakeRes,
        GenerateReq,
        GenerateRes,
        ExternalCallReq,
    ))
)]
pub struct ApiDoc;

/// Build the REST router with Swagger UI and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/schema", get(get_table_schema))
        .route("/api/service-schema", get(get_service_schema))
        .route("/api/service-execute", post(service_execute))
        .route("/api/service-create", post(service_create))
        .route("/api/create-intake-data", post(create_intake_data))
        .route("/api/generate", post(generate))
        .route("/api/external-call", post(external_call))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// An error response: a status plus the `{error, details}` envelope.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorRes,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status,
            body: ErrorRes {
                error: error.into(),
                details,
            },
        }
    }

    fn bad_request(details: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "Invalid request",
            Some(details.into()),
        )
    }

    /// Log `err` under `context` and convert it. Server errors log at `error`, client errors
    /// at `warn`.
    fn logged(context: &str, err: TestDataError) -> Self {
        let status = status_of(&err);
        if status.is_server_error() {
            tracing::error!("{} error: {:?}", context, err);
        } else {
            tracing::warn!("{} rejected: {}", context, err);
        }
        let (error, details) = error_text(&err);
        Self::new(status, error, details)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::warn!("Request body rejected: {}", rejection.body_text());
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        tracing::warn!("Query string rejected: {}", rejection.body_text());
        Self::bad_request(rejection.body_text())
    }
}

/// `axum::Json` whose rejections answer with the `{error, details}` envelope.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
struct ApiJson<T>(T);

/// `axum::extract::Query` whose rejections answer with the `{error, details}` envelope.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
struct ApiQuery<T>(T);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn status_of(err: &TestDataError) -> StatusCode {
    match err {
        TestDataError::InvalidInput(_)
        | TestDataError::UnknownColumn(_)
        | TestDataError::Types(_) => StatusCode::BAD_REQUEST,
        TestDataError::TableNotFound(_) => StatusCode::NOT_FOUND,
        TestDataError::RetriesExhausted { .. } | TestDataError::KeyAlreadyExists { .. } => {
            StatusCode::CONFLICT
        }
        TestDataError::EnvironmentNotConfigured(_)
        | TestDataError::Database(_)
        | TestDataError::VerificationFailed { .. }
        | TestDataError::Render(_)
        | TestDataError::ExternalNotConfigured
        | TestDataError::External(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// The `error` headline and optional `details` for a core error.
fn error_text(err: &TestDataError) -> (String, Option<String>) {
    match err {
        TestDataError::InvalidInput(msg) => ("Invalid request".into(), Some(msg.clone())),
        TestDataError::UnknownColumn(col) => ("Unknown column".into(), Some(col.clone())),
        TestDataError::Types(e) => ("Invalid request".into(), Some(e.to_string())),
        TestDataError::TableNotFound(table) => ("Table not found".into(), Some(table.clone())),
        TestDataError::EnvironmentNotConfigured(env) => {
            ("Environment not configured".into(), Some(env.to_string()))
        }
        TestDataError::Database(db) => ("Database error".into(), Some(db.to_string())),
        TestDataError::VerificationFailed { .. } => {
            ("Verification failed".into(), Some(err.to_string()))
        }
        TestDataError::Render(msg) => ("Failed to render output".into(), Some(msg.clone())),
        TestDataError::External(e) => ("External API call failed".into(), Some(e.to_string())),
        TestDataError::KeyAlreadyExists { .. } => {
            ("Key already exists".into(), Some(err.to_string()))
        }
        TestDataError::RetriesExhausted { .. } | TestDataError::ExternalNotConfigured => {
            (err.to_string(), None)
        }
    }
}

fn required(value: Option<String>, name: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("{name} is required")))
}

fn environment(value: Option<String>) -> Result<Environment, ApiError> {
    required(value, "environment")?
        .parse::<Environment>()
        .map_err(|e| ApiError::bad_request(e.to_string()))
}

fn service_type(value: Option<String>) -> Result<ServiceType, ApiError> {
    required(value, "serviceType")?
        .parse::<ServiceType>()
        .map_err(|e| ApiError::bad_request(e.to_string()))
}

/// Run database work on the blocking pool and log its failure under `context`.
async fn blocking<T, F>(context: &'static str, work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> TestDataResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result.map_err(|e| ApiError::logged(context, e)),
        Err(e) => {
            tracing::error!("{} task error: {:?}", context, e);
            Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error",
                Some(e.to_string()),
            ))
        }
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
///
/// Used for monitoring and load balancer health checks. Touches no database.
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthService::check_health())
}

#[utoipa::path(
    get,
    path = "/api/schema",
    params(TableSchemaQuery),
    responses(
        (status = 200, description = "Catalog columns of the table", body = TableSchemaRes),
        (status = 400, description = "Missing or invalid parameters", body = ErrorRes),
        (status = 404, description = "Table not found", body = ErrorRes),
        (status = 500, description = "Database error", body = ErrorRes)
    )
)]
/// Describe one table from the database catalog
#[axum::debug_handler]
async fn get_table_schema(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<TableSchemaQuery>,
) -> Result<Json<TableSchemaRes>, ApiError> {
    let env = environment(query.environment)?;
    let table_name = required(query.table_name, "tableName")?.to_ascii_uppercase();

    let sessions = state.sessions.clone();
    let table = table_name.clone();
    let schema = blocking("Table schema", move || {
        with_session(sessions.as_ref(), env, |session| {
            table_schema(session, &table)
        })
    })
    .await?;

    Ok(Json(TableSchemaRes {
        environment: env.to_string(),
        table_name,
        schema,
    }))
}

#[utoipa::path(
    get,
    path = "/api/service-schema",
    params(ServiceSchemaQuery),
    responses(
        (status = 200, description = "Form fields for the service", body = ServiceSchemaRes),
        (status = 400, description = "Missing or invalid parameters", body = ErrorRes),
        (status = 500, description = "Database error", body = ErrorRes)
    )
)]
/// Describe the editable form for a service
///
/// `mode=query` (default) lists the join columns; `mode=create-intake` lists the fields that
/// may override generated intake values.
#[axum::debug_handler]
async fn get_service_schema(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ServiceSchemaQuery>,
) -> Result<Json<ServiceSchemaRes>, ApiError> {
    let env = environment(query.environment)?;
    let service = service_type(query.service_type)?;
    let mode: SchemaMode = query
        .mode
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|e| ApiError::logged("Service schema", e))?;

    let sessions = state.sessions.clone();
    let schema = blocking("Service schema", move || {
        with_session(sessions.as_ref(), env, |session| {
            service_schema(session, service, mode)
        })
    })
    .await?;

    Ok(Json(ServiceSchemaRes {
        environment: env.to_string(),
        service_type: service.to_string(),
        schema,
    }))
}

#[utoipa::path(
    post,
    path = "/api/service-execute",
    request_body = ServiceExecuteReq,
    responses(
        (status = 200, description = "First matching row, or null data with a message", body = ServiceExecuteRes),
        (status = 400, description = "Missing fields or unknown columns", body = ErrorRes),
        (status = 500, description = "Database error", body = ErrorRes)
    )
)]
/// Fetch at most one row of the service join
///
/// An empty result is not an error: `data` is null and `message` explains why.
#[axum::debug_handler]
async fn service_execute(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ServiceExecuteReq>,
) -> Result<Json<ServiceExecuteRes>, ApiError> {
    let env = environment(req.environment)?;
    let service = service_type(req.service_type)?;
    let selected = req.selected_column_names;
    let filters = req.filters;

    let sessions = state.sessions.clone();
    let row = blocking("Service execute", move || {
        with_session(sessions.as_ref(), env, |session| {
            execute_service_query(session, service, &selected, &filters)
        })
    })
    .await?;

    let message = row.is_none().then(|| NO_DATA_MESSAGE.to_string());
    Ok(Json(ServiceExecuteRes {
        environment: env.to_string(),
        service_type: service.to_string(),
        data: row.map(Value::Object),
        message,
    }))
}

/// Shared body of both creation endpoints.
async fn create_intake(
    state: AppState,
    req: CreateIntakeReq,
    max_attempts: u32,
    context: &'static str,
) -> Result<Json<CreateIntakeRes>, ApiError> {
    let env = environment(req.environment)?;
    service_type(req.service_type)?;
    let pairs = req
        .data_fields
        .map(|fields| fields.into_pairs())
        .unwrap_or_default();
    let overrides = IntakeOverrides::new(pairs).map_err(|e| ApiError::logged(context, e))?;
    let creator = IntakeCreator::new(max_attempts).map_err(|e| ApiError::logged(context, e))?;

    tracing::info!(
        "-- Creating intake data in {} (max {} attempts)",
        env,
        creator.max_attempts()
    );

    let sessions = state.sessions.clone();
    let created = blocking(context, move || {
        with_session(sessions.as_ref(), env, |session| {
            let mut rng = StdRng::from_entropy();
            creator.create(session, &mut rng, &overrides)
        })
    })
    .await?;

    Ok(Json(CreateIntakeRes {
        message: "Intake data created successfully".into(),
        data: Value::Object(created.record),
        attempts: created.attempts,
    }))
}

#[utoipa::path(
    post,
    path = "/api/service-create",
    request_body = CreateIntakeReq,
    responses(
        (status = 200, description = "Intake created and verified", body = CreateIntakeRes),
        (status = 400, description = "Missing fields or unknown overrides", body = ErrorRes),
        (status = 409, description = "Every attempt hit an existing key, or a pinned key exists", body = ErrorRes),
        (status = 500, description = "Database error", body = ErrorRes)
    )
)]
/// Create intake data with the short retry bound
#[axum::debug_handler]
async fn service_create(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateIntakeReq>,
) -> Result<Json<CreateIntakeRes>, ApiError> {
    let max_attempts = state.cfg.service_create_max_attempts();
    create_intake(state, req, max_attempts, "Service create").await
}

#[utoipa::path(
    post,
    path = "/api/create-intake-data",
    request_body = CreateIntakeReq,
    responses(
        (status = 200, description = "Intake created and verified", body = CreateIntakeRes),
        (status = 400, description = "Missing fields or unknown overrides", body = ErrorRes),
        (status = 409, description = "Every attempt hit an existing key, or a pinned key exists", body = ErrorRes),
        (status = 500, description = "Database error", body = ErrorRes)
    )
)]
/// Create a patient, intake plan and intake, then read the joined row back
///
/// Generated keys that collide with existing rows are regenerated, up to the configured
/// attempt bound.
#[axum::debug_handler]
async fn create_intake_data(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateIntakeReq>,
) -> Result<Json<CreateIntakeRes>, ApiError> {
    let max_attempts = state.cfg.intake_max_attempts();
    create_intake(state, req, max_attempts, "Create intake data").await
}

#[utoipa::path(
    post,
    path = "/api/generate",
    request_body = GenerateReq,
    responses(
        (status = 200, description = "Rendered synthetic rows", body = GenerateRes),
        (status = 400, description = "Row count out of range or no checked fields", body = ErrorRes)
    )
)]
/// Generate synthetic rows for a form and render them
///
/// Unknown format names render as JSON.
#[axum::debug_handler]
async fn generate(
    State(_state): State<AppState>,
    ApiJson(req): ApiJson<GenerateReq>,
) -> Result<Json<GenerateRes>, ApiError> {
    let format = OutputFormat::parse_lossy(&req.format);
    let mut rng = StdRng::from_entropy();
    let dataset = generate_rows(&req.fields, req.rows, &mut rng)
        .map_err(|e| ApiError::logged("Generate", e))?;
    let content = render(&dataset, format).map_err(|e| ApiError::logged("Generate", e))?;

    Ok(Json(GenerateRes {
        format: format.to_string(),
        rows: req.rows,
        content,
    }))
}

#[utoipa::path(
    post,
    path = "/api/external-call",
    request_body = ExternalCallReq,
    responses(
        (status = 200, description = "Downstream status and body, relayed"),
        (status = 400, description = "Missing or invalid apiType/environment", body = ErrorRes),
        (status = 500, description = "Not configured or transport failure", body = ErrorRes)
    )
)]
/// Forward a request to the external intake API
#[axum::debug_handler]
async fn external_call(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ExternalCallReq>,
) -> Result<Response, ApiError> {
    let api_type: ExternalApiType = required(req.api_type, "apiType")?
        .parse()
        .map_err(|e| ApiError::logged("External call", e))?;
    let env = environment(req.environment)?;
    let body = req
        .request_body
        .unwrap_or_else(|| Value::Object(Default::default()));

    let relayed = state
        .external
        .forward(env, api_type, &body)
        .await
        .map_err(|e| ApiError::logged("External call", e))?;

    Ok(relayed_response(relayed))
}

/// Answer with the downstream status; codes axum cannot represent become 502.
fn relayed_response(relayed: ExternalResponse) -> Response {
    let status = StatusCode::from_u16(relayed.status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(relayed.body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::json;
    use tdm_core::MemoryDatabase;
    use tower::ServiceExt;

    fn app() -> Router {
        let cfg = Arc::new(CoreConfig::in_memory());
        let sessions: Arc<dyn SessionSource> = Arc::new(MemoryDatabase::new());
        router(AppState::new(cfg, sessions).unwrap())
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_alive() {
        let (status, body) = send(&app(), get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn table_schema_validates_and_reports_missing_tables() {
        let app = app();

        let (status, body) = send(&app, get_req("/api/schema?environment=Q1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"], "tableName is required");

        let (status, body) =
            send(&app, get_req("/api/schema?environment=Q9&tableName=TBLPATIENT")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid request");

        let (status, body) =
            send(&app, get_req("/api/schema?environment=q1&tableName=TBLMISSING")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Table not found");

        let (status, body) =
            send(&app, get_req("/api/schema?environment=Q1&tableName=tblpatient")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tableName"], "TBLPATIENT");
        assert_eq!(body["schema"][0]["column_name"], "PATIENTNUMBER");
    }

    #[tokio::test]
    async fn service_schema_supports_both_modes() {
        let app = app();
        let (status, body) = send(
            &app,
            get_req("/api/service-schema?environment=Q2&serviceType=patient-rest-services"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let schema = body["schema"].as_array().unwrap();
        assert!(schema.iter().any(|f| f["propertyName"] == "INTAKEID"));
        assert!(schema.iter().all(|f| f["checked"] == true));

        let (status, body) = send(
            &app,
            get_req(
                "/api/service-schema?environment=Q2&serviceType=patient-rest-services&mode=create-intake",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["schema"].as_array().unwrap().len(), 6);

        let (status, _) = send(
            &app,
            get_req("/api/service-schema?environment=Q2&serviceType=billing"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn created_intake_is_readable_through_service_execute() {
        let app = app();
        let (status, created) = send(
            &app,
            post_json(
                "/api/create-intake-data",
                json!({"environment": "Q1", "serviceType": "patient-rest-services"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["attempts"], 1);

        let patient_number = created["data"]["PATIENTNUMBER"].as_str().unwrap().to_string();
        assert_eq!(patient_number.len(), 10);
        assert!(patient_number.chars().all(|c| c.is_ascii_digit()));
        assert!(created["data"]["INTAKEID"].is_number());

        let (status, found) = send(
            &app,
            post_json(
                "/api/service-execute",
                json!({
                    "environment": "Q1",
                    "serviceType": "patient-rest-services",
                    "selectedColumnNames": ["FIRSTNAME", "INTAKEID"],
                    "filters": {"PATIENTNUMBER": patient_number},
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found["data"]["FIRSTNAME"], created["data"]["FIRSTNAME"]);
        assert_eq!(found["data"]["INTAKEID"], created["data"]["INTAKEID"]);
        assert!(found.get("message").is_none());
    }

    #[tokio::test]
    async fn service_execute_reports_no_data_and_rejects_unknown_columns() {
        let app = app();
        let (status, body) = send(
            &app,
            post_json(
                "/api/service-execute",
                json!({
                    "environment": "Q5",
                    "serviceType": "patient-rest-services",
                    "selectedColumnNames": ["LASTNAME"],
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"].is_null());
        assert_eq!(body["message"], "No data found");

        let (status, body) = send(
            &app,
            post_json(
                "/api/service-execute",
                json!({
                    "environment": "Q5",
                    "serviceType": "patient-rest-services",
                    "selectedColumnNames": ["LASTNAME; DROP TABLE TBLPATIENT"],
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Unknown column");
    }

    #[tokio::test]
    async fn overrides_are_validated_before_any_insert() {
        let (status, body) = send(
            &app(),
            post_json(
                "/api/service-create",
                json!({
                    "environment": "Q1",
                    "serviceType": "patient-rest-services",
                    "dataFields": [{"SSN": "123-45-6789"}],
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid request");
    }

    #[tokio::test]
    async fn pinned_existing_patient_number_conflicts_without_retrying() {
        let app = app();
        let request = || {
            post_json(
                "/api/create-intake-data",
                json!({
                    "environment": "Q1",
                    "serviceType": "patient-rest-services",
                    "dataFields": {"PATIENTNUMBER": "5550001111"},
                }),
            )
        };

        let (status, first) = send(&app, request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["data"]["PATIENTNUMBER"], "5550001111");

        let (status, body) = send(&app, request()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Key already exists");
        assert_eq!(body["details"], "PATIENTNUMBER 5550001111 already exists");
    }

    #[tokio::test]
    async fn generate_renders_requested_format() {
        let (status, body) = send(
            &app(),
            post_json(
                "/api/generate",
                json!({
                    "fields": [
                        {"id": "1", "type": "postal", "propertyName": "ZIP"},
                        {"id": "2", "type": "constant", "propertyName": "STATUS", "value": "NEW"}
                    ],
                    "rows": 3,
                    "format": "csv",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["format"], "csv");
        let content = body["content"].as_str().unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], r#""ZIP","STATUS""#);
        assert!(lines[1].ends_with(r#","NEW""#));

        let (status, _) = send(
            &app(),
            post_json(
                "/api/generate",
                json!({"fields": [{"id": "1", "type": "text"}], "rows": 0}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn external_call_requires_configuration() {
        let app = app();
        let (status, body) = send(
            &app,
            post_json(
                "/api/external-call",
                json!({"apiType": "initial", "environment": "Q1", "requestBody": {}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "External API is not configured");

        let (status, _) = send(
            &app,
            post_json(
                "/api/external-call",
                json!({"apiType": "delete", "environment": "Q1"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_bodies_get_the_error_envelope() {
        let app = app();
        let (status, body) = send(
            &app,
            post_json(
                "/api/service-execute",
                json!({
                    "environment": "Q1",
                    "serviceType": "patient-rest-services",
                    "selectedColumnNames": "FIRSTNAME",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid request");
        assert!(body["details"].as_str().unwrap().contains("selectedColumnNames"));

        let broken = Request::builder()
            .method("POST")
            .uri("/api/service-execute")
            .header("content-type", "application/json")
            .body(Body::from("{\"environment\": "))
            .unwrap();
        let (status, body) = send(&app, broken).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid request");

        let untyped = Request::builder()
            .method("POST")
            .uri("/api/generate")
            .body(Body::from(r#"{"fields": [], "rows": 1}"#))
            .unwrap();
        let (status, body) = send(&app, untyped).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["details"].as_str().unwrap().contains("Content-Type"));
    }

    #[tokio::test]
    async fn malformed_query_strings_get_the_error_envelope() {
        let (status, body) = send(
            &app(),
            get_req("/api/schema?environment=Q1&environment=Q2&tableName=TBLPATIENT"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid request");
    }

    #[tokio::test]
    async fn relayed_status_and_body_reach_the_caller() {
        let response = relayed_response(ExternalResponse::relay(404, "no such intake".into()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!("no such intake"));

        let response = relayed_response(ExternalResponse::relay(200, r#"{"id": 9}"#.into()));
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["id"], 9);
    }

    #[test]
    fn core_errors_map_to_statuses() {
        assert_eq!(
            status_of(&TestDataError::RetriesExhausted { attempts: 50 }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(&TestDataError::KeyAlreadyExists {
                column: "INTAKEID",
                value: "1234567890".into(),
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(&TestDataError::TableNotFound("X".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(&TestDataError::Database(tdm_core::DbError::new(
                Some(1),
                "unique constraint violated"
            ))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
