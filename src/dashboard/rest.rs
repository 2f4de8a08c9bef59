//! REST API Handlers
//!
//! Settings management, authentication status and read-only inventory for
//! the dashboard. The authenticated connection lives in [`DashboardState`]
//! and reaches handlers through the [`Authenticated`] extractor.

use crate::domain::ports::{
    Inventory, ResourceGroupInfo, StorageAccountInfo, SubscriptionInfo, VirtualMachineInfo, WebAppInfo,
};
use crate::error::Error;
use crate::provider::{Connection, ConnectorRef};
use crate::settings::{AzureSettings, SettingsStore};
use axum::{
    extract::{FromRequestParts, Json, Query, State},
    http::{request::Parts, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const INDEX_HTML: &str = include_str!("index.html");

// =============================================================================
// State
// =============================================================================

/// Shared application state
#[derive(Clone)]
pub struct DashboardState {
    inner: Arc<Inner>,
}

struct Inner {
    store: SettingsStore,
    connector: ConnectorRef,
    /// Values from the command line; applied over the settings file
    overrides: AzureSettings,
    connection: RwLock<Option<Connection>>,
}

impl DashboardState {
    pub fn new(store: SettingsStore, connector: ConnectorRef, overrides: AzureSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                connector,
                overrides,
                connection: RwLock::new(None),
            }),
        }
    }

    /// Effective settings: file, process environment, command line
    pub async fn settings(&self) -> crate::error::Result<AzureSettings> {
        Ok(self.inner.store.load().await?.overlay(self.inner.overrides.clone()))
    }

    /// Authenticate with the current settings; the connection is kept on
    /// success and dropped on failure
    pub async fn reconnect(&self) -> crate::error::Result<Connection> {
        let settings = self.settings().await?;
        match self.inner.connector.connect(&settings).await {
            Ok(connection) => {
                info!("Dashboard connected to subscription {}", connection.subscription_id);
                *self.inner.connection.write().await = Some(connection.clone());
                Ok(connection)
            }
            Err(e) => {
                *self.inner.connection.write().await = None;
                Err(e)
            }
        }
    }

    pub async fn connection(&self) -> Option<Connection> {
        self.inner.connection.read().await.clone()
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Error surfaced to API clients as `{"error": ...}`
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotAuthenticated,
    Unauthorized(String),
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::MissingField { .. } | Error::Configuration(_) | Error::InvalidResourceId { .. } => {
                ApiError::BadRequest(e.to_string())
            }
            Error::AuthenticationFailure(_) => ApiError::Unauthorized(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotAuthenticated => (StatusCode::UNAUTHORIZED, "Not authenticated".to_string()),
            ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m),
            ApiError::Internal(m) => {
                error!("Request failed: {}", m);
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// =============================================================================
// Extractor
// =============================================================================

/// The current authenticated connection; rejects with 401 when there is none
pub struct Authenticated(pub Connection);

#[axum::async_trait]
impl FromRequestParts<DashboardState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(_parts: &mut Parts, state: &DashboardState) -> ApiResult<Self> {
        state.connection().await.map(Authenticated).ok_or(ApiError::NotAuthenticated)
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Optional `?resource_group=` filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupFilter {
    pub resource_group: Option<String>,
}

impl GroupFilter {
    fn group(&self) -> Option<&str> {
        self.resource_group.as_deref().filter(|g| !g.is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardResponse {
    pub subscription: SubscriptionInfo,
    pub resource_groups: Vec<ResourceGroupInfo>,
    pub virtual_machines: Vec<VirtualMachineInfo>,
    pub storage_accounts: Vec<StorageAccountInfo>,
    pub web_apps: Vec<WebAppInfo>,
}

// =============================================================================
// REST Router
// =============================================================================

/// Build the dashboard router
pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        // Settings endpoints
        .route("/api/settings/azure", get(get_settings).post(save_settings))
        .route("/api/settings/test-connection", get(test_connection))
        .route("/api/auth/status", get(auth_status))
        // Inventory endpoints
        .route("/api/dashboard", get(dashboard))
        .route("/api/resources/vms", get(list_vms))
        .route("/api/resources/storage", get(list_storage))
        .route("/api/resources/webapps", get(list_web_apps))
        .route("/api/resources/resourcegroups", get(list_resource_groups))
        // Health endpoint
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn get_settings(State(state): State<DashboardState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.settings().await?.masked()))
}

/// Validate, persist and reconnect
async fn save_settings(
    State(state): State<DashboardState>,
    Json(request): Json<AzureSettings>,
) -> ApiResult<impl IntoResponse> {
    request.validate_service_principal()?;
    state.inner.store.save(&request).await?;

    let body = match state.reconnect().await {
        Ok(_) => json!({ "success": true, "authenticated": true }),
        Err(e) => {
            warn!("Settings saved but authentication failed: {}", e);
            json!({ "success": true, "authenticated": false, "error": e.to_string() })
        }
    };
    Ok(Json(body))
}

async fn test_connection(State(state): State<DashboardState>) -> Response {
    match state.reconnect().await {
        Ok(connection) => (
            StatusCode::OK,
            Json(json!({ "success": true, "subscription_id": connection.subscription_id })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn auth_status(State(state): State<DashboardState>) -> impl IntoResponse {
    match state.connection().await {
        Some(connection) => Json(json!({
            "authenticated": true,
            "subscription_id": connection.subscription_id,
        })),
        None => Json(json!({ "authenticated": false, "error": "Not authenticated" })),
    }
}

async fn dashboard(Authenticated(conn): Authenticated) -> ApiResult<Json<DashboardResponse>> {
    let provider = &conn.provider;
    let (subscription, resource_groups, virtual_machines, storage_accounts, web_apps) = tokio::try_join!(
        provider.subscription_info(),
        provider.list_resource_groups(),
        provider.list_virtual_machines(None),
        provider.list_storage_accounts(None),
        provider.list_web_apps(None),
    )?;

    Ok(Json(DashboardResponse {
        subscription,
        resource_groups,
        virtual_machines,
        storage_accounts,
        web_apps,
    }))
}

async fn list_vms(
    Authenticated(conn): Authenticated,
    Query(filter): Query<GroupFilter>,
) -> ApiResult<impl IntoResponse> {
    let vms = conn.provider.list_virtual_machines(filter.group()).await?;
    Ok(Json(json!({ "vms": vms })))
}

async fn list_storage(
    Authenticated(conn): Authenticated,
    Query(filter): Query<GroupFilter>,
) -> ApiResult<impl IntoResponse> {
    let accounts = conn.provider.list_storage_accounts(filter.group()).await?;
    Ok(Json(json!({ "storage_accounts": accounts })))
}

async fn list_web_apps(
    Authenticated(conn): Authenticated,
    Query(filter): Query<GroupFilter>,
) -> ApiResult<impl IntoResponse> {
    let apps = conn.provider.list_web_apps(filter.group()).await?;
    Ok(Json(json!({ "web_apps": apps })))
}

async fn list_resource_groups(Authenticated(conn): Authenticated) -> ApiResult<impl IntoResponse> {
    let groups = conn.provider.list_resource_groups().await?;
    Ok(Json(json!({ "resource_groups": groups })))
}

async fn health_check(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "azure_connected": state.connection().await.is_some(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{InMemoryCloud, InMemoryConfig, SimulatedConnector};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    fn state(dir: &tempfile::TempDir) -> DashboardState {
        let store = SettingsStore::new(dir.path().join(".env")).without_process_env();
        let cloud = Arc::new(InMemoryCloud::new(InMemoryConfig::default()));
        cloud.seed_resource_group("avd-rg", "eastus");
        DashboardState::new(store, Arc::new(SimulatedConnector::new(cloud)), AzureSettings::default())
    }

    async fn call(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn full_settings() -> Value {
        json!({
            "subscription_id": "sub-1",
            "tenant_id": "tenant-1",
            "client_id": "client-1",
            "client_secret": "secret-1",
        })
    }

    #[tokio::test]
    async fn test_dashboard_requires_authentication() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = call(router(state(&dir)), Method::GET, "/api/dashboard", None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "error": "Not authenticated" }));
    }

    #[tokio::test]
    async fn test_save_settings_names_missing_secret() {
        let dir = tempfile::tempdir().unwrap();
        let mut payload = full_settings();
        payload["client_secret"] = json!("");

        let (status, body) = call(router(state(&dir)), Method::POST, "/api/settings/azure", Some(payload)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("client_secret"));
        assert!(!dir.path().join(".env").exists());
    }

    #[tokio::test]
    async fn test_save_settings_then_browse() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);

        let (status, body) = call(
            router(state.clone()),
            Method::POST,
            "/api/settings/azure",
            Some(full_settings()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true, "authenticated": true }));

        let written = std::fs::read_to_string(dir.path().join(".env")).unwrap();
        assert!(written.contains("AZURE_CLIENT_SECRET=secret-1"));

        let (status, body) = call(router(state.clone()), Method::GET, "/api/settings/azure", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["client_secret_set"], true);
        assert!(body.get("client_secret").is_none());

        let (status, body) = call(router(state.clone()), Method::GET, "/api/dashboard", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resource_groups"][0]["name"], "avd-rg");
        assert_eq!(body["virtual_machines"], json!([]));

        let (_, body) = call(router(state.clone()), Method::GET, "/api/auth/status", None).await;
        assert_eq!(body["authenticated"], true);

        let (_, body) = call(router(state), Method::GET, "/health", None).await;
        assert_eq!(body, json!({ "status": "healthy", "azure_connected": true }));
    }

    #[tokio::test]
    async fn test_connection_failure_is_401() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = call(router(state(&dir)), Method::GET, "/api/settings/test-connection", None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("AZURE_SUBSCRIPTION_ID"));
    }

    #[tokio::test]
    async fn test_index_page() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(state(&dir))
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("<html"));
    }
}
