//! ARM client against a fake resource-management endpoint

use avd_ops::convergence::{ConvergeAction, ConvergeConfig, Converger};
use avd_ops::domain::ports::{
    AccessToken, Inventory, ProvisioningStatus, ResourceDescriptor, ResourceKey, ResourceKind, ResourceProvider,
    TokenSource,
};
use avd_ops::provider::auth::StaticTokenCredential;
use avd_ops::provider::{ArmClient, ArmConfig};
use avd_ops::Error;
use assert_matches::assert_matches;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SUB: &str = "11111111-2222-3333-4444-555555555555";
const TOKEN: &str = "test-token";

// =============================================================================
// Fake ARM
// =============================================================================

#[derive(Default)]
struct FakeArm {
    base: String,
    resources: HashMap<String, Value>,
    /// operation id -> (resource path, polls seen)
    operations: HashMap<String, (String, u32)>,
    calls: Vec<(Method, String)>,
    subscription_failures: u32,
}

type Shared = Arc<Mutex<FakeArm>>;

impl FakeArm {
    fn count(&self, method: &Method, fragment: &str) -> usize {
        self.calls
            .iter()
            .filter(|(m, p)| m == method && p.contains(fragment))
            .count()
    }
}

fn arm_error(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({ "error": { "code": code, "message": message } }))).into_response()
}

async fn handle(State(state): State<Shared>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let path = uri.path().to_string();
    let mut arm = state.lock();
    arm.calls.push((method.clone(), path.clone()));

    let bearer = format!("Bearer {}", TOKEN);
    if headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) != Some(bearer.as_str()) {
        return arm_error(StatusCode::UNAUTHORIZED, "InvalidAuthenticationToken", "token rejected");
    }

    if let Some(id) = path.strip_prefix("/operations/") {
        let Some((resource, polls)) = arm.operations.get_mut(id) else {
            return arm_error(StatusCode::NOT_FOUND, "OperationNotFound", id);
        };
        *polls += 1;
        if *polls < 2 {
            return ([("retry-after", "0")], Json(json!({ "status": "InProgress" }))).into_response();
        }
        let resource = resource.clone();
        if let Some(stored) = arm.resources.get_mut(&resource) {
            stored["properties"]["provisioningState"] = json!("Succeeded");
            if resource.contains("/publicIPAddresses/") {
                stored["properties"]["ipAddress"] = json!("52.160.10.20");
            }
        }
        return Json(json!({ "status": "Succeeded" })).into_response();
    }

    if path == format!("/subscriptions/{}", SUB) {
        if arm.subscription_failures > 0 {
            arm.subscription_failures -= 1;
            return arm_error(StatusCode::SERVICE_UNAVAILABLE, "ServiceUnavailable", "try again");
        }
        return Json(json!({ "subscriptionId": SUB, "displayName": "Test", "state": "Enabled" })).into_response();
    }

    if path.ends_with("/resourcegroups") {
        let page_two = uri.query().map_or(false, |q| q.contains("page=2"));
        return if page_two {
            Json(json!({ "value": [{ "name": "rg-c", "location": "westus" }] })).into_response()
        } else {
            let next = format!("{}{}?api-version=2021-04-01&page=2", arm.base, path);
            Json(json!({
                "value": [
                    { "name": "rg-a", "location": "eastus", "properties": { "provisioningState": "Succeeded" } },
                    { "name": "rg-b", "location": "eastus", "tags": { "env": "test" } }
                ],
                "nextLink": next
            }))
            .into_response()
        };
    }

    match method {
        Method::GET => match arm.resources.get(&path) {
            Some(stored) => Json(stored.clone()).into_response(),
            None => arm_error(StatusCode::NOT_FOUND, "ResourceNotFound", "not found"),
        },
        Method::PUT if path.contains("/virtualNetworks/") => {
            arm_error(StatusCode::BAD_REQUEST, "InvalidAddressPrefix", "address prefix is invalid")
        }
        Method::PUT => {
            let mut resource: Value = serde_json::from_slice(&body).unwrap_or_else(|_| json!({}));
            resource["id"] = json!(path);
            resource["properties"]["provisioningState"] = json!("Creating");

            let op = format!("op-{}", arm.operations.len() + 1);
            arm.operations.insert(op.clone(), (path.clone(), 0));
            arm.resources.insert(path, resource.clone());

            let status_url = format!("{}/operations/{}", arm.base, op);
            (
                StatusCode::CREATED,
                [("azure-asyncoperation", status_url.as_str()), ("retry-after", "0")],
                Json(resource),
            )
                .into_response()
        }
        _ => arm_error(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed", "unsupported"),
    }
}

async fn spawn_fake() -> (Shared, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let state: Shared = Arc::new(Mutex::new(FakeArm {
        base: base.clone(),
        ..Default::default()
    }));

    let app = Router::new().fallback(handle).with_state(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (state, base)
}

fn client(base: &str, token: &str) -> ArmClient {
    let mut config = ArmConfig::new(SUB).with_endpoint(base);
    config.initial_backoff = Duration::from_millis(10);
    config.max_backoff = Duration::from_millis(50);
    config.max_elapsed = Duration::from_secs(5);
    ArmClient::with_http(config, Arc::new(StaticTokenCredential::new(token)), reqwest::Client::new())
}

/// Token endpoint that is down for the first `outages` requests
struct FlakyCredential {
    outages: AtomicU32,
    requests: AtomicU32,
    error: fn() -> Error,
}

#[async_trait::async_trait]
impl TokenSource for FlakyCredential {
    async fn token(&self, scope: &str) -> avd_ops::Result<AccessToken> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let remaining = self.outages.load(Ordering::SeqCst);
        if remaining > 0 {
            self.outages.store(remaining - 1, Ordering::SeqCst);
            return Err((self.error)());
        }
        StaticTokenCredential::new(TOKEN).token(scope).await
    }

    fn describe(&self) -> &'static str {
        "flaky"
    }
}

fn client_with(base: &str, credential: Arc<FlakyCredential>) -> ArmClient {
    let mut config = ArmConfig::new(SUB).with_endpoint(base);
    config.initial_backoff = Duration::from_millis(10);
    config.max_backoff = Duration::from_millis(50);
    config.max_elapsed = Duration::from_secs(5);
    ArmClient::with_http(config, credential, reqwest::Client::new())
}

fn fast() -> ConvergeConfig {
    ConvergeConfig {
        poll_interval: Duration::from_millis(10),
        timeout: Duration::from_secs(10),
    }
}

fn public_ip() -> ResourceDescriptor {
    ResourceDescriptor::new(ResourceKind::PublicIp, "rg-a", "pip-1", "eastus")
        .with_sku(json!({ "name": "Standard" }))
        .with_properties(json!({ "publicIPAllocationMethod": "Static" }))
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_create_polls_async_operation() {
    let (fake, base) = spawn_fake().await;
    let converger = Converger::new(Arc::new(client(&base, TOKEN)), fast());

    let outcome = converger.converge(&public_ip()).await.unwrap();

    assert_eq!(outcome.action, ConvergeAction::Created);
    assert_eq!(outcome.state.status, ProvisioningStatus::Succeeded);
    assert_eq!(outcome.polls, 2);
    assert_eq!(
        outcome.state.property("/properties/ipAddress").and_then(Value::as_str),
        Some("52.160.10.20")
    );
    assert_eq!(fake.lock().count(&Method::PUT, "/publicIPAddresses/pip-1"), 1);

    // Already converged: no further writes
    let outcome = converger.converge(&public_ip()).await.unwrap();
    assert_eq!(outcome.action, ConvergeAction::Unchanged);
    assert_eq!(fake.lock().count(&Method::PUT, "/publicIPAddresses/pip-1"), 1);
}

#[tokio::test]
async fn test_missing_resource_is_absent() {
    let (_fake, base) = spawn_fake().await;
    let arm = client(&base, TOKEN);

    let key = ResourceKey::new(ResourceKind::NetworkInterface, "rg-a", "nic-404");
    assert_eq!(arm.get(&key).await.unwrap(), None);
}

#[tokio::test]
async fn test_list_follows_next_link() {
    let (_fake, base) = spawn_fake().await;
    let groups = client(&base, TOKEN).list_resource_groups().await.unwrap();

    let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, vec!["rg-a", "rg-b", "rg-c"]);
    assert_eq!(groups[1].tags.get("env").map(String::as_str), Some("test"));
    assert_eq!(groups[0].properties.provisioning_state, "Succeeded");
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let (fake, base) = spawn_fake().await;
    fake.lock().subscription_failures = 1;

    let info = client(&base, TOKEN).subscription_info().await.unwrap();

    assert_eq!(info.name, "Test");
    let calls = fake.lock().calls.iter().filter(|(_, p)| p == &format!("/subscriptions/{}", SUB)).count();
    assert_eq!(calls, 2);
}

#[tokio::test]
async fn test_rejection_is_not_retried() {
    let (fake, base) = spawn_fake().await;
    let converger = Converger::new(Arc::new(client(&base, TOKEN)), fast());
    let vnet = ResourceDescriptor::new(ResourceKind::VirtualNetwork, "rg-a", "bad-vnet", "eastus")
        .with_properties(json!({ "addressSpace": { "addressPrefixes": ["10.0.0.0/33"] } }));

    let result = converger.converge(&vnet).await;

    assert_matches!(
        result,
        Err(Error::ProviderRejected { status: 400, code, .. }) if code == "InvalidAddressPrefix"
    );
    assert_eq!(fake.lock().count(&Method::PUT, "/virtualNetworks/bad-vnet"), 1);
}

#[tokio::test]
async fn test_bad_token_is_authentication_failure() {
    let (fake, base) = spawn_fake().await;

    let result = client(&base, "wrong").list_resource_groups().await;

    assert_matches!(result, Err(Error::AuthenticationFailure(_)));
    assert_eq!(fake.lock().calls.len(), 1);
}

#[tokio::test]
async fn test_token_outage_is_retried() {
    let (fake, base) = spawn_fake().await;
    let credential = Arc::new(FlakyCredential {
        outages: AtomicU32::new(2),
        requests: AtomicU32::new(0),
        error: || Error::ProviderUnavailable("token endpoint unreachable".into()),
    });

    let info = client_with(&base, credential.clone()).subscription_info().await.unwrap();

    assert_eq!(info.name, "Test");
    assert_eq!(credential.requests.load(Ordering::SeqCst), 3);
    assert_eq!(fake.lock().calls.len(), 1);
}

#[tokio::test]
async fn test_rejected_credentials_are_not_retried() {
    let (fake, base) = spawn_fake().await;
    let credential = Arc::new(FlakyCredential {
        outages: AtomicU32::new(u32::MAX),
        requests: AtomicU32::new(0),
        error: || Error::AuthenticationFailure("invalid_client".into()),
    });

    let result = client_with(&base, credential.clone()).subscription_info().await;

    assert_matches!(result, Err(Error::AuthenticationFailure(_)));
    assert_eq!(credential.requests.load(Ordering::SeqCst), 1);
    assert!(fake.lock().calls.is_empty());
}
