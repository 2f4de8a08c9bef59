//! ARM REST client
//!
//! Talks to the resource-management endpoint over HTTPS:
//! - `PUT` with the long-running-operation protocol (`Azure-AsyncOperation`,
//!   `Location`, `Retry-After`)
//! - `GET` with 404 mapped to "absent"
//! - list calls that follow `nextLink`
//! - VM actions (restart, run-command) and host pool registration tokens
//!
//! Transient failures (connect errors, timeouts, 429, 5xx) are retried here
//! with exponential backoff; nothing above this layer retries.

use crate::domain::ports::{
    Inventory, OperationHandle, OperationStatus, PollTarget, ProvisioningStatus, RegistrationToken,
    ResourceDescriptor, ResourceGroupInfo, ResourceGroupProperties, ResourceKey, ResourceProvider,
    ResourceState, RunCommandOutput, ScriptKind, StorageAccountInfo, SubscriptionInfo,
    TokenSourceRef, VirtualMachineInfo, VmOperations, WebAppInfo,
};
use crate::domain::resource_id::ResourceId;
use crate::error::{Error, ErrorAction, Result};
use crate::provider::tags_of;
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Public cloud resource-management endpoint
pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";

const SUBSCRIPTION_API: &str = "2022-12-01";
const RESOURCE_GROUP_API: &str = "2021-04-01";
const COMPUTE_API: &str = "2023-09-01";
const STORAGE_API: &str = "2023-01-01";
const WEB_API: &str = "2022-09-01";
const DESKTOP_API: &str = "2022-09-09";

// =============================================================================
// Configuration
// =============================================================================

/// ARM client configuration
#[derive(Debug, Clone)]
pub struct ArmConfig {
    pub endpoint: String,
    pub subscription_id: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Give up retrying a request after this long
    pub max_elapsed: Duration,
    /// Poll interval for VM actions when no `Retry-After` is sent
    pub action_poll_interval: Duration,
    /// Budget for VM actions (restart, run-command)
    pub action_timeout: Duration,
}

impl ArmConfig {
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            subscription_id: subscription_id.into(),
            request_timeout: Duration::from_secs(60),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_elapsed: Duration::from_secs(120),
            action_poll_interval: Duration::from_secs(5),
            action_timeout: Duration::from_secs(15 * 60),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Token scope for this endpoint
    pub fn scope(&self) -> String {
        format!("{}/.default", self.endpoint)
    }
}

// =============================================================================
// Response
// =============================================================================

#[derive(Debug)]
struct ArmResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl ArmResponse {
    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    fn retry_after(&self) -> Option<Duration> {
        retry_after(&self.headers)
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn error_detail(body: &Value, status: StatusCode) -> (String, String) {
    let error = body.get("error").unwrap_or(body);
    let code = error
        .get("code")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string());
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| body.as_str().map(str::to_string))
        .unwrap_or_default();
    (code, message)
}

// =============================================================================
// ARM Client
// =============================================================================

/// Authenticated resource-management client
pub struct ArmClient {
    http: reqwest::Client,
    config: ArmConfig,
    credential: TokenSourceRef,
    scope: String,
}

impl ArmClient {
    pub fn new(config: ArmConfig, credential: TokenSourceRef) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_http(config, credential, http))
    }

    pub fn with_http(config: ArmConfig, credential: TokenSourceRef, http: reqwest::Client) -> Self {
        let scope = config.scope();
        Self {
            http,
            config,
            credential,
            scope,
        }
    }

    pub fn config(&self) -> &ArmConfig {
        &self.config
    }

    /// Confirm the credential works by listing resource groups
    pub async fn verify(&self) -> Result<()> {
        info!("Verifying credentials ({})", self.credential.describe());
        match self.list_resource_groups().await {
            Ok(groups) => {
                debug!("Credential verified, {} resource groups visible", groups.len());
                Ok(())
            }
            Err(Error::ProviderRejected { status: 403, message, .. }) => {
                Err(Error::AuthenticationFailure(format!("access denied: {}", message)))
            }
            Err(e) => Err(e),
        }
    }

    fn url(&self, path: &str, api_version: &str) -> String {
        format!("{}{}?api-version={}", self.config.endpoint, path, api_version)
    }

    fn resource_url(&self, key: &ResourceKey) -> String {
        self.url(
            &key.resource_id(&self.config.subscription_id).to_string(),
            key.kind.api_version(),
        )
    }

    fn subscription_path(&self) -> String {
        ResourceId::subscription(&self.config.subscription_id).to_string()
    }

    /// Send with retry on transient failures
    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<ArmResponse> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.initial_backoff)
            .with_max_interval(self.config.max_backoff)
            .with_max_elapsed_time(Some(self.config.max_elapsed))
            .build();

        backoff::future::retry(policy, || {
            let method = method.clone();
            async move { self.attempt(method, url, body).await }
        })
        .await
    }

    async fn attempt(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> std::result::Result<ArmResponse, backoff::Error<Error>> {
        let token = self
            .credential
            .token(&self.scope)
            .await
            .map_err(|e| classify(e, None))?;

        debug!("{} {}", method, url);
        let mut request = self
            .http
            .request(method.clone(), url)
            .bearer_auth(&token.token)
            .header("x-ms-client-request-id", Uuid::new_v4().to_string());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| classify(Error::Http(e), None))?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await.map_err(|e| classify(Error::Http(e), None))?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(ArmResponse { status, headers, body });
        }

        let (code, message) = error_detail(&body, status);
        let err = match status.as_u16() {
            401 => Error::AuthenticationFailure(format!("{}: {}", code, message)),
            s if s >= 500 => Error::ProviderUnavailable(format!("{} {}: {}", s, code, message)),
            s => Error::ProviderRejected { status: s, code, message },
        };
        if err.is_retryable() {
            warn!("{} {} returned {}, retrying", method, url, status);
        }
        Err(classify(err, retry_after(&headers)))
    }

    async fn get_optional(&self, url: &str) -> Result<Option<Value>> {
        let response = self.send(Method::GET, url, None).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(response.body))
    }

    /// Fetch every page of a list call
    async fn list_all(&self, url: String) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut next = Some(url);

        while let Some(url) = next {
            let page = self
                .get_optional(&url)
                .await?
                .ok_or_else(|| Error::not_found("list", &url))?;
            if let Some(values) = page.get("value").and_then(Value::as_array) {
                items.extend(values.iter().cloned());
            }
            next = page
                .get("nextLink")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
        }

        Ok(items)
    }

    fn group_scoped(&self, resource_group: Option<&str>, provider_path: &str, api_version: &str) -> String {
        let sub = self.subscription_path();
        match resource_group {
            Some(rg) => self.url(&format!("{}/resourceGroups/{}/providers/{}", sub, rg, provider_path), api_version),
            None => self.url(&format!("{}/providers/{}", sub, provider_path), api_version),
        }
    }

    /// Submit an action and wait for its long-running operation
    async fn run_action(&self, url: &str, body: Option<&Value>, operation: &str, not_found: (&str, &str)) -> Result<Value> {
        let response = self.send(Method::POST, url, body).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Err(Error::not_found(not_found.0, not_found.1));
        }

        let wait = self.wait_action(response, operation);
        tokio::time::timeout(self.config.action_timeout, wait)
            .await
            .map_err(|_| Error::Timeout {
                operation: operation.to_string(),
                after: self.config.action_timeout,
            })?
    }

    async fn wait_action(&self, response: ArmResponse, operation: &str) -> Result<Value> {
        if response.status != StatusCode::ACCEPTED {
            return Ok(response.body);
        }

        if let Some(url) = response.header("azure-asyncoperation") {
            let mut delay = response.retry_after();
            loop {
                tokio::time::sleep(delay.unwrap_or(self.config.action_poll_interval)).await;
                let status = self.send(Method::GET, &url, None).await?;
                let state = str_at(&status.body, "/status");
                match state.as_str() {
                    "Succeeded" => {
                        return Ok(status.body.pointer("/properties/output").cloned().unwrap_or(status.body));
                    }
                    "Failed" | "Canceled" => {
                        let (_, message) = error_detail(&status.body, status.status);
                        return Err(Error::OperationFailed {
                            operation: operation.to_string(),
                            reason: message,
                        });
                    }
                    _ => delay = status.retry_after(),
                }
            }
        }

        if let Some(url) = response.header("location") {
            let mut delay = response.retry_after();
            loop {
                tokio::time::sleep(delay.unwrap_or(self.config.action_poll_interval)).await;
                let status = self.send(Method::GET, &url, None).await?;
                if status.status != StatusCode::ACCEPTED {
                    return Ok(status.body);
                }
                delay = status.retry_after();
            }
        }

        Ok(Value::Null)
    }

    async fn state_after_operation(&self, key: &ResourceKey, failed: Option<&Value>) -> Result<ResourceState> {
        let current = self.get(key).await?;
        match failed {
            None => current.ok_or_else(|| Error::not_found(key.kind.slug(), &key.name)),
            Some(body) => {
                let (code, message) = error_detail(body, StatusCode::OK);
                warn!("Operation on {} failed: {} {}", key, code, message);
                let mut state = current.unwrap_or_else(|| ResourceState {
                    observed: body.clone(),
                    ..ResourceState::absent(key)
                });
                state.status = ProvisioningStatus::Failed;
                Ok(state)
            }
        }
    }

    async fn power_state(&self, vm_id: &str) -> String {
        let url = self.url(&format!("{}/instanceView", vm_id), COMPUTE_API);
        match self.get_optional(&url).await {
            Ok(Some(view)) => view
                .get("statuses")
                .and_then(Value::as_array)
                .and_then(|statuses| {
                    statuses
                        .iter()
                        .filter_map(|s| s.get("code").and_then(Value::as_str))
                        .find_map(|code| code.strip_prefix("PowerState/"))
                })
                .unwrap_or("unknown")
                .to_string(),
            Ok(None) => "unknown".to_string(),
            Err(e) => {
                warn!("Failed to read instance view of {}: {}", vm_id, e);
                "unknown".to_string()
            }
        }
    }

    fn vm_path(&self, resource_group: &str, name: &str) -> String {
        ResourceKey::new(crate::domain::ports::ResourceKind::VirtualMachine, resource_group, name)
            .resource_id(&self.config.subscription_id)
            .to_string()
    }
}

fn classify(err: Error, retry_after: Option<Duration>) -> backoff::Error<Error> {
    match (err.action(), retry_after) {
        (ErrorAction::Fail, _) => backoff::Error::permanent(err),
        (_, Some(after)) => backoff::Error::retry_after(err, after),
        (ErrorAction::RetryAfter(after), None) => backoff::Error::retry_after(err, after),
        (ErrorAction::RetryWithBackoff, None) => backoff::Error::transient(err),
    }
}

fn str_at(value: &Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn group_of(value: &Value) -> String {
    value
        .get("id")
        .and_then(Value::as_str)
        .and_then(|id| id.parse::<ResourceId>().ok())
        .and_then(|id| id.resource_group_name().map(str::to_string))
        .unwrap_or_default()
}

fn parse_expiry(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl ResourceProvider for ArmClient {
    fn subscription_id(&self) -> &str {
        &self.config.subscription_id
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<ResourceState>> {
        Ok(self
            .get_optional(&self.resource_url(key))
            .await?
            .map(|body| ResourceState::from_arm(key, body)))
    }

    async fn begin_create_or_update(&self, descriptor: &ResourceDescriptor) -> Result<OperationHandle> {
        let key = descriptor.key();
        let body = descriptor.body();
        let response = self.send(Method::PUT, &self.resource_url(&key), Some(&body)).await?;

        if response.status == StatusCode::NOT_FOUND {
            let (code, message) = error_detail(&response.body, response.status);
            return Err(Error::ProviderRejected { status: 404, code, message });
        }

        let retry_after = response.retry_after();
        if response.status != StatusCode::ACCEPTED && response.body.is_object() {
            let state = ResourceState::from_arm(&key, response.body.clone());
            if state.status.is_terminal() {
                return Ok(OperationHandle {
                    key,
                    target: PollTarget::Completed(state),
                    retry_after,
                });
            }
        }

        let target = if let Some(url) = response.header("azure-asyncoperation") {
            PollTarget::AsyncOperation(url)
        } else if let Some(url) = response.header("location") {
            PollTarget::Location(url)
        } else {
            PollTarget::Resource
        };
        debug!("{} accepted, polling {:?}", key, target);

        Ok(OperationHandle { key, target, retry_after })
    }

    async fn poll(&self, handle: &OperationHandle) -> Result<OperationStatus> {
        let key = &handle.key;
        match &handle.target {
            PollTarget::Completed(state) => Ok(OperationStatus::Completed(state.clone())),
            PollTarget::AsyncOperation(url) => {
                let response = self.send(Method::GET, url, None).await?;
                let status = response.body.get("status").and_then(Value::as_str).unwrap_or("InProgress");
                if status.eq_ignore_ascii_case("succeeded") {
                    Ok(OperationStatus::Completed(self.state_after_operation(key, None).await?))
                } else if status.eq_ignore_ascii_case("failed") || status.eq_ignore_ascii_case("canceled") {
                    Ok(OperationStatus::Completed(
                        self.state_after_operation(key, Some(&response.body)).await?,
                    ))
                } else {
                    Ok(OperationStatus::InProgress {
                        retry_after: response.retry_after(),
                    })
                }
            }
            PollTarget::Location(url) => {
                let response = self.send(Method::GET, url, None).await?;
                if response.status == StatusCode::ACCEPTED {
                    return Ok(OperationStatus::InProgress {
                        retry_after: response.retry_after(),
                    });
                }
                let state = self.state_after_operation(key, None).await?;
                if state.status.is_terminal() {
                    Ok(OperationStatus::Completed(state))
                } else {
                    Ok(OperationStatus::InProgress { retry_after: None })
                }
            }
            PollTarget::Resource => {
                let state = self
                    .get(key)
                    .await?
                    .ok_or_else(|| Error::not_found(key.kind.slug(), &key.name))?;
                if state.status.is_in_flight() {
                    Ok(OperationStatus::InProgress { retry_after: None })
                } else {
                    Ok(OperationStatus::Completed(state))
                }
            }
        }
    }
}

#[async_trait]
impl Inventory for ArmClient {
    async fn subscription_info(&self) -> Result<SubscriptionInfo> {
        let url = self.url(&self.subscription_path(), SUBSCRIPTION_API);
        let body = self
            .get_optional(&url)
            .await?
            .ok_or_else(|| Error::not_found("subscription", &self.config.subscription_id))?;
        Ok(SubscriptionInfo {
            id: body
                .get("subscriptionId")
                .and_then(Value::as_str)
                .unwrap_or(&self.config.subscription_id)
                .to_string(),
            name: str_at(&body, "/displayName"),
            state: str_at(&body, "/state"),
        })
    }

    async fn list_resource_groups(&self) -> Result<Vec<ResourceGroupInfo>> {
        let url = self.url(&format!("{}/resourcegroups", self.subscription_path()), RESOURCE_GROUP_API);
        Ok(self
            .list_all(url)
            .await?
            .iter()
            .map(|rg| ResourceGroupInfo {
                name: str_at(rg, "/name"),
                location: str_at(rg, "/location"),
                tags: tags_of(rg),
                properties: ResourceGroupProperties {
                    provisioning_state: str_at(rg, "/properties/provisioningState"),
                },
            })
            .collect())
    }

    async fn list_virtual_machines(&self, resource_group: Option<&str>) -> Result<Vec<VirtualMachineInfo>> {
        let url = self.group_scoped(resource_group, "Microsoft.Compute/virtualMachines", COMPUTE_API);
        let vms = self.list_all(url).await?;

        let power_states = join_all(vms.iter().map(|vm| {
            let id = vm.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
            async move { self.power_state(&id).await }
        }))
        .await;

        Ok(vms
            .iter()
            .zip(power_states)
            .map(|(vm, power_state)| VirtualMachineInfo {
                name: str_at(vm, "/name"),
                resource_group: group_of(vm),
                location: str_at(vm, "/location"),
                vm_size: str_at(vm, "/properties/hardwareProfile/vmSize"),
                os_type: str_at(vm, "/properties/storageProfile/osDisk/osType"),
                power_state,
                tags: tags_of(vm),
            })
            .collect())
    }

    async fn list_storage_accounts(&self, resource_group: Option<&str>) -> Result<Vec<StorageAccountInfo>> {
        let url = self.group_scoped(resource_group, "Microsoft.Storage/storageAccounts", STORAGE_API);
        Ok(self
            .list_all(url)
            .await?
            .iter()
            .map(|account| StorageAccountInfo {
                name: str_at(account, "/name"),
                resource_group: group_of(account),
                location: str_at(account, "/location"),
                sku: str_at(account, "/sku/name"),
                kind: str_at(account, "/kind"),
                status: str_at(account, "/properties/statusOfPrimary"),
                tags: tags_of(account),
            })
            .collect())
    }

    async fn list_web_apps(&self, resource_group: Option<&str>) -> Result<Vec<WebAppInfo>> {
        let url = self.group_scoped(resource_group, "Microsoft.Web/sites", WEB_API);
        Ok(self
            .list_all(url)
            .await?
            .iter()
            .map(|site| WebAppInfo {
                name: str_at(site, "/name"),
                resource_group: group_of(site),
                location: str_at(site, "/location"),
                state: str_at(site, "/properties/state"),
                host_names: site
                    .pointer("/properties/hostNames")
                    .and_then(Value::as_array)
                    .map(|names| names.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default(),
                default_host_name: site
                    .pointer("/properties/defaultHostName")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                tags: tags_of(site),
            })
            .collect())
    }
}

#[async_trait]
impl VmOperations for ArmClient {
    async fn restart_vm(&self, resource_group: &str, name: &str) -> Result<()> {
        info!("Restarting VM {}/{}", resource_group, name);
        let url = self.url(&format!("{}/restart", self.vm_path(resource_group, name)), COMPUTE_API);
        self.run_action(&url, None, &format!("restart {}", name), ("vm", name))
            .await?;
        info!("VM {} restarted", name);
        Ok(())
    }

    async fn run_command(
        &self,
        resource_group: &str,
        name: &str,
        kind: ScriptKind,
        script: &str,
    ) -> Result<RunCommandOutput> {
        info!("Running {} on {}/{}", kind.command_id(), resource_group, name);
        let url = self.url(&format!("{}/runCommand", self.vm_path(resource_group, name)), COMPUTE_API);
        let body = json!({
            "commandId": kind.command_id(),
            "script": script.lines().collect::<Vec<_>>(),
        });

        let result = self
            .run_action(&url, Some(&body), &format!("run-command on {}", name), ("vm", name))
            .await?;

        let messages = result
            .get("value")
            .or_else(|| result.pointer("/output/value"))
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.get("message").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(RunCommandOutput { messages })
    }

    async fn registration_token(
        &self,
        resource_group: &str,
        host_pool: &str,
        min_validity: chrono::Duration,
    ) -> Result<RegistrationToken> {
        let key = ResourceKey::new(crate::domain::ports::ResourceKind::HostPool, resource_group, host_pool);
        let path = key.resource_id(&self.config.subscription_id).to_string();
        let now = Utc::now();

        let retrieve = self.url(&format!("{}/retrieveRegistrationToken", path), DESKTOP_API);
        let current = match self.send(Method::POST, &retrieve, None).await {
            Ok(response) if response.status == StatusCode::NOT_FOUND => {
                return Err(Error::not_found("host-pool", host_pool));
            }
            Ok(response) => Some(response.body),
            // Older api-versions lack the action; the host pool body carries the token
            Err(Error::ProviderRejected { status: 400, .. }) => self
                .get_optional(&self.url(&path, DESKTOP_API))
                .await?
                .ok_or_else(|| Error::not_found("host-pool", host_pool))?
                .pointer("/properties/registrationInfo")
                .cloned(),
            Err(e) => return Err(e),
        };

        if let Some(info) = current {
            let token = RegistrationToken {
                token: info.get("token").and_then(Value::as_str).unwrap_or_default().to_string(),
                expiration_time: parse_expiry(info.get("expirationTime")),
            };
            if token.is_valid_for(now, min_validity) {
                debug!("Reusing registration token for {}", host_pool);
                return Ok(token);
            }
        }

        info!("Issuing new registration token for host pool {}", host_pool);
        let expiration = now + RegistrationToken::lifetime_for(min_validity);
        let patch = json!({
            "properties": {
                "registrationInfo": {
                    "expirationTime": expiration.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                    "registrationTokenOperation": "Update"
                }
            }
        });
        let response = self
            .send(Method::PATCH, &self.url(&path, DESKTOP_API), Some(&patch))
            .await?;
        if response.status == StatusCode::NOT_FOUND {
            return Err(Error::not_found("host-pool", host_pool));
        }

        let info = response.body.pointer("/properties/registrationInfo").cloned().unwrap_or(Value::Null);
        let token = info.get("token").and_then(Value::as_str).unwrap_or_default().to_string();
        if token.is_empty() {
            return Err(Error::OperationFailed {
                operation: format!("registration token for {}", host_pool),
                reason: "provider returned no token".into(),
            });
        }

        Ok(RegistrationToken {
            token,
            expiration_time: parse_expiry(info.get("expirationTime")).or(Some(expiration)),
        })
    }
}
