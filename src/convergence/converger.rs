//! Resource Converger
//!
//! Drives a single resource toward its declared state:
//! - absent (or failed) resources are created
//! - drifted resources are updated in place
//! - matching resources are left untouched
//! - resources with someone else's operation in flight are awaited
//!
//! At most one convergence per `ResourceKey` runs at a time; independent
//! resources converge in parallel through [`Converger::converge_all`].

use crate::convergence::diff::differences;
use crate::domain::ports::{
    OperationHandle, OperationStatus, PollTarget, ProvisioningStatus, ResourceDescriptor,
    ResourceKey, ResourceProvider, ResourceState,
};
use crate::error::{Error, Result};
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Converger configuration
#[derive(Debug, Clone)]
pub struct ConvergeConfig {
    /// Delay between polls when the provider gives no `Retry-After`
    pub poll_interval: Duration,
    /// Budget for one convergence, submit and wait included
    pub timeout: Duration,
}

impl Default for ConvergeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// What the converger did to reach the returned state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvergeAction {
    Created,
    Updated,
    Unchanged,
    /// Another operation was already in flight; it was waited out
    Awaited,
}

impl fmt::Display for ConvergeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConvergeAction::Created => "created",
            ConvergeAction::Updated => "updated",
            ConvergeAction::Unchanged => "unchanged",
            ConvergeAction::Awaited => "awaited",
        };
        write!(f, "{}", s)
    }
}

/// Result of one convergence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvergeOutcome {
    pub action: ConvergeAction,
    pub state: ResourceState,
    /// Number of status polls issued while waiting
    pub polls: u32,
}

impl ConvergeOutcome {
    pub fn succeeded(&self) -> bool {
        self.state.status == ProvisioningStatus::Succeeded
    }
}

// =============================================================================
// Converger
// =============================================================================

/// Convergence engine over a resource provider
pub struct Converger<P: ResourceProvider + ?Sized> {
    provider: Arc<P>,
    config: ConvergeConfig,
    locks: DashMap<ResourceKey, Arc<Mutex<()>>>,
}

impl<P: ResourceProvider + ?Sized> Converger<P> {
    pub fn new(provider: Arc<P>, config: ConvergeConfig) -> Self {
        Self {
            provider,
            config,
            locks: DashMap::new(),
        }
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn config(&self) -> &ConvergeConfig {
        &self.config
    }

    /// Converge one resource. A terminal `failed` state is returned as a
    /// successful outcome; errors are reserved for provider and budget
    /// failures. Waiting for the per-key lock counts against the budget.
    pub async fn converge(&self, descriptor: &ResourceDescriptor) -> Result<ConvergeOutcome> {
        let key = descriptor.key();
        let lock = self.lock_for(&key);

        let result = tokio::time::timeout(self.config.timeout, async {
            let _guard = lock.lock().await;
            self.converge_locked(&key, descriptor).await
        })
        .await;
        self.release(&key, lock);

        match result {
            Ok(result) => result,
            Err(_) => {
                warn!("Convergence of {} exceeded {:?}", key, self.config.timeout);
                Err(Error::Timeout {
                    operation: format!("converge {}", key),
                    after: self.config.timeout,
                })
            }
        }
    }

    /// Converge independent resources concurrently. Results are returned in
    /// input order; descriptors sharing a key are serialized.
    pub async fn converge_all(&self, descriptors: &[ResourceDescriptor]) -> Vec<Result<ConvergeOutcome>> {
        join_all(descriptors.iter().map(|d| self.converge(d))).await
    }

    fn lock_for(&self, key: &ResourceKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the key's lock once no other caller holds or waits on it
    fn release(&self, key: &ResourceKey, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn converge_locked(&self, key: &ResourceKey, descriptor: &ResourceDescriptor) -> Result<ConvergeOutcome> {
        let mut current = self
            .provider
            .get(key)
            .await?
            .filter(|state| state.status != ProvisioningStatus::Absent);

        if current.as_ref().map_or(false, |s| s.status == ProvisioningStatus::Deleting) {
            info!("{} is being deleted, waiting", key);
            current = self.wait_deleted(key).await?;
        }

        // Someone else's operation: wait it out, then judge the result like
        // any other observed state
        let mut awaited_polls = None;
        if let Some(state) = current.as_ref().filter(|s| s.status.is_in_flight()) {
            info!("{} has an operation in flight ({}), waiting", key, state.status);
            let handle = OperationHandle {
                key: key.clone(),
                target: PollTarget::Resource,
                retry_after: None,
            };
            let awaited = self.wait(handle, state.status, ConvergeAction::Awaited).await?;
            awaited_polls = Some(awaited.polls);
            current = Some(awaited.state);
        }

        let Some(state) = current else {
            info!("Creating {}", key);
            return self.submit(descriptor, ProvisioningStatus::Creating, ConvergeAction::Created).await;
        };

        if state.status == ProvisioningStatus::Failed {
            warn!("{} is in a failed state, resubmitting", key);
            return self.submit(descriptor, ProvisioningStatus::Creating, ConvergeAction::Created).await;
        }

        let drift = differences(&descriptor.desired, &state.observed);
        if drift.is_empty() {
            debug!("{} is up to date", key);
            return Ok(ConvergeOutcome {
                action: if awaited_polls.is_some() {
                    ConvergeAction::Awaited
                } else {
                    ConvergeAction::Unchanged
                },
                state,
                polls: awaited_polls.unwrap_or(0),
            });
        }
        info!("Updating {} (drift at {})", key, drift.join(", "));
        self.submit(descriptor, ProvisioningStatus::Updating, ConvergeAction::Updated).await
    }

    /// Poll until a deletion in progress finishes; `None` once it is gone
    async fn wait_deleted(&self, key: &ResourceKey) -> Result<Option<ResourceState>> {
        loop {
            tokio::time::sleep(self.config.poll_interval).await;
            let state = self
                .provider
                .get(key)
                .await?
                .filter(|state| state.status != ProvisioningStatus::Absent);
            match state {
                Some(state) if state.status == ProvisioningStatus::Deleting => {
                    debug!("{} still deleting", key);
                }
                other => return Ok(other),
            }
        }
    }

    async fn submit(
        &self,
        descriptor: &ResourceDescriptor,
        in_flight: ProvisioningStatus,
        action: ConvergeAction,
    ) -> Result<ConvergeOutcome> {
        let handle = self.provider.begin_create_or_update(descriptor).await?;
        self.wait(handle, in_flight, action).await
    }

    async fn wait(
        &self,
        handle: OperationHandle,
        in_flight: ProvisioningStatus,
        action: ConvergeAction,
    ) -> Result<ConvergeOutcome> {
        let mut polls = 0;
        let mut delay = handle.retry_after;

        let state = match &handle.target {
            PollTarget::Completed(state) => state.clone(),
            _ => loop {
                tokio::time::sleep(delay.unwrap_or(self.config.poll_interval)).await;
                polls += 1;
                match self.provider.poll(&handle).await? {
                    OperationStatus::InProgress { retry_after } => {
                        debug!("{} still in progress after {} polls", handle.key, polls);
                        delay = retry_after;
                    }
                    OperationStatus::Completed(state) => break state,
                }
            },
        };

        if !state.status.is_terminal() || !in_flight.can_transition_to(state.status) {
            return Err(Error::Internal(format!(
                "{} reported illegal transition {} -> {}",
                handle.key, in_flight, state.status
            )));
        }

        match state.status {
            ProvisioningStatus::Succeeded => info!("{} {} ({} polls)", handle.key, action, polls),
            _ => warn!("{} ended in failed state after {} polls", handle.key, polls),
        }

        Ok(ConvergeOutcome { action, state, polls })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ResourceKind;
    use crate::provider::memory::{InMemoryCloud, InMemoryConfig};
    use assert_matches::assert_matches;
    use serde_json::json;

    fn fast() -> ConvergeConfig {
        ConvergeConfig {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    fn cloud(polls: u32) -> Arc<InMemoryCloud> {
        let cloud = Arc::new(InMemoryCloud::new(InMemoryConfig {
            polls_to_complete: polls,
            ..Default::default()
        }));
        cloud.seed_resource_group("avd-rg", "eastus");
        cloud
    }

    fn public_ip(name: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(ResourceKind::PublicIp, "avd-rg", name, "eastus")
            .with_sku(json!({"name": "Standard"}))
            .with_properties(json!({"publicIPAllocationMethod": "Static"}))
    }

    #[tokio::test]
    async fn test_absent_resource_is_created_once() {
        let cloud = cloud(2);
        let converger = Converger::new(cloud.clone(), fast());

        let outcome = converger.converge(&public_ip("pip-1")).await.unwrap();

        assert_eq!(outcome.action, ConvergeAction::Created);
        assert_eq!(outcome.state.status, ProvisioningStatus::Succeeded);
        assert_eq!(outcome.polls, 2);
        assert_eq!(cloud.create_calls(), 1);
        assert_eq!(cloud.update_calls(), 0);

        let address = outcome.state.property("/properties/ipAddress").and_then(|v| v.as_str());
        assert!(address.map_or(false, |a| !a.is_empty()));
    }

    #[tokio::test]
    async fn test_matching_resource_is_left_alone() {
        let cloud = cloud(1);
        let converger = Converger::new(cloud.clone(), fast());
        let descriptor = public_ip("pip-1");

        converger.converge(&descriptor).await.unwrap();
        let second = converger.converge(&descriptor).await.unwrap();

        assert_eq!(second.action, ConvergeAction::Unchanged);
        assert_eq!(second.polls, 0);
        assert_eq!(cloud.create_calls(), 1);
        assert_eq!(cloud.update_calls(), 0);
    }

    #[tokio::test]
    async fn test_drift_triggers_single_update() {
        let cloud = cloud(1);
        let converger = Converger::new(cloud.clone(), fast());

        converger.converge(&public_ip("pip-1")).await.unwrap();

        let mut tags = std::collections::BTreeMap::new();
        tags.insert("env".to_string(), "prod".to_string());
        let drifted = public_ip("pip-1").with_tags(tags);

        let outcome = converger.converge(&drifted).await.unwrap();
        assert_eq!(outcome.action, ConvergeAction::Updated);
        assert!(outcome.succeeded());
        assert_eq!(cloud.update_calls(), 1);

        let again = converger.converge(&drifted).await.unwrap();
        assert_eq!(again.action, ConvergeAction::Unchanged);
        assert_eq!(cloud.update_calls(), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_is_terminal_outcome() {
        let cloud = cloud(1);
        let descriptor = public_ip("pip-bad");
        cloud.fail_on(&descriptor.key());
        let converger = Converger::new(cloud.clone(), fast());

        let outcome = converger.converge(&descriptor).await.unwrap();
        assert_eq!(outcome.action, ConvergeAction::Created);
        assert_eq!(outcome.state.status, ProvisioningStatus::Failed);

        // A failed resource is resubmitted as a fresh create
        cloud.clear_failures();
        let retried = converger.converge(&descriptor).await.unwrap();
        assert_eq!(retried.action, ConvergeAction::Created);
        assert!(retried.succeeded());
        assert_eq!(cloud.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_in_flight_operation_is_awaited() {
        let cloud = cloud(3);
        let descriptor = public_ip("pip-1");
        let handle = cloud.begin_create_or_update(&descriptor).await.unwrap();
        assert_matches!(handle.target, PollTarget::AsyncOperation(_));

        let converger = Converger::new(cloud.clone(), fast());
        let outcome = converger.converge(&descriptor).await.unwrap();

        assert_eq!(outcome.action, ConvergeAction::Awaited);
        assert!(outcome.succeeded());
        assert_eq!(cloud.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_awaited_resource_with_drift_is_updated() {
        let cloud = cloud(3);
        cloud.begin_create_or_update(&public_ip("pip-1")).await.unwrap();

        let mut tags = std::collections::BTreeMap::new();
        tags.insert("env".to_string(), "prod".to_string());
        let tagged = public_ip("pip-1").with_tags(tags);

        let converger = Converger::new(cloud.clone(), fast());
        let outcome = converger.converge(&tagged).await.unwrap();

        assert_eq!(outcome.action, ConvergeAction::Updated);
        assert!(outcome.succeeded());
        assert_eq!(outcome.state.property("/tags/env").and_then(|v| v.as_str()), Some("prod"));
        assert_eq!(cloud.create_calls(), 1);
        assert_eq!(cloud.update_calls(), 1);
    }

    #[tokio::test]
    async fn test_awaited_failure_is_resubmitted() {
        let cloud = cloud(3);
        let descriptor = public_ip("pip-1");
        cloud.fail_on(&descriptor.key());
        cloud.begin_create_or_update(&descriptor).await.unwrap();
        cloud.clear_failures();

        let converger = Converger::new(cloud.clone(), fast());
        let outcome = converger.converge(&descriptor).await.unwrap();

        assert_eq!(outcome.action, ConvergeAction::Created);
        assert!(outcome.succeeded());
        assert_eq!(cloud.create_calls(), 2);
    }

    /// Reports the resource as deleting for a few reads, then absent
    struct Draining {
        cloud: Arc<InMemoryCloud>,
        deleting_reads: std::sync::atomic::AtomicU32,
    }

    #[async_trait::async_trait]
    impl ResourceProvider for Draining {
        fn subscription_id(&self) -> &str {
            self.cloud.subscription_id()
        }

        async fn get(&self, key: &ResourceKey) -> Result<Option<ResourceState>> {
            use std::sync::atomic::Ordering;
            let left = self.deleting_reads.load(Ordering::SeqCst);
            if left > 0 {
                self.deleting_reads.store(left - 1, Ordering::SeqCst);
                let mut state = ResourceState::absent(key);
                state.status = ProvisioningStatus::Deleting;
                return Ok(Some(state));
            }
            self.cloud.get(key).await
        }

        async fn begin_create_or_update(&self, descriptor: &ResourceDescriptor) -> Result<OperationHandle> {
            self.cloud.begin_create_or_update(descriptor).await
        }

        async fn poll(&self, handle: &OperationHandle) -> Result<OperationStatus> {
            self.cloud.poll(handle).await
        }
    }

    #[tokio::test]
    async fn test_deleting_resource_is_recreated_after_delete() {
        let cloud = cloud(1);
        let provider = Arc::new(Draining {
            cloud: cloud.clone(),
            deleting_reads: std::sync::atomic::AtomicU32::new(3),
        });
        let converger = Converger::new(provider, fast());

        let outcome = converger.converge(&public_ip("pip-1")).await.unwrap();

        assert_eq!(outcome.action, ConvergeAction::Created);
        assert!(outcome.succeeded());
        assert_eq!(cloud.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_lock_wait_counts_against_timeout() {
        let cloud = cloud(1);
        let descriptor = public_ip("pip-stuck");
        cloud.hang_on(&descriptor.key());
        let converger = Converger::new(
            cloud.clone(),
            ConvergeConfig {
                poll_interval: Duration::from_millis(5),
                timeout: Duration::from_millis(200),
            },
        );

        let started = std::time::Instant::now();
        let results = converger.converge_all(&[descriptor.clone(), descriptor]).await;

        assert!(results.iter().all(|r| matches!(r, Err(Error::Timeout { .. }))));
        // The queued caller times out with the first, not after it
        assert!(started.elapsed() < Duration::from_millis(350));
        assert!(converger.locks.is_empty());
    }

    #[tokio::test]
    async fn test_locks_are_released_after_convergence() {
        let cloud = cloud(1);
        let converger = Converger::new(cloud.clone(), fast());

        let descriptors: Vec<_> = (1..=3).map(|i| public_ip(&format!("pip-{}", i))).collect();
        converger.converge_all(&descriptors).await;

        assert!(converger.locks.is_empty());
    }

    #[tokio::test]
    async fn test_hung_operation_times_out() {
        let cloud = cloud(1);
        let descriptor = public_ip("pip-stuck");
        cloud.hang_on(&descriptor.key());
        let converger = Converger::new(
            cloud.clone(),
            ConvergeConfig {
                poll_interval: Duration::from_millis(5),
                timeout: Duration::from_millis(50),
            },
        );

        let result = converger.converge(&descriptor).await;
        assert_matches!(result, Err(Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_same_key_converges_once_under_contention() {
        let cloud = cloud(2);
        let converger = Converger::new(cloud.clone(), fast());
        let descriptor = public_ip("pip-1");

        let results = converger
            .converge_all(&[descriptor.clone(), descriptor.clone(), descriptor])
            .await;

        let actions: Vec<_> = results.into_iter().map(|r| r.unwrap().action).collect();
        assert_eq!(cloud.create_calls(), 1);
        assert_eq!(actions.iter().filter(|a| **a == ConvergeAction::Created).count(), 1);
        assert_eq!(actions.iter().filter(|a| **a == ConvergeAction::Unchanged).count(), 2);
    }

    #[tokio::test]
    async fn test_independent_resources_converge_in_parallel() {
        let cloud = cloud(2);
        let converger = Converger::new(cloud.clone(), fast());

        let descriptors: Vec<_> = (1..=4).map(|i| public_ip(&format!("pip-{}", i))).collect();
        let results = converger.converge_all(&descriptors).await;

        assert!(results.iter().all(|r| r.as_ref().map_or(false, |o| o.succeeded())));
        assert_eq!(cloud.create_calls(), 4);
    }

    #[tokio::test]
    async fn test_missing_resource_group_is_rejected() {
        let cloud = cloud(1);
        let converger = Converger::new(cloud.clone(), fast());
        let descriptor = ResourceDescriptor::new(ResourceKind::PublicIp, "nope-rg", "pip-1", "eastus");

        let result = converger.converge(&descriptor).await;
        assert_matches!(result, Err(Error::ProviderRejected { status: 404, .. }));
    }
}
