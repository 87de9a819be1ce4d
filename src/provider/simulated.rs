//! Simulated in-memory provider.
//!
//! Realises resources by recording them in memory and deriving outputs from
//! the kind's schema. Failures and latency can be injected per kind, which
//! makes it useful for rehearsing a plan and for tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::schema::SchemaRegistry;
use crate::state::StateSnapshot;

use super::adapter::{Created, Provider};

/// A resource held by the simulated backend.
#[derive(Debug, Clone)]
struct SimulatedResource {
    kind: String,
    inputs: BTreeMap<String, Value>,
}

/// In-memory provider with failure injection.
#[derive(Debug)]
pub struct SimulatedProvider {
    registry: SchemaRegistry,
    resources: Mutex<HashMap<String, SimulatedResource>>,
    fail_kinds: BTreeSet<String>,
    /// Remaining transient failures per kind.
    transient: Mutex<HashMap<String, u32>>,
    retry_after: Option<Duration>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

/// Decrements the in-flight counter when a call finishes.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SimulatedProvider {
    /// Creates an empty simulated backend for the given registry.
    #[must_use]
    pub fn new(registry: SchemaRegistry) -> Self {
        Self {
            registry,
            resources: Mutex::new(HashMap::new()),
            fail_kinds: BTreeSet::new(),
            transient: Mutex::new(HashMap::new()),
            retry_after: None,
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Seeds the backend with every physical resource recorded in a snapshot,
    /// including superseded instances.
    #[must_use]
    pub fn with_existing(self, snapshot: &StateSnapshot) -> Self {
        let mut seeded = HashMap::new();
        for resource in snapshot.resources.values() {
            let record = SimulatedResource {
                kind: resource.kind.clone(),
                inputs: resource.inputs.clone(),
            };
            for old in &resource.superseded {
                seeded.insert(old.clone(), record.clone());
            }
            seeded.insert(resource.physical_id.clone(), record);
        }
        Self {
            resources: Mutex::new(seeded),
            ..self
        }
    }

    /// Makes every call for these kinds fail permanently.
    #[must_use]
    pub fn with_failing_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fail_kinds.extend(kinds.into_iter().map(Into::into));
        self
    }

    /// Makes the next `count` calls for a kind fail transiently.
    #[must_use]
    pub fn with_transient_failures(mut self, kind: &str, count: u32) -> Self {
        self.transient.get_mut().insert(kind.to_string(), count);
        self
    }

    /// Sets the retry hint attached to transient failures.
    #[must_use]
    pub const fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Delays every call by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Returns the highest number of calls observed in flight at once.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Returns the total number of calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the physical ids currently held.
    pub async fn physical_ids(&self) -> BTreeSet<String> {
        self.resources.lock().await.keys().cloned().collect()
    }

    /// Records the call, waits out the latency and applies injected failures.
    async fn begin(&self, kind: &str) -> Result<InFlight<'_>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.fail_kinds.contains(kind) {
            return Err(ProviderError::permanent(format!(
                "kind '{kind}' rejected by simulated backend"
            )));
        }

        let mut transient = self.transient.lock().await;
        if let Some(remaining) = transient.get_mut(kind)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(ProviderError::Transient {
                message: format!("simulated throttling for kind '{kind}'"),
                retry_after: self.retry_after,
            });
        }

        Ok(guard)
    }

    fn outputs(
        &self,
        kind: &str,
        physical_id: &str,
        inputs: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>, ProviderError> {
        let schema = self
            .registry
            .lookup(kind)
            .map_err(|e| ProviderError::permanent(e.to_string()))?;
        Ok(schema.produce_outputs(physical_id, inputs))
    }
}

#[async_trait]
impl Provider for SimulatedProvider {
    async fn create(
        &self,
        kind: &str,
        inputs: &BTreeMap<String, Value>,
    ) -> Result<Created, ProviderError> {
        let _guard = self.begin(kind).await?;

        let uuid = Uuid::new_v4().simple().to_string();
        let physical_id = format!("{kind}-{}", &uuid[..12]);
        let outputs = self.outputs(kind, &physical_id, inputs)?;

        self.resources.lock().await.insert(
            physical_id.clone(),
            SimulatedResource {
                kind: kind.to_string(),
                inputs: inputs.clone(),
            },
        );

        debug!("Simulated create: {physical_id}");
        Ok(Created {
            physical_id,
            outputs,
        })
    }

    async fn update(
        &self,
        kind: &str,
        physical_id: &str,
        inputs: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>, ProviderError> {
        let _guard = self.begin(kind).await?;

        let mut resources = self.resources.lock().await;
        let Some(resource) = resources.get_mut(physical_id) else {
            return Err(ProviderError::NotFound {
                physical_id: physical_id.to_string(),
            });
        };

        if resource.kind != kind {
            return Err(ProviderError::permanent(format!(
                "{physical_id} is a '{}', not a '{kind}'",
                resource.kind
            )));
        }

        resource.inputs.clone_from(inputs);
        debug!("Simulated update: {physical_id}");
        self.outputs(kind, physical_id, inputs)
    }

    async fn delete(&self, kind: &str, physical_id: &str) -> Result<(), ProviderError> {
        let _guard = self.begin(kind).await?;

        if self.resources.lock().await.remove(physical_id).is_none() {
            return Err(ProviderError::NotFound {
                physical_id: physical_id.to_string(),
            });
        }

        debug!("Simulated delete: {physical_id}");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ResourceState;
    use serde_json::json;

    fn cidr() -> BTreeMap<String, Value> {
        [(String::from("cidr"), json!("10.0.0.0/16"))]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn test_create_update_delete() {
        let provider = SimulatedProvider::new(SchemaRegistry::builtin());

        let created = provider.create("vpc", &cidr()).await.expect("create");
        assert!(created.physical_id.starts_with("vpc-"));
        assert_eq!(created.outputs["vpc_id"], json!(created.physical_id));

        provider
            .update("vpc", &created.physical_id, &cidr())
            .await
            .expect("update");
        provider
            .delete("vpc", &created.physical_id)
            .await
            .expect("delete");

        let again = provider.delete("vpc", &created.physical_id).await;
        assert!(matches!(again, Err(ProviderError::NotFound { .. })));
        assert_eq!(provider.call_count(), 4);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let provider = SimulatedProvider::new(SchemaRegistry::builtin())
            .with_failing_kinds(["s3_bucket"])
            .with_transient_failures("vpc", 1);

        let err = provider
            .create("s3_bucket", &BTreeMap::new())
            .await
            .expect_err("bucket rejected");
        assert!(!err.is_retryable());

        let err = provider.create("vpc", &cidr()).await.expect_err("throttled");
        assert!(err.is_retryable());
        provider.create("vpc", &cidr()).await.expect("second call succeeds");
    }

    #[tokio::test]
    async fn test_seeded_from_snapshot() {
        let mut snapshot = StateSnapshot::new("web");
        let mut vpc = ResourceState::new("vpc", "vpc-live");
        vpc.superseded.push(String::from("vpc-old"));
        snapshot.set_resource("vpc", vpc);

        let provider = SimulatedProvider::new(SchemaRegistry::builtin()).with_existing(&snapshot);

        assert_eq!(
            provider.physical_ids().await,
            BTreeSet::from([String::from("vpc-live"), String::from("vpc-old")])
        );
        provider.delete("vpc", "vpc-old").await.expect("old instance deletable");
    }

    #[tokio::test]
    async fn test_unknown_kind_is_permanent() {
        let provider = SimulatedProvider::new(SchemaRegistry::new());
        let err = provider
            .create("vpc", &cidr())
            .await
            .expect_err("registry is empty");
        assert!(matches!(err, ProviderError::Permanent { .. }));
    }
}
