//! Plan executor.
//!
//! Runs the actions of a plan on a bounded pool of tokio tasks. An action
//! starts once all its predecessors have succeeded; a failure blocks every
//! action that transitively waits on it while unrelated branches carry on.
//! Deletions start only after every create and update has settled. The
//! snapshot is saved after each successful action.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{DeploymentConfig, InputHasher};
use crate::error::ProviderError;
use crate::graph::{ReferenceResolver, ResourceGraph};
use crate::provider::{Created, Provider};
use crate::state::{ResourceState, StateSnapshot, StateStore};

use super::plan::{ActionType, Plan, PlanAction, ReplaceStep};

/// Retry behaviour for transient provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per action, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on a computed delay.
    pub max: Duration,
}

impl RetryPolicy {
    /// Builds a policy from deployment settings.
    #[must_use]
    pub fn from_config(config: &DeploymentConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base: config.backoff_base(),
            max: config.backoff_max(),
        }
    }

    /// Delay before retrying after the given failed attempt (1-based).
    ///
    /// A hint from the backend takes precedence over the computed backoff.
    #[must_use]
    pub fn delay(&self, attempt: u32, error: &ProviderError) -> Duration {
        if let Some(hint) = error.retry_delay() {
            return hint;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DeploymentConfig::default())
    }
}

/// Execution status of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Waiting for predecessors.
    Pending,
    /// Dispatched to a worker.
    InProgress,
    /// Completed.
    Succeeded,
    /// The provider call failed.
    Failed,
    /// A predecessor failed.
    Blocked,
    /// Never started because the run was stopped.
    Skipped,
}

/// Outcome of one action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    /// Rank of the action in the plan.
    pub rank: usize,
    /// Logical id of the resource.
    pub logical_id: String,
    /// Action type.
    pub action: ActionType,
    /// Replacement half, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<ReplaceStep>,
    /// Final status.
    pub status: ActionStatus,
    /// Provider calls made.
    pub attempts: u32,
    /// Error message if the action failed or was blocked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Physical id created or acted upon.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_id: Option<String>,
}

/// Result of executing a plan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    /// Per-action outcomes in plan order.
    pub results: Vec<ActionReport>,
    /// Actions that succeeded (including no-ops).
    pub succeeded: usize,
    /// Actions whose provider call failed.
    pub failed: usize,
    /// Actions blocked by a failed predecessor.
    pub blocked: usize,
    /// Actions never started.
    pub skipped: usize,
    /// Whether the run was cancelled.
    pub cancelled: bool,
    /// Set when the snapshot could not be persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_error: Option<String>,
}

impl ExecutionReport {
    /// Returns true if every action succeeded and state was persisted.
    #[must_use]
    pub fn success(&self) -> bool {
        self.failed == 0
            && self.blocked == 0
            && self.skipped == 0
            && !self.cancelled
            && self.state_error.is_none()
    }

    /// Returns the reports of failed actions.
    #[must_use]
    pub fn failures(&self) -> Vec<&ActionReport> {
        self.results
            .iter()
            .filter(|r| r.status == ActionStatus::Failed)
            .collect()
    }
}

/// A provider call handed to a worker.
#[derive(Debug, Clone)]
enum Operation {
    Create {
        kind: String,
        inputs: BTreeMap<String, Value>,
    },
    Update {
        kind: String,
        physical_id: String,
        inputs: BTreeMap<String, Value>,
    },
    Delete {
        kind: String,
        physical_id: String,
    },
}

#[derive(Debug)]
enum Effect {
    Created(Created),
    Updated(BTreeMap<String, Value>),
    Deleted,
}

/// What a worker reports back.
#[derive(Debug)]
struct Outcome {
    operation: Operation,
    result: Result<Effect, ProviderError>,
    attempts: u32,
}

/// Per-run bookkeeping.
struct Run {
    status: Vec<ActionStatus>,
    attempts: Vec<u32>,
    errors: Vec<Option<String>>,
    physical_ids: Vec<Option<String>>,
    /// Unfinished predecessors per action.
    waiting: Vec<usize>,
    ready: BTreeSet<usize>,
    /// Creates and updates not yet settled.
    forward_open: usize,
}

impl Run {
    fn new(plan: &Plan) -> Self {
        let n = plan.actions.len();
        let waiting: Vec<usize> = plan.actions.iter().map(|a| a.depends_on.len()).collect();
        Self {
            status: vec![ActionStatus::Pending; n],
            attempts: vec![0; n],
            errors: vec![None; n],
            physical_ids: plan.actions.iter().map(|a| a.physical_id.clone()).collect(),
            ready: (0..n).filter(|&i| waiting[i] == 0).collect(),
            waiting,
            forward_open: plan.actions.iter().filter(|a| !a.is_teardown()).count(),
        }
    }

    fn settle(&mut self, plan: &Plan, rank: usize, status: ActionStatus) {
        self.status[rank] = status;
        if !plan.actions[rank].is_teardown() {
            self.forward_open -= 1;
        }
    }

    fn succeed(&mut self, plan: &Plan, rank: usize) {
        self.settle(plan, rank, ActionStatus::Succeeded);
        for &d in &plan.actions[rank].dependents {
            self.waiting[d] -= 1;
            if self.waiting[d] == 0 && self.status[d] == ActionStatus::Pending {
                self.ready.insert(d);
            }
        }
    }

    fn fail(&mut self, plan: &Plan, rank: usize, message: String) {
        self.settle(plan, rank, ActionStatus::Failed);
        self.errors[rank] = Some(message);
        let cause = &plan.actions[rank];
        for d in plan.dependent_actions(rank) {
            if self.status[d] == ActionStatus::Pending {
                self.ready.remove(&d);
                self.settle(plan, d, ActionStatus::Blocked);
                self.errors[d] = Some(format!("blocked by failed action: {cause}"));
            }
        }
    }

    /// Next action allowed to start, if any.
    fn next(&mut self, plan: &Plan) -> Option<usize> {
        let &rank = self.ready.first()?;
        if plan.actions[rank].is_teardown() && self.forward_open > 0 {
            return None;
        }
        self.ready.pop_first()
    }

    fn into_report(self, plan: &Plan, cancelled: bool, state_error: Option<String>) -> ExecutionReport {
        let mut report = ExecutionReport {
            cancelled,
            state_error,
            ..ExecutionReport::default()
        };
        for (i, action) in plan.actions.iter().enumerate() {
            let status = match self.status[i] {
                ActionStatus::Pending | ActionStatus::InProgress => ActionStatus::Skipped,
                other => other,
            };
            match status {
                ActionStatus::Succeeded => report.succeeded += 1,
                ActionStatus::Failed => report.failed += 1,
                ActionStatus::Blocked => report.blocked += 1,
                _ => report.skipped += 1,
            }
            report.results.push(ActionReport {
                rank: action.rank,
                logical_id: action.logical_id.clone(),
                action: action.action,
                step: action.step,
                status,
                attempts: self.attempts[i],
                error: self.errors[i].clone(),
                physical_id: self.physical_ids[i].clone(),
            });
        }
        report
    }
}

/// Executor for plans.
pub struct PlanExecutor<'a> {
    provider: Arc<dyn Provider>,
    store: &'a dyn StateStore,
    graph: &'a ResourceGraph,
    resolver: ReferenceResolver<'a>,
    hasher: InputHasher,
    max_workers: usize,
    retry: RetryPolicy,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a> PlanExecutor<'a> {
    /// Creates an executor using the deployment's worker and retry settings.
    #[must_use]
    pub fn new(
        provider: Arc<dyn Provider>,
        store: &'a dyn StateStore,
        graph: &'a ResourceGraph,
        config: &'a DeploymentConfig,
    ) -> Self {
        Self {
            provider,
            store,
            graph,
            resolver: ReferenceResolver::new(config),
            hasher: InputHasher::new(),
            max_workers: config.max_workers.max(1),
            retry: RetryPolicy::from_config(config),
            cancel: None,
        }
    }

    /// Overrides the worker count.
    #[must_use]
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Stops dispatching new actions once the receiver reads `true`.
    #[must_use]
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Executes a plan, updating `snapshot` as actions complete.
    ///
    /// Provider failures never abort the run; they are reported per action.
    pub async fn execute(&self, plan: &Plan, snapshot: &mut StateSnapshot) -> ExecutionReport {
        info!(
            "Executing {} actions with up to {} workers via {} provider",
            plan.actions.len(),
            self.max_workers,
            self.provider.name()
        );

        let mut run = Run::new(plan);
        let mut workers: JoinSet<Outcome> = JoinSet::new();
        let mut tasks: HashMap<tokio::task::Id, usize> = HashMap::new();
        let mut cancel = self.cancel.clone();
        let mut cancelled = false;
        let mut state_error: Option<String> = None;

        loop {
            if cancel.as_ref().is_some_and(|rx| *rx.borrow()) && !cancelled {
                warn!("Cancellation requested, no new actions will start");
                cancelled = true;
            }

            while !cancelled && state_error.is_none() && workers.len() < self.max_workers {
                let Some(rank) = run.next(plan) else { break };
                let action = &plan.actions[rank];

                let prepared = match action.action {
                    ActionType::Noop => match self.refresh(action, snapshot) {
                        Ok(Some(operation)) => {
                            info!("Inputs of {} changed during the run, updating in place", action.logical_id);
                            Ok(operation)
                        }
                        Ok(None) => {
                            if self.commit_noop(action, snapshot) {
                                state_error = self.persist(snapshot).await;
                            }
                            run.succeed(plan, rank);
                            continue;
                        }
                        Err(message) => Err(message),
                    },
                    _ => self.prepare(action, snapshot),
                };

                match prepared {
                    Ok(operation) => {
                        debug!("Dispatching {action}");
                        run.status[rank] = ActionStatus::InProgress;
                        let provider = Arc::clone(&self.provider);
                        let retry = self.retry;
                        let handle = workers.spawn(perform(provider, operation, retry));
                        tasks.insert(handle.id(), rank);
                    }
                    Err(message) => {
                        error!("Cannot start {action}: {message}");
                        run.fail(plan, rank, message);
                    }
                }
            }

            if workers.is_empty() {
                break;
            }

            tokio::select! {
                joined = workers.join_next_with_id() => {
                    let Some(joined) = joined else { continue };
                    match joined {
                        Ok((id, outcome)) => {
                            let Some(rank) = tasks.remove(&id) else { continue };
                            run.attempts[rank] = outcome.attempts;
                            let action = &plan.actions[rank];
                            match outcome.result {
                                Ok(effect) => {
                                    info!("Completed {action}");
                                    let physical_id =
                                        self.commit(action, outcome.operation, effect, snapshot);
                                    if physical_id.is_some() {
                                        run.physical_ids[rank] = physical_id;
                                    }
                                    run.succeed(plan, rank);
                                    if state_error.is_none() {
                                        state_error = self.persist(snapshot).await;
                                    }
                                }
                                Err(e) => {
                                    error!("Failed {action} after {} attempts: {e}", outcome.attempts);
                                    run.fail(plan, rank, e.to_string());
                                }
                            }
                        }
                        Err(e) => {
                            if let Some(rank) = tasks.remove(&e.id()) {
                                error!("Worker for {} panicked: {e}", plan.actions[rank]);
                                run.fail(plan, rank, format!("worker failed: {e}"));
                            }
                        }
                    }
                }
                () = wait_for_cancel(&mut cancel), if !cancelled => {
                    warn!("Cancellation requested, waiting for in-flight actions");
                    cancelled = true;
                }
            }
        }

        let report = run.into_report(plan, cancelled, state_error);
        info!(
            "Execution finished: {} succeeded, {} failed, {} blocked, {} skipped",
            report.succeeded, report.failed, report.blocked, report.skipped
        );
        report
    }

    /// Resolves inputs against the current snapshot and builds the call.
    fn prepare(&self, action: &PlanAction, snapshot: &StateSnapshot) -> Result<Operation, String> {
        let kind = action.kind.clone();
        if action.is_teardown() {
            let physical_id = action
                .physical_id
                .clone()
                .ok_or_else(|| format!("no physical id recorded for {}", action.logical_id))?;
            return Ok(Operation::Delete { kind, physical_id });
        }

        let definition = self
            .graph
            .resource(&action.logical_id)
            .ok_or_else(|| format!("{} is not in the desired graph", action.logical_id))?;
        let inputs = self
            .resolver
            .resolve_inputs(definition, snapshot)
            .map_err(|e| e.to_string())?;

        match action.action {
            ActionType::Update => {
                let physical_id = snapshot
                    .get(&action.logical_id)
                    .map(|r| r.physical_id.clone())
                    .ok_or_else(|| format!("{} has no recorded state", action.logical_id))?;
                Ok(Operation::Update {
                    kind,
                    physical_id,
                    inputs,
                })
            }
            _ => Ok(Operation::Create { kind, inputs }),
        }
    }

    /// Re-resolves an unchanged resource against the current snapshot.
    ///
    /// A dependency updated in place earlier in the run may have changed an
    /// output this resource references; the resource is then updated too.
    fn refresh(
        &self,
        action: &PlanAction,
        snapshot: &StateSnapshot,
    ) -> Result<Option<Operation>, String> {
        let Some(recorded) = snapshot.get(&action.logical_id) else {
            return Ok(None);
        };
        let definition = self
            .graph
            .resource(&action.logical_id)
            .ok_or_else(|| format!("{} is not in the desired graph", action.logical_id))?;
        let inputs = self
            .resolver
            .resolve_inputs(definition, snapshot)
            .map_err(|e| e.to_string())?;

        if inputs == recorded.inputs {
            return Ok(None);
        }
        Ok(Some(Operation::Update {
            kind: action.kind.clone(),
            physical_id: recorded.physical_id.clone(),
            inputs,
        }))
    }

    fn dependencies(&self, logical_id: &str) -> BTreeSet<String> {
        self.graph
            .dependencies_of(logical_id)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Refreshes recorded dependencies of an unchanged resource.
    fn commit_noop(&self, action: &PlanAction, snapshot: &mut StateSnapshot) -> bool {
        let dependencies = self.dependencies(&action.logical_id);
        match snapshot.get_mut(&action.logical_id) {
            Some(resource) if resource.dependencies != dependencies => {
                resource.dependencies = dependencies;
                true
            }
            _ => false,
        }
    }

    /// Applies a successful provider call to the snapshot.
    fn commit(
        &self,
        action: &PlanAction,
        operation: Operation,
        effect: Effect,
        snapshot: &mut StateSnapshot,
    ) -> Option<String> {
        let id = action.logical_id.as_str();
        match (operation, effect) {
            (Operation::Create { kind, inputs }, Effect::Created(created)) => {
                let hash = self.hasher.hash_inputs(&kind, &inputs);
                let mut resource = ResourceState::new(&kind, &created.physical_id);
                resource.record(inputs, created.outputs, hash);
                resource.dependencies = self.dependencies(id);
                if let Some(old) = snapshot.get(id)
                    && action.step == Some(ReplaceStep::CreateReplacement)
                {
                    resource.superseded.clone_from(&old.superseded);
                    resource.superseded.push(old.physical_id.clone());
                    resource.created_at = old.created_at;
                }
                snapshot.set_resource(id, resource);
                Some(created.physical_id)
            }
            (Operation::Update { kind, inputs, .. }, Effect::Updated(outputs)) => {
                let hash = self.hasher.hash_inputs(&kind, &inputs);
                let dependencies = self.dependencies(id);
                if let Some(resource) = snapshot.get_mut(id) {
                    resource.record(inputs, outputs, hash);
                    resource.dependencies = dependencies;
                }
                None
            }
            (Operation::Delete { physical_id, .. }, Effect::Deleted) => {
                if action.step == Some(ReplaceStep::DeleteReplaced) {
                    if let Some(resource) = snapshot.get_mut(id) {
                        resource.superseded.retain(|p| *p != physical_id);
                    }
                } else {
                    snapshot.remove_resource(id);
                }
                None
            }
            (operation, effect) => {
                warn!("Ignoring mismatched result {effect:?} for {operation:?}");
                None
            }
        }
    }

    async fn persist(&self, snapshot: &StateSnapshot) -> Option<String> {
        match self.store.save(snapshot).await {
            Ok(()) => None,
            Err(e) => {
                error!("Failed to save state, stopping: {e}");
                Some(e.to_string())
            }
        }
    }
}

/// Runs one provider call, retrying transient failures.
async fn perform(provider: Arc<dyn Provider>, operation: Operation, retry: RetryPolicy) -> Outcome {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = match &operation {
            Operation::Create { kind, inputs } => {
                provider.create(kind, inputs).await.map(Effect::Created)
            }
            Operation::Update {
                kind,
                physical_id,
                inputs,
            } => provider
                .update(kind, physical_id, inputs)
                .await
                .map(Effect::Updated),
            Operation::Delete { kind, physical_id } => {
                match provider.delete(kind, physical_id).await {
                    Ok(()) | Err(ProviderError::NotFound { .. }) => Ok(Effect::Deleted),
                    Err(e) => Err(e),
                }
            }
        };

        match result {
            Err(e) if e.is_retryable() && attempts < retry.max_attempts => {
                let delay = retry.delay(attempts, &e);
                warn!("Attempt {attempts} failed ({e}), retrying in {delay:?}");
                tokio::time::sleep(delay).await;
            }
            result => {
                return Outcome {
                    operation,
                    result,
                    attempts,
                };
            }
        }
    }
}

/// Resolves once the receiver reads `true`; never resolves without one.
async fn wait_for_cancel(cancel: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = cancel.as_mut() {
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
    *cancel = None;
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InputValue, ResourceDefinition};
    use crate::graph::GraphBuilder;
    use crate::planner::DiffEngine;
    use crate::provider::{MockProvider, SimulatedProvider};
    use crate::schema::{FieldType, ResourceSchema, SchemaRegistry};
    use crate::state::MemoryStateStore;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        for kind in ["node", "leaf"] {
            registry
                .insert(
                    ResourceSchema::new(kind)
                        .optional("parent", FieldType::String)
                        .optional("size", FieldType::Integer)
                        .output("id", FieldType::String),
                )
                .expect("schema");
        }
        registry
    }

    fn fast_config() -> DeploymentConfig {
        DeploymentConfig {
            backoff_base_ms: 1,
            backoff_max_ms: 5,
            ..DeploymentConfig::default()
        }
    }

    fn plan_for(graph: &ResourceGraph, config: &DeploymentConfig, snapshot: &StateSnapshot) -> Plan {
        let diff = DiffEngine::new()
            .compute_diff(graph, &registry(), &ReferenceResolver::new(config), snapshot)
            .expect("diff");
        Plan::from_diff(&diff, graph, snapshot, "test", "hash").expect("plan")
    }

    fn child(id: &str, kind: &str, parent: &str) -> ResourceDefinition {
        ResourceDefinition::new(id, kind).with_input("parent", InputValue::reference(parent, "id"))
    }

    #[test]
    fn test_retry_delay_backoff() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base: Duration::from_millis(100),
            max: Duration::from_millis(350),
        };
        let throttled = ProviderError::transient("slow down");

        assert_eq!(policy.delay(1, &throttled), Duration::from_millis(100));
        assert_eq!(policy.delay(2, &throttled), Duration::from_millis(200));
        assert_eq!(policy.delay(3, &throttled), Duration::from_millis(350));

        let hinted = ProviderError::Transient {
            message: String::from("slow down"),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(policy.delay(1, &hinted), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let mut provider = MockProvider::new();
        let mut calls = 0;
        provider.expect_create().times(3).returning(move |_, _| {
            calls += 1;
            if calls < 3 {
                Err(ProviderError::transient("throttled"))
            } else {
                Ok(Created {
                    physical_id: String::from("node-1"),
                    outputs: BTreeMap::from([(String::from("id"), json!("node-1"))]),
                })
            }
        });
        provider.expect_name().return_const("mock");

        let config = fast_config();
        let graph = GraphBuilder::new()
            .build(&[ResourceDefinition::new("a", "node")])
            .expect("graph");
        let store = MemoryStateStore::new();
        let mut snapshot = StateSnapshot::new("test");
        let plan = plan_for(&graph, &config, &snapshot);

        let report = PlanExecutor::new(Arc::new(provider), &store, &graph, &config)
            .execute(&plan, &mut snapshot)
            .await;

        assert!(report.success(), "{report:?}");
        assert_eq!(report.results[0].attempts, 3);
        assert_eq!(snapshot.get("a").map(|r| r.physical_id.as_str()), Some("node-1"));
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_retries_give_up_after_max_attempts() {
        let mut provider = MockProvider::new();
        provider
            .expect_create()
            .times(2)
            .returning(|_, _| Err(ProviderError::transient("throttled")));
        provider.expect_name().return_const("mock");

        let config = DeploymentConfig {
            max_attempts: 2,
            ..fast_config()
        };
        let graph = GraphBuilder::new()
            .build(&[ResourceDefinition::new("a", "node")])
            .expect("graph");
        let store = MemoryStateStore::new();
        let mut snapshot = StateSnapshot::new("test");
        let plan = plan_for(&graph, &config, &snapshot);

        let report = PlanExecutor::new(Arc::new(provider), &store, &graph, &config)
            .execute(&plan, &mut snapshot)
            .await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.results[0].attempts, 2);
        assert!(snapshot.resources.is_empty());
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_independent_actions_run_concurrently() {
        let config = DeploymentConfig {
            max_workers: 8,
            ..fast_config()
        };
        let definitions: Vec<ResourceDefinition> = (0..100)
            .map(|i| ResourceDefinition::new(format!("n{i}"), "node"))
            .collect();
        let graph = GraphBuilder::new().build(&definitions).expect("graph");
        let provider = Arc::new(
            SimulatedProvider::new(registry()).with_latency(Duration::from_millis(5)),
        );
        let store = MemoryStateStore::new();
        let mut snapshot = StateSnapshot::new("test");
        let plan = plan_for(&graph, &config, &snapshot);

        let report = PlanExecutor::new(provider.clone(), &store, &graph, &config)
            .execute(&plan, &mut snapshot)
            .await;

        assert!(report.success());
        assert_eq!(snapshot.resources.len(), 100);
        assert!(provider.peak_concurrency() > 1);
        assert!(provider.peak_concurrency() <= 8);
        assert_eq!(store.save_count(), 100);
    }

    #[tokio::test]
    async fn test_failure_blocks_dependents_only() {
        let config = fast_config();
        let graph = GraphBuilder::new()
            .build(&[
                ResourceDefinition::new("broken", "leaf"),
                child("after", "node", "broken"),
                child("last", "node", "after"),
                ResourceDefinition::new("fine", "node"),
                child("fine-child", "node", "fine"),
            ])
            .expect("graph");
        let provider = Arc::new(SimulatedProvider::new(registry()).with_failing_kinds(["leaf"]));
        let store = MemoryStateStore::new();
        let mut snapshot = StateSnapshot::new("test");
        let plan = plan_for(&graph, &config, &snapshot);

        let report = PlanExecutor::new(provider, &store, &graph, &config)
            .execute(&plan, &mut snapshot)
            .await;

        let status = |id: &str| {
            report
                .results
                .iter()
                .find(|r| r.logical_id == id)
                .map(|r| r.status)
        };
        assert_eq!(status("broken"), Some(ActionStatus::Failed));
        assert_eq!(status("after"), Some(ActionStatus::Blocked));
        assert_eq!(status("last"), Some(ActionStatus::Blocked));
        assert_eq!(status("fine"), Some(ActionStatus::Succeeded));
        assert_eq!(status("fine-child"), Some(ActionStatus::Succeeded));
        assert!(!report.success());

        let saved = store.snapshot().await.expect("saved");
        assert_eq!(saved.logical_ids(), vec!["fine", "fine-child"]);
    }

    #[tokio::test]
    async fn test_replacement_rewires_dependents_before_delete() {
        let config = fast_config();
        let graph = GraphBuilder::new()
            .build(&[
                ResourceDefinition::new("root", "node").with_input("size", InputValue::literal(2)),
                child("leaf", "leaf", "root"),
            ])
            .expect("graph");

        let mut snapshot = StateSnapshot::new("test");
        let mut root = ResourceState::new("leaf", "leaf-old-root");
        root.outputs.insert(String::from("id"), json!("leaf-old-root"));
        snapshot.set_resource("root", root);

        let provider = Arc::new(SimulatedProvider::new(registry()).with_existing(&snapshot));
        let store = MemoryStateStore::new();
        let plan = plan_for(&graph, &config, &snapshot);

        let report = PlanExecutor::new(provider.clone(), &store, &graph, &config)
            .execute(&plan, &mut snapshot)
            .await;

        assert!(report.success(), "{report:?}");
        let root = snapshot.get("root").expect("root");
        assert_eq!(root.kind, "node");
        assert!(root.superseded.is_empty());
        assert!(!provider.physical_ids().await.contains("leaf-old-root"));
        assert_eq!(
            snapshot.get("leaf").map(|l| l.inputs["parent"].clone()),
            Some(json!(root.physical_id))
        );
    }

    #[tokio::test]
    async fn test_cancel_skips_unstarted_actions() {
        let config = DeploymentConfig {
            max_workers: 1,
            ..fast_config()
        };
        let graph = GraphBuilder::new()
            .build(&[
                ResourceDefinition::new("a", "node"),
                ResourceDefinition::new("b", "node"),
            ])
            .expect("graph");
        let provider = Arc::new(SimulatedProvider::new(registry()));
        let store = MemoryStateStore::new();
        let mut snapshot = StateSnapshot::new("test");
        let plan = plan_for(&graph, &config, &snapshot);

        let (tx, rx) = watch::channel(true);
        let report = PlanExecutor::new(provider, &store, &graph, &config)
            .with_cancel(rx)
            .execute(&plan, &mut snapshot)
            .await;
        drop(tx);

        assert!(report.cancelled);
        assert_eq!(report.skipped, 2);
        assert!(snapshot.resources.is_empty());
    }

    #[tokio::test]
    async fn test_missing_delete_target_counts_as_done() {
        let config = fast_config();
        let graph = GraphBuilder::new().build(&[]).expect("graph");
        let mut snapshot = StateSnapshot::new("test");
        snapshot.set_resource("gone", ResourceState::new("node", "node-vanished"));

        // Backend has no record of the resource.
        let provider = Arc::new(SimulatedProvider::new(registry()));
        let store = MemoryStateStore::new();
        let plan = plan_for(&graph, &config, &snapshot);

        let report = PlanExecutor::new(provider, &store, &graph, &config)
            .execute(&plan, &mut snapshot)
            .await;

        assert!(report.success());
        assert!(snapshot.resources.is_empty());
    }
}
