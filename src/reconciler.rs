//! Reconciler tying the pipeline together.
//!
//! A reconciler is built from a desired-state document: the document is
//! validated against the schema registry and its dependency graph is built
//! up front, so an invalid or cyclic document never reaches a provider.
//! Planning is pure; applying takes the state lock, executes the plan and
//! persists the snapshot.

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{DocumentValidator, InputHasher, StackDocument};
use crate::error::Result;
use crate::graph::{GraphBuilder, ReferenceResolver, ResourceGraph};
use crate::planner::{DiffEngine, ExecutionReport, Plan, PlanExecutor};
use crate::provider::Provider;
use crate::schema::SchemaRegistry;
use crate::state::{RunHistoryEntry, StateSnapshot, StateStore, generate_holder_id};

/// Validated desired state, ready to plan and apply.
#[derive(Debug)]
pub struct Reconciler {
    document: StackDocument,
    registry: SchemaRegistry,
    graph: ResourceGraph,
    desired_hash: String,
    warnings: Vec<String>,
    diff_engine: DiffEngine,
}

/// Result of an apply run.
#[derive(Debug)]
pub struct ApplyOutcome {
    /// The plan that was executed.
    pub plan: Plan,
    /// Per-action results.
    pub report: ExecutionReport,
    /// Snapshot after the run.
    pub snapshot: StateSnapshot,
}

impl Reconciler {
    /// Validates a document and builds its dependency graph.
    ///
    /// # Errors
    ///
    /// Returns a schema error for an invalid document and a graph error for
    /// a cyclic one.
    pub fn new(document: StackDocument) -> Result<Self> {
        let registry = SchemaRegistry::builtin().extended_with(&document.kinds)?;

        let report = DocumentValidator::new(&registry).validate(&document)?;
        for warning in &report.warnings {
            warn!("{warning}");
        }

        let graph = GraphBuilder::new().build(&document.resources)?;
        let desired_hash = InputHasher::new().hash_document(&document);
        debug!(
            "Stack '{}' has {} resources (hash {})",
            document.stack,
            graph.len(),
            &desired_hash[..desired_hash.len().min(12)]
        );

        Ok(Self {
            document,
            registry,
            graph,
            desired_hash,
            warnings: report.warnings,
            diff_engine: DiffEngine::new(),
        })
    }

    /// Returns the desired-state document.
    #[must_use]
    pub const fn document(&self) -> &StackDocument {
        &self.document
    }

    /// Returns the registry, including kinds declared by the document.
    #[must_use]
    pub const fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Returns the dependency graph.
    #[must_use]
    pub const fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    /// Returns the hash of the desired-state document.
    #[must_use]
    pub fn desired_hash(&self) -> &str {
        &self.desired_hash
    }

    /// Returns validation warnings.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Computes the plan that brings `snapshot` to the desired state.
    ///
    /// # Errors
    ///
    /// Returns an error if a recorded output or setting cannot be resolved,
    /// a manual-replacement resource would be replaced, or the recorded
    /// dependencies cannot be ordered.
    pub fn plan(&self, snapshot: &StateSnapshot) -> Result<Plan> {
        if !snapshot.stack.is_empty() && snapshot.stack != self.document.stack {
            warn!(
                "State belongs to stack '{}' but the document declares '{}'",
                snapshot.stack, self.document.stack
            );
        }

        let resolver = ReferenceResolver::new(&self.document.deployment);
        let diff = self
            .diff_engine
            .compute_diff(&self.graph, &self.registry, &resolver, snapshot)?;

        let plan = Plan::from_diff(
            &diff,
            &self.graph,
            snapshot,
            &self.document.stack,
            &self.desired_hash,
        )?;

        info!("{}", plan.summary_line());
        Ok(plan)
    }

    /// Plans and executes against a provider, holding the state lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken, the state cannot be
    /// loaded or planning fails. Provider failures are reported in the
    /// outcome instead.
    pub async fn apply(
        &self,
        store: &dyn StateStore,
        provider: Arc<dyn Provider>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ApplyOutcome> {
        let holder = generate_holder_id();
        let lock = store.acquire_lock(&holder, "apply").await?;
        debug!("Acquired {} state lock {}", store.backend_type(), lock.lock_id);

        let outcome = self.apply_locked(store, provider, cancel).await;

        if let Err(e) = store.release_lock(&lock.lock_id).await {
            warn!("Failed to release state lock: {e}");
        }
        outcome
    }

    async fn apply_locked(
        &self,
        store: &dyn StateStore,
        provider: Arc<dyn Provider>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ApplyOutcome> {
        let mut snapshot = store
            .load()
            .await?
            .unwrap_or_else(|| StateSnapshot::new(&self.document.stack));

        let plan = self.plan(&snapshot)?;

        let mut executor = PlanExecutor::new(provider, store, &self.graph, &self.document.deployment);
        if let Some(cancel) = cancel {
            executor = executor.with_cancel(cancel);
        }
        let report = executor.execute(&plan, &mut snapshot).await;

        let touched: Vec<String> = plan
            .changes()
            .iter()
            .map(|a| a.logical_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if report.success() {
            snapshot.desired_hash.clone_from(&self.desired_hash);
            snapshot.add_history(RunHistoryEntry::new(&self.desired_hash, touched));
        } else {
            let summary = format!(
                "{} failed, {} blocked, {} skipped",
                report.failed, report.blocked, report.skipped
            );
            snapshot.add_history(RunHistoryEntry::failed(&self.desired_hash, touched, &summary));
        }

        if report.state_error.is_none() {
            store.save(&snapshot).await?;
        } else {
            error!("State was not fully persisted; rerun plan to see what remains");
        }

        Ok(ApplyOutcome {
            plan,
            report,
            snapshot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DocumentParser;
    use crate::error::EXIT_CYCLE;
    use crate::planner::ActionType;
    use crate::provider::SimulatedProvider;
    use crate::state::{MemoryStateStore, ResourceState};
    use std::fmt::Write;

    const KINDS: &str = "
kinds:
  - kind: base
    inputs:
      name: { type: string, required: true }
    outputs:
      outputId: string
  - kind: echo
    inputs:
      name: { type: string, required: true }
    outputs:
      name: string
  - kind: child
    inputs:
      parent: { type: string, required: true }
      label: { type: string }
    outputs:
      child_id: string
    replacement_triggers: [label]
";

    fn reconciler(resources: &str) -> Reconciler {
        let yaml = format!("stack: demo\n{KINDS}resources:\n{resources}");
        let document = DocumentParser::new()
            .parse_yaml(&yaml, None)
            .expect("document parses");
        Reconciler::new(document).expect("document is valid")
    }

    fn a_and_b(label: &str) -> Reconciler {
        reconciler(&format!(
            "
  - id: A
    kind: base
    inputs: {{ name: a }}
  - id: B
    kind: child
    inputs:
      parent: {{ ref: A, output: outputId }}
      label: {label}
"
        ))
    }

    fn describe(plan: &Plan) -> Vec<String> {
        plan.changes().iter().map(ToString::to_string).collect()
    }

    async fn apply(reconciler: &Reconciler, store: &MemoryStateStore) -> ApplyOutcome {
        let prior = store.snapshot().await.unwrap_or_else(|| StateSnapshot::new("demo"));
        let provider = SimulatedProvider::new(reconciler.registry().clone()).with_existing(&prior);
        reconciler
            .apply(store, Arc::new(provider), None)
            .await
            .expect("apply runs")
    }

    #[test]
    fn test_fresh_plan_creates_in_dependency_order() {
        let plan = a_and_b("one").plan(&StateSnapshot::new("demo")).expect("plan");

        assert_eq!(describe(&plan), vec!["create A", "create B"]);
        assert_eq!(plan.actions[1].depends_on, vec![0]);
    }

    #[tokio::test]
    async fn test_trigger_change_replaces_create_before_delete() {
        let store = MemoryStateStore::new();
        let first = apply(&a_and_b("one"), &store).await;
        assert!(first.report.success());
        let old_b = first.snapshot.get("B").expect("B").physical_id.clone();

        let second = a_and_b("two");
        let plan = second
            .plan(&store.snapshot().await.expect("saved"))
            .expect("plan");

        assert_eq!(
            describe(&plan),
            vec![
                String::from("create B (replacement)"),
                format!("delete B (old instance {old_b})"),
            ]
        );
        let a = plan.actions.iter().find(|a| a.logical_id == "A").expect("A");
        assert_eq!(a.action, ActionType::Noop);

        let outcome = apply(&second, &store).await;
        assert!(outcome.report.success());
        let b = outcome.snapshot.get("B").expect("B");
        assert_ne!(b.physical_id, old_b);
        assert!(b.superseded.is_empty());
    }

    #[tokio::test]
    async fn test_orphan_is_deleted() {
        let reconciler = reconciler(
            "
  - id: A
    kind: base
    inputs: { name: a }
",
        );
        let store = MemoryStateStore::new();
        apply(&reconciler, &store).await;

        let mut snapshot = store.snapshot().await.expect("saved");
        snapshot.set_resource("C", ResourceState::new("base", "base-c"));
        let plan = reconciler.plan(&snapshot).expect("plan");

        assert_eq!(describe(&plan), vec!["delete C"]);
    }

    #[tokio::test]
    async fn test_hundred_independent_creates() {
        let mut resources = String::new();
        for i in 0..100 {
            let _ = write!(resources, "  - id: r{i}\n    kind: base\n    inputs: {{ name: r{i} }}\n");
        }
        let reconciler = reconciler(&resources);
        let store = MemoryStateStore::new();

        let outcome = apply(&reconciler, &store).await;

        assert!(outcome.report.success());
        let ids: BTreeSet<&str> = outcome
            .snapshot
            .resources
            .values()
            .map(|r| r.physical_id.as_str())
            .collect();
        assert_eq!(ids.len(), 100);
        assert_eq!(outcome.snapshot.desired_hash, reconciler.desired_hash());
    }

    #[tokio::test]
    async fn test_second_plan_after_apply_is_empty() {
        let reconciler = a_and_b("one");
        let store = MemoryStateStore::new();
        apply(&reconciler, &store).await;

        let snapshot = store.snapshot().await.expect("saved");
        let plan = reconciler.plan(&snapshot).expect("plan");

        assert!(!plan.has_changes(), "{plan}");
        assert_eq!(snapshot.history.len(), 1);
        assert!(snapshot.history[0].success);
        assert!(store.get_lock_info().await.expect("lock info").is_none());
    }

    #[tokio::test]
    async fn test_update_propagates_changed_outputs_to_dependents() {
        let echo_and_b = |name: &str| {
            reconciler(&format!(
                "
  - id: A
    kind: echo
    inputs: {{ name: {name} }}
  - id: B
    kind: child
    inputs:
      parent: {{ ref: A, output: name }}
"
            ))
        };
        let store = MemoryStateStore::new();
        assert!(apply(&echo_and_b("one"), &store).await.report.success());

        let second = echo_and_b("two");
        let plan = second
            .plan(&store.snapshot().await.expect("saved"))
            .expect("plan");
        assert_eq!(describe(&plan), vec!["update A"]);

        let outcome = apply(&second, &store).await;
        assert!(outcome.report.success());
        let b = outcome.snapshot.get("B").expect("B");
        assert_eq!(b.inputs.get("parent"), Some(&serde_json::json!("two")));
        assert_eq!(outcome.report.results[1].attempts, 1);

        let replan = second
            .plan(&store.snapshot().await.expect("saved"))
            .expect("replan");
        assert!(!replan.has_changes(), "{replan}");
    }

    #[tokio::test]
    async fn test_failed_apply_keeps_partial_state() {
        let reconciler = a_and_b("one");
        let store = MemoryStateStore::new();
        let provider =
            SimulatedProvider::new(reconciler.registry().clone()).with_failing_kinds(["child"]);

        let outcome = reconciler
            .apply(&store, Arc::new(provider), None)
            .await
            .expect("apply runs");

        assert!(!outcome.report.success());
        let saved = store.snapshot().await.expect("saved");
        assert_eq!(saved.logical_ids(), vec!["A"]);
        assert!(saved.desired_hash.is_empty());
        assert!(!saved.history[0].success);
    }

    #[test]
    fn test_cycle_is_rejected_with_path() {
        let yaml = format!(
            "stack: demo\n{KINDS}resources:
  - id: A
    kind: child
    inputs:
      parent: {{ ref: B, output: child_id }}
  - id: B
    kind: child
    inputs:
      parent: {{ ref: A, output: child_id }}
"
        );
        let document = DocumentParser::new().parse_yaml(&yaml, None).expect("parses");
        let err = Reconciler::new(document).expect_err("cycle");

        assert_eq!(err.exit_code(), EXIT_CYCLE);
        assert!(err.to_string().contains("A -> B -> A"), "{err}");
    }
}
