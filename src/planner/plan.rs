//! Plan types and construction.
//!
//! A plan is a list of actions in a total order plus the dependency edges
//! between them. The order is a topological sort of the action graph in
//! which, among unrelated actions, every create or update comes before any
//! delete, and forward actions follow the evaluation order while deletes
//! follow the reverse of the recorded dependency order.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::PlanError;
use crate::graph::ResourceGraph;
use crate::state::StateSnapshot;

use super::diff::{DiffResult, DiffType};

/// A complete, ordered plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// Stack the plan applies to.
    pub stack: String,
    /// Hash of the desired-state document this plan is based on.
    pub desired_hash: String,
    /// Planned actions in execution order.
    pub actions: Vec<PlanAction>,
}

/// A single planned action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanAction {
    /// Position in the plan.
    pub rank: usize,
    /// Logical id of the resource.
    pub logical_id: String,
    /// Resource kind.
    pub kind: String,
    /// Action type.
    pub action: ActionType,
    /// Which half of a replacement this is, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<ReplaceStep>,
    /// Physical id acted upon (absent for creates).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_id: Option<String>,
    /// Ranks that must succeed before this action starts.
    pub depends_on: Vec<usize>,
    /// Ranks waiting on this action.
    #[serde(skip)]
    pub dependents: Vec<usize>,
    /// Fields whose change caused this action.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changed_fields: Vec<String>,
    /// Reason for this action.
    pub reason: String,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// Create a new resource.
    Create,
    /// Update a resource in place.
    Update,
    /// One half of a create-before-delete replacement.
    Replace,
    /// Delete a resource.
    Delete,
    /// No operation (for tracking).
    Noop,
}

/// Halves of a replacement, and superseded-instance cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceStep {
    /// Create the new instance.
    CreateReplacement,
    /// Delete an old instance once nothing references it.
    DeleteReplaced,
}

/// Action counts by type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    /// Resources to create.
    pub create: usize,
    /// Resources to update in place.
    pub update: usize,
    /// Resources to replace.
    pub replace: usize,
    /// Resources to delete, including superseded instances.
    pub delete: usize,
    /// Unchanged resources.
    pub noop: usize,
}

/// An action before ordering.
struct Draft {
    action: PlanAction,
    /// Ordering key: forward actions (class 0) before teardown (class 1).
    key: (u8, usize, usize),
    predecessors: BTreeSet<usize>,
}

/// Draft indices for one logical id.
#[derive(Default)]
struct Slots {
    forward: Option<usize>,
    /// Deletes of old or superseded instances.
    old_deletes: Vec<usize>,
    /// Delete of an orphaned resource.
    delete: Option<usize>,
}

impl Plan {
    /// Builds an ordered plan from a diff.
    ///
    /// # Errors
    ///
    /// Returns `Unorderable` if the recorded dependencies form a loop.
    pub fn from_diff(
        diff: &DiffResult,
        graph: &ResourceGraph,
        snapshot: &StateSnapshot,
        stack: &str,
        desired_hash: &str,
    ) -> Result<Self, PlanError> {
        let teardown_rank: HashMap<&str, usize> = snapshot
            .dependency_order()
            .into_iter()
            .rev()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();

        let mut drafts: Vec<Draft> = Vec::new();
        let mut slots: HashMap<&str, Slots> = HashMap::new();
        let mut forward_position = 0usize;

        for resource in &diff.diffs {
            let id = resource.logical_id.as_str();
            let slot = slots.entry(id).or_default();
            let teardown = teardown_rank.get(id).copied().unwrap_or(usize::MAX);

            let (action, step) = match resource.diff_type {
                DiffType::Create => (Some(ActionType::Create), None),
                DiffType::Update => (Some(ActionType::Update), None),
                DiffType::Replace => (Some(ActionType::Replace), Some(ReplaceStep::CreateReplacement)),
                DiffType::NoChange => (Some(ActionType::Noop), None),
                DiffType::Delete => (None, None),
            };

            if let Some(action) = action {
                slot.forward = Some(drafts.len());
                drafts.push(Draft {
                    action: PlanAction {
                        rank: 0,
                        logical_id: resource.logical_id.clone(),
                        kind: resource.kind.clone(),
                        action,
                        step,
                        physical_id: (action != ActionType::Create
                            && action != ActionType::Replace)
                            .then(|| resource.physical_id.clone())
                            .flatten(),
                        depends_on: Vec::new(),
                        dependents: Vec::new(),
                        changed_fields: resource.changed_fields(),
                        reason: resource.reason.clone(),
                    },
                    key: (0, forward_position, 0),
                    predecessors: BTreeSet::new(),
                });
                forward_position += 1;
            }

            let mut sub = 0;
            if resource.diff_type == DiffType::Replace
                && let Some(old) = &resource.physical_id
            {
                slot.old_deletes.push(drafts.len());
                drafts.push(teardown_draft(
                    resource.logical_id.clone(),
                    snapshot_kind(snapshot, id, &resource.kind),
                    ActionType::Replace,
                    Some(ReplaceStep::DeleteReplaced),
                    old.clone(),
                    String::from("delete replaced instance"),
                    (1, teardown, sub),
                ));
                sub += 1;
            }

            for old in &resource.superseded {
                slot.old_deletes.push(drafts.len());
                drafts.push(teardown_draft(
                    resource.logical_id.clone(),
                    snapshot_kind(snapshot, id, &resource.kind),
                    ActionType::Delete,
                    Some(ReplaceStep::DeleteReplaced),
                    old.clone(),
                    String::from("clean up superseded instance"),
                    (1, teardown, sub),
                ));
                sub += 1;
            }

            if resource.diff_type == DiffType::Delete
                && let Some(physical_id) = &resource.physical_id
            {
                slot.delete = Some(drafts.len());
                drafts.push(teardown_draft(
                    resource.logical_id.clone(),
                    resource.kind.clone(),
                    ActionType::Delete,
                    None,
                    physical_id.clone(),
                    resource.reason.clone(),
                    (1, teardown, sub),
                ));
            }
        }

        link(&mut drafts, &slots, graph, snapshot);
        let order = order_drafts(&drafts)?;

        let mut rank_of = vec![0usize; drafts.len()];
        for (rank, &draft) in order.iter().enumerate() {
            rank_of[draft] = rank;
        }

        let mut actions: Vec<PlanAction> = Vec::with_capacity(drafts.len());
        let mut by_draft: Vec<Option<Draft>> = drafts.into_iter().map(Some).collect();
        for (rank, &draft) in order.iter().enumerate() {
            let Some(Draft {
                mut action,
                predecessors,
                ..
            }) = by_draft[draft].take()
            else {
                continue;
            };
            action.rank = rank;
            let mut depends_on: Vec<usize> = predecessors.iter().map(|&p| rank_of[p]).collect();
            depends_on.sort_unstable();
            action.depends_on = depends_on;
            actions.push(action);
        }

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); actions.len()];
        for action in &actions {
            for &p in &action.depends_on {
                dependents[p].push(action.rank);
            }
        }
        for (action, list) in actions.iter_mut().zip(dependents) {
            action.dependents = list;
        }

        Ok(Self {
            stack: stack.to_string(),
            desired_hash: desired_hash.to_string(),
            actions,
        })
    }

    /// Returns counts of each action type.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for action in &self.actions {
            match (action.action, action.step) {
                (ActionType::Create, _) => summary.create += 1,
                (ActionType::Update, _) => summary.update += 1,
                (ActionType::Replace, Some(ReplaceStep::CreateReplacement)) => {
                    summary.replace += 1;
                }
                (ActionType::Replace, _) => {}
                (ActionType::Delete, _) => summary.delete += 1,
                (ActionType::Noop, _) => summary.noop += 1,
            }
        }
        summary
    }

    /// One-line description of the action counts.
    #[must_use]
    pub fn summary_line(&self) -> String {
        let s = self.summary();
        format!(
            "Plan: {} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            s.create, s.update, s.replace, s.delete, s.noop
        )
    }

    /// Returns actions that change something.
    #[must_use]
    pub fn changes(&self) -> Vec<&PlanAction> {
        self.actions
            .iter()
            .filter(|a| a.action != ActionType::Noop)
            .collect()
    }

    /// Returns true if applying the plan would change anything.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.actions.iter().any(|a| a.action != ActionType::Noop)
    }

    /// Returns ranks of actions with no predecessors.
    #[must_use]
    pub fn ready_actions(&self) -> Vec<usize> {
        self.actions
            .iter()
            .filter(|a| a.depends_on.is_empty())
            .map(|a| a.rank)
            .collect()
    }

    /// Returns every action that transitively waits on `rank`.
    #[must_use]
    pub fn dependent_actions(&self, rank: usize) -> BTreeSet<usize> {
        let mut found = BTreeSet::new();
        let mut stack = vec![rank];
        while let Some(current) = stack.pop() {
            let Some(action) = self.actions.get(current) else {
                continue;
            };
            for &d in &action.dependents {
                if found.insert(d) {
                    stack.push(d);
                }
            }
        }
        found
    }
}

fn snapshot_kind(snapshot: &StateSnapshot, logical_id: &str, fallback: &str) -> String {
    snapshot
        .get(logical_id)
        .map_or_else(|| fallback.to_string(), |r| r.kind.clone())
}

fn teardown_draft(
    logical_id: String,
    kind: String,
    action: ActionType,
    step: Option<ReplaceStep>,
    physical_id: String,
    reason: String,
    key: (u8, usize, usize),
) -> Draft {
    Draft {
        action: PlanAction {
            rank: 0,
            logical_id,
            kind,
            action,
            step,
            physical_id: Some(physical_id),
            depends_on: Vec::new(),
            dependents: Vec::new(),
            changed_fields: Vec::new(),
            reason,
        },
        key,
        predecessors: BTreeSet::new(),
    }
}

/// Adds the dependency edges between drafts.
fn link(
    drafts: &mut [Draft],
    slots: &HashMap<&str, Slots>,
    graph: &ResourceGraph,
    snapshot: &StateSnapshot,
) {
    // Dependents recorded in the snapshot, by dependency.
    let mut prior_dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (id, resource) in &snapshot.resources {
        for dependency in &resource.dependencies {
            prior_dependents
                .entry(dependency.as_str())
                .or_default()
                .push(id.as_str());
        }
    }

    for (id, slot) in slots {
        // Forward actions wait for the forward actions of their dependencies.
        if let Some(forward) = slot.forward {
            for dependency in graph.dependencies_of(id) {
                if let Some(p) = slots.get(dependency).and_then(|s| s.forward) {
                    drafts[forward].predecessors.insert(p);
                }
            }
        }

        let teardown: Vec<usize> = slot.old_deletes.iter().copied().chain(slot.delete).collect();
        if teardown.is_empty() {
            continue;
        }

        // Everything that references an instance of `id` must be rewired or
        // gone before that instance is deleted.
        let mut blockers: BTreeSet<usize> = slot.forward.into_iter().collect();
        let referrers = graph
            .dependents_of(id)
            .into_iter()
            .chain(prior_dependents.get(id).into_iter().flatten().copied());
        for referrer in referrers {
            if let Some(other) = slots.get(referrer) {
                blockers.extend(other.forward);
                blockers.extend(other.old_deletes.iter().copied());
                blockers.extend(other.delete);
            }
        }

        for &t in &teardown {
            drafts[t].predecessors.extend(blockers.iter().copied());
        }

        // An orphan's record is dropped last, after its old instances.
        if let Some(delete) = slot.delete {
            drafts[delete]
                .predecessors
                .extend(slot.old_deletes.iter().copied());
        }
    }
}

/// Kahn's algorithm over drafts, smallest key first.
fn order_drafts(drafts: &[Draft]) -> Result<Vec<usize>, PlanError> {
    let mut remaining: Vec<usize> = drafts.iter().map(|d| d.predecessors.len()).collect();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); drafts.len()];
    for (i, draft) in drafts.iter().enumerate() {
        for &p in &draft.predecessors {
            successors[p].push(i);
        }
    }

    let mut ready: BTreeSet<((u8, usize, usize), usize)> = drafts
        .iter()
        .enumerate()
        .filter(|(i, _)| remaining[*i] == 0)
        .map(|(i, d)| (d.key, i))
        .collect();

    let mut order = Vec::with_capacity(drafts.len());
    while let Some((_, i)) = ready.pop_first() {
        order.push(i);
        for &s in &successors[i] {
            remaining[s] -= 1;
            if remaining[s] == 0 {
                ready.insert((drafts[s].key, s));
            }
        }
    }

    if order.len() == drafts.len() {
        Ok(order)
    } else {
        let stuck: Vec<&str> = remaining
            .iter()
            .enumerate()
            .filter(|(_, n)| **n > 0)
            .map(|(i, _)| drafts[i].action.logical_id.as_str())
            .collect();
        Err(PlanError::Unorderable {
            message: format!("recorded dependencies form a loop among: {}", stuck.join(", ")),
        })
    }
}

impl PlanAction {
    /// Returns true for actions that remove a physical resource.
    #[must_use]
    pub fn is_teardown(&self) -> bool {
        self.action == ActionType::Delete || self.step == Some(ReplaceStep::DeleteReplaced)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Noop => "no-op",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlanAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.action, self.step) {
            (ActionType::Replace, Some(ReplaceStep::CreateReplacement)) => {
                write!(f, "create {} (replacement)", self.logical_id)
            }
            (_, Some(ReplaceStep::DeleteReplaced)) => write!(
                f,
                "delete {} (old instance {})",
                self.logical_id,
                self.physical_id.as_deref().unwrap_or("?")
            ),
            (action, _) => write!(f, "{action} {}", self.logical_id),
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for action in &self.actions {
            writeln!(f, "{:>3}. {action}", action.rank + 1)?;
        }
        write!(f, "{}", self.summary_line())
    }
}
