//! Plan and subtask model with structural validation.
//!
//! A [`Plan`] can only be obtained through [`Plan::build`], which rejects
//! duplicate ids, dangling dependencies, unknown panes, and dependency
//! cycles. Holding a `Plan` therefore means holding a valid DAG.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Lifecycle status for a subtask.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    /// Waiting on at least one dependency.
    #[default]
    Pending,
    /// Every dependency succeeded; eligible to launch.
    Ready,
    /// A worker is driving the subtask.
    Running,
    /// Worker declared the subtask complete.
    Succeeded,
    /// Worker failed (declared, budget exhausted, pane error, ...).
    Failed,
    /// Never launched because an ancestor failed or the run was cancelled.
    Skipped,
}

impl SubtaskStatus {
    /// Whether the status is final.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Lowercase label used in logs and reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// A unit of work bound to one pane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Subtask {
    /// Unique identifier assigned at plan-parse time.
    pub id: String,
    /// Free text handed to the action decider.
    pub description: String,
    /// Ids that must succeed before this subtask may start.
    #[serde(default)]
    pub dependency_ids: BTreeSet<String>,
    /// Name of the pane the subtask drives.
    pub assigned_pane: String,
    /// Per-subtask turn budget overriding the scheduler default.
    #[serde(default)]
    pub max_turns: Option<u32>,
    /// Current lifecycle status; only the scheduler moves it.
    #[serde(default)]
    status: SubtaskStatus,
}

impl Subtask {
    /// Construct a pending subtask.
    #[must_use]
    pub fn new<I, S>(id: &str, description: &str, assigned_pane: &str, dependency_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.to_owned(),
            description: description.to_owned(),
            dependency_ids: dependency_ids.into_iter().map(Into::into).collect(),
            assigned_pane: assigned_pane.to_owned(),
            max_turns: None,
            status: SubtaskStatus::Pending,
        }
    }

    /// Override the scheduler's default turn budget.
    #[must_use]
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> SubtaskStatus {
        self.status
    }
}

/// Immutable, validated dependency graph of subtasks.
#[derive(Debug, Clone)]
pub struct Plan {
    task: String,
    subtasks: BTreeMap<String, Subtask>,
    /// Direct dependents of each subtask, built once during validation.
    dependents: BTreeMap<String, Vec<String>>,
}

impl Plan {
    /// Validate `subtasks` against `known_panes` and build the plan.
    ///
    /// Every problem found is reported, joined with `"; "`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Plan` for an empty or duplicate id, a dependency on an
    /// unknown subtask, a reference to an unknown pane, or a dependency cycle.
    pub fn build<'a, P>(task: &str, subtasks: Vec<Subtask>, known_panes: P) -> Result<Self>
    where
        P: IntoIterator<Item = &'a str>,
    {
        let known_panes: BTreeSet<&str> = known_panes.into_iter().collect();
        let mut errors = Vec::new();
        let mut by_id: BTreeMap<String, Subtask> = BTreeMap::new();

        for mut subtask in subtasks {
            if subtask.id.trim().is_empty() {
                errors.push("subtask with empty id".to_owned());
                continue;
            }
            subtask.status = SubtaskStatus::Pending;
            let id = subtask.id.clone();
            if by_id.insert(id.clone(), subtask).is_some() {
                errors.push(format!("duplicate subtask id {id}"));
            }
        }

        for subtask in by_id.values() {
            for dep in &subtask.dependency_ids {
                if !by_id.contains_key(dep) {
                    errors.push(format!(
                        "subtask {} depends on unknown subtask {dep}",
                        subtask.id
                    ));
                }
            }
            if !known_panes.contains(subtask.assigned_pane.as_str()) {
                let available = known_panes.iter().copied().collect::<Vec<_>>().join(", ");
                errors.push(format!(
                    "subtask {} references unknown pane '{}' (available: {available})",
                    subtask.id, subtask.assigned_pane
                ));
            }
        }

        let dependents = dependents_index(&by_id);
        let cyclic = cyclic_ids(&by_id, &dependents);
        if !cyclic.is_empty() {
            errors.push(format!(
                "dependency cycle among subtasks {}",
                cyclic.join(", ")
            ));
        }

        if !errors.is_empty() {
            return Err(AppError::Plan(errors.join("; ")));
        }

        Ok(Self {
            task: task.to_owned(),
            subtasks: by_id,
            dependents,
        })
    }

    /// The task description the plan was derived from.
    #[must_use]
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Number of subtasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    /// Whether the plan has no subtasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    /// Look up a subtask by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.get(id)
    }

    /// Subtasks in ascending id order.
    pub fn subtasks(&self) -> impl Iterator<Item = &Subtask> {
        self.subtasks.values()
    }

    /// Subtask ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.subtasks.keys().map(String::as_str)
    }

    /// Direct dependents of `id`, in ascending order.
    #[must_use]
    pub fn dependents(&self, id: &str) -> &[String] {
        self.dependents.get(id).map_or(&[][..], Vec::as_slice)
    }

    /// Every subtask that depends on `id`, directly or transitively.
    ///
    /// Bounded breadth-first walk over the dependents index; the result is in
    /// discovery order and never contains `id` itself.
    #[must_use]
    pub fn transitive_dependents(&self, id: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<&str> = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for next in self.dependents(current) {
                if seen.insert(next.as_str()) {
                    order.push(next.clone());
                    queue.push_back(next.as_str());
                }
            }
        }
        order
    }

    /// Subtasks with no dependencies, in ascending id order.
    #[must_use]
    pub fn roots(&self) -> Vec<&Subtask> {
        self.subtasks
            .values()
            .filter(|s| s.dependency_ids.is_empty())
            .collect()
    }

    pub(crate) fn set_status(&mut self, id: &str, status: SubtaskStatus) {
        if let Some(subtask) = self.subtasks.get_mut(id) {
            subtask.status = status;
        }
    }

    pub(crate) fn status(&self, id: &str) -> Option<SubtaskStatus> {
        self.subtasks.get(id).map(Subtask::status)
    }
}

fn dependents_index(by_id: &BTreeMap<String, Subtask>) -> BTreeMap<String, Vec<String>> {
    let mut index: BTreeMap<String, Vec<String>> = by_id
        .keys()
        .map(|id| (id.clone(), Vec::new()))
        .collect();
    // `by_id` iterates in ascending order, so each list ends up sorted.
    for subtask in by_id.values() {
        for dep in &subtask.dependency_ids {
            if let Some(list) = index.get_mut(dep) {
                list.push(subtask.id.clone());
            }
        }
    }
    index
}

/// Kahn's algorithm: ids left with a non-zero in-degree sit on or behind a cycle.
fn cyclic_ids(
    by_id: &BTreeMap<String, Subtask>,
    dependents: &BTreeMap<String, Vec<String>>,
) -> Vec<String> {
    let mut in_degree: BTreeMap<&str, usize> = by_id
        .values()
        .map(|s| {
            let known = s
                .dependency_ids
                .iter()
                .filter(|d| by_id.contains_key(*d))
                .count();
            (s.id.as_str(), known)
        })
        .collect();

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();

    while let Some(id) = queue.pop_front() {
        for next in dependents.get(id).map_or(&[][..], Vec::as_slice) {
            if let Some(deg) = in_degree.get_mut(next.as_str()) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(next.as_str());
                }
            }
        }
    }

    in_degree
        .into_iter()
        .filter(|(_, deg)| *deg > 0)
        .map(|(id, _)| id.to_owned())
        .collect()
}
