//! The release plan graph

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PlanError, Result};

use super::project::{Project, ProjectId};

/// Overall status of a release run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseState {
    /// Nothing was triggered yet
    #[default]
    NotStarted,
    /// The release is running (or was interrupted while running)
    InProgress,
    /// Every project was released or excluded
    Succeeded,
    /// At least one project did not complete
    Failed,
}

impl fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::InProgress => "in progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Keys of the plan configuration used to build CI jobs
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigKey {
    /// Name of the job that updates a dependency version in a project
    UpdateDependencyJob,
    /// Projects whose identifier matches this regex are released remotely
    RemoteRegex,
    /// Name of the job used for remote releases
    RemoteJob,
}

impl ConfigKey {
    /// Keys that must be present before a release can start
    pub const REQUIRED: [ConfigKey; 3] = [
        ConfigKey::UpdateDependencyJob,
        ConfigKey::RemoteRegex,
        ConfigKey::RemoteJob,
    ];

    /// Snake-case name as used in the plan file
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateDependencyJob => "update_dependency_job",
            Self::RemoteRegex => "remote_regex",
            Self::RemoteJob => "remote_job",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of one release run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleasePlan {
    /// Project the release starts with
    pub root: ProjectId,

    /// Overall release status
    #[serde(default)]
    pub state: ReleaseState,

    /// Job configuration
    #[serde(default)]
    pub config: BTreeMap<ConfigKey, String>,

    /// Projects keyed by id
    #[serde(with = "project_list")]
    pub projects: BTreeMap<ProjectId, Project>,

    /// Edges from a project to the projects depending on it
    #[serde(default)]
    pub dependents: BTreeMap<ProjectId, BTreeSet<ProjectId>>,

    /// Submodules of a project
    #[serde(default)]
    pub submodules: BTreeMap<ProjectId, BTreeSet<ProjectId>>,
}

impl ReleasePlan {
    /// Create a plan with the given root and no projects
    pub fn new(root: impl Into<ProjectId>) -> Self {
        Self {
            root: root.into(),
            state: ReleaseState::NotStarted,
            config: BTreeMap::new(),
            projects: BTreeMap::new(),
            dependents: BTreeMap::new(),
            submodules: BTreeMap::new(),
        }
    }

    /// Add a project
    pub fn with_project(mut self, project: Project) -> Self {
        self.projects.insert(project.id.clone(), project);
        self
    }

    /// Record that `dependent` depends on `upstream`
    pub fn with_dependent(
        mut self,
        upstream: impl Into<ProjectId>,
        dependent: impl Into<ProjectId>,
    ) -> Self {
        self.dependents
            .entry(upstream.into())
            .or_default()
            .insert(dependent.into());
        self
    }

    /// Record that `submodule` is released as part of `parent`
    pub fn with_submodule(
        mut self,
        parent: impl Into<ProjectId>,
        submodule: impl Into<ProjectId>,
    ) -> Self {
        self.submodules
            .entry(parent.into())
            .or_default()
            .insert(submodule.into());
        self
    }

    /// Set a configuration entry
    pub fn with_config(mut self, key: ConfigKey, value: impl Into<String>) -> Self {
        self.config.insert(key, value.into());
        self
    }

    /// Parse a plan from JSON and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let plan: ReleasePlan = serde_json::from_str(json)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Load a plan from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "loading release plan");
        let content = std::fs::read_to_string(path)?;
        let plan = Self::from_json(&content)?;
        debug!(projects = plan.projects.len(), root = %plan.root, "release plan loaded");
        Ok(plan)
    }

    /// Serialize the plan as pretty JSON
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The root project
    pub fn root_project(&self) -> std::result::Result<&Project, PlanError> {
        self.projects
            .get(&self.root)
            .ok_or_else(|| PlanError::UnknownRoot(self.root.clone()))
    }

    /// Look up a project
    pub fn project(&self, id: &ProjectId) -> std::result::Result<&Project, PlanError> {
        self.projects.get(id).ok_or_else(|| PlanError::UnknownProject {
            id: id.clone(),
            referenced_by: "the orchestrator".to_string(),
        })
    }

    /// Direct dependents of a project
    pub fn dependents_of(&self, id: &ProjectId) -> impl Iterator<Item = &ProjectId> {
        self.dependents.get(id).into_iter().flatten()
    }

    /// Direct submodules of a project
    pub fn submodules_of(&self, id: &ProjectId) -> impl Iterator<Item = &ProjectId> {
        self.submodules.get(id).into_iter().flatten()
    }

    /// Configuration value for a key
    pub fn config_value(&self, key: ConfigKey) -> Option<&str> {
        self.config.get(&key).map(String::as_str)
    }

    /// Collect `(upstream, dependent)` pairs for the project and every
    /// submodule transitively below it.
    ///
    /// The upstream side is the id the dependent is waiting on, which is the
    /// submodule's own id for dependents of a submodule.
    pub fn collect_dependents_incl_submodules(
        &self,
        id: &ProjectId,
    ) -> BTreeSet<(ProjectId, ProjectId)> {
        let mut pairs = BTreeSet::new();
        let mut visited = HashSet::new();
        let mut stack = vec![id.clone()];

        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            for dependent in self.dependents_of(&current) {
                pairs.insert((current.clone(), dependent.clone()));
            }
            stack.extend(self.submodules_of(&current).cloned());
        }

        pairs
    }

    /// Check that the plan is a consistent DAG
    pub fn validate(&self) -> std::result::Result<(), PlanError> {
        debug!(projects = self.projects.len(), "validating release plan");

        for (key, project) in &self.projects {
            if key != &project.id {
                return Err(PlanError::MismatchedId {
                    key: key.clone(),
                    actual: project.id.clone(),
                });
            }
        }

        self.root_project()?;
        self.validate_edges("dependents", &self.dependents)?;
        self.validate_edges("submodules", &self.submodules)?;

        for project in self.projects.values() {
            for command in &project.commands {
                if let super::CommandKind::UpdateDependency { dependency } = &command.kind {
                    self.ensure_known(dependency, &format!("a command of {}", project.id))?;
                }
            }
        }

        self.check_acyclic()?;
        debug!("release plan validation passed");
        Ok(())
    }

    fn validate_edges(
        &self,
        name: &str,
        edges: &BTreeMap<ProjectId, BTreeSet<ProjectId>>,
    ) -> std::result::Result<(), PlanError> {
        for (from, targets) in edges {
            self.ensure_known(from, name)?;
            for target in targets {
                self.ensure_known(target, &format!("{} of {}", name, from))?;
            }
        }
        Ok(())
    }

    fn ensure_known(&self, id: &ProjectId, referenced_by: &str) -> std::result::Result<(), PlanError> {
        if self.projects.contains_key(id) {
            Ok(())
        } else {
            Err(PlanError::UnknownProject {
                id: id.clone(),
                referenced_by: referenced_by.to_string(),
            })
        }
    }

    /// Kahn's algorithm over dependents and submodule edges
    fn check_acyclic(&self) -> std::result::Result<(), PlanError> {
        let mut in_degree: HashMap<&ProjectId, usize> =
            self.projects.keys().map(|id| (id, 0)).collect();
        let edges = || {
            self.dependents
                .iter()
                .chain(self.submodules.iter())
                .flat_map(|(from, targets)| targets.iter().map(move |to| (from, to)))
        };

        for (_, to) in edges() {
            if let Some(degree) = in_degree.get_mut(to) {
                *degree += 1;
            }
        }

        let mut queue: VecDeque<&ProjectId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0;

        while let Some(id) = queue.pop_front() {
            visited += 1;
            for (_, to) in edges().filter(|(from, _)| *from == id) {
                if let Some(degree) = in_degree.get_mut(to) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(to);
                    }
                }
            }
        }

        if visited != self.projects.len() {
            let mut cyclic: Vec<&str> = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(id, _)| id.as_str())
                .collect();
            cyclic.sort_unstable();
            return Err(PlanError::CyclicDependency(cyclic.join(", ")));
        }

        Ok(())
    }
}

/// Projects are written as a list, keyed by their id when read back
mod project_list {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{Project, ProjectId};

    pub fn serialize<S>(projects: &BTreeMap<ProjectId, Project>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let list: Vec<&Project> = projects.values().collect();
        list.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<ProjectId, Project>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let list = Vec::<Project>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|p| (p.id.clone(), p)).collect())
    }
}
