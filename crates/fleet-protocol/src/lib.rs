use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod history;
mod time;

pub use history::{compare_recency, recent_history, RecentEntry, DEFAULT_HISTORY_WINDOW};

/// Complete point-in-time fleet state as served by `/api/state` and `/api/events`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    #[serde(default, deserialize_with = "null_as_default")]
    pub machines: BTreeMap<String, MachineState>,
    #[serde(
        default,
        deserialize_with = "time::deserialize_optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub repos: BTreeMap<String, Repository>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_repo: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Repository {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_session: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub agents: BTreeMap<String, Agent>,
    /// Insertion order, oldest first.
    #[serde(default, deserialize_with = "null_as_default")]
    pub task_history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Agent {
    #[serde(rename = "type", default)]
    pub kind: AgentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_window: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(
        default,
        deserialize_with = "time::deserialize_optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

impl Agent {
    /// Current task, ignoring blank values.
    pub fn current_task(&self) -> Option<&str> {
        self.task
            .as_deref()
            .map(str::trim)
            .filter(|task| !task.is_empty())
    }

    pub fn is_worker(&self) -> bool {
        self.kind == AgentKind::Worker
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgentKind {
    Supervisor,
    Worker,
    MergeQueue,
    Workspace,
    Review,
    #[default]
    Unknown,
    Other(String),
}

impl AgentKind {
    pub fn as_str(&self) -> &str {
        match self {
            AgentKind::Supervisor => "supervisor",
            AgentKind::Worker => "worker",
            AgentKind::MergeQueue => "merge-queue",
            AgentKind::Workspace => "workspace",
            AgentKind::Review => "review",
            AgentKind::Unknown => "unknown",
            AgentKind::Other(value) => value,
        }
    }
}

impl From<String> for AgentKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "supervisor" => AgentKind::Supervisor,
            "worker" => AgentKind::Worker,
            "merge-queue" => AgentKind::MergeQueue,
            "workspace" => AgentKind::Workspace,
            "review" => AgentKind::Review,
            "" | "unknown" => AgentKind::Unknown,
            _ => AgentKind::Other(value),
        }
    }
}

impl From<AgentKind> for String {
    fn from(value: AgentKind) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(
        default,
        deserialize_with = "time::deserialize_optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "time::deserialize_optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
}

impl HistoryEntry {
    pub fn new(name: impl Into<String>, task: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            name: name.into(),
            task: task.into(),
            status,
            completed_at: None,
            created_at: None,
            pr_url: None,
            pr_number: None,
        }
    }

    /// Completion time when known, otherwise creation time.
    pub fn recency(&self) -> Option<DateTime<Utc>> {
        self.completed_at.or(self.created_at)
    }

    pub fn pr(&self) -> Option<PrRef<'_>> {
        let url = self.pr_url.as_deref().map(str::trim)?;
        if url.is_empty() {
            return None;
        }
        Some(PrRef {
            url,
            number: self.pr_number.filter(|number| *number > 0),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrRef<'a> {
    pub url: &'a str,
    pub number: Option<u64>,
}

impl fmt::Display for PrRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.number {
            Some(number) => write!(f, "#{number}"),
            None => f.write_str("#PR"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    Open,
    Merged,
    Closed,
    NoPr,
    Failed,
    #[default]
    Unknown,
    Other(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::Merged => "merged",
            TaskStatus::Closed => "closed",
            TaskStatus::NoPr => "no-pr",
            TaskStatus::Failed => "failed",
            TaskStatus::Unknown => "unknown",
            TaskStatus::Other(value) => value,
        }
    }
}

impl From<String> for TaskStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "open" => TaskStatus::Open,
            "merged" => TaskStatus::Merged,
            "closed" => TaskStatus::Closed,
            "no-pr" => TaskStatus::NoPr,
            "failed" => TaskStatus::Failed,
            "" | "unknown" => TaskStatus::Unknown,
            _ => TaskStatus::Other(value),
        }
    }
}

impl From<TaskStatus> for String {
    fn from(value: TaskStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FleetTotals {
    pub repos: usize,
    pub agents: usize,
    pub workers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoSummary {
    pub name: String,
    pub machine: String,
    pub github_url: Option<String>,
    pub agent_count: usize,
}

impl Snapshot {
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    pub fn repositories(&self) -> impl Iterator<Item = (&str, &str, &Repository)> {
        self.machines.iter().flat_map(|(machine_name, machine)| {
            machine
                .repos
                .iter()
                .map(move |(repo_name, repo)| (machine_name.as_str(), repo_name.as_str(), repo))
        })
    }

    pub fn totals(&self) -> FleetTotals {
        let mut totals = FleetTotals::default();
        for (_, _, repo) in self.repositories() {
            totals.repos += 1;
            totals.agents += repo.agents.len();
            totals.workers += repo.agents.values().filter(|agent| agent.is_worker()).count();
        }
        totals
    }

    pub fn repo_list(&self) -> Vec<RepoSummary> {
        self.repositories()
            .map(|(machine, name, repo)| RepoSummary {
                name: name.to_string(),
                machine: machine.to_string(),
                github_url: repo.github_url.clone(),
                agent_count: repo.agents.len(),
            })
            .collect()
    }

    /// First repository with this name across all machines, in machine order.
    pub fn find_repo(&self, name: &str) -> Option<(&str, &Repository)> {
        self.machines.iter().find_map(|(machine_name, machine)| {
            machine
                .repos
                .get(name)
                .map(|repo| (machine_name.as_str(), repo))
        })
    }
}

impl Repository {
    /// Newest insertion first; `limit == 0` keeps everything.
    pub fn history_latest_first(&self, limit: usize) -> Vec<&HistoryEntry> {
        let iter = self.task_history.iter().rev();
        if limit > 0 {
            iter.take(limit).collect()
        } else {
            iter.collect()
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
