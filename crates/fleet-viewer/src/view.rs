use chrono::{DateTime, Local, Utc};
use fleet_protocol::{recent_history, FleetTotals, Snapshot};

const TASK_PREVIEW_CHARS: usize = 30;
const UNKNOWN_URL: &str = "Unknown";
const MISSING: &str = "-";

/// Everything one redraw needs, decoupled from the store and the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DashboardView {
    pub(crate) live: bool,
    pub(crate) last_update: Option<String>,
    pub(crate) notice: Option<String>,
    pub(crate) totals: FleetTotals,
    pub(crate) repos: Vec<RepoCard>,
    pub(crate) history: Vec<HistoryRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RepoCard {
    pub(crate) name: String,
    pub(crate) url: String,
    pub(crate) machine: String,
    pub(crate) agents: Vec<AgentBadge>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AgentBadge {
    pub(crate) name: String,
    pub(crate) kind: String,
    pub(crate) task: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HistoryRow {
    pub(crate) worker: String,
    pub(crate) repo: String,
    pub(crate) task: String,
    pub(crate) status: String,
    pub(crate) pr: String,
    pub(crate) completed: String,
}

pub(crate) struct ViewInputs<'a> {
    pub(crate) snapshot: Option<&'a Snapshot>,
    pub(crate) live: bool,
    pub(crate) last_updated: Option<DateTime<Utc>>,
    pub(crate) notice: Option<&'a str>,
    pub(crate) history_limit: usize,
}

impl DashboardView {
    pub(crate) fn build(inputs: &ViewInputs<'_>, now: DateTime<Utc>) -> Self {
        let mut view = DashboardView {
            live: inputs.live,
            last_update: inputs.last_updated.map(format_clock),
            notice: inputs.notice.map(str::to_string),
            totals: FleetTotals::default(),
            repos: Vec::new(),
            history: Vec::new(),
        };
        let Some(snapshot) = inputs.snapshot else {
            return view;
        };
        view.totals = snapshot.totals();
        view.repos = snapshot
            .repositories()
            .map(|(machine, name, repo)| RepoCard {
                name: terminal_safe(name),
                url: repo
                    .github_url
                    .clone()
                    .filter(|url| !url.trim().is_empty())
                    .map(|url| terminal_safe(&url))
                    .unwrap_or_else(|| UNKNOWN_URL.to_string()),
                machine: terminal_safe(machine),
                agents: repo
                    .agents
                    .iter()
                    .map(|(agent_name, agent)| AgentBadge {
                        name: terminal_safe(agent_name),
                        kind: terminal_safe(agent.kind.as_str()),
                        task: agent
                            .current_task()
                            .map(|task| truncate_task(&terminal_safe(task))),
                    })
                    .collect(),
            })
            .collect();
        view.history = recent_history(snapshot, inputs.history_limit)
            .into_iter()
            .map(|recent| HistoryRow {
                worker: terminal_safe(&recent.entry.name),
                repo: terminal_safe(recent.repo),
                task: terminal_safe(&recent.entry.task),
                status: terminal_safe(recent.entry.status.as_str()),
                pr: recent
                    .entry
                    .pr()
                    .map(|pr| pr.to_string())
                    .unwrap_or_else(|| MISSING.to_string()),
                completed: recent
                    .entry
                    .completed_at
                    .map(|at| format_relative(at, now))
                    .unwrap_or_else(|| MISSING.to_string()),
            })
            .collect();
        view
    }
}

/// Server text with control characters (ESC, CR, tabs and the like) replaced
/// by spaces so it cannot drive the terminal.
pub(crate) fn terminal_safe(text: &str) -> String {
    text.chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect()
}

pub(crate) fn truncate_task(task: &str) -> String {
    if task.chars().count() <= TASK_PREVIEW_CHARS {
        return task.to_string();
    }
    let mut preview: String = task.chars().take(TASK_PREVIEW_CHARS).collect();
    preview.push_str("...");
    preview
}

pub(crate) fn format_relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(at);
    let minutes = elapsed.num_minutes();
    let hours = elapsed.num_hours();
    let days = elapsed.num_days();
    if minutes < 1 {
        "Just now".to_string()
    } else if minutes < 60 {
        format!("{minutes}m ago")
    } else if hours < 24 {
        format!("{hours}h ago")
    } else if days < 7 {
        format!("{days}d ago")
    } else {
        at.with_timezone(&Local).format("%Y-%m-%d").to_string()
    }
}

fn format_clock(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}
