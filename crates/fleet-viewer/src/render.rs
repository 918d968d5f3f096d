use chrono::Utc;
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};
use fleet_sync::{PublishedSnapshot, StateStore, StoreObserver};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::warn;

use crate::view::{DashboardView, HistoryRow, ViewInputs};

/// Redraws the whole dashboard on every store notification.
pub(crate) struct TerminalRenderer<W> {
    store: Weak<StateStore>,
    history_limit: usize,
    out: Mutex<W>,
}

impl<W: Write + Send> TerminalRenderer<W> {
    pub(crate) fn new(store: &Arc<StateStore>, history_limit: usize, out: W) -> Self {
        Self {
            store: Arc::downgrade(store),
            history_limit,
            out: Mutex::new(out),
        }
    }

    pub(crate) fn redraw(&self) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        let published = store.current_published();
        let notice = store.notice();
        let view = DashboardView::build(
            &ViewInputs {
                snapshot: published.as_ref().map(|published| published.snapshot.as_ref()),
                live: store.is_live(),
                last_updated: published.as_ref().map(|published| published.received_at),
                notice: notice.as_deref(),
                history_limit: self.history_limit,
            },
            Utc::now(),
        );
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = draw(&mut *out, &view) {
            warn!(event = "render.failed", error = %err, "failed to draw dashboard");
        }
    }
}

impl<W: Write + Send> StoreObserver for TerminalRenderer<W> {
    fn snapshot_changed(&self, _published: &PublishedSnapshot) {
        self.redraw();
    }

    fn live_changed(&self, _live: bool) {
        self.redraw();
    }

    fn load_failed(&self, _notice: &str) {
        self.redraw();
    }
}

fn draw(out: &mut impl Write, view: &DashboardView) -> io::Result<()> {
    queue!(out, Clear(ClearType::All), MoveTo(0, 0))?;

    queue!(out, Print("Fleet Dashboard"))?;
    if view.live {
        queue!(
            out,
            Print("  "),
            SetForegroundColor(Color::Green),
            Print("● LIVE"),
            ResetColor
        )?;
    }
    if let Some(last_update) = &view.last_update {
        queue!(out, Print(format!("  Last update: {last_update}")))?;
    }
    queue!(out, Print("\n"))?;
    if let Some(notice) = &view.notice {
        queue!(
            out,
            SetForegroundColor(Color::Red),
            Print(notice),
            ResetColor,
            Print("\n")
        )?;
    }

    let totals = view.totals;
    queue!(
        out,
        Print(format!(
            "\nRepositories: {}   Agents: {}   Workers: {}\n\nRepositories\n",
            totals.repos, totals.agents, totals.workers
        ))
    )?;
    if view.repos.is_empty() {
        queue!(out, Print("  No repositories found\n"))?;
    }
    for repo in &view.repos {
        queue!(
            out,
            Print(format!("  {}  {}  [{}]\n", repo.name, repo.url, repo.machine))
        )?;
        if repo.agents.is_empty() {
            queue!(out, Print("    No agents\n"))?;
        }
        for agent in &repo.agents {
            let task = agent.task.as_deref().unwrap_or("");
            queue!(
                out,
                Print(format!("    {} ({}) {}\n", agent.name, agent.kind, task))
            )?;
        }
    }

    queue!(out, Print("\nRecent Task History\n"))?;
    if view.history.is_empty() {
        queue!(out, Print("  No task history yet\n"))?;
    } else {
        queue!(out, Print(history_line(&HistoryRow::header())))?;
        for row in &view.history {
            queue!(out, Print(history_line(row)))?;
        }
    }
    out.flush()
}

fn history_line(row: &HistoryRow) -> String {
    format!(
        "  {:<16} {:<16} {:<40} {:<8} {:<6} {}\n",
        row.worker, row.repo, row.task, row.status, row.pr, row.completed
    )
}

impl HistoryRow {
    fn header() -> Self {
        Self {
            worker: "Worker".to_string(),
            repo: "Repository".to_string(),
            task: "Task".to_string(),
            status: "Status".to_string(),
            pr: "PR".to_string(),
            completed: "Completed".to_string(),
        }
    }
}

/// Alternate screen for the lifetime of the guard.
pub(crate) struct Screen;

impl Screen {
    pub(crate) fn enter() -> io::Result<Self> {
        execute!(io::stdout(), EnterAlternateScreen, Hide)?;
        Ok(Self)
    }
}

impl Drop for Screen {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), Show, LeaveAlternateScreen);
    }
}
