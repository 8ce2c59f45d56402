//! Shared progress board for concurrent exports.
//!
//! Workers publish `(status, text)` per environment; the display ticker reads
//! snapshots. The lock is held only for the copy in or out, never across I/O.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use colored::Colorize;

use fctl_core::{Environment, EnvironmentId, ExportStatus};

const SEPARATOR_WIDTH: usize = 60;

/// One environment's row on the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvProgress {
    pub id: EnvironmentId,
    pub name: String,
    pub status: ExportStatus,
    pub text: String,
}

/// Aggregate numbers for the board footer and the final summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoardCounts {
    pub total: usize,
    pub complete: usize,
    pub failed: usize,
}

impl BoardCounts {
    /// Environments not yet in a terminal state.
    pub fn pending(&self) -> usize {
        self.total - self.complete - self.failed
    }
}

/// Cloneable handle to the mutex-guarded board.
#[derive(Debug, Clone, Default)]
pub struct ProgressBoard {
    rows: Arc<Mutex<Vec<EnvProgress>>>,
}

impl ProgressBoard {
    pub fn new(envs: &[Environment]) -> Self {
        let rows = envs
            .iter()
            .map(|env| EnvProgress {
                id: env.id.clone(),
                name: env.name.clone(),
                status: ExportStatus::Pending,
                text: String::new(),
            })
            .collect();
        Self {
            rows: Arc::new(Mutex::new(rows)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<EnvProgress>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move `id` to `status` with `text`.
    ///
    /// Returns `false` and leaves the row alone when the transition is not allowed
    /// or the environment is not on the board.
    pub fn update(&self, id: &EnvironmentId, status: ExportStatus, text: impl Into<String>) -> bool {
        let mut rows = self.lock();
        let Some(row) = rows.iter_mut().find(|row| &row.id == id) else {
            return false;
        };
        if !row.status.can_transition_to(status) {
            tracing::debug!(env = %id, from = %row.status, to = %status, "rejected status transition");
            return false;
        }
        row.status = status;
        row.text = text.into();
        true
    }

    pub fn fail(&self, id: &EnvironmentId, reason: impl Into<String>) -> bool {
        self.update(id, ExportStatus::Failed, reason)
    }

    pub fn status(&self, id: &EnvironmentId) -> Option<ExportStatus> {
        self.lock().iter().find(|row| &row.id == id).map(|row| row.status)
    }

    pub fn snapshot(&self) -> Vec<EnvProgress> {
        self.lock().clone()
    }

    pub fn counts(&self) -> BoardCounts {
        counts(&self.lock())
    }
}

fn counts(rows: &[EnvProgress]) -> BoardCounts {
    BoardCounts {
        total: rows.len(),
        complete: rows
            .iter()
            .filter(|r| r.status == ExportStatus::Complete)
            .count(),
        failed: rows
            .iter()
            .filter(|r| r.status == ExportStatus::Failed)
            .count(),
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn icon(status: ExportStatus) -> &'static str {
    match status {
        ExportStatus::Pending => "⏸️",
        ExportStatus::Triggering => "🚀",
        ExportStatus::Waiting => "⏳",
        ExportStatus::Downloading => "📥",
        ExportStatus::Extracting => "📦",
        ExportStatus::Cleaning => "🧹",
        ExportStatus::Complete => "✅",
        ExportStatus::Failed => "❌",
    }
}

fn row_text(row: &EnvProgress) -> String {
    match row.status {
        ExportStatus::Pending if row.text.is_empty() => "Pending".to_string(),
        ExportStatus::Triggering if row.text.is_empty() => "Starting export...".to_string(),
        ExportStatus::Extracting if row.text.is_empty() => "Extracting archive...".to_string(),
        ExportStatus::Cleaning if row.text.is_empty() => "Cleaning exported files...".to_string(),
        ExportStatus::Complete => format!("Complete → {}", row.text),
        ExportStatus::Failed => format!("Failed: {}", row.text),
        _ => row.text.clone(),
    }
}

/// The board as text: header, one line per environment, progress footer.
pub fn render_board(rows: &[EnvProgress], color: bool) -> String {
    let separator = "─".repeat(SEPARATOR_WIDTH);
    let mut out = String::new();
    out.push_str("📊 Export Status:\n");
    out.push_str(&separator);
    out.push('\n');
    for row in rows {
        let text = row_text(row);
        let text = match row.status {
            ExportStatus::Complete if color => text.green().to_string(),
            ExportStatus::Failed if color => text.red().to_string(),
            _ => text,
        };
        out.push_str(&format!("{} {:<20} {}\n", icon(row.status), row.name, text));
    }
    out.push_str(&separator);
    out.push('\n');

    let c = counts(rows);
    out.push_str(&format!(
        "Progress: {}/{} completed, {} failed, {} pending\n",
        c.complete,
        c.total,
        c.failed,
        c.pending()
    ));
    out
}

/// Draws successive frames, overwriting the previous one on a terminal.
#[derive(Debug, Default)]
pub struct BoardPrinter {
    live: bool,
    drawn_lines: usize,
}

impl BoardPrinter {
    /// `live` redraws in place; otherwise frames are appended.
    pub fn new(live: bool) -> Self {
        Self {
            live,
            drawn_lines: 0,
        }
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn draw(&mut self, out: &mut impl Write, frame: &str) -> io::Result<()> {
        if self.live && self.drawn_lines > 0 {
            // cursor up, then clear to end of screen
            write!(out, "\x1b[{}A\x1b[J", self.drawn_lines)?;
        }
        out.write_all(frame.as_bytes())?;
        out.flush()?;
        self.drawn_lines = frame.lines().count();
        Ok(())
    }
}
