use std::io::{self, Write};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossterm::QueueableCommand;
use crossterm::cursor::MoveToColumn;
use crossterm::terminal::{Clear, ClearType};
use serde::Serialize;
use tracing::info;

use crate::domain::{AppId, Source};

pub trait StatusSurface: Send + Sync {
    fn show(&self, line: &str);
    fn clear(&self);
}

pub struct TerminalStatus;

impl StatusSurface for TerminalStatus {
    fn show(&self, line: &str) {
        let mut stderr = io::stderr().lock();
        let _ = stderr.queue(MoveToColumn(0));
        let _ = stderr.queue(Clear(ClearType::CurrentLine));
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }

    fn clear(&self) {
        let mut stderr = io::stderr().lock();
        let _ = stderr.queue(MoveToColumn(0));
        let _ = stderr.queue(Clear(ClearType::CurrentLine));
        let _ = stderr.flush();
    }
}

pub struct NoStatus;

impl StatusSurface for NoStatus {
    fn show(&self, _line: &str) {}
    fn clear(&self) {}
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SourceCounters {
    pub outstanding_at_start: u64,
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub missing_from_batch: u64,
    pub last_id: Option<AppId>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ProgressSnapshot {
    pub bulk: SourceCounters,
    pub single: SourceCounters,
}

impl ProgressSnapshot {
    pub fn source(&self, source: Source) -> &SourceCounters {
        match source {
            Source::Bulk => &self.bulk,
            Source::Single => &self.single,
        }
    }

    fn source_mut(&mut self, source: Source) -> &mut SourceCounters {
        match source {
            Source::Bulk => &mut self.bulk,
            Source::Single => &mut self.single,
        }
    }
}

struct State {
    counters: ProgressSnapshot,
    last_logged: Option<Instant>,
}

impl State {
    fn should_log(&mut self, now: Instant, interval: Duration) -> bool {
        let due = self
            .last_logged
            .is_none_or(|last| now.duration_since(last) >= interval);
        if due {
            self.last_logged = Some(now);
        }
        due
    }
}

pub struct ProgressReporter {
    state: Mutex<State>,
    log_interval: Duration,
    surface: Box<dyn StatusSurface>,
}

impl ProgressReporter {
    pub fn new(log_interval: Duration, surface: Box<dyn StatusSurface>) -> Self {
        Self {
            state: Mutex::new(State {
                counters: ProgressSnapshot::default(),
                last_logged: None,
            }),
            log_interval,
            surface,
        }
    }

    pub fn set_outstanding(&self, source: Source, outstanding: usize) {
        self.with_state(|state| {
            state.counters.source_mut(source).outstanding_at_start = outstanding as u64;
        });
    }

    pub fn on_submitted(&self, source: Source, count: usize) {
        self.with_state(|state| {
            state.counters.source_mut(source).submitted += count as u64;
        });
    }

    pub fn on_failed(&self, source: Source, count: usize) {
        self.with_state(|state| {
            state.counters.source_mut(source).failed += count as u64;
        });
    }

    pub fn on_missing(&self, source: Source, count: usize) {
        self.with_state(|state| {
            state.counters.source_mut(source).missing_from_batch += count as u64;
        });
    }

    pub fn on_progress(&self, source: Source, id: AppId) {
        let (line, log_now) = self.with_state(|state| {
            let counters = state.counters.source_mut(source);
            counters.succeeded += 1;
            counters.last_id = Some(id);
            let line = status_line(&state.counters);
            let log_now = state.should_log(Instant::now(), self.log_interval);
            (line, log_now)
        });
        if log_now {
            self.surface.clear();
            info!("{line}");
        }
        self.surface.show(&line);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.with_state(|state| state.counters)
    }

    pub fn finish(&self) {
        self.surface.clear();
        let line = self.with_state(|state| status_line(&state.counters));
        info!("{line}");
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

pub fn status_line(counters: &ProgressSnapshot) -> String {
    Source::ALL
        .iter()
        .map(|source| {
            let c = counters.source(*source);
            let last = c
                .last_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            format!(
                "{source} {last:>12} done {:>5}/{:<5}",
                human_count(c.succeeded),
                human_count(c.outstanding_at_start)
            )
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Three significant digits with a K/M/B/T suffix: 1234 -> "1.23K".
pub fn human_count(value: u64) -> String {
    if value < 1000 {
        return value.to_string();
    }
    let digits = (value as f64).log10().floor() as i32;
    let scale = 10f64.powi(digits - 2);
    let mut rounded = (value as f64 / scale).round() * scale;
    let mut magnitude = 0usize;
    while rounded >= 1000.0 && magnitude < 4 {
        rounded /= 1000.0;
        magnitude += 1;
    }
    let text = format!("{rounded:.2}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{text}{}", ["", "K", "M", "B", "T"][magnitude])
}
