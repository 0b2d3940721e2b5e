use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::HarvestConfig;
use crate::domain::Source;
use crate::engine::{Completion, FetchEngine};
use crate::error::HarvestError;
use crate::planner::{BatchPlanner, BearerToken, FetchTask, TaskShape};
use crate::progress::ProgressReporter;
use crate::reconcile::WorkQueue;
use crate::store::CompletionStore;
use crate::writer::ResultWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Draining,
    Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmissionTally {
    pub ticks: u64,
    pub bulk_tasks: u64,
    pub single_tasks: u64,
}

/// Single loop that owns both work queues and interleaves emission between
/// the bulk and the single source. It never waits on responses; completion
/// callbacks write results and report progress from the engine's threads.
pub struct DualSourceScheduler<E: FetchEngine, S: CompletionStore + ?Sized + 'static> {
    state: SchedulerState,
    config: HarvestConfig,
    planner: Option<BatchPlanner>,
    bulk: WorkQueue,
    single: WorkQueue,
    engine: Option<E>,
    writer: Arc<ResultWriter<S>>,
    progress: Arc<ProgressReporter>,
    tally: EmissionTally,
}

impl<E: FetchEngine, S: CompletionStore + ?Sized + 'static> DualSourceScheduler<E, S> {
    pub fn new(
        config: HarvestConfig,
        bulk: WorkQueue,
        single: WorkQueue,
        engine: E,
        writer: Arc<ResultWriter<S>>,
        progress: Arc<ProgressReporter>,
    ) -> Self {
        progress.set_outstanding(Source::Bulk, bulk.len());
        progress.set_outstanding(Source::Single, single.len());
        Self {
            state: SchedulerState::Idle,
            config,
            planner: None,
            bulk,
            single,
            engine: Some(engine),
            writer,
            progress,
            tally: EmissionTally::default(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn bulk_remaining(&self) -> usize {
        self.bulk.len()
    }

    pub fn single_remaining(&self) -> usize {
        self.single.len()
    }

    pub fn start(&mut self, token: Option<BearerToken>) -> Result<(), HarvestError> {
        if self.state != SchedulerState::Idle {
            return Err(HarvestError::InvalidConfig(format!(
                "scheduler cannot start from {:?}",
                self.state
            )));
        }
        if token.is_none() && !self.bulk.is_empty() {
            return Err(HarvestError::AuthExtraction(
                "bulk work is outstanding but no token was bootstrapped".to_string(),
            ));
        }
        self.planner = Some(BatchPlanner::new(&self.config, token.as_ref())?);
        self.state = SchedulerState::Running;
        info!(
            bulk = self.bulk.len(),
            single = self.single.len(),
            "scheduler running"
        );
        Ok(())
    }

    /// One scheduling round: at most one single task and at most one bulk
    /// task. Returns how many tasks were emitted.
    pub fn tick(&mut self) -> Result<usize, HarvestError> {
        if self.state != SchedulerState::Running {
            return Ok(0);
        }
        let Some(planner) = self.planner.as_ref() else {
            return Ok(0);
        };

        let mut emitted = Vec::with_capacity(2);
        if self.single.is_enabled() {
            if let Some(task) = planner.next_single_task(&mut self.single) {
                emitted.push(task);
            }
        }
        if let Some(task) = planner.next_bulk_batch(&mut self.bulk) {
            emitted.push(task);
        }

        self.tally.ticks += 1;
        let count = emitted.len();
        for task in emitted {
            match task.source {
                Source::Bulk => self.tally.bulk_tasks += 1,
                Source::Single => self.tally.single_tasks += 1,
            }
            self.progress.on_submitted(task.source, task.ids.len());
            let on_done = self.completion();
            self.engine
                .as_ref()
                .ok_or(HarvestError::EngineClosed)?
                .submit(task, on_done)?;
        }

        if self.bulk.is_empty() && self.single.is_empty() {
            debug!(ticks = self.tally.ticks, "both queues drained");
            self.state = SchedulerState::Draining;
        }
        Ok(count)
    }

    pub fn run_to_completion(&mut self) -> Result<EmissionTally, HarvestError> {
        while self.state == SchedulerState::Running {
            self.tick()?;
        }
        if self.state == SchedulerState::Draining {
            info!(
                bulk_tasks = self.tally.bulk_tasks,
                single_tasks = self.tally.single_tasks,
                "all tasks submitted; waiting for responses"
            );
            if let Some(engine) = self.engine.take() {
                engine.finish();
            }
            self.progress.finish();
            self.state = SchedulerState::Done;
        }
        Ok(self.tally)
    }

    fn completion(&self) -> Completion {
        let writer = Arc::clone(&self.writer);
        let progress = Arc::clone(&self.progress);
        Box::new(
            move |task: &FetchTask, result: Result<Vec<u8>, HarvestError>| match result {
                Ok(body) => handle_body(&writer, &progress, task, &body),
                Err(err) => report_failure(&progress, task, &err),
            },
        )
    }
}

fn handle_body<S: CompletionStore + ?Sized>(
    writer: &ResultWriter<S>,
    progress: &ProgressReporter,
    task: &FetchTask,
    body: &[u8],
) {
    match task.shape {
        TaskShape::BulkMulti => match writer.on_bulk_multi_response(&task.ids, body) {
            Ok(outcome) => {
                for id in &outcome.written {
                    progress.on_progress(Source::Bulk, *id);
                }
                if !outcome.failed.is_empty() {
                    progress.on_failed(Source::Bulk, outcome.failed.len());
                }
                if let Some(warning) = outcome.warning {
                    progress.on_missing(Source::Bulk, warning.missing.len());
                }
            }
            Err(err) => report_failure(progress, task, &err),
        },
        TaskShape::BulkSingle | TaskShape::Single => {
            let id = task.ids[0];
            let written = match task.shape {
                TaskShape::Single => writer.on_single_response(id, body),
                _ => writer.on_bulk_single_response(id, body),
            };
            match written {
                Ok(()) => progress.on_progress(task.source, id),
                Err(err) => report_failure(progress, task, &err),
            }
        }
    }
}

fn report_failure(progress: &ProgressReporter, task: &FetchTask, err: &HarvestError) {
    progress.on_failed(task.source, task.ids.len());
    let first = task.ids.first().map(|id| id.get()).unwrap_or_default();
    if task.source == Source::Bulk && err.status() == Some(401) {
        warn!(
            source = %task.source,
            first_id = first,
            ids = task.ids.len(),
            "bulk request unauthorized; the bearer token has probably expired, rerun to resume"
        );
        return;
    }
    error!(
        source = %task.source,
        first_id = first,
        ids = task.ids.len(),
        error = %err,
        "task failed; ids stay outstanding for the next run"
    );
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::domain::{AppId, BatchMode};
    use crate::progress::NoStatus;

    #[derive(Default)]
    struct RecordingEngine {
        submitted: Mutex<Vec<FetchTask>>,
    }

    impl FetchEngine for &RecordingEngine {
        fn submit(&self, task: FetchTask, _on_done: Completion) -> Result<(), HarvestError> {
            self.submitted.lock().unwrap().push(task);
            Ok(())
        }

        fn finish(self) {}
    }

    struct NullStore;

    impl CompletionStore for NullStore {
        fn completed(&self, _source: Source) -> Result<BTreeSet<AppId>, HarvestError> {
            Ok(BTreeSet::new())
        }

        fn persist(&self, _: Source, _: AppId, _: &[u8]) -> Result<(), HarvestError> {
            Ok(())
        }
    }

    fn queue(source: Source, range: std::ops::RangeInclusive<u64>) -> WorkQueue {
        WorkQueue::new(source, range.map(AppId::new).collect())
    }

    fn scheduler<'a>(
        engine: &'a RecordingEngine,
        config: HarvestConfig,
        bulk: WorkQueue,
        single: WorkQueue,
    ) -> DualSourceScheduler<&'a RecordingEngine, NullStore> {
        DualSourceScheduler::new(
            config,
            bulk,
            single,
            engine,
            Arc::new(ResultWriter::new(Arc::new(NullStore))),
            Arc::new(ProgressReporter::new(
                Duration::from_secs(30),
                Box::new(NoStatus),
            )),
        )
    }

    fn token() -> Option<BearerToken> {
        Some(BearerToken::new("t0k3n").unwrap())
    }

    #[test]
    fn ticks_interleave_both_sources() {
        let engine = RecordingEngine::default();
        let config = HarvestConfig {
            batch_mode: BatchMode::Single,
            single_enabled: true,
            ..HarvestConfig::default()
        };
        let mut scheduler = scheduler(
            &engine,
            config,
            queue(Source::Bulk, 1..=3),
            queue(Source::Single, 1..=1),
        );
        scheduler.start(token()).unwrap();

        assert_eq!(scheduler.tick().unwrap(), 2);
        assert_eq!(scheduler.tick().unwrap(), 1);
        assert_eq!(scheduler.tick().unwrap(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Draining);
        assert_eq!(scheduler.tick().unwrap(), 0);

        let submitted = engine.submitted.lock().unwrap();
        let sources: Vec<Source> = submitted.iter().map(|t| t.source).collect();
        assert_eq!(
            sources,
            vec![Source::Single, Source::Bulk, Source::Bulk, Source::Bulk]
        );
    }

    #[test]
    fn last_identifier_is_scheduled() {
        let engine = RecordingEngine::default();
        let config = HarvestConfig {
            batch_mode: BatchMode::Single,
            ..HarvestConfig::default()
        };
        let mut scheduler = scheduler(
            &engine,
            config,
            queue(Source::Bulk, 9..=9),
            WorkQueue::disabled(Source::Single),
        );
        scheduler.start(token()).unwrap();
        let tally = scheduler.run_to_completion().unwrap();

        assert_eq!(scheduler.state(), SchedulerState::Done);
        assert_eq!(tally.bulk_tasks, 1);
        assert_eq!(engine.submitted.lock().unwrap()[0].ids, vec![AppId::new(9)]);
    }

    #[test]
    fn bulk_work_without_token_never_starts() {
        let engine = RecordingEngine::default();
        let mut scheduler = scheduler(
            &engine,
            HarvestConfig::default(),
            queue(Source::Bulk, 1..=2),
            WorkQueue::disabled(Source::Single),
        );
        assert!(scheduler.start(None).is_err());
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.tick().unwrap(), 0);
        assert!(engine.submitted.lock().unwrap().is_empty());
    }

    #[test]
    fn single_only_run_starts_without_token() {
        let engine = RecordingEngine::default();
        let config = HarvestConfig {
            bulk_enabled: false,
            single_enabled: true,
            ..HarvestConfig::default()
        };
        let mut scheduler = scheduler(
            &engine,
            config,
            WorkQueue::disabled(Source::Bulk),
            queue(Source::Single, 1..=3),
        );
        scheduler.start(None).unwrap();
        let tally = scheduler.run_to_completion().unwrap();
        assert_eq!(tally.single_tasks, 3);
        assert_eq!(tally.bulk_tasks, 0);
    }
}
