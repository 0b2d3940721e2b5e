use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::client::{CatalogClient, is_retryable};
use crate::config::HarvestConfig;
use crate::domain::Source;
use crate::error::HarvestError;
use crate::planner::FetchTask;

pub type Completion = Box<dyn FnOnce(&FetchTask, Result<Vec<u8>, HarvestError>) + Send>;

pub trait FetchEngine {
    fn submit(&self, task: FetchTask, on_done: Completion) -> Result<(), HarvestError>;

    fn finish(self)
    where
        Self: Sized;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &HarvestConfig) -> Self {
        Self::new(config.max_retries, Duration::from_secs(1))
    }

    /// Calls `op` until it succeeds, fails permanently, or retries run out.
    /// Backoff grows linearly with the attempt number.
    pub fn run<T, F>(&self, mut op: F) -> Result<T, HarvestError>
    where
        F: FnMut() -> Result<T, HarvestError>,
    {
        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_retries && is_retryable(&err) => {
                    attempt += 1;
                    let delay = self.base_delay * attempt;
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
                    thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Debug)]
struct DelayGate {
    delay: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl DelayGate {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: Mutex::new(None),
        }
    }

    fn wait(&self) {
        if self.delay.is_zero() {
            return;
        }
        let mut slot = match self.next_slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        if let Some(next) = *slot {
            if next > now {
                thread::sleep(next - now);
            }
        }
        *slot = Some(Instant::now() + self.delay);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub download_delay: Duration,
    pub retry: RetryPolicy,
}

impl EngineSettings {
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self {
            workers: config.concurrency,
            queue_capacity: config.concurrency * 4,
            download_delay: config.download_delay,
            retry: RetryPolicy::from_config(config),
        }
    }
}

struct Job {
    task: FetchTask,
    on_done: Completion,
}

struct Pacing {
    bulk: DelayGate,
    single: DelayGate,
}

impl Pacing {
    fn gate(&self, source: Source) -> &DelayGate {
        match source {
            Source::Bulk => &self.bulk,
            Source::Single => &self.single,
        }
    }
}

pub struct ThreadedEngine {
    sender: Option<SyncSender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadedEngine {
    pub fn new<C: CatalogClient + 'static>(client: Arc<C>, settings: EngineSettings) -> Self {
        let (sender, receiver) = mpsc::sync_channel::<Job>(settings.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let pacing = Arc::new(Pacing {
            bulk: DelayGate::new(settings.download_delay),
            single: DelayGate::new(settings.download_delay),
        });

        let workers = (0..settings.workers.max(1))
            .map(|index| {
                let receiver = Arc::clone(&receiver);
                let client = Arc::clone(&client);
                let pacing = Arc::clone(&pacing);
                let retry = settings.retry;
                thread::Builder::new()
                    .name(format!("fetch-{index}"))
                    .spawn(move || worker_loop(receiver, client, pacing, retry))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(err) => {
                    warn!(error = %err, "failed to spawn fetch worker");
                    None
                }
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
        }
    }
}

fn worker_loop<C: CatalogClient>(
    receiver: Arc<Mutex<Receiver<Job>>>,
    client: Arc<C>,
    pacing: Arc<Pacing>,
    retry: RetryPolicy,
) {
    loop {
        let job = {
            let Ok(guard) = receiver.lock() else {
                return;
            };
            guard.recv()
        };
        let Ok(Job { task, on_done }) = job else {
            return;
        };
        let gate = pacing.gate(task.source);
        let result = retry.run(|| {
            gate.wait();
            client.fetch(&task)
        });
        on_done(&task, result);
    }
}

impl FetchEngine for ThreadedEngine {
    fn submit(&self, task: FetchTask, on_done: Completion) -> Result<(), HarvestError> {
        if self.workers.is_empty() {
            return Err(HarvestError::EngineClosed);
        }
        let sender = self.sender.as_ref().ok_or(HarvestError::EngineClosed)?;
        sender
            .send(Job { task, on_done })
            .map_err(|_| HarvestError::EngineClosed)
    }

    fn finish(mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("fetch worker panicked");
            }
        }
    }
}

pub struct InlineEngine<C: CatalogClient> {
    client: Arc<C>,
    retry: RetryPolicy,
}

impl<C: CatalogClient> InlineEngine<C> {
    pub fn new(client: Arc<C>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }
}

impl<C: CatalogClient> FetchEngine for InlineEngine<C> {
    fn submit(&self, task: FetchTask, on_done: Completion) -> Result<(), HarvestError> {
        let result = self.retry.run(|| self.client.fetch(&task));
        on_done(&task, result);
        Ok(())
    }

    fn finish(self) {}
}
