use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::auth;
use crate::client::CatalogClient;
use crate::config::HarvestConfig;
use crate::domain::{AppId, Source};
use crate::engine::{FetchEngine, RetryPolicy};
use crate::error::HarvestError;
use crate::progress::{ProgressReporter, ProgressSnapshot, StatusSurface};
use crate::reconcile::{Reconciliation, SourcePlan, reconcile};
use crate::scheduler::DualSourceScheduler;
use crate::store::CompletionStore;
use crate::writer::ResultWriter;

#[derive(Debug, Clone, Serialize)]
pub struct PlanResult {
    pub input: usize,
    pub sources: Vec<SourcePlan>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestSummary {
    pub started_at: String,
    pub finished_at: String,
    pub input: usize,
    pub sources: Vec<SourcePlan>,
    pub bulk_tasks: u64,
    pub single_tasks: u64,
    pub progress: ProgressSnapshot,
    pub rerun_needed: bool,
}

pub struct Harvester<C: CatalogClient, S: CompletionStore + 'static> {
    config: HarvestConfig,
    client: Arc<C>,
    store: Arc<S>,
}

impl<C: CatalogClient, S: CompletionStore + 'static> Harvester<C, S> {
    pub fn new(config: HarvestConfig, client: Arc<C>, store: Arc<S>) -> Self {
        Self {
            config,
            client,
            store,
        }
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn reconcile(&self, input: &BTreeSet<AppId>) -> Result<Reconciliation, HarvestError> {
        reconcile(input, self.store.as_ref(), &self.config)
    }

    pub fn plan(&self, input: &BTreeSet<AppId>) -> Result<PlanResult, HarvestError> {
        let reconciliation = self.reconcile(input)?;
        Ok(PlanResult {
            input: input.len(),
            sources: reconciliation.plans,
        })
    }

    pub fn run<E: FetchEngine>(
        &self,
        input: &BTreeSet<AppId>,
        engine: E,
        surface: Box<dyn StatusSurface>,
    ) -> Result<HarvestSummary, HarvestError> {
        let started_at = iso_timestamp();
        let Reconciliation {
            bulk,
            single,
            plans,
        } = self.reconcile(input)?;
        for plan in plans.iter().filter(|plan| plan.enabled) {
            info!(
                source = %plan.source,
                input = plan.input,
                already_done = plan.already_done,
                outstanding = plan.outstanding,
                "reconciled"
            );
        }

        // The token is only worth fetching when bulk work remains.
        let token = if bulk.is_empty() {
            None
        } else {
            let retry = RetryPolicy::from_config(&self.config);
            Some(auth::bootstrap(self.client.as_ref(), &self.config, &retry)?)
        };

        let progress = Arc::new(ProgressReporter::new(self.config.log_interval, surface));
        let writer = Arc::new(ResultWriter::new(Arc::clone(&self.store)));
        let mut scheduler = DualSourceScheduler::new(
            self.config.clone(),
            bulk,
            single,
            engine,
            writer,
            Arc::clone(&progress),
        );
        scheduler.start(token)?;
        let tally = scheduler.run_to_completion()?;

        let snapshot = progress.snapshot();
        let rerun_needed = Source::ALL.iter().any(|source| {
            let counters = snapshot.source(*source);
            counters.succeeded < counters.outstanding_at_start
        });
        Ok(HarvestSummary {
            started_at,
            finished_at: iso_timestamp(),
            input: input.len(),
            sources: plans,
            bulk_tasks: tally.bulk_tasks,
            single_tasks: tally.single_tasks,
            progress: snapshot,
            rerun_needed,
        })
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
