use std::collections::BTreeSet;

use serde::Serialize;

use crate::config::HarvestConfig;
use crate::domain::{AppId, Source};
use crate::error::HarvestError;
use crate::store::CompletionStore;

pub fn outstanding(input: &BTreeSet<AppId>, completed: &BTreeSet<AppId>) -> BTreeSet<AppId> {
    input.difference(completed).copied().collect()
}

/// Outstanding ids of one source. Ids only ever leave the queue.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    source: Source,
    enabled: bool,
    pending: BTreeSet<AppId>,
}

impl WorkQueue {
    pub fn new(source: Source, pending: BTreeSet<AppId>) -> Self {
        Self {
            source,
            enabled: true,
            pending,
        }
    }

    pub fn disabled(source: Source) -> Self {
        Self {
            source,
            enabled: false,
            pending: BTreeSet::new(),
        }
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, id: AppId) -> bool {
        self.pending.contains(&id)
    }

    pub fn pop(&mut self) -> Option<AppId> {
        self.pending.pop_first()
    }

    pub fn pop_up_to(&mut self, max: usize) -> Vec<AppId> {
        let mut claimed = Vec::with_capacity(max.min(self.pending.len()));
        while claimed.len() < max {
            match self.pending.pop_first() {
                Some(id) => claimed.push(id),
                None => break,
            }
        }
        claimed
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SourcePlan {
    pub source: Source,
    pub enabled: bool,
    pub input: usize,
    pub already_done: usize,
    pub outstanding: usize,
}

#[derive(Debug)]
pub struct Reconciliation {
    pub bulk: WorkQueue,
    pub single: WorkQueue,
    pub plans: Vec<SourcePlan>,
}

pub fn reconcile<S: CompletionStore + ?Sized>(
    input: &BTreeSet<AppId>,
    store: &S,
    config: &HarvestConfig,
) -> Result<Reconciliation, HarvestError> {
    let mut plans = Vec::with_capacity(2);
    let mut queue_for = |source: Source, enabled: bool| -> Result<WorkQueue, HarvestError> {
        if !enabled {
            plans.push(SourcePlan {
                source,
                enabled,
                input: input.len(),
                already_done: 0,
                outstanding: 0,
            });
            return Ok(WorkQueue::disabled(source));
        }
        let completed = store.completed(source)?;
        let pending = outstanding(input, &completed);
        plans.push(SourcePlan {
            source,
            enabled,
            input: input.len(),
            already_done: input.len() - pending.len(),
            outstanding: pending.len(),
        });
        Ok(WorkQueue::new(source, pending))
    };

    let bulk = queue_for(Source::Bulk, config.bulk_enabled)?;
    let single = queue_for(Source::Single, config.single_enabled)?;
    Ok(Reconciliation {
        bulk,
        single,
        plans,
    })
}
