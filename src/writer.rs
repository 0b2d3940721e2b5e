use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{error, warn};

use crate::domain::{AppId, Source};
use crate::error::HarvestError;
use crate::store::CompletionStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialBatchWarning {
    pub requested: usize,
    pub missing: Vec<AppId>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub written: Vec<AppId>,
    pub failed: Vec<AppId>,
    pub warning: Option<PartialBatchWarning>,
}

pub struct ResultWriter<S: CompletionStore + ?Sized> {
    store: Arc<S>,
}

impl<S: CompletionStore + ?Sized> ResultWriter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn on_bulk_single_response(&self, id: AppId, body: &[u8]) -> Result<(), HarvestError> {
        self.store.persist(Source::Bulk, id, body)
    }

    /// Splits a multi-item envelope into one `{"data":[item]}` file per
    /// requested app. Items for ids outside `requested` and repeats are
    /// dropped; a failed write only affects its own id.
    pub fn on_bulk_multi_response(
        &self,
        requested: &[AppId],
        body: &[u8],
    ) -> Result<BatchOutcome, HarvestError> {
        let envelope: Value = serde_json::from_slice(body)
            .map_err(|err| HarvestError::Payload(format!("bulk response is not JSON: {err}")))?;
        let items = envelope
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| HarvestError::Payload("bulk response has no data array".to_string()))?;

        let wanted: BTreeSet<AppId> = requested.iter().copied().collect();
        let mut seen = BTreeSet::new();
        let mut outcome = BatchOutcome::default();
        for item in items {
            let Some(id) = item_id(item) else {
                warn!(item = %truncated(item), "bulk item without a numeric id");
                continue;
            };
            if !wanted.contains(&id) {
                warn!(app_id = id.get(), "bulk response contained an id that was not requested");
                continue;
            }
            if !seen.insert(id) {
                warn!(app_id = id.get(), "bulk response repeated an id");
                continue;
            }
            match self.write_item(id, item) {
                Ok(()) => outcome.written.push(id),
                Err(err) => {
                    error!(app_id = id.get(), error = %err, "failed to write bulk item");
                    outcome.failed.push(id);
                }
            }
        }

        let missing: Vec<AppId> = requested
            .iter()
            .copied()
            .filter(|id| !seen.contains(id))
            .collect();
        if !missing.is_empty() {
            let list = missing
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            warn!(
                requested = requested.len(),
                returned = seen.len(),
                missing = %list,
                "partial batch; missing ids stay outstanding for the next run"
            );
            outcome.warning = Some(PartialBatchWarning {
                requested: requested.len(),
                missing,
            });
        }
        Ok(outcome)
    }

    fn write_item(&self, id: AppId, item: &Value) -> Result<(), HarvestError> {
        let bytes = serde_json::to_vec(&json!({ "data": [item] }))
            .map_err(|err| HarvestError::Payload(err.to_string()))?;
        self.store.persist(Source::Bulk, id, &bytes)
    }

    pub fn on_single_response(&self, id: AppId, body: &[u8]) -> Result<(), HarvestError> {
        self.store.persist(Source::Single, id, body)
    }
}

fn item_id(item: &Value) -> Option<AppId> {
    match item.get("id")? {
        Value::String(text) => text.parse().ok(),
        Value::Number(number) => number.as_u64().filter(|id| *id > 0).map(AppId::new),
        _ => None,
    }
}

fn truncated(item: &Value) -> String {
    let text = item.to_string();
    text.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct MemoryStore {
        files: Mutex<Vec<(Source, AppId, Vec<u8>)>>,
        broken: BTreeSet<AppId>,
    }

    impl CompletionStore for MemoryStore {
        fn completed(&self, source: Source) -> Result<BTreeSet<AppId>, HarvestError> {
            Ok(self
                .files
                .lock()
                .unwrap()
                .iter()
                .filter(|(s, _, _)| *s == source)
                .map(|(_, id, _)| *id)
                .collect())
        }

        fn persist(&self, source: Source, id: AppId, body: &[u8]) -> Result<(), HarvestError> {
            if self.broken.contains(&id) {
                return Err(HarvestError::Filesystem("disk full".to_string()));
            }
            self.files.lock().unwrap().push((source, id, body.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn multi_response_is_split_per_item() {
        let store = Arc::new(MemoryStore::default());
        let writer = ResultWriter::new(Arc::clone(&store));
        let body = br#"{"data":[{"id":"1","type":"apps"},{"id":"2","type":"apps"}]}"#;

        let outcome = writer
            .on_bulk_multi_response(&[AppId::new(1), AppId::new(2)], body)
            .unwrap();

        assert_eq!(outcome.written, vec![AppId::new(1), AppId::new(2)]);
        assert!(outcome.warning.is_none());
        let files = store.files.lock().unwrap();
        let first: Value = serde_json::from_slice(&files[0].2).unwrap();
        assert_eq!(first["data"].as_array().unwrap().len(), 1);
        assert_eq!(first["data"][0]["id"], "1");
    }

    #[test]
    fn missing_items_produce_warning() {
        let store = Arc::new(MemoryStore::default());
        let writer = ResultWriter::new(Arc::clone(&store));
        let body = br#"{"data":[{"id":"3"}]}"#;

        let outcome = writer
            .on_bulk_multi_response(&[AppId::new(3), AppId::new(4)], body)
            .unwrap();

        assert_eq!(
            outcome.warning,
            Some(PartialBatchWarning {
                requested: 2,
                missing: vec![AppId::new(4)],
            })
        );
        assert_eq!(
            store.completed(Source::Bulk).unwrap(),
            [AppId::new(3)].into_iter().collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn non_json_body_is_rejected() {
        let writer = ResultWriter::new(Arc::new(MemoryStore::default()));
        let err = writer
            .on_bulk_multi_response(&[AppId::new(1)], b"<html>")
            .unwrap_err();
        assert!(matches!(err, HarvestError::Payload(_)));
    }

    #[test]
    fn unrequested_and_repeated_items_are_ignored() {
        let store = Arc::new(MemoryStore::default());
        let writer = ResultWriter::new(Arc::clone(&store));
        let body = br#"{"data":[{"id":"1"},{"id":"1"},{"id":"999"}]}"#;
        let requested = [AppId::new(1), AppId::new(2), AppId::new(3)];

        let outcome = writer.on_bulk_multi_response(&requested, body).unwrap();

        assert_eq!(outcome.written, vec![AppId::new(1)]);
        assert_eq!(
            outcome.warning.unwrap().missing,
            vec![AppId::new(2), AppId::new(3)]
        );
        assert_eq!(
            store.completed(Source::Bulk).unwrap(),
            [AppId::new(1)].into_iter().collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn failed_write_keeps_the_rest_of_the_batch() {
        let store = Arc::new(MemoryStore {
            broken: [AppId::new(2)].into_iter().collect(),
            ..MemoryStore::default()
        });
        let writer = ResultWriter::new(Arc::clone(&store));
        let body = br#"{"data":[{"id":"1"},{"id":"2"},{"id":"3"}]}"#;

        let outcome = writer
            .on_bulk_multi_response(&[AppId::new(1), AppId::new(2), AppId::new(3)], body)
            .unwrap();

        assert_eq!(outcome.written, vec![AppId::new(1), AppId::new(3)]);
        assert_eq!(outcome.failed, vec![AppId::new(2)]);
        assert!(outcome.warning.is_none());
        assert_eq!(store.completed(Source::Bulk).unwrap().len(), 2);
    }
}
