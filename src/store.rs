use std::collections::BTreeSet;
use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{AppId, Source};
use crate::error::HarvestError;

/// Durable record of which app ids are already fetched for each source.
pub trait CompletionStore: Send + Sync {
    fn completed(&self, source: Source) -> Result<BTreeSet<AppId>, HarvestError>;

    /// Persists `body` as the result for `(source, id)`. The result only
    /// becomes visible to [`CompletionStore::completed`] once fully written.
    fn persist(&self, source: Source, id: AppId, body: &[u8]) -> Result<(), HarvestError>;
}

#[derive(Debug, Clone)]
pub struct FsCompletionStore {
    root: Utf8PathBuf,
}

impl FsCompletionStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn source_dir(&self, source: Source) -> Utf8PathBuf {
        self.root.join(source.dir_name())
    }

    pub fn result_path(&self, source: Source, id: AppId) -> Utf8PathBuf {
        self.source_dir(source).join(format!("{id}.json"))
    }
}

impl CompletionStore for FsCompletionStore {
    fn completed(&self, source: Source) -> Result<BTreeSet<AppId>, HarvestError> {
        let dir = self.source_dir(source);
        let mut done = BTreeSet::new();
        if !dir.as_std_path().exists() {
            return Ok(done);
        }

        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("read {dir}: {err}")))?;
        for entry in entries {
            let entry = entry.map_err(|err| HarvestError::Filesystem(err.to_string()))?;
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(parse_result_name) else {
                continue;
            };
            let metadata = entry
                .metadata()
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
            if metadata.is_file() && metadata.len() > 0 {
                done.insert(id);
            }
        }
        Ok(done)
    }

    fn persist(&self, source: Source, id: AppId, body: &[u8]) -> Result<(), HarvestError> {
        let dir = self.source_dir(source);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("create {dir}: {err}")))?;
        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{id}-"))
            .suffix(".part")
            .tempfile_in(dir.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        temp.write_all(body)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let target = self.result_path(source, id);
        temp.persist(target.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("persist {target}: {err}")))?;
        Ok(())
    }
}

fn parse_result_name(name: &str) -> Option<AppId> {
    let stem = name.strip_suffix(".json")?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}
