use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::domain::AppId;
use crate::error::HarvestError;

#[derive(Debug, Clone, Copy, Default)]
pub struct CollectOptions {
    pub json: bool,
    pub all_ids: bool,
    pub popular_ids: bool,
    pub sort: bool,
}

impl CollectOptions {
    pub fn everything(sort: bool) -> Self {
        Self {
            json: true,
            all_ids: true,
            popular_ids: true,
            sort,
        }
    }

    fn any(&self) -> bool {
        self.json || self.all_ids || self.popular_ids
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectResult {
    pub lines: usize,
    pub skipped: usize,
    pub categories: usize,
    pub all_ids: usize,
    pub popular_ids: usize,
    pub written: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CrawlLine {
    category_id: Value,
    #[serde(default)]
    apps: Option<Vec<AppEntry>>,
    #[serde(default, rename = "popular-apps")]
    popular_apps: Option<Vec<AppEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AppEntry {
    Id(u64),
    WithUrl {
        id: u64,
        #[allow(dead_code)]
        url: Option<String>,
    },
}

impl AppEntry {
    fn id(&self) -> AppId {
        match self {
            AppEntry::Id(id) | AppEntry::WithUrl { id, .. } => AppId::new(*id),
        }
    }
}

#[derive(Debug, Default)]
struct IdList {
    seen: HashSet<AppId>,
    order: Vec<AppId>,
}

impl IdList {
    fn insert(&mut self, id: AppId) {
        if self.seen.insert(id) {
            self.order.push(id);
        }
    }

    fn extend(&mut self, ids: impl IntoIterator<Item = AppId>) {
        for id in ids {
            self.insert(id);
        }
    }

    fn into_vec(self, sort: bool) -> Vec<AppId> {
        let mut ids = self.order;
        if sort {
            ids.sort_unstable();
        }
        ids
    }
}

#[derive(Debug, Default)]
struct Category {
    apps: Option<IdList>,
    popular: Option<IdList>,
}

#[derive(Debug, Serialize)]
struct CategoryOut {
    #[serde(skip_serializing_if = "Option::is_none")]
    apps: Option<Vec<AppId>>,
    #[serde(rename = "popular-apps", skip_serializing_if = "Option::is_none")]
    popular_apps: Option<Vec<AppId>>,
}

pub fn collect(
    input: &Path,
    output_base: &str,
    options: CollectOptions,
) -> Result<CollectResult, HarvestError> {
    if !options.any() {
        return Err(HarvestError::InvalidConfig(
            "no file will be saved; select at least one output".to_string(),
        ));
    }
    if !input.exists() {
        return Err(HarvestError::MissingInput(input.to_path_buf()));
    }
    let file = fs::File::open(input).map_err(|_| HarvestError::InputRead(input.to_path_buf()))?;

    let mut categories: BTreeMap<String, Category> = BTreeMap::new();
    let mut all = IdList::default();
    let mut popular = IdList::default();
    let mut lines = 0usize;
    let mut skipped = 0usize;

    info!(input = %input.display(), "reading crawl output");
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        lines += 1;
        let parsed: CrawlLine = serde_json::from_str(&line)
            .map_err(|err| HarvestError::Payload(format!("line {}: {err}", index + 1)))?;
        let key = category_key(&parsed.category_id);

        if let Some(apps) = parsed.apps {
            let ids = apps.iter().map(AppEntry::id).collect::<Vec<_>>();
            all.extend(ids.iter().copied());
            let category = categories.entry(key).or_default();
            category.apps.get_or_insert_with(IdList::default).extend(ids);
        } else if let Some(apps) = parsed.popular_apps {
            let ids = apps.iter().map(AppEntry::id).collect::<Vec<_>>();
            popular.extend(ids.iter().copied());
            all.extend(ids.iter().copied());
            let mut page = IdList::default();
            page.extend(ids.iter().copied());
            let category = categories.entry(key).or_default();
            category.popular = Some(page);
            category.apps.get_or_insert_with(IdList::default).extend(ids);
        } else {
            warn!(line = index + 1, "unknown crawl line");
            skipped += 1;
        }
    }

    let category_count = categories.len();
    let all = all.into_vec(options.sort);
    let popular = popular.into_vec(options.sort);
    let mut written = Vec::new();

    if options.json {
        let out: BTreeMap<String, CategoryOut> = categories
            .into_iter()
            .map(|(key, category)| {
                (
                    key,
                    CategoryOut {
                        apps: category.apps.map(|ids| ids.into_vec(false)),
                        popular_apps: category.popular.map(|ids| ids.into_vec(false)),
                    },
                )
            })
            .collect();
        let path = PathBuf::from(format!("{output_base}.json"));
        let bytes = serde_json::to_vec_pretty(&out)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        fs::write(&path, bytes).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        written.push(path.display().to_string());
    }
    if options.popular_ids {
        let path = PathBuf::from(format!("{output_base}_popular_ids"));
        write_id_list(&path, &popular)?;
        written.push(path.display().to_string());
    }
    if options.all_ids {
        let path = PathBuf::from(format!("{output_base}_all_ids"));
        write_id_list(&path, &all)?;
        written.push(path.display().to_string());
    }

    info!(files = written.len(), all = all.len(), popular = popular.len(), "collect done");
    Ok(CollectResult {
        lines,
        skipped,
        categories: category_count,
        all_ids: all.len(),
        popular_ids: popular.len(),
        written,
    })
}

fn category_key(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn write_id_list(path: &Path, ids: &[AppId]) -> Result<(), HarvestError> {
    let file = fs::File::create(path)
        .map_err(|err| HarvestError::Filesystem(format!("create {}: {err}", path.display())))?;
    let mut writer = BufWriter::new(file);
    for id in ids {
        writeln!(writer, "{id}").map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    }
    writer
        .flush()
        .map_err(|err| HarvestError::Filesystem(err.to_string()))
}
