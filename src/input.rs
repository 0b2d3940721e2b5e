use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::domain::AppId;
use crate::error::HarvestError;

pub fn load_identifiers(path: &Path) -> Result<BTreeSet<AppId>, HarvestError> {
    if !path.exists() {
        return Err(HarvestError::MissingInput(path.to_path_buf()));
    }
    let content =
        fs::read_to_string(path).map_err(|_| HarvestError::InputRead(path.to_path_buf()))?;
    parse_identifiers(&content)
}

pub fn parse_identifiers(content: &str) -> Result<BTreeSet<AppId>, HarvestError> {
    let mut ids = BTreeSet::new();
    for (index, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let id = trimmed
            .parse::<AppId>()
            .map_err(|_| HarvestError::InvalidIdentifier {
                line: index + 1,
                value: trimmed.to_string(),
            })?;
        ids.insert(id);
    }
    Ok(ids)
}
