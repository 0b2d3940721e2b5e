use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};

use crate::config::HarvestConfig;
use crate::domain::{AppId, BatchMode, Source};
use crate::error::HarvestError;
use crate::reconcile::WorkQueue;

pub const MAX_BATCH: usize = 100;

pub const REVIEW_LIMIT: u32 = 20;

pub const EXTEND_FIELDS: &[&str] = &[
    "description",
    "editorialVideo",
    "expectedReleaseDateDisplayFormat",
    "fileSizeByDevice",
    "maxPlayers",
    "messagesScreenshots",
    "minPlayers",
    "minimumOSVersion",
    "privacyDetails",
    "privacyPolicyUrl",
    "promotionalText",
    "remoteControllerRequirement",
    "requirementsByDeviceFamily",
    "screenshotsByType",
    "supportURLForLanguage",
    "supportsFunCamera",
    "versionHistory",
    "videoPreviewsByType",
    "websiteUrl",
];

pub const INCLUDE_RELATIONS: &[&str] = &[
    "alternate-apps",
    "app-bundles",
    "customers-also-bought-apps",
    "developer",
    "developer-other-apps",
    "merchandised-in-apps",
    "related-editorial-items",
    "reviews",
    "top-in-apps",
];

const QUERY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Clone)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Result<Self, HarvestError> {
        let token = token.into();
        let is_valid = !token.is_empty() && token.bytes().all(|b| b.is_ascii_graphic());
        if !is_valid {
            return Err(HarvestError::AuthExtraction(
                "token is empty or contains non-printable characters".to_string(),
            ));
        }
        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BearerToken({} chars)", self.0.len())
    }
}

#[derive(Debug, Clone)]
pub struct FetchTask {
    pub source: Source,
    pub ids: Vec<AppId>,
    pub url: String,
    pub headers: HeaderMap,
    pub shape: TaskShape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskShape {
    BulkSingle,
    BulkMulti,
    Single,
}

#[derive(Debug, Clone)]
pub struct BatchPlanner {
    bulk_base: String,
    storefront_base: String,
    common_params: Vec<(&'static str, String)>,
    locale: String,
    batch_mode: BatchMode,
    bulk_headers: Option<HeaderMap>,
    single_headers: HeaderMap,
}

impl BatchPlanner {
    pub fn new(config: &HarvestConfig, token: Option<&BearerToken>) -> Result<Self, HarvestError> {
        let bulk_headers = token
            .map(|token| {
                let mut headers = HeaderMap::new();
                let value = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
                    .map_err(|err| HarvestError::AuthExtraction(err.to_string()))?;
                headers.insert(AUTHORIZATION, value);
                Ok::<_, HarvestError>(headers)
            })
            .transpose()?;

        let mut single_headers = HeaderMap::new();
        single_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.device_user_agent)
                .map_err(|err| HarvestError::InvalidConfig(format!("device user agent: {err}")))?,
        );

        let additional = config
            .platform
            .additional()
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let common_params = vec![
            ("platform", config.platform.as_str().to_string()),
            ("additionalPlatforms", additional),
            ("extend", EXTEND_FIELDS.join(",")),
        ];

        Ok(Self {
            bulk_base: format!(
                "https://{}/v1/catalog/{}/apps",
                config.bulk_host, config.country
            ),
            storefront_base: format!("https://{}/{}", config.storefront_host, config.country),
            common_params,
            batch_mode: config.batch_mode,
            bulk_headers,
            single_headers,
            locale: config.locale.to_string(),
        })
    }

    pub fn next_bulk_batch(&self, queue: &mut WorkQueue) -> Option<FetchTask> {
        let headers = self.bulk_headers.clone()?;
        match self.batch_mode {
            BatchMode::Single => {
                let id = queue.pop()?;
                Some(FetchTask {
                    source: Source::Bulk,
                    ids: vec![id],
                    url: self.bulk_single_url(id),
                    headers,
                    shape: TaskShape::BulkSingle,
                })
            }
            BatchMode::Multi => {
                let ids = queue.pop_up_to(MAX_BATCH);
                if ids.is_empty() {
                    return None;
                }
                Some(FetchTask {
                    source: Source::Bulk,
                    url: self.bulk_multi_url(&ids),
                    ids,
                    headers,
                    shape: TaskShape::BulkMulti,
                })
            }
        }
    }

    pub fn next_single_task(&self, queue: &mut WorkQueue) -> Option<FetchTask> {
        let id = queue.pop()?;
        Some(FetchTask {
            source: Source::Single,
            ids: vec![id],
            url: self.storefront_url(id),
            headers: self.single_headers.clone(),
            shape: TaskShape::Single,
        })
    }

    pub fn storefront_url(&self, id: AppId) -> String {
        format!("{}/app/id{}", self.storefront_base, id)
    }

    fn bulk_single_url(&self, id: AppId) -> String {
        let mut params = self.common_params.clone();
        params.push(("include", INCLUDE_RELATIONS.join(",")));
        params.push(("limit[reviews]", REVIEW_LIMIT.to_string()));
        params.push(("l", self.locale.clone()));
        format!("{}/{}?{}", self.bulk_base, id, encode_query(&params))
    }

    fn bulk_multi_url(&self, ids: &[AppId]) -> String {
        let joined = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let mut params = vec![("ids", joined)];
        params.extend(self.common_params.iter().cloned());
        params.push(("limit[reviews]", REVIEW_LIMIT.to_string()));
        params.push(("l", self.locale.clone()));
        format!("{}?{}", self.bulk_base, encode_query(&params))
    }
}

fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                utf8_percent_encode(key, QUERY),
                utf8_percent_encode(value, QUERY)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}
