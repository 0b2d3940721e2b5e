use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{AppId, BatchMode, CountryCode, Locale, Platform};
use crate::error::HarvestError;

pub const DEFAULT_CONFIG_FILE: &str = "appstore-harvest.json";
pub const DEFAULT_BULK_HOST: &str = "amp-api.apps.apple.com";
pub const DEFAULT_STOREFRONT_HOST: &str = "apps.apple.com";
pub const DEFAULT_DEVICE_USER_AGENT: &str = "AppStore/2.0 iOS/14.4.2 model/iPhone11,2 (6; dt:185)";
/// Any long-lived app works; its page only serves as the token carrier.
pub const DEFAULT_BOOTSTRAP_APP_ID: u64 = 310633997;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub country: Option<CountryCode>,
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub locale: Option<Locale>,
    #[serde(default)]
    pub batch_mode: Option<BatchMode>,
    #[serde(default)]
    pub bulk_enabled: Option<bool>,
    #[serde(default)]
    pub single_enabled: Option<bool>,
    #[serde(default)]
    pub download_delay_ms: Option<u64>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub bulk_host: Option<String>,
    #[serde(default)]
    pub storefront_host: Option<String>,
    #[serde(default)]
    pub device_user_agent: Option<String>,
    #[serde(default)]
    pub crawler_user_agent: Option<String>,
    #[serde(default)]
    pub bootstrap_app_id: Option<u64>,
    #[serde(default)]
    pub log_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub country: Option<CountryCode>,
    pub platform: Option<Platform>,
    pub locale: Option<Locale>,
    pub batch_mode: Option<BatchMode>,
    pub bulk_enabled: Option<bool>,
    pub single_enabled: Option<bool>,
    pub download_delay_ms: Option<u64>,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub country: CountryCode,
    pub platform: Platform,
    pub locale: Locale,
    pub batch_mode: BatchMode,
    pub bulk_enabled: bool,
    pub single_enabled: bool,
    pub download_delay: Duration,
    pub concurrency: usize,
    pub max_retries: u32,
    pub request_timeout: Duration,
    pub bulk_host: String,
    pub storefront_host: String,
    pub device_user_agent: String,
    pub crawler_user_agent: String,
    pub bootstrap_app_id: AppId,
    pub log_interval: Duration,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            country: CountryCode::default(),
            platform: Platform::Iphone,
            locale: Locale::default(),
            batch_mode: BatchMode::Multi,
            bulk_enabled: true,
            single_enabled: false,
            download_delay: Duration::from_millis(510),
            concurrency: 4,
            max_retries: 3,
            request_timeout: Duration::from_secs(30),
            bulk_host: DEFAULT_BULK_HOST.to_string(),
            storefront_host: DEFAULT_STOREFRONT_HOST.to_string(),
            device_user_agent: DEFAULT_DEVICE_USER_AGENT.to_string(),
            crawler_user_agent: format!("appstore-harvest/{}", env!("CARGO_PKG_VERSION")),
            bootstrap_app_id: AppId::new(DEFAULT_BOOTSTRAP_APP_ID),
            log_interval: Duration::from_secs(30),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(
        path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<HarvestConfig, HarvestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let file = if path.is_none() && !config_path.exists() {
            ConfigFile::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content)
                .map_err(|err| HarvestError::ConfigParse(err.to_string()))?
        };

        Self::resolve_config(file, overrides)
    }

    pub fn resolve_config(
        file: ConfigFile,
        overrides: ConfigOverrides,
    ) -> Result<HarvestConfig, HarvestError> {
        let defaults = HarvestConfig::default();

        let config = HarvestConfig {
            country: overrides
                .country
                .or(file.country)
                .unwrap_or(defaults.country),
            platform: overrides
                .platform
                .or(file.platform)
                .unwrap_or(defaults.platform),
            locale: overrides.locale.or(file.locale).unwrap_or(defaults.locale),
            batch_mode: overrides
                .batch_mode
                .or(file.batch_mode)
                .unwrap_or(defaults.batch_mode),
            bulk_enabled: overrides
                .bulk_enabled
                .or(file.bulk_enabled)
                .unwrap_or(defaults.bulk_enabled),
            single_enabled: overrides
                .single_enabled
                .or(file.single_enabled)
                .unwrap_or(defaults.single_enabled),
            download_delay: overrides
                .download_delay_ms
                .or(file.download_delay_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.download_delay),
            concurrency: overrides
                .concurrency
                .or(file.concurrency)
                .unwrap_or(defaults.concurrency),
            max_retries: file.max_retries.unwrap_or(defaults.max_retries),
            request_timeout: file
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            bulk_host: file.bulk_host.unwrap_or(defaults.bulk_host),
            storefront_host: file.storefront_host.unwrap_or(defaults.storefront_host),
            device_user_agent: file.device_user_agent.unwrap_or(defaults.device_user_agent),
            crawler_user_agent: file
                .crawler_user_agent
                .unwrap_or(defaults.crawler_user_agent),
            bootstrap_app_id: file
                .bootstrap_app_id
                .map(AppId::new)
                .unwrap_or(defaults.bootstrap_app_id),
            log_interval: file
                .log_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.log_interval),
        };

        config.validate()?;
        Ok(config)
    }
}

impl HarvestConfig {
    pub fn validate(&self) -> Result<(), HarvestError> {
        if !self.bulk_enabled && !self.single_enabled {
            return Err(HarvestError::InvalidConfig(
                "both sources are disabled; nothing to fetch".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(HarvestError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.bulk_host.trim().is_empty() || self.storefront_host.trim().is_empty() {
            return Err(HarvestError::InvalidConfig("hosts must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let resolved =
            ConfigLoader::resolve_config(ConfigFile::default(), ConfigOverrides::default())
                .unwrap();
        assert_eq!(resolved.country.as_str(), "us");
        assert_eq!(resolved.platform, Platform::Iphone);
        assert_eq!(resolved.batch_mode, BatchMode::Multi);
        assert!(resolved.bulk_enabled);
        assert!(!resolved.single_enabled);
        assert_eq!(resolved.download_delay, Duration::from_millis(510));
    }

    #[test]
    fn overrides_win_over_file() {
        let file: ConfigFile =
            serde_json::from_str(r#"{"country": "de", "batch_mode": "single"}"#).unwrap();
        let overrides = ConfigOverrides {
            country: Some("fr".parse().unwrap()),
            ..ConfigOverrides::default()
        };
        let resolved = ConfigLoader::resolve_config(file, overrides).unwrap();
        assert_eq!(resolved.country.as_str(), "fr");
        assert_eq!(resolved.batch_mode, BatchMode::Single);
    }

    #[test]
    fn both_sources_disabled_is_rejected() {
        let overrides = ConfigOverrides {
            bulk_enabled: Some(false),
            single_enabled: Some(false),
            ..ConfigOverrides::default()
        };
        let err = ConfigLoader::resolve_config(ConfigFile::default(), overrides).unwrap_err();
        assert_matches!(err, HarvestError::InvalidConfig(_));
    }
}
