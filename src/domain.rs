use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(u64);

impl AppId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for AppId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for AppId {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().parse::<u64>() {
            Ok(id) if id > 0 => Ok(Self(id)),
            _ => Err(HarvestError::InvalidAppId(value.trim().to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Bulk,
    Single,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::Bulk, Source::Single];

    pub fn dir_name(self) -> &'static str {
        match self {
            Source::Bulk => "bulk",
            Source::Single => "ua",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Bulk => write!(f, "bulk"),
            Source::Single => write!(f, "single"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Appletv,
    Ipad,
    Mac,
    Watch,
    Iphone,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Appletv,
        Platform::Ipad,
        Platform::Mac,
        Platform::Watch,
        Platform::Iphone,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Appletv => "appletv",
            Platform::Ipad => "ipad",
            Platform::Mac => "mac",
            Platform::Watch => "watch",
            Platform::Iphone => "iphone",
        }
    }

    pub fn additional(self) -> Vec<Platform> {
        Self::ALL.into_iter().filter(|p| *p != self).collect()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BatchMode {
    Single,
    Multi,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CountryCode(String);

impl CountryCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CountryCode {
    fn default() -> Self {
        Self("us".to_string())
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CountryCode {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        let is_valid =
            normalized.len() == 2 && normalized.chars().all(|ch| ch.is_ascii_lowercase());
        if !is_valid {
            return Err(HarvestError::InvalidCountry(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for CountryCode {
    type Error = HarvestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CountryCode> for String {
    fn from(value: CountryCode) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locale(String);

impl Locale {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self("en-US".to_string())
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Locale {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed.split('-').all(|part| {
                !part.is_empty() && part.len() <= 8 && part.chars().all(|ch| ch.is_ascii_alphanumeric())
            });
        if !is_valid {
            return Err(HarvestError::InvalidLocale(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for Locale {
    type Error = HarvestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Locale> for String {
    fn from(value: Locale) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_app_id_trims_whitespace() {
        let id: AppId = " 310633997\n".parse().unwrap();
        assert_eq!(id.get(), 310633997);
    }

    #[test]
    fn parse_app_id_rejects_zero_and_negatives() {
        assert_matches!("0".parse::<AppId>(), Err(HarvestError::InvalidAppId(_)));
        assert_matches!("-3".parse::<AppId>(), Err(HarvestError::InvalidAppId(_)));
    }

    #[test]
    fn parse_country_normalizes_case() {
        let country: CountryCode = "DE".parse().unwrap();
        assert_eq!(country.as_str(), "de");
    }

    #[test]
    fn parse_country_invalid() {
        let err = "usa".parse::<CountryCode>().unwrap_err();
        assert_matches!(err, HarvestError::InvalidCountry(_));
    }

    #[test]
    fn parse_locale() {
        assert!("en-US".parse::<Locale>().is_ok());
        assert_matches!("en_US".parse::<Locale>(), Err(HarvestError::InvalidLocale(_)));
    }

    #[test]
    fn additional_platforms_exclude_primary() {
        let rest = Platform::Iphone.additional();
        assert_eq!(
            rest,
            vec![Platform::Appletv, Platform::Ipad, Platform::Mac, Platform::Watch]
        );
    }

    #[test]
    fn source_directories() {
        assert_eq!(Source::Bulk.dir_name(), "bulk");
        assert_eq!(Source::Single.dir_name(), "ua");
    }
}
