use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::Account;
use crate::error::SnapError;
use crate::timezone::DEFAULT_REFERENCE_ZONE;

pub const CONFIG_FILE_NAME: &str = "snapgrab.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub usernames: Vec<String>,
    #[serde(default)]
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default)]
    pub sleep_interval: Option<u64>,
    #[serde(default)]
    pub update_interval: Option<u64>,
    #[serde(default)]
    pub merge_tool: Option<PathBuf>,
    #[serde(default)]
    pub reference_timezone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub usernames: Vec<Account>,
    pub root_folder: Option<PathBuf>,
    pub max_workers: usize,
    pub sleep_interval: u64,
    pub update_interval: u64,
    pub merge_tool: Option<PathBuf>,
    pub reference_timezone: String,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            usernames: Vec::new(),
            root_folder: None,
            max_workers: 4,
            sleep_interval: 1,
            update_interval: 600,
            merge_tool: None,
            reference_timezone: DEFAULT_REFERENCE_ZONE.to_string(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the given file, or `snapgrab.json` in the working directory when
    /// present. No file at all resolves to defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SnapError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE_NAME),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(ResolvedConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SnapError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| SnapError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, SnapError> {
        let defaults = ResolvedConfig::default();

        let mut usernames = Vec::new();
        for name in config.usernames {
            let account: Account = name.trim().parse()?;
            if !usernames.contains(&account) {
                usernames.push(account);
            }
        }

        let reference_timezone = match config.reference_timezone {
            Some(zone) => {
                zone.parse::<chrono_tz::Tz>()
                    .map_err(|_| SnapError::InvalidTimezone(zone.clone()))?;
                zone
            }
            None => defaults.reference_timezone,
        };

        Ok(ResolvedConfig {
            usernames,
            root_folder: config.root_folder,
            max_workers: config.max_workers.unwrap_or(defaults.max_workers).max(1),
            sleep_interval: config.sleep_interval.unwrap_or(defaults.sleep_interval),
            update_interval: config.update_interval.unwrap_or(defaults.update_interval),
            merge_tool: config.merge_tool,
            reference_timezone,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_fill_gaps() {
        let resolved = ConfigLoader::resolve_config(Config {
            usernames: vec!["abc".to_string(), "abc".to_string(), " xyz_1 ".to_string()],
            ..Config::default()
        })
        .unwrap();
        assert_eq!(resolved.usernames.len(), 2);
        assert_eq!(resolved.max_workers, 4);
        assert_eq!(resolved.sleep_interval, 1);
        assert_eq!(resolved.update_interval, 600);
        assert_eq!(resolved.reference_timezone, "America/Detroit");
    }

    #[test]
    fn invalid_username_is_rejected() {
        let err = ConfigLoader::resolve_config(Config {
            usernames: vec!["no spaces allowed".to_string()],
            ..Config::default()
        })
        .unwrap_err();
        assert_matches!(err, SnapError::InvalidAccount(_));
    }

    #[test]
    fn invalid_timezone_is_rejected() {
        let err = ConfigLoader::resolve_config(Config {
            reference_timezone: Some("Nowhere/Special".to_string()),
            ..Config::default()
        })
        .unwrap_err();
        assert_matches!(err, SnapError::InvalidTimezone(_));
    }
}
