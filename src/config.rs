//! On-disk configuration: account id, local root, remote API base URL,
//! bearer token, and the two tunables `poll_interval_secs` and
//! `debounce_millis`.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_poll_interval() -> u64 {
    8
}

fn default_debounce_millis() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub account_id: Option<String>,
    pub local_root: Option<String>,
    pub api_base_url: Option<String>,
    pub token: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_debounce_millis")]
    pub debounce_millis: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            account_id: None,
            local_root: None,
            api_base_url: None,
            token: None,
            poll_interval_secs: default_poll_interval(),
            debounce_millis: default_debounce_millis(),
        }
    }
}

impl Config {
    pub fn config_path() -> anyhow::Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "dualsync", "dualsync")
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;

        let config_dir = proj_dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn require_auth(&self) -> anyhow::Result<()> {
        if self.token.is_none() {
            anyhow::bail!("not logged in. Run: dualsync setup");
        }
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.account_id.is_some()
            && self.local_root.is_some()
            && self.api_base_url.is_some()
            && self.token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_eight_seconds_and_one_second() {
        let config = Config::default();
        assert_eq!(config.poll_interval_secs, 8);
        assert_eq!(config.debounce_millis, 1000);
        assert!(!config.is_configured());
    }

    #[test]
    fn round_trips_through_toml() {
        let mut config = Config::default();
        config.account_id = Some("acct-1".into());
        config.local_root = Some("/tmp/sync".into());
        config.api_base_url = Some("https://example.test".into());
        config.token = Some("secret".into());

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.account_id, config.account_id);
        assert!(parsed.is_configured());
    }
}
