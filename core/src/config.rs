use crate::lemma::Language;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub language: Language,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub connection: ConnectionSettings,
    pub sites: Vec<SiteConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_referer")]
    pub referer: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_data_dir() -> PathBuf { PathBuf::from("./data/index") }
fn default_user_agent() -> String { "SiteSearchBot/0.1".to_string() }
fn default_referer() -> String { "https://www.google.com".to_string() }
fn default_timeout_ms() -> u64 { 10_000 }

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self { user_agent: default_user_agent(), referer: default_referer(), timeout_ms: default_timeout_ms() }
    }
}

impl ConnectionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        Self::from_yaml(&yaml).with_context(|| format!("load config {}", path.display()))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(yaml).context("parse config yaml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sites.is_empty() {
            bail!("no sites configured");
        }
        for site in &self.sites {
            let url = Url::parse(&site.url).with_context(|| format!("invalid url for site {}", site.name))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                bail!("site {} must use http or https: {}", site.name, site.url);
            }
        }
        if self.connection.timeout_ms == 0 {
            bail!("connection timeout must be positive");
        }
        Ok(())
    }

    /// First configured site whose root is a prefix of `url`.
    pub fn site_for_url(&self, url: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| url.starts_with(&s.url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_defaults() {
        let cfg = AppConfig::from_yaml(
            "sites:\n  - name: Lenta\n    url: https://lenta.ru\n  - name: Skill\n    url: https://skillbox.ru\n",
        )
        .unwrap();
        assert_eq!(cfg.language, Language::Russian);
        assert_eq!(cfg.connection.timeout_ms, 10_000);
        assert_eq!(cfg.site_for_url("https://skillbox.ru/courses").unwrap().name, "Skill");
        assert!(cfg.site_for_url("https://example.com").is_none());
    }

    #[test]
    fn rejects_bad_sites() {
        assert!(AppConfig::from_yaml("sites: []\n").is_err());
        assert!(AppConfig::from_yaml("sites:\n  - name: x\n    url: ftp://x.ru\n").is_err());
        assert!(AppConfig::from_yaml(
            "connection:\n  timeout_ms: 0\nsites:\n  - name: x\n    url: https://x.ru\n"
        )
        .is_err());
    }
}
