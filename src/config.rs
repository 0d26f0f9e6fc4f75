//! File-based configuration for the crawler, the query service and the browser.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crawl::CrawlConfig;
use crate::engine::MatchConfig;
use crate::query::{PageLimits, QueryService};
use crate::store::RecordStore;
use crate::{DirectoryError, Result};

/// User agent presented by the crawl browser.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Browser launch options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserOptions {
    /// Run without a visible window.
    pub headless: bool,
    /// Chrome executable. Auto-detected or downloaded when absent.
    pub chrome_path: Option<PathBuf>,
    /// Proxy server for all browser traffic.
    pub proxy_url: Option<String>,
    /// Extra Chrome command-line arguments.
    pub launch_args: Vec<String>,
    /// User agent override.
    pub user_agent: Option<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            proxy_url: None,
            launch_args: Vec::new(),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
        }
    }
}

/// Query service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// CSV dataset loaded at startup.
    pub dataset: PathBuf,
    /// Listen address.
    pub bind: SocketAddr,
    /// Engine settings for list searches.
    pub list: MatchConfig,
    /// Engine settings for existence searches.
    pub existence: MatchConfig,
    /// Page-size bounds.
    pub limits: PageLimits,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            dataset: PathBuf::from("All_docs.csv"),
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
            list: MatchConfig::list(),
            existence: MatchConfig::existence(),
            limits: PageLimits::default(),
        }
    }
}

impl ServiceConfig {
    /// Builds a query service over `store` with these settings.
    pub fn build_service(&self, store: Arc<RecordStore>) -> QueryService {
        QueryService::new(store)
            .with_list_config(self.list.clone())
            .with_existence_config(self.existence.clone())
            .with_limits(self.limits)
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Crawl settings.
    pub crawl: CrawlConfig,
    /// Query service settings.
    pub service: ServiceConfig,
    /// Chrome launch settings.
    pub browser: BrowserOptions,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DirectoryError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config = serde_json::from_str(&content).map_err(|e| {
            DirectoryError::Config(format!("Invalid config {}: {}", path.display(), e))
        })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::GateMode;

    #[test]
    fn test_service_config_default() {
        let config = ServiceConfig::default();
        assert_eq!(config.dataset, PathBuf::from("All_docs.csv"));
        assert_eq!(config.bind.port(), 5000);
        assert_eq!(config.list.threshold, 85);
        assert_eq!(config.list.gate, GateMode::Contains);
        assert_eq!(config.existence.threshold, 90);
        assert_eq!(config.existence.gate, GateMode::Exact);
        assert_eq!(config.limits.max_size, 100);
    }

    #[test]
    fn test_browser_options_default() {
        let options = BrowserOptions::default();
        assert!(options.headless);
        assert!(options.chrome_path.is_none());
        assert!(options.launch_args.is_empty());
        assert!(options.user_agent.as_deref().unwrap_or_default().contains("Chrome/"));
    }

    #[test]
    fn test_app_config_partial_json() {
        let json = r#"{
            "service": { "bind": "127.0.0.1:8080", "list": { "threshold": 75 } },
            "browser": { "headless": false }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.service.bind.port(), 8080);
        assert_eq!(config.service.list.threshold, 75);
        assert_eq!(config.service.list.gate, GateMode::Exact);
        assert!(!config.browser.headless);
        assert_eq!(config.crawl, CrawlConfig::default());
    }

    #[test]
    fn test_app_config_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"service":{"dataset":"data/doctors.csv"}}"#).unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.service.dataset, PathBuf::from("data/doctors.csv"));
    }

    #[test]
    fn test_app_config_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AppConfig::load(dir.path().join("missing.json")),
            Err(DirectoryError::Config(_))
        ));
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(DirectoryError::Config(_))));
    }

    #[test]
    fn test_build_service_uses_limits() {
        let config = ServiceConfig {
            limits: PageLimits {
                default_size: 5,
                max_size: 10,
            },
            ..Default::default()
        };
        let service = config.build_service(Arc::new(RecordStore::default()));
        assert_eq!(service.limits().max_size, 10);
    }
}
