//! Crawl configuration.
//!
//! Every setting has a default matching the production crawl, so the YAML
//! file is optional and may list only the keys it wants to change:
//!
//! ```yaml
//! sleep_min: 31.0
//! sleep_max: 35.0
//! pages: 10
//! max_attempts: 50
//! ```
//!
//! Command-line flags are applied on top of the file by `main`.

use crate::error::{CrawlError, Result};
use crate::fetch::{RateLimit, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument};

pub const DEFAULT_SEARCH_URL_TEMPLATE: &str = "http://images.google.com.br/searchbyimage?image_url=http://www.monitor-de-whatsapp.dcc.ufmg.br/data/images/{}";

pub const DEFAULT_SEARCH_DOMAIN: &str = "www.google.com.br";

/// Appended to the resolved results URL so the engine searches all dates.
pub const DEFAULT_TIME_WINDOW_QUERY: &str = "&tbas=0";

/// Heading that opens the "pages that include matching images" section.
pub const DEFAULT_SECTION_MARKER: &str = "Páginas que incluem imagens correspondentes";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/68.0.3440.106 Safari/537.36";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Lower bound, in seconds, of the pause after each request.
    pub sleep_min: f64,
    /// Upper bound, in seconds, of the pause after each request.
    pub sleep_max: f64,
    /// Maximum number of result pages walked per image.
    pub pages: usize,
    /// Search-by-image URL; `{}` is replaced by the image id.
    pub search_url_template: String,
    /// Host that relative next-page links are resolved against.
    pub search_domain: String,
    pub time_window_query: String,
    pub section_marker: String,
    pub user_agent: String,
    /// Attempts per request before giving up. Unset means retry forever.
    pub max_attempts: Option<usize>,
    pub request_timeout_secs: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            sleep_min: 31.0,
            sleep_max: 35.0,
            pages: 10,
            search_url_template: DEFAULT_SEARCH_URL_TEMPLATE.to_string(),
            search_domain: DEFAULT_SEARCH_DOMAIN.to_string(),
            time_window_query: DEFAULT_TIME_WINDOW_QUERY.to_string(),
            section_marker: DEFAULT_SECTION_MARKER.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_attempts: None,
            request_timeout_secs: 60,
        }
    }
}

impl CrawlConfig {
    /// Reject settings the crawler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.sleep_min.is_finite() || !self.sleep_max.is_finite() {
            return Err(CrawlError::InvalidConfig(
                "sleep bounds must be finite".to_string(),
            ));
        }
        if self.sleep_min < 0.0 || self.sleep_max <= 0.0 {
            return Err(CrawlError::InvalidConfig(format!(
                "sleep bounds must be positive (min={}, max={})",
                self.sleep_min, self.sleep_max
            )));
        }
        if self.sleep_min > self.sleep_max {
            return Err(CrawlError::InvalidConfig(format!(
                "sleep_min ({}) is greater than sleep_max ({})",
                self.sleep_min, self.sleep_max
            )));
        }
        if !self.search_url_template.contains("{}") {
            return Err(CrawlError::InvalidConfig(
                "search_url_template has no {} placeholder".to_string(),
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(CrawlError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn rate_limit(&self) -> RateLimit {
        RateLimit::new(self.sleep_min, self.sleep_max)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self.max_attempts {
            Some(max) => RetryPolicy::capped(max),
            None => RetryPolicy::unbounded(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Build the search-by-image URL for one image.
    pub fn search_url(&self, image_id: &str) -> String {
        self.search_url_template
            .replace("{}", &urlencoding::encode(image_id))
    }

    /// Base URL that next-page hrefs are joined onto.
    pub fn search_base(&self) -> String {
        format!("https://{}", self.search_domain)
    }
}

/// Load the configuration from a YAML file, or the defaults when no path is given.
#[instrument(level = "info")]
pub async fn load_config(path: Option<&str>) -> Result<CrawlConfig> {
    let config = match path {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path).await?;
            let config: CrawlConfig = serde_yaml::from_str(&raw)?;
            info!(path, "Loaded configuration file");
            config
        }
        None => CrawlConfig::default(),
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CrawlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pages, 10);
        assert_eq!(config.max_attempts, None);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: CrawlConfig = serde_yaml::from_str("pages: 3\nmax_attempts: 5\n").unwrap();
        assert_eq!(config.pages, 3);
        assert_eq!(config.max_attempts, Some(5));
        assert_eq!(config.sleep_min, 31.0);
        assert_eq!(config.search_domain, "www.google.com.br");
    }

    #[test]
    fn test_retry_policy_follows_max_attempts() {
        assert_eq!(CrawlConfig::default().retry_policy(), RetryPolicy::unbounded());
        let capped = CrawlConfig {
            max_attempts: Some(4),
            ..Default::default()
        };
        assert_eq!(capped.retry_policy(), RetryPolicy::capped(4));
    }

    #[test]
    fn test_inverted_sleep_bounds_rejected() {
        let config = CrawlConfig {
            sleep_min: 10.0,
            sleep_max: 2.0,
            ..CrawlConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CrawlError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_non_positive_sleep_rejected() {
        let config = CrawlConfig {
            sleep_min: 0.0,
            sleep_max: 0.0,
            ..CrawlConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = CrawlConfig {
            max_attempts: Some(0),
            ..CrawlConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_search_url() {
        let config = CrawlConfig::default();
        assert_eq!(
            config.search_url("abc123.jpg"),
            "http://images.google.com.br/searchbyimage?image_url=http://www.monitor-de-whatsapp.dcc.ufmg.br/data/images/abc123.jpg"
        );
        assert_eq!(config.search_base(), "https://www.google.com.br");
    }

    #[tokio::test]
    async fn test_load_config_without_path_uses_defaults() {
        let config = load_config(None).await.unwrap();
        assert_eq!(config.sleep_max, 35.0);
    }
}
