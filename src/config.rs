use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Refresh interval in minutes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Pre-registered feeds, upserted into the database at startup
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_refresh_interval() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub url: String,
    /// Content format selector: "rss" or "atom"
    #[serde(default = "default_content_format")]
    pub content_format: String,
    /// strftime pattern used to parse item publish dates
    #[serde(default = "default_time_format")]
    pub time_format: String,
}

fn default_content_format() -> String {
    "rss".to_string()
}

/// RFC 2822 style dates, the common RSS pubDate shape.
fn default_time_format() -> String {
    "%a, %d %b %Y %H:%M:%S %z".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_refresh_interval() {
        assert_eq!(default_refresh_interval(), 15);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
            listen_addr = "127.0.0.1:8080"
            refresh_interval = 30

            [[feeds]]
            url = "https://example.com/feed.xml"
            content_format = "rss"
            time_format = "%Y-%m-%d %H:%M:%S"

            [[feeds]]
            url = "https://example.org/atom"
            content_format = "atom"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.refresh_interval, 30);
        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.feeds[0].url, "https://example.com/feed.xml");
        assert_eq!(config.feeds[0].content_format, "rss");
        assert_eq!(config.feeds[0].time_format, "%Y-%m-%d %H:%M:%S");
        assert_eq!(config.feeds[1].content_format, "atom");
    }

    #[test]
    fn test_load_config_with_defaults() {
        let content = r#"
            [[feeds]]
            url = "https://example.com/feed.xml"
        "#;

        let config = Config::from_str(content).unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:3000");
        assert_eq!(config.refresh_interval, 15);
        assert_eq!(config.feeds.len(), 1);
        assert_eq!(config.feeds[0].content_format, "rss");
        assert_eq!(config.feeds[0].time_format, "%a, %d %b %Y %H:%M:%S %z");
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let content = "this is not valid toml {{{";

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();

        let result = Config::load(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_missing_url() {
        let content = r#"
            [[feeds]]
            content_format = "rss"
        "#;

        let result = Config::from_str(content);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_feeds_list() {
        let config = Config::from_str("").unwrap();
        assert!(config.feeds.is_empty());
    }
}
