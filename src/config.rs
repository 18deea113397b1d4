use std::collections::HashMap;
use std::env;
use std::fs;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::feed::StalePolicy;
use crate::query::{QueryConfig, SortField};
use crate::render::{RenderOptions, DEFAULT_PLACEHOLDER_COLOR};

const DEFAULT_ENV_PREFIX: &str = "PICSHARE";
const PLACEHOLDER_URL: &str = "YOUR_SUPABASE_URL";
const PLACEHOLDER_KEY: &str = "YOUR_SUPABASE_ANON_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub anon_key: String,
    #[serde(default = "default_bucket")]
    pub storage_bucket: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            storage_bucket: default_bucket(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

fn default_bucket() -> String {
    "images".into()
}

fn default_user_agent() -> String {
    format!("picshare/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_sort_fields")]
    pub sort_fields: Vec<SortField>,
    #[serde(default)]
    pub stale_responses: StalePolicy,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            sort_fields: default_sort_fields(),
            stale_responses: StalePolicy::default(),
        }
    }
}

impl FeedConfig {
    pub fn query_config(&self) -> Result<QueryConfig> {
        let page_size = NonZeroU32::new(self.page_size)
            .context("config: feed.page_size must be a positive integer")?;
        Ok(QueryConfig {
            page_size,
            sort_fields: self.sort_fields.clone(),
        })
    }
}

fn default_page_size() -> u32 {
    12
}

fn default_sort_fields() -> Vec<SortField> {
    SortField::ALL.to_vec()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayConfig {
    #[serde(default = "default_placeholder_color")]
    pub placeholder_color: String,
    #[serde(default = "default_uncategorized_label")]
    pub uncategorized_label: String,
    #[serde(default = "default_missing_description_label")]
    pub missing_description_label: String,
    #[serde(default = "default_notification_duration", with = "humantime_serde")]
    pub notification_duration: Duration,
    #[serde(default = "default_width")]
    pub width: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            placeholder_color: default_placeholder_color(),
            uncategorized_label: default_uncategorized_label(),
            missing_description_label: default_missing_description_label(),
            notification_duration: default_notification_duration(),
            width: default_width(),
        }
    }
}

impl DisplayConfig {
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            placeholder_color: self.placeholder_color.clone(),
            uncategorized_label: self.uncategorized_label.clone(),
            missing_description_label: self.missing_description_label.clone(),
            ..RenderOptions::default()
        }
    }
}

fn default_placeholder_color() -> String {
    DEFAULT_PLACEHOLDER_COLOR.into()
}

fn default_uncategorized_label() -> String {
    "Uncategorized".into()
}

fn default_missing_description_label() -> String {
    "No description".into()
}

fn default_notification_duration() -> Duration {
    Duration::from_secs(5)
}

fn default_width() -> usize {
    80
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SiteConfig {
    /// Base address used for share links.
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default)]
    pub state_path: Option<PathBuf>,
    #[serde(default = "default_refresh_skew", with = "humantime_serde")]
    pub refresh_skew: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            state_path: None,
            refresh_skew: default_refresh_skew(),
        }
    }
}

fn default_refresh_skew() -> Duration {
    Duration::from_secs(60)
}

impl Config {
    /// Checks the settings the remote client cannot work without.
    pub fn validate(&self) -> Result<()> {
        let url = self.backend.url.trim();
        anyhow::ensure!(
            !url.is_empty() && url != PLACEHOLDER_URL,
            "config: backend.url must be set to your project URL"
        );
        url::Url::parse(url).with_context(|| format!("config: backend.url {url:?} is not a URL"))?;
        let key = self.backend.anon_key.trim();
        anyhow::ensure!(
            !key.is_empty() && key != PLACEHOLDER_KEY,
            "config: backend.anon_key must be set"
        );
        anyhow::ensure!(
            !self.backend.storage_bucket.trim().is_empty(),
            "config: backend.storage_bucket must not be empty"
        );
        self.feed.query_config()?;
        Ok(())
    }

    pub fn share_base(&self) -> String {
        if self.site.url.trim().is_empty() {
            self.backend.url.clone()
        } else {
            self.site.url.clone()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.backend.url.is_empty() {
        base.backend.url = other.backend.url;
    }
    if !other.backend.anon_key.is_empty() {
        base.backend.anon_key = other.backend.anon_key;
    }
    if !other.backend.storage_bucket.is_empty() {
        base.backend.storage_bucket = other.backend.storage_bucket;
    }
    if !other.backend.user_agent.is_empty() {
        base.backend.user_agent = other.backend.user_agent;
    }
    base.backend.timeout = other.backend.timeout;

    base.feed.page_size = other.feed.page_size;
    if !other.feed.sort_fields.is_empty() {
        base.feed.sort_fields = other.feed.sort_fields;
    }
    base.feed.stale_responses = other.feed.stale_responses;

    if !other.display.placeholder_color.is_empty() {
        base.display.placeholder_color = other.display.placeholder_color;
    }
    if !other.display.uncategorized_label.is_empty() {
        base.display.uncategorized_label = other.display.uncategorized_label;
    }
    if !other.display.missing_description_label.is_empty() {
        base.display.missing_description_label = other.display.missing_description_label;
    }
    base.display.notification_duration = other.display.notification_duration;
    if other.display.width != 0 {
        base.display.width = other.display.width;
    }

    if !other.site.url.is_empty() {
        base.site.url = other.site.url;
    }

    if other.session.state_path.is_some() {
        base.session.state_path = other.session.state_path;
    }
    base.session.refresh_skew = other.session.refresh_skew;

    base
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "backend.url" => cfg.backend.url = value,
        "backend.anon_key" => cfg.backend.anon_key = value,
        "backend.storage_bucket" => cfg.backend.storage_bucket = value,
        "backend.user_agent" => cfg.backend.user_agent = value,
        "backend.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.backend.timeout = duration;
            }
        }
        "feed.page_size" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.feed.page_size = parsed;
            }
        }
        "feed.sort_fields" => {
            let fields: Vec<SortField> = value
                .split(',')
                .filter_map(SortField::from_key)
                .collect();
            if !fields.is_empty() {
                cfg.feed.sort_fields = fields;
            }
        }
        "feed.stale_responses" => match value.trim().to_ascii_lowercase().as_str() {
            "apply" => cfg.feed.stale_responses = StalePolicy::Apply,
            "discard" => cfg.feed.stale_responses = StalePolicy::Discard,
            _ => {}
        },
        "display.placeholder_color" => cfg.display.placeholder_color = value,
        "display.uncategorized_label" => cfg.display.uncategorized_label = value,
        "display.missing_description_label" => cfg.display.missing_description_label = value,
        "display.notification_duration" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.display.notification_duration = duration;
            }
        }
        "display.width" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.display.width = parsed;
            }
        }
        "site.url" => cfg.site.url = value,
        "session.state_path" => cfg.session.state_path = Some(PathBuf::from(value)),
        "session.refresh_skew" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.session.refresh_skew = duration;
            }
        }
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("picshare").join("config.yaml"))
}
