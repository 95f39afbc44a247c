use config::{Config, ConfigError};
use lazy_static::lazy_static;
use serde::Deserialize;
use std::{env, path::Path};

#[derive(Debug, Clone, Deserialize)]
pub struct BudgetConfig {
    /// Metadata-source units one invocation may spend.
    pub quota_units: u64,
    pub time_limit_secs: u64,
    pub safety_margin_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> lib_utils::retry::RetryPolicy {
        lib_utils::retry::RetryPolicy::new(
            self.max_attempts,
            std::time::Duration::from_millis(self.base_delay_ms),
            std::time::Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// Declared quota cost of each Data API method.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct QuotaCosts {
    pub channels_list: u64,
    pub playlist_items: u64,
    pub search: u64,
}

impl Default for QuotaCosts {
    fn default() -> Self {
        Self {
            channels_list: 1,
            playlist_items: 1,
            search: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    pub base_url: String,
    pub recent_videos: u32,
    pub timeout_secs: u64,
    pub retry: RetryConfig,
    pub costs: QuotaCosts,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub min_spacing_ms: u64,
    pub max_in_flight: usize,
    pub backoff_secs: u64,
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    pub batch_size: usize,
    pub concurrency: usize,
    pub store_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Brand-safety scores that send a channel to the exclusion list.
    pub blocked_brand_safety_scores: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptConfig {
    pub system: String,
    /// minijinja template rendered with the fetched channel metadata.
    pub user_template: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    pub cron: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    pub subject: String,
    pub output_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnricherConfig {
    pub budget: BudgetConfig,
    pub fetch: FetchConfig,
    pub classify: ClassifyConfig,
    pub orchestrator: OrchestratorConfig,
    pub report: ReportConfig,
    pub prompts: PromptConfig,
    pub keywords: Vec<String>,
    pub schedule: ScheduleConfig,
    pub delivery: DeliveryConfig,
}

impl EnricherConfig {
    /// Load `path` layered with `ENRICHER__SECTION__KEY` environment overrides.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("ENRICHER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

impl std::fmt::Display for EnricherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Enricher Config:\nBudget: {:?}\n\nFetch: {:?}\n\nClassify: {:?}\n\nOrchestrator: {:?}\n\nReport: {:?}\n\nKeywords: {}\n\nSchedule: {:?}\n\nDelivery: {:?}",
            self.budget,
            self.fetch,
            self.classify,
            self.orchestrator,
            self.report,
            self.keywords.join(", "),
            self.schedule,
            self.delivery,
        )
    }
}

pub fn config_dir() -> String {
    env::var("APP_DIR").unwrap_or_else(|_| {
        let dir =
            env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR or APP_DIR is required");
        let dir = Path::new(&dir)
            .parent()
            .expect("Failed to get parent dir")
            .display()
            .to_string();
        format!("{}/config", dir)
    })
}

lazy_static! {
    pub static ref cfg: EnricherConfig = {
        let path = format!("{}/config.toml", config_dir());
        EnricherConfig::from_file(&path).expect("config.toml is required and must be valid")
    };
}
