//! Configuration for the approval engine and daemon

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// State machine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Reminder scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Notification dispatch settings
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Static organisation data for the built-in resolvers
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// JSON file of template drafts published at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates_path: Option<String>,
}

/// State machine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How many times a mutation reloads and retries after losing an
    /// optimistic-lock race
    #[serde(default = "default_max_commit_retries")]
    pub max_commit_retries: u32,

    /// Principals allowed to cancel any request and reassign blocked steps
    #[serde(default)]
    pub admins: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_commit_retries: default_max_commit_retries(),
            admins: Vec::new(),
        }
    }
}

/// Reminder scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Scan interval in seconds
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Run the background scan at all
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            enabled: true,
        }
    }
}

/// Notification dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Delivery attempts per notification before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial retry backoff in milliseconds; doubles per attempt
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Organisation chart and role membership, keyed by principal id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// employee -> line manager
    #[serde(default)]
    pub managers: HashMap<String, String>,

    /// employee -> department
    #[serde(default)]
    pub departments: HashMap<String, String>,

    /// department -> head
    #[serde(default)]
    pub department_heads: HashMap<String, String>,

    /// role label ("HR", "Finance", "Safety Officer") -> members
    #[serde(default)]
    pub roles: HashMap<String, Vec<String>>,
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_max_commit_retries() -> u32 {
    5
}

fn default_scan_interval() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_backoff() -> u64 {
    200
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ApprovalConfig {
    /// Load configuration: built-in defaults, then the optional file,
    /// then `APPROVAL_*` environment variables (`__` separates nesting,
    /// e.g. `APPROVAL_SCHEDULER__SCAN_INTERVAL_SECS`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&ApprovalConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("APPROVAL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
