//! Configuration management for Slidenotes.
//!
//! Configuration is layered: an optional YAML file, then `SLIDENOTES__*`
//! environment variables, then the handful of legacy variable names the
//! service has always honoured (`GEMINI_API_KEY`, `PORT`, ...).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::admission::Provider;
use crate::error::{Result, SlidenotesError};

/// Main configuration for the Slidenotes service.
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// On-disk store locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Admission control configuration
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// AI provider credentials and tuning
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,

    /// Allowed CORS origins; empty allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Largest accepted upload, in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            cors_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5002))
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

/// Locations of the JSON stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Daily usage counters
    #[serde(default = "default_usage_path")]
    pub usage_path: PathBuf,

    /// Generated notes keyed by file id
    #[serde(default = "default_notes_path")]
    pub notes_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            usage_path: default_usage_path(),
            notes_path: default_notes_path(),
        }
    }
}

fn default_usage_path() -> PathBuf {
    PathBuf::from("data/usage.json")
}

fn default_notes_path() -> PathBuf {
    PathBuf::from("data/notes.json")
}

/// What a gate does when it fails internally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Admit the request and log the fault
    #[default]
    Open,
    /// Reject the request as unavailable
    Closed,
}

/// Admission control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Behaviour on internal gate errors
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// How often expired rate windows are evicted, in seconds (0 disables)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Per-provider limits
    #[serde(default)]
    pub limits: LimitTable,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            sweep_interval_secs: default_sweep_interval(),
            limits: LimitTable::default(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

/// Limits keyed by provider, with a fallback for unlisted providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitTable {
    /// Limits applied to providers without an explicit entry
    #[serde(default)]
    pub default: ProviderLimits,

    /// Per-provider limits. Configured fields are layered over the built-in
    /// entry for that provider.
    #[serde(
        default = "default_provider_limits",
        deserialize_with = "deserialize_provider_limits"
    )]
    pub providers: HashMap<Provider, ProviderLimits>,
}

impl Default for LimitTable {
    fn default() -> Self {
        Self {
            default: ProviderLimits::default(),
            providers: default_provider_limits(),
        }
    }
}

impl LimitTable {
    /// Look up the limits for a provider.
    pub fn for_provider(&self, provider: &Provider) -> &ProviderLimits {
        self.providers.get(provider).unwrap_or(&self.default)
    }
}

fn default_provider_limits() -> HashMap<Provider, ProviderLimits> {
    HashMap::from([
        (
            Provider::Gemini,
            ProviderLimits {
                window_ms: 60_000,
                max_requests: 5,
                daily: DailyQuotaConfig {
                    enabled: true,
                    max: 20,
                },
            },
        ),
        (
            Provider::OpenRouter,
            ProviderLimits {
                window_ms: 60_000,
                max_requests: 10,
                daily: DailyQuotaConfig::default(),
            },
        ),
    ])
}

fn deserialize_provider_limits<'de, D>(
    deserializer: D,
) -> std::result::Result<HashMap<Provider, ProviderLimits>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let overrides = HashMap::<Provider, PartialLimits>::deserialize(deserializer)?;
    let mut limits = default_provider_limits();
    for (provider, partial) in overrides {
        let entry = limits.entry(provider).or_default();
        partial.apply(entry);
    }
    Ok(limits)
}

/// A possibly incomplete `ProviderLimits` as written in configuration.
#[derive(Debug, Default, Deserialize)]
struct PartialLimits {
    window_ms: Option<u64>,
    max_requests: Option<u64>,
    #[serde(default)]
    daily: PartialDailyQuota,
}

#[derive(Debug, Default, Deserialize)]
struct PartialDailyQuota {
    enabled: Option<bool>,
    max: Option<u64>,
}

impl PartialLimits {
    fn apply(self, limits: &mut ProviderLimits) {
        if let Some(window_ms) = self.window_ms {
            limits.window_ms = window_ms;
        }
        if let Some(max_requests) = self.max_requests {
            limits.max_requests = max_requests;
        }
        if let Some(enabled) = self.daily.enabled {
            limits.daily.enabled = enabled;
        }
        if let Some(max) = self.daily.max {
            limits.daily.max = max;
        }
    }
}

/// Rate window and daily cap for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderLimits {
    /// Length of the rate window in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Requests admitted per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// Cumulative per-day cap
    #[serde(default)]
    pub daily: DailyQuotaConfig,
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
            daily: DailyQuotaConfig::default(),
        }
    }
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_max_requests() -> u64 {
    20
}

/// Daily cumulative cap. A cap of zero disables the gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyQuotaConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub max: u64,
}

impl DailyQuotaConfig {
    /// The effective cap, if the gate is active.
    pub fn cap(&self) -> Option<u64> {
        (self.enabled && self.max > 0).then_some(self.max)
    }
}

/// AI provider configuration.
#[derive(Debug, Default, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub gemini: GeminiConfig,

    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Backoff applied when a provider throttles us
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Google Gemini settings.
#[derive(Debug, Deserialize)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: Option<SecretString>,

    #[serde(default = "default_gemini_model")]
    pub model: String,

    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_gemini_model(),
            base_url: default_gemini_base_url(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_output_tokens() -> u32 {
    8192
}

/// OpenRouter settings.
#[derive(Debug, Deserialize)]
pub struct OpenRouterConfig {
    #[serde(default)]
    pub api_key: Option<SecretString>,

    #[serde(default = "default_openrouter_model")]
    pub model: String,

    #[serde(default = "default_openrouter_base_url")]
    pub base_url: String,

    /// Sent as `HTTP-Referer`
    #[serde(default = "default_site_url")]
    pub site_url: String,

    /// Sent as `X-Title`
    #[serde(default = "default_site_name")]
    pub site_name: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_openrouter_model(),
            base_url: default_openrouter_base_url(),
            site_url: default_site_url(),
            site_name: default_site_name(),
        }
    }
}

fn default_openrouter_model() -> String {
    "google/gemini-2.0-flash-exp:free".to_string()
}

fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_site_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_site_name() -> String {
    "Lecture Notes AI".to_string()
}

/// Retry settings for throttled provider calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Ceiling for any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl AppConfig {
    /// Load configuration from an optional YAML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env = Environment::with_prefix("SLIDENOTES")
            .separator("__")
            .try_parsing(true);
        let mut config = Self::layered(path, env)?;
        config.apply_legacy_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn layered(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }

        Ok(builder.add_source(env).build()?.try_deserialize()?)
    }

    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| SlidenotesError::Config(e.to_string()))
    }

    /// Fill unset values from the legacy environment variable names.
    ///
    /// Explicitly configured values always win.
    pub fn apply_legacy_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let gemini = &mut self.providers.gemini;
        if gemini.api_key.is_none() {
            gemini.api_key = lookup("GEMINI_API_KEY").map(SecretString::from);
        }

        let openrouter = &mut self.providers.openrouter;
        if openrouter.api_key.is_none() {
            openrouter.api_key = lookup("OPENROUTER_API_KEY").map(SecretString::from);
        }
        if let Some(model) = lookup("OPENROUTER_MODEL") {
            if openrouter.model == default_openrouter_model() {
                openrouter.model = model;
            }
        }

        if let Some(path) = lookup("TOTAL_USAGE_STORE") {
            if self.storage.usage_path == default_usage_path() {
                self.storage.usage_path = PathBuf::from(path);
            }
        }
        if let Some(path) = lookup("NOTES_STORE") {
            if self.storage.notes_path == default_notes_path() {
                self.storage.notes_path = PathBuf::from(path);
            }
        }

        if let Some(port) = lookup("PORT").and_then(|p| p.parse::<u16>().ok()) {
            if self.server.addr == default_addr() {
                self.server.addr.set_port(port);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = AppConfig::from_yaml("{}").unwrap();

        assert_eq!(config.server.addr, default_addr());
        assert_eq!(config.storage.usage_path, PathBuf::from("data/usage.json"));
        assert_eq!(config.admission.failure_policy, FailurePolicy::Open);
        assert!(config.providers.gemini.api_key.is_none());
        assert_eq!(config.providers.retry.max_attempts, 3);
    }

    #[test]
    fn test_default_limits_are_stricter_for_gemini() {
        let table = LimitTable::default();

        let gemini = table.for_provider(&Provider::Gemini);
        let openrouter = table.for_provider(&Provider::OpenRouter);
        assert!(gemini.max_requests < openrouter.max_requests);
        assert_eq!(gemini.daily.cap(), Some(20));
        assert_eq!(openrouter.daily.cap(), None);

        let other = table.for_provider(&Provider::from("anthropic"));
        assert_eq!(other, &ProviderLimits::default());
    }

    #[test]
    fn test_parse_admission_limits() {
        let yaml = r#"
admission:
  failure_policy: closed
  sweep_interval_secs: 5
  limits:
    default:
      window_ms: 1000
      max_requests: 2
    providers:
      gemini:
        window_ms: 30000
        max_requests: 3
        daily:
          enabled: true
          max: 7
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        let admission = &config.admission;

        assert_eq!(admission.failure_policy, FailurePolicy::Closed);
        assert_eq!(admission.sweep_interval_secs, 5);

        let gemini = admission.limits.for_provider(&Provider::Gemini);
        assert_eq!(gemini.window_ms, 30_000);
        assert_eq!(gemini.daily.cap(), Some(7));

        // Providers left out of the map keep their built-in limits
        let openrouter = admission.limits.for_provider(&Provider::OpenRouter);
        assert_eq!(openrouter.max_requests, 10);

        let other = admission.limits.for_provider(&Provider::from("anthropic"));
        assert_eq!(other.max_requests, 2);
    }

    #[test]
    fn test_partial_provider_limits_keep_builtin_fields() {
        let yaml = r#"
admission:
  limits:
    providers:
      gemini:
        max_requests: 3
      anthropic:
        daily:
          max: 4
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        let limits = &config.admission.limits;

        let gemini = limits.for_provider(&Provider::Gemini);
        assert_eq!(gemini.max_requests, 3);
        assert_eq!(gemini.window_ms, 60_000);
        assert_eq!(gemini.daily.cap(), Some(20));

        assert_eq!(limits.for_provider(&Provider::OpenRouter).max_requests, 10);

        // New providers start from the stock defaults
        let other = limits.for_provider(&Provider::from("anthropic"));
        assert_eq!(other.max_requests, 20);
        assert_eq!(other.daily.max, 4);
        assert_eq!(other.daily.cap(), None);
    }

    #[test]
    fn test_env_override_of_one_limit_keeps_daily_cap() {
        let env = Environment::with_prefix("SLIDENOTES")
            .separator("__")
            .try_parsing(true)
            .source(Some(
                [(
                    "SLIDENOTES__ADMISSION__LIMITS__PROVIDERS__GEMINI__MAX_REQUESTS".to_string(),
                    "3".to_string(),
                )]
                .into_iter()
                .collect(),
            ));
        let config = AppConfig::layered(None, env).unwrap();
        let limits = &config.admission.limits;

        let gemini = limits.for_provider(&Provider::Gemini);
        assert_eq!(gemini.max_requests, 3);
        assert_eq!(gemini.daily.cap(), Some(20));
        assert_eq!(limits.for_provider(&Provider::OpenRouter).max_requests, 10);
    }

    #[test]
    fn test_zero_cap_disables_daily_quota() {
        let daily = DailyQuotaConfig {
            enabled: true,
            max: 0,
        };
        assert_eq!(daily.cap(), None);

        let daily = DailyQuotaConfig {
            enabled: false,
            max: 10,
        };
        assert_eq!(daily.cap(), None);
    }

    #[test]
    fn test_legacy_env_fills_unset_values() {
        let mut config = AppConfig::default();
        config.apply_legacy_env(|key| match key {
            "GEMINI_API_KEY" => Some("g-key".to_string()),
            "TOTAL_USAGE_STORE" => Some("/tmp/usage.json".to_string()),
            "PORT" => Some("5003".to_string()),
            _ => None,
        });

        let key = config.providers.gemini.api_key.as_ref().unwrap();
        assert_eq!(key.expose_secret(), "g-key");
        assert!(config.providers.openrouter.api_key.is_none());
        assert_eq!(config.storage.usage_path, PathBuf::from("/tmp/usage.json"));
        assert_eq!(config.server.addr.port(), 5003);
    }

    #[test]
    fn test_legacy_env_does_not_override_explicit_values() {
        let mut config = AppConfig::from_yaml(
            r#"
server:
  addr: "127.0.0.1:9000"
providers:
  gemini:
    api_key: from-file
"#,
        )
        .unwrap();
        config.apply_legacy_env(|key| match key {
            "GEMINI_API_KEY" => Some("from-env".to_string()),
            "PORT" => Some("5003".to_string()),
            _ => None,
        });

        let key = config.providers.gemini.api_key.as_ref().unwrap();
        assert_eq!(key.expose_secret(), "from-file");
        assert_eq!(config.server.addr.port(), 9000);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("slidenotes.yaml");
        std::fs::write(&path, "storage:\n  notes_path: /var/lib/slidenotes/notes.json\n").unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(
            config.storage.notes_path,
            PathBuf::from("/var/lib/slidenotes/notes.json")
        );
        assert_eq!(config.storage.usage_path, default_usage_path());
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = AppConfig::from_yaml("server: [").unwrap_err();
        assert!(matches!(err, SlidenotesError::Config(_)));
    }
}
