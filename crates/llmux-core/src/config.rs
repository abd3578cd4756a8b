//! Configuration system for llmux.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Error;
use crate::task::TaskType;

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Model tried when every route for a task has failed.
pub const DEFAULT_FALLBACK_MODEL: &str = "openai/gpt-4o-mini";

/// Main configuration struct for llmux.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Provider configurations
    pub providers: ProvidersConfig,
    /// Task routing
    pub router: RouterConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// OpenAI configuration
    pub openai: ProviderConfig,
    /// Anthropic configuration
    pub anthropic: ProviderConfig,
    /// Google Gemini configuration
    pub google: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key (can be set directly or via environment)
    pub api_key: Option<String>,
    /// Environment variable name for API key
    pub api_key_env: Option<String>,
    /// Base URL (optional, for custom endpoints)
    pub base_url: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: None,
            base_url: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ProviderConfig {
    /// Resolve the API key from the direct value, the configured environment
    /// variable, or `default_env` in that order.
    pub fn resolve_api_key(&self, default_env: &str) -> Option<String> {
        if let Some(ref key) = self.api_key {
            return Some(key.clone());
        }
        if let Some(ref env_var) = self.api_key_env {
            if let Ok(key) = std::env::var(env_var) {
                return Some(key);
            }
        }
        std::env::var(default_env).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Model tried once after every route for a task has failed
    pub fallback_model: String,
    /// Route table; when empty the built-in defaults are used
    pub routes: Vec<RouteConfig>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            fallback_model: DEFAULT_FALLBACK_MODEL.to_string(),
            routes: Vec::new(),
        }
    }
}

/// One configured route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Task type the route serves
    pub task: TaskType,
    /// Qualified model id (`provider/model`)
    pub model: String,
    /// Higher is tried first
    #[serde(default)]
    pub priority: i32,
    /// Advertised output ceiling, informational
    #[serde(default)]
    pub max_tokens: u32,
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Error).collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "router.fallback_model")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Figment with every configuration source merged in priority order.
    ///
    /// Environment overrides use `__` as the nesting separator, e.g.
    /// `LLMUX_PROVIDERS__OPENAI__BASE_URL`.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(Self::config_dir().join("config.toml")))
            .merge(Toml::file(".llmux/config.toml"))
            // Project local config (gitignored)
            .merge(Toml::file(".llmux/config.local.toml"))
            .merge(Env::prefixed("LLMUX_").split("__"))
    }

    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    /// Load and validate configuration.
    pub fn load_validated() -> Result<Self, Error> {
        let config = Self::load().map_err(|e| Error::Config(e.to_string()))?;
        let result = config.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        let providers = [
            ("openai", &self.providers.openai),
            ("anthropic", &self.providers.anthropic),
            ("google", &self.providers.google),
        ];
        for (name, provider) in providers {
            if provider.api_key.as_ref().map(|k| k.is_empty()).unwrap_or(false) {
                result.add_warning(format!("providers.{}.api_key", name), "API key is empty string");
            }
            if let Some(ref base_url) = provider.base_url {
                if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                    result.add_error(
                        format!("providers.{}.base_url", name),
                        "base_url must start with http:// or https://",
                    );
                }
            }
            if provider.timeout_secs == 0 {
                result.add_error(
                    format!("providers.{}.timeout_secs", name),
                    "timeout_secs must be greater than 0",
                );
            }
        }

        if self.router.fallback_model.is_empty() {
            result.add_warning("router.fallback_model", "No fallback model; routing fails once every route fails");
        } else if !is_qualified(&self.router.fallback_model) {
            result.add_error(
                "router.fallback_model",
                format!("'{}' must be of the form provider/model", self.router.fallback_model),
            );
        }

        for (i, route) in self.router.routes.iter().enumerate() {
            if !is_qualified(&route.model) {
                result.add_error(
                    format!("router.routes[{}].model", i),
                    format!("'{}' must be of the form provider/model", route.model),
                );
            }
        }

        result
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("llmux"))
            .unwrap_or_else(|| PathBuf::from("~/.config/llmux"))
    }
}

fn is_qualified(model_id: &str) -> bool {
    matches!(model_id.split_once('/'), Some((provider, model)) if !provider.is_empty() && !model.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_ok(), "Default config should be valid: {:?}", result.issues);
        assert_eq!(config.router.fallback_model, DEFAULT_FALLBACK_MODEL);
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = Config::default();
        config.providers.google.base_url = Some("generativelanguage.googleapis.com".to_string());
        let result = config.validate();
        assert!(!result.is_ok());
        assert!(result.errors().iter().any(|e| e.field == "providers.google.base_url"));
    }

    #[test]
    fn test_unqualified_route_model() {
        let mut config = Config::default();
        config.router.routes.push(RouteConfig {
            task: TaskType::General,
            model: "gpt-4o".to_string(),
            priority: 1,
            max_tokens: 0,
        });
        let result = config.validate();
        assert!(result.errors().iter().any(|e| e.field == "router.routes[0].model"));
    }

    #[test]
    fn test_empty_fallback_is_warning() {
        let mut config = Config::default();
        config.router.fallback_model.clear();
        let result = config.validate();
        assert!(result.is_ok());
        assert!(result.warnings().iter().any(|e| e.field == "router.fallback_model"));
    }

    #[test]
    fn test_zero_timeout_is_error() {
        let mut config = Config::default();
        config.providers.openai.timeout_secs = 0;
        assert!(!config.validate().is_ok());
    }

    #[test]
    fn test_routes_from_toml() {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(
                r#"
                [router]
                fallback_model = "anthropic/claude-3-haiku-20240307"

                [[router.routes]]
                task = "code_generation"
                model = "openai/gpt-4o"
                priority = 3
                max_tokens = 8192
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(config.router.fallback_model, "anthropic/claude-3-haiku-20240307");
        assert_eq!(config.router.routes.len(), 1);
        assert_eq!(config.router.routes[0].task, TaskType::CodeGeneration);
        assert_eq!(config.providers.openai.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("LLMUX_PROVIDERS__OPENAI__BASE_URL", "http://localhost:8080/v1");
            let config = Config::load()?;
            assert_eq!(
                config.providers.openai.base_url.as_deref(),
                Some("http://localhost:8080/v1")
            );
            Ok(())
        });
    }

    #[test]
    fn test_resolve_api_key_prefers_direct_value() {
        let config = ProviderConfig {
            api_key: Some("direct".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolve_api_key("LLMUX_TEST_UNSET_KEY").as_deref(), Some("direct"));
    }
}
