use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub context: ContextConfig,
    pub budget: BudgetConfig,
    pub webhook: WebhookConfig,
    pub jobs: JobsConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub model: String,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct ContextConfig {
    pub max_context_chars: usize,
    pub catalog_limit: usize,
    pub semantic_top_k: usize,
    pub snippet_chars: usize,
    pub catalog_timeout_secs: u64,
    pub semantic_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct BudgetConfig {
    pub max_tokens: usize,
    pub reserved_tokens: usize,
    pub chars_per_token: usize,
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub endpoint: String,
    pub secret: Option<SecretString>,
    pub channel: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct JobsConfig {
    pub retention_hours: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub webhook_endpoint: Option<String>,
    pub webhook_secret: Option<String>,
    pub webhook_channel: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                model: "gpt-4o-mini".to_string(),
                api_key: None,
                base_url: None,
                timeout_secs: 30,
                max_retries: 1,
            },
            context: ContextConfig {
                max_context_chars: 6_000,
                catalog_limit: 10,
                semantic_top_k: 5,
                snippet_chars: 240,
                catalog_timeout_secs: 4,
                semantic_timeout_secs: 4,
            },
            budget: BudgetConfig {
                max_tokens: 24_000,
                reserved_tokens: 8_000,
                chars_per_token: 4,
            },
            webhook: WebhookConfig {
                endpoint: String::new(),
                secret: None,
                channel: "whatsapp".to_string(),
                timeout_secs: 10,
            },
            jobs: JobsConfig { retention_hours: 24, sweep_interval_secs: 3_600 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    context: Option<ContextPatch>,
    budget: Option<BudgetPatch>,
    webhook: Option<WebhookPatch>,
    jobs: Option<JobsPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    model: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ContextPatch {
    max_context_chars: Option<usize>,
    catalog_limit: Option<usize>,
    semantic_top_k: Option<usize>,
    snippet_chars: Option<usize>,
    catalog_timeout_secs: Option<u64>,
    semantic_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct BudgetPatch {
    max_tokens: Option<usize>,
    reserved_tokens: Option<usize>,
    chars_per_token: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPatch {
    endpoint: Option<String>,
    secret: Option<String>,
    channel: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct JobsPatch {
    retention_hours: Option<u64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("merchat.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(context) = patch.context {
            if let Some(max_context_chars) = context.max_context_chars {
                self.context.max_context_chars = max_context_chars;
            }
            if let Some(catalog_limit) = context.catalog_limit {
                self.context.catalog_limit = catalog_limit;
            }
            if let Some(semantic_top_k) = context.semantic_top_k {
                self.context.semantic_top_k = semantic_top_k;
            }
            if let Some(snippet_chars) = context.snippet_chars {
                self.context.snippet_chars = snippet_chars;
            }
            if let Some(catalog_timeout_secs) = context.catalog_timeout_secs {
                self.context.catalog_timeout_secs = catalog_timeout_secs;
            }
            if let Some(semantic_timeout_secs) = context.semantic_timeout_secs {
                self.context.semantic_timeout_secs = semantic_timeout_secs;
            }
        }

        if let Some(budget) = patch.budget {
            if let Some(max_tokens) = budget.max_tokens {
                self.budget.max_tokens = max_tokens;
            }
            if let Some(reserved_tokens) = budget.reserved_tokens {
                self.budget.reserved_tokens = reserved_tokens;
            }
            if let Some(chars_per_token) = budget.chars_per_token {
                self.budget.chars_per_token = chars_per_token;
            }
        }

        if let Some(webhook) = patch.webhook {
            if let Some(endpoint) = webhook.endpoint {
                self.webhook.endpoint = endpoint;
            }
            if let Some(secret) = webhook.secret {
                self.webhook.secret = Some(secret_value(secret));
            }
            if let Some(channel) = webhook.channel {
                self.webhook.channel = channel;
            }
            if let Some(timeout_secs) = webhook.timeout_secs {
                self.webhook.timeout_secs = timeout_secs;
            }
        }

        if let Some(jobs) = patch.jobs {
            if let Some(retention_hours) = jobs.retention_hours {
                self.jobs.retention_hours = retention_hours;
            }
            if let Some(sweep_interval_secs) = jobs.sweep_interval_secs {
                self.jobs.sweep_interval_secs = sweep_interval_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("MERCHAT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("MERCHAT_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("MERCHAT_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("MERCHAT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("MERCHAT_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("MERCHAT_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("MERCHAT_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("MERCHAT_CONTEXT_MAX_CHARS") {
            self.context.max_context_chars = parse_usize("MERCHAT_CONTEXT_MAX_CHARS", &value)?;
        }
        if let Some(value) = read_env("MERCHAT_CONTEXT_CATALOG_TIMEOUT_SECS") {
            self.context.catalog_timeout_secs =
                parse_u64("MERCHAT_CONTEXT_CATALOG_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("MERCHAT_CONTEXT_SEMANTIC_TIMEOUT_SECS") {
            self.context.semantic_timeout_secs =
                parse_u64("MERCHAT_CONTEXT_SEMANTIC_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("MERCHAT_BUDGET_MAX_TOKENS") {
            self.budget.max_tokens = parse_usize("MERCHAT_BUDGET_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("MERCHAT_BUDGET_RESERVED_TOKENS") {
            self.budget.reserved_tokens = parse_usize("MERCHAT_BUDGET_RESERVED_TOKENS", &value)?;
        }
        if let Some(value) = read_env("MERCHAT_BUDGET_CHARS_PER_TOKEN") {
            self.budget.chars_per_token = parse_usize("MERCHAT_BUDGET_CHARS_PER_TOKEN", &value)?;
        }

        if let Some(value) = read_env("MERCHAT_WEBHOOK_ENDPOINT") {
            self.webhook.endpoint = value;
        }
        if let Some(value) = read_env("MERCHAT_WEBHOOK_SECRET") {
            self.webhook.secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("MERCHAT_WEBHOOK_CHANNEL") {
            self.webhook.channel = value;
        }
        if let Some(value) = read_env("MERCHAT_WEBHOOK_TIMEOUT_SECS") {
            self.webhook.timeout_secs = parse_u64("MERCHAT_WEBHOOK_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("MERCHAT_JOBS_RETENTION_HOURS") {
            self.jobs.retention_hours = parse_u64("MERCHAT_JOBS_RETENTION_HOURS", &value)?;
        }
        if let Some(value) = read_env("MERCHAT_JOBS_SWEEP_INTERVAL_SECS") {
            self.jobs.sweep_interval_secs = parse_u64("MERCHAT_JOBS_SWEEP_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("MERCHAT_LOGGING_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read_env("MERCHAT_LOGGING_FORMAT") {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(webhook_endpoint) = overrides.webhook_endpoint {
            self.webhook.endpoint = webhook_endpoint;
        }
        if let Some(webhook_secret) = overrides.webhook_secret {
            self.webhook.secret = Some(secret_value(webhook_secret));
        }
        if let Some(webhook_channel) = overrides.webhook_channel {
            self.webhook.channel = webhook_channel;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
        }
        if self.llm.timeout_secs == 0 {
            return Err(ConfigError::Validation("llm.timeout_secs must be positive".to_string()));
        }
        if self.context.max_context_chars == 0 {
            return Err(ConfigError::Validation(
                "context.max_context_chars must be positive".to_string(),
            ));
        }
        if self.context.catalog_timeout_secs == 0 || self.context.semantic_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "context lookup timeouts must be positive".to_string(),
            ));
        }
        if self.budget.max_tokens == 0 {
            return Err(ConfigError::Validation("budget.max_tokens must be positive".to_string()));
        }
        if self.budget.chars_per_token == 0 {
            return Err(ConfigError::Validation(
                "budget.chars_per_token must be positive".to_string(),
            ));
        }
        if !self.webhook.endpoint.is_empty()
            && !self.webhook.endpoint.starts_with("http://")
            && !self.webhook.endpoint.starts_with("https://")
        {
            return Err(ConfigError::Validation(
                "webhook.endpoint must be an http(s) URL".to_string(),
            ));
        }
        if self.jobs.retention_hours == 0 {
            return Err(ConfigError::Validation(
                "jobs.retention_hours must be positive".to_string(),
            ));
        }
        let level = self.logging.level.trim().to_ascii_lowercase();
        if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
            return Err(ConfigError::Validation(format!(
                "unsupported logging.level `{}`",
                self.logging.level
            )));
        }
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("merchat.toml"), PathBuf::from("config/merchat.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}
