use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::DispatchError;

/// Top-level dispatcher configuration, assembled once at startup from
/// environment variables under the `DEVOPS_` prefix. Mirrors the field set
/// of the original `AgenticSettings` (`examples/original_source/devops_agent/settings.py`),
/// re-architected as an explicit struct built once and threaded through
/// rather than a lazily-initialized global.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub log_level: String,

    /// Chat/completion model used by Stage B (chain-of-thought) reasoning.
    pub llm_model: String,
    /// Fast zero-shot model used by Stage A. Defaults to `llm_model`.
    pub llm_fast_model: String,
    /// Base URL of the external LLM completion/embedding service.
    pub llm_host: String,
    pub llm_temperature: f64,

    pub embedding_model: String,
    pub embedding_host: String,

    pub docker_url: String,
    pub local_k8s_url: String,
    pub remote_k8s_url: String,
    pub remote_k8s_verify_ssl: bool,
    pub remote_k8s_token_path: Option<PathBuf>,

    pub backend_timeout: Duration,
    pub llm_timeout: Duration,
    pub pulse_interval: Duration,
    pub pulse_timeout: Duration,

    /// Require explicit confirmation before executing a dangerous tool call.
    pub safety_confirm: bool,

    /// Directory used for on-disk state: semantic cache, intent embeddings,
    /// tool-embedding cache/index, auto-templates, session log.
    pub state_dir: PathBuf,

    pub max_retries: u32,

    pub admin: AdminConfig,
}

/// Admin/introspection HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "127.0.0.1:19099".to_string(),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_bool(key: &str, default: bool) -> Result<bool, DispatchError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(DispatchError::Configuration(format!(
                "{key}: invalid boolean '{other}'"
            ))),
        },
    }
}

fn env_f64(key: &str, default: f64) -> Result<f64, DispatchError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(v) => v
            .parse()
            .map_err(|_| DispatchError::Configuration(format!("{key}: invalid float '{v}'"))),
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32, DispatchError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(v) => v
            .parse()
            .map_err(|_| DispatchError::Configuration(format!("{key}: invalid integer '{v}'"))),
    }
}

fn env_secs(key: &str, default_secs: u64) -> Result<Duration, DispatchError> {
    match std::env::var(key) {
        Err(_) => Ok(Duration::from_secs(default_secs)),
        Ok(v) => v
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| DispatchError::Configuration(format!("{key}: invalid seconds '{v}'"))),
    }
}

impl Config {
    /// Build configuration from the current process environment.
    ///
    /// Every field has a documented default; nothing here fails unless an
    /// env var is present but malformed (wrong type), which is reported as
    /// a `ConfigurationError` surfaced at startup.
    pub fn from_env() -> Result<Self, DispatchError> {
        let llm_model = env_string("DEVOPS_LLM_MODEL", "qwen2.5:72b-instruct");
        let llm_fast_model =
            env_opt_string("DEVOPS_LLM_FAST_MODEL").unwrap_or_else(|| llm_model.clone());

        let state_dir = env_opt_string("DEVOPS_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_state_dir);

        let config = Self {
            log_level: env_string("DEVOPS_LOG_LEVEL", "info"),

            llm_model,
            llm_fast_model,
            llm_host: env_string("DEVOPS_LLM_HOST", "http://127.0.0.1:11434"),
            llm_temperature: env_f64("DEVOPS_LLM_TEMPERATURE", 0.1)?,

            embedding_model: env_string("DEVOPS_EMBEDDING_MODEL", "nomic-embed-text"),
            embedding_host: env_string("DEVOPS_EMBEDDING_HOST", "http://127.0.0.1:11434"),

            docker_url: env_string("DEVOPS_DOCKER_URL", "http://127.0.0.1:8080"),
            local_k8s_url: env_string("DEVOPS_LOCAL_K8S_URL", "http://127.0.0.1:8081"),
            remote_k8s_url: env_string("DEVOPS_REMOTE_K8S_API_URL", "https://127.0.0.1:8082"),
            remote_k8s_verify_ssl: env_bool("DEVOPS_REMOTE_K8S_VERIFY_SSL", false)?,
            remote_k8s_token_path: env_opt_string("DEVOPS_REMOTE_K8S_TOKEN_PATH")
                .map(PathBuf::from),

            backend_timeout: env_secs("DEVOPS_BACKEND_TIMEOUT_SECS", 30)?,
            llm_timeout: env_secs("DEVOPS_LLM_TIMEOUT_SECS", 15)?,
            pulse_interval: env_secs("DEVOPS_PULSE_INTERVAL_SECS", 15)?,
            pulse_timeout: env_secs("DEVOPS_PULSE_TIMEOUT_SECS", 5)?,

            safety_confirm: env_bool("DEVOPS_SAFETY_CONFIRM", true)?,

            state_dir,

            max_retries: env_u32("DEVOPS_MAX_RETRIES", 2)?,

            admin: AdminConfig {
                enabled: env_bool("DEVOPS_ADMIN_ENABLED", false)?,
                listen: env_string("DEVOPS_ADMIN_LISTEN", "127.0.0.1:19099"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), DispatchError> {
        if self.llm_model.trim().is_empty() {
            return Err(DispatchError::Configuration(
                "DEVOPS_LLM_MODEL must not be empty".to_string(),
            ));
        }
        if self.embedding_model.trim().is_empty() {
            return Err(DispatchError::Configuration(
                "DEVOPS_EMBEDDING_MODEL must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn semantic_cache_path(&self) -> PathBuf {
        self.state_dir.join("semantic_cache.json")
    }

    pub fn intent_embedding_cache_path(&self) -> PathBuf {
        self.state_dir.join("intent_embeddings.json")
    }

    /// Curated `{text, tool, args}` examples the Intent Router loads at
    /// startup, distinct from the embedding cache derived from them.
    pub fn intents_path(&self) -> PathBuf {
        self.state_dir.join("intents.json")
    }

    pub fn tool_embedding_cache_path(&self) -> PathBuf {
        self.state_dir.join("tool_embeddings.json")
    }

    pub fn tool_index_path(&self) -> PathBuf {
        self.state_dir.join("tool_index.json")
    }

    pub fn auto_template_path(&self) -> PathBuf {
        self.state_dir.join("auto_templates.json")
    }

    pub fn session_log_path(&self) -> PathBuf {
        self.state_dir.join("sessions.log")
    }
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".devops-dispatcher"))
        .unwrap_or_else(|| PathBuf::from(".devops-dispatcher"))
}
