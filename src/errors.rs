use serde::Serialize;

/// Typed error taxonomy for the dispatch pipeline.
///
/// `ConfigurationError` surfaces at startup; everything else is produced
/// per-call and handled at the orchestrator boundary — the process never
/// crashes on a backend or LLM failure.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error calling '{tool}' on backend '{backend}': {message}")]
    Transport {
        backend: String,
        tool: String,
        message: String,
    },

    #[error("backend error ({status_code:?}): {raw_error}")]
    Backend {
        raw_error: String,
        status_code: Option<u16>,
    },

    #[error("validation error after {retries} retries: {message}")]
    Validation { message: String, retries: u32 },

    #[error("schema error: missing required argument '{param}' for tool '{tool}'")]
    Schema { tool: String, param: String },

    /// Not a failure — a dangerous call is waiting on caller approval.
    #[error("authorization pending for tool '{tool}'")]
    AuthorizationPending { tool: String },

    #[error("cancelled")]
    Cancellation,
}

impl DispatchError {
    /// Short tag used in logs and the diagnostics formatter.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Transport { .. } => "transport",
            Self::Backend { .. } => "backend",
            Self::Validation { .. } => "validation",
            Self::Schema { .. } => "schema",
            Self::AuthorizationPending { .. } => "authorization_pending",
            Self::Cancellation => "cancellation",
        }
    }
}

/// Wire-shaped failure payload matching the `*_list_pods`-style tool result
/// schemas' failure case: `{success:false, error, raw_error?, status_code?}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl From<&DispatchError> for ErrorPayload {
    fn from(err: &DispatchError) -> Self {
        match err {
            DispatchError::Backend {
                raw_error,
                status_code,
            } => ErrorPayload {
                success: false,
                error: err.to_string(),
                raw_error: Some(raw_error.clone()),
                status_code: *status_code,
            },
            other => ErrorPayload {
                success: false,
                error: other.to_string(),
                raw_error: None,
                status_code: None,
            },
        }
    }
}
