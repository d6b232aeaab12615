use thiserror::Error;

/// The named error kinds from the core's error handling design. Library
/// boundaries (`role`, `capability`, `conversation`, `agent_manager`,
/// `snapshot`) return `Result<_, CoreError>` so callers can match on kind;
/// the CLI binary collects these into `anyhow::Error` alongside I/O errors.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown role '{requested}'; available: {}", available.join(", "))]
    UnknownRole {
        requested: String,
        available: Vec<String>,
    },

    #[error("role '{name}' is ambiguous across groups: {}", groups.join(", "))]
    AmbiguousRole { name: String, groups: Vec<String> },

    #[error("role '{name}' declares both included_tools and excluded_tools")]
    ToolConfigConflict { name: String },

    #[error("tool-call budget of {limit} exceeded with no confirmation callback")]
    BudgetExceeded { limit: usize },

    #[error("assistant response mixed parsing and non-parsing tool calls")]
    ParsingToolMixed,

    #[error("role '{name}' declares a parsing tool but no parse-response handler is configured")]
    ParseHandlerMissing { name: String },

    #[error("tool '{tool}' failed: {message}")]
    ToolExecutionError { tool: String, message: String },

    #[error("role '{parent}' is not authorized to spawn '{child}'")]
    SpawnUnauthorized { parent: String, child: String },

    #[error("snapshot '{id}' not found")]
    SnapshotNotFound { id: String },

    #[error("snapshot strategy '{mode}' is unavailable")]
    StrategyUnavailable { mode: String },

    #[error("agent '{id}' not found")]
    UnknownAgent { id: String },

    #[error("agent '{id}' is already running")]
    AgentBusy { id: String },

    #[error("invalid snapshot manager request: {0}")]
    InvalidRequest(String),

    #[error("failed to capture '{path}': {message}")]
    CaptureError { path: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
