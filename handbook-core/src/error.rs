//! Error taxonomy for the handbook pipeline.
//!
//! Every variant records the [`Stage`] that produced it, so a caller can tell
//! which stage to re-invoke. Nothing in this crate retries on its own.

use std::fmt;
use std::path::PathBuf;

/// Pipeline stage an error (or a run) is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Organize,
    Preview,
    Render,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Organize => "organize",
            Stage::Preview => "preview",
            Stage::Render => "render",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandbookError {
    /// Missing or rejected credential.
    #[error("[{stage}] authentication failed for {target}: {message}")]
    Auth {
        stage: Stage,
        target: String,
        message: String,
    },

    /// Repository, reference or path does not exist or is not visible.
    #[error("[fetch] not found: {repository}{}", path_suffix(.path))]
    NotFound {
        repository: String,
        path: Option<String>,
    },

    /// The text-generation call failed or answered with something unusable.
    #[error("[organize] summarization failed for {repository}: {message} (failed paths: {failed_paths:?})")]
    Summarization {
        repository: String,
        message: String,
        failed_paths: Vec<String>,
    },

    /// The rendering service rejected the payload.
    #[error("[render] rendering service rejected {repository} (status {status}): {body}")]
    Render {
        repository: String,
        status: u16,
        body: String,
    },

    /// A remote service could not be reached or the connection broke.
    #[error("[{stage}] transport error talking to {endpoint}: {message}")]
    Transport {
        stage: Stage,
        endpoint: String,
        message: String,
    },

    /// A preview edit or a handbook violated a structural invariant.
    #[error("[{stage}] validation error: {message}")]
    Validation { stage: Stage, message: String },

    /// The run was asked to do something its current state does not allow.
    #[error("invalid state: cannot {action} while {state}")]
    InvalidState { action: String, state: String },

    #[error("config error: {message}")]
    Config { message: String },

    #[error("[{stage}] I/O error at {path:?}: {source}")]
    Io {
        stage: Stage,
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, HandbookError>;

fn path_suffix(path: &Option<String>) -> String {
    path.as_deref()
        .map(|p| format!(" ({p})"))
        .unwrap_or_default()
}

impl HandbookError {
    pub fn validation(stage: Stage, msg: impl Into<String>) -> Self {
        Self::Validation {
            stage,
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn not_found(repository: impl Into<String>, path: Option<String>) -> Self {
        Self::NotFound {
            repository: repository.into(),
            path,
        }
    }

    pub fn transport(stage: Stage, endpoint: impl Into<String>, msg: impl fmt::Display) -> Self {
        Self::Transport {
            stage,
            endpoint: endpoint.into(),
            message: msg.to_string(),
        }
    }

    pub fn io(stage: Stage, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            stage,
            path: path.into(),
            source,
        }
    }

    /// Stage the error belongs to. `None` for errors raised outside any stage.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Auth { stage, .. }
            | Self::Transport { stage, .. }
            | Self::Validation { stage, .. }
            | Self::Io { stage, .. } => Some(*stage),
            Self::NotFound { .. } => Some(Stage::Fetch),
            Self::Summarization { .. } => Some(Stage::Organize),
            Self::Render { .. } => Some(Stage::Render),
            Self::InvalidState { .. } | Self::Config { .. } => None,
        }
    }

    /// Whether re-invoking the same stage alone can succeed.
    ///
    /// Auth and NotFound need the user to change credentials or input first.
    pub fn is_retryable_stage(&self) -> bool {
        matches!(
            self,
            Self::Summarization { .. } | Self::Render { .. } | Self::Transport { .. }
        )
    }

    /// Document paths this error is about, for reporting.
    pub fn affected_paths(&self) -> Vec<String> {
        match self {
            Self::Summarization { failed_paths, .. } => failed_paths.clone(),
            Self::NotFound {
                path: Some(path), ..
            } => vec![path.clone()],
            _ => Vec::new(),
        }
    }
}
