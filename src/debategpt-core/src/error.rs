//! Error types for the debate pipeline.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DebateGptError {
    #[error("Data integrity violation: {count} vote(s) checked both sides of a category (first: debate {debate_id}, voter {voter_id})")]
    InvalidVotes {
        count: usize,
        debate_id: String,
        voter_id: String,
    },

    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("Invalid input shape: {0}")]
    InvalidInputShape(String),

    #[error("'{0}' is not a valid role, expected 'system', 'user' or 'assistant'")]
    InvalidRole(String),

    #[error("Context window unknown for model {0}")]
    UnknownModel(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Invalid date '{value}': {source}")]
    InvalidDate {
        value: String,
        source: chrono::ParseError,
    },

    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    #[error("Model call failed: {0}")]
    ModelCall(String),

    #[error("Model call failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl DebateGptError {
    /// Whether a failed model call may succeed when attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ModelCall(_) => true,
            Self::OpenAIError(e) => {
                !matches!(e, async_openai::error::OpenAIError::InvalidArgument(_))
            }
            _ => false,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, DebateGptError>;
