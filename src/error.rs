use thiserror::Error;

/// The two key-based collections the history layer persists into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    Sessions,
    Messages,
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Table::Sessions => f.write_str("sessions"),
            Table::Messages => f.write_str("messages"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing collection has not been provisioned yet.
    #[error("{0} table is not provisioned")]
    ResourceMissing(Table),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to (de)serialize stored record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("history backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status {
        status: u16,
        body: String,
    },

    #[error("failed to decode backend payload: {0}")]
    Decode(String),

    #[error("backend stream error: {0}")]
    Stream(String),

    #[error("invalid LLM configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        LlmError::Decode(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("{0}")]
    Validation(String),
}

/// Shown to callers in place of internal failure detail.
pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred while processing your request";

impl ChatError {
    /// Message safe to hand to a caller. Only validation failures carry detail.
    pub fn public_message(&self) -> String {
        match self {
            ChatError::Validation(message) => message.clone(),
            _ => GENERIC_ERROR_MESSAGE.to_string(),
        }
    }
}
