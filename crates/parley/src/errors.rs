use serde::{Deserialize, Serialize};
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ChatError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Structured output did not match schema: {0}")]
    SchemaViolation(String),

    #[error("Invalid input for tool {tool}: {reason}")]
    InvalidToolInput { tool: String, reason: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Unsupported message part: {0}")]
    UnsupportedPartKind(String),

    #[error("Stopped after {0} tool steps")]
    StepLimitExceeded(usize),

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn invalid_input<T: Into<String>, R: Into<String>>(tool: T, reason: R) -> Self {
        ChatError::InvalidToolInput {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Tool-level failures are handed back to the model as content instead of
    /// aborting the request.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ChatError::InvalidToolInput { .. }
                | ChatError::ToolNotFound(_)
                | ChatError::ToolExecution(_)
                | ChatError::StepLimitExceeded(_)
        )
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        ChatError::Provider(format!("{:#}", err))
    }
}

impl From<tera::Error> for ChatError {
    fn from(err: tera::Error) -> Self {
        ChatError::Internal(format!("prompt template: {}", err))
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
