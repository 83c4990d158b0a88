use async_trait::async_trait;

use crate::errors::ChatResult;
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

pub mod filesystem;

pub use filesystem::FileSystem;

/// A set of related tools the model may call, with the executor behind them
#[async_trait]
pub trait System: Send + Sync {
    /// Get the name of the system
    fn name(&self) -> &str;

    /// Get the system description
    fn description(&self) -> &str;

    /// Get system instructions
    fn instructions(&self) -> &str;

    /// Get available tools
    fn tools(&self) -> &[Tool];

    /// Call a tool with the given parameters
    async fn call(&self, tool_call: ToolCall) -> ChatResult<Vec<Content>>;
}
