//! Tool registry and the executor side of the tool loop
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::{ChatError, ChatResult};
use crate::models::content::Content;
use crate::models::message::{ToolRequest, ToolResponse};
use crate::models::tool::Tool;
use crate::schema;
use crate::systems::System;

/// Name, description and instructions of a registered system, for prompts
#[derive(Clone, Debug, Serialize)]
pub struct SystemInfo {
    pub name: String,
    pub description: String,
    pub instructions: String,
}

/// Immutable mapping from tool name to the system that executes it
pub struct ToolRegistry {
    systems: Vec<Arc<dyn System>>,
    tools: Vec<Tool>,
    routes: HashMap<String, usize>,
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    systems: Vec<Arc<dyn System>>,
}

impl ToolRegistryBuilder {
    pub fn system(mut self, system: Arc<dyn System>) -> Self {
        self.systems.push(system);
        self
    }

    /// Fails when two tools share a name
    pub fn build(self) -> ChatResult<ToolRegistry> {
        let mut tools = Vec::new();
        let mut routes = HashMap::new();
        for (index, system) in self.systems.iter().enumerate() {
            for tool in system.tools() {
                if routes.insert(tool.name.clone(), index).is_some() {
                    return Err(ChatError::Internal(format!(
                        "tool '{}' is registered more than once",
                        tool.name
                    )));
                }
                tools.push(tool.clone());
            }
        }
        Ok(ToolRegistry {
            systems: self.systems,
            tools,
            routes,
        })
    }
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn empty() -> Self {
        Self {
            systems: Vec::new(),
            tools: Vec::new(),
            routes: HashMap::new(),
        }
    }

    /// Every tool, in registration order
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<(&Tool, &Arc<dyn System>)> {
        let index = *self.routes.get(name)?;
        let tool = self.tools.iter().find(|tool| tool.name == name)?;
        Some((tool, &self.systems[index]))
    }

    pub fn systems_info(&self) -> Vec<SystemInfo> {
        self.systems
            .iter()
            .map(|system| SystemInfo {
                name: system.name().to_string(),
                description: system.description().to_string(),
                instructions: system.instructions().to_string(),
            })
            .collect()
    }
}

/// Runs model-issued tool calls against a registry, for at most `max_steps`
/// model steps per turn
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    max_steps: usize,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, max_steps: usize) -> Self {
        Self {
            registry,
            max_steps: max_steps.max(1),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tools(&self) -> &[Tool] {
        self.registry.tools()
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Validate and execute a single request
    pub async fn dispatch(&self, request: &ToolRequest) -> ChatResult<Vec<Content>> {
        let call = request.tool_call.clone()?;
        let (tool, system) = self
            .registry
            .get(&call.name)
            .ok_or_else(|| ChatError::ToolNotFound(call.name.clone()))?;

        schema::validate(&call.arguments, &tool.input_schema)
            .map_err(|reason| ChatError::invalid_input(&call.name, reason))?;

        debug!(tool = %call.name, id = %request.id, "calling tool");
        match system.call(call).await {
            Err(ChatError::Provider(message)) | Err(ChatError::Internal(message)) => {
                Err(ChatError::ToolExecution(message))
            }
            result => result,
        }
    }

    /// Run every request of one step concurrently. Failures come back as error
    /// results, in the same order as the requests.
    pub async fn dispatch_all(&self, requests: &[ToolRequest]) -> Vec<ToolResponse> {
        let futures = requests.iter().map(|request| async move {
            let tool_result = self.dispatch(request).await;
            if let Err(e) = &tool_result {
                warn!(id = %request.id, error = %e, "tool call failed");
            }
            ToolResponse {
                id: request.id.clone(),
                tool_result,
            }
        });
        join_all(futures).await
    }
}
