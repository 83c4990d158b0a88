//! PLAN the searches, SEARCH the web in parallel, SUMMARIZE the findings
use futures::future::try_join_all;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::errors::{ChatError, ChatResult};
use crate::invoker::{GenerateOptions, Increment, ModelInvoker};
use crate::models::message::Message;
use crate::models::ui::UiMessage;
use crate::multiplexer::{forward_increments, ui_message_stream, PartId, StreamChunk, StreamWriter};
use crate::normalizer::normalize;
use crate::prompt_template::load_prompt_file;
use crate::search::{SearchBackend, SearchResponse};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub plan: String,
    pub queries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_min_queries")]
    pub min_queries: usize,
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
    /// Results requested per query
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_min_queries() -> usize {
    3
}

fn default_max_queries() -> usize {
    5
}

fn default_max_results() -> usize {
    5
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            model: None,
            min_queries: default_min_queries(),
            max_queries: default_max_queries(),
            max_results: default_max_results(),
        }
    }
}

fn plan_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "plan": {"type": "string"},
            "queries": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["plan", "queries"],
        "additionalProperties": false
    })
}

/// The plan text and the non-empty queries of a partial plan object
fn plan_parts(partial: &Value) -> (String, Vec<String>) {
    let plan = partial
        .get("plan")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let queries = partial
        .get("queries")
        .and_then(Value::as_array)
        .map(|queries| {
            queries
                .iter()
                .filter_map(Value::as_str)
                .filter(|query| !query.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    (plan, queries)
}

#[derive(Clone)]
pub struct ResearchWorkflow {
    invoker: ModelInvoker,
    search: Arc<dyn SearchBackend>,
    config: ResearchConfig,
}

impl ResearchWorkflow {
    pub fn new(invoker: ModelInvoker, search: Arc<dyn SearchBackend>, config: ResearchConfig) -> Self {
        Self {
            invoker,
            search,
            config,
        }
    }

    fn options(&self, system: String) -> GenerateOptions {
        let options = GenerateOptions::new(system);
        match &self.config.model {
            Some(model) => options.with_model(model),
            None => options,
        }
    }

    /// Stream the plan, mirroring it into `data-plan` and `data-queries` parts
    pub async fn plan(
        &self,
        writer: &StreamWriter,
        conversation: Vec<Message>,
    ) -> ChatResult<ResearchPlan> {
        let system = load_prompt_file(
            "research_plan.md",
            &json!({
                "min_queries": self.config.min_queries,
                "max_queries": self.config.max_queries,
            }),
        )?;
        let options = self.options(system).with_schema(plan_schema());

        let plan_id = PartId::new();
        let queries_id = PartId::new();
        let mut increments = self.invoker.stream(conversation, options);
        let mut output = None;
        while let Some(increment) = increments.next().await {
            match increment? {
                Increment::PartialOutput(partial) => {
                    let (plan, queries) = plan_parts(&partial);
                    writer.write(StreamChunk::data("plan", &plan_id, json!(plan))).await?;
                    writer
                        .write(StreamChunk::data("queries", &queries_id, json!(queries)))
                        .await?;
                }
                Increment::Finished(generation) => output = generation.output,
                _ => {}
            }
        }

        let output = output.ok_or_else(|| {
            ChatError::SchemaViolation("the model produced no research plan".to_string())
        })?;
        let (plan, mut queries) = plan_parts(&output);
        if queries.len() > self.config.max_queries {
            debug!(planned = queries.len(), "dropping surplus queries");
            queries.truncate(self.config.max_queries);
        }
        Ok(ResearchPlan { plan, queries })
    }

    /// Run every query concurrently. One failed query fails the whole search.
    pub async fn search(&self, queries: &[String]) -> ChatResult<Vec<SearchResponse>> {
        let searches = queries.iter().map(|query| async move {
            let mut response = self
                .search
                .search(query, self.config.max_results)
                .await
                .map_err(|e| ChatError::Search(format!("{}: {:#}", query, e)))?;
            response.query = query.clone();
            Ok::<_, ChatError>(response)
        });
        let responses = try_join_all(searches).await?;
        debug!(queries = responses.len(), "search finished");
        Ok(responses)
    }

    /// Stream the final answer with the search results inlined in the system prompt
    pub fn summarize(
        &self,
        conversation: Vec<Message>,
        results: &[SearchResponse],
    ) -> ChatResult<BoxStream<'static, ChatResult<Increment>>> {
        let system = load_prompt_file("research_summary.md", &json!({ "results": results }))?;
        Ok(self.invoker.stream(conversation, self.options(system)))
    }

    pub fn run(&self, messages: Vec<UiMessage>) -> BoxStream<'static, StreamChunk> {
        let workflow = self.clone();
        ui_message_stream(move |writer| async move {
            let conversation = normalize(&messages)?;
            let plan = workflow.plan(&writer, conversation.clone()).await?;
            let results = workflow.search(&plan.queries).await?;
            let summary = workflow.summarize(conversation, &results)?;
            forward_increments(&writer, summary).await?;
            Ok(())
        })
    }
}
