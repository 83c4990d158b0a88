//! Draft, critique and revise a Slack message from the conversation so far
use futures::stream::BoxStream;
use serde_json::json;
use strum_macros::Display;
use tracing::debug;

use crate::errors::ChatResult;
use crate::invoker::{GenerateOptions, Increment, ModelInvoker};
use crate::models::message::Message;
use crate::models::ui::UiMessage;
use crate::multiplexer::{forward_increments, ui_message_stream, StreamChunk};
use crate::normalizer::format_history;
use crate::prompt_template::load_prompt_file;
use crate::workflow::WorkflowContext;

const HISTORY: &str = "Conversation history";
const DRAFT: &str = "Slack message draft";
const FEEDBACK: &str = "Slack message feedback";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum DraftReviseStep {
    Draft,
    Evaluate,
    Revise,
    Done,
}

impl DraftReviseStep {
    pub fn next(self) -> Self {
        match self {
            DraftReviseStep::Draft => DraftReviseStep::Evaluate,
            DraftReviseStep::Evaluate => DraftReviseStep::Revise,
            DraftReviseStep::Revise | DraftReviseStep::Done => DraftReviseStep::Done,
        }
    }

    fn template(self) -> &'static str {
        match self {
            DraftReviseStep::Draft => "draft.md",
            DraftReviseStep::Evaluate => "evaluate.md",
            DraftReviseStep::Revise | DraftReviseStep::Done => "revise.md",
        }
    }
}

/// DRAFT and EVALUATE run to completion, since the evaluator needs the whole
/// draft; REVISE streams to the client.
#[derive(Clone)]
pub struct DraftReviseWorkflow {
    invoker: ModelInvoker,
    model: Option<String>,
    criteria: Vec<String>,
}

impl DraftReviseWorkflow {
    pub fn new(invoker: ModelInvoker) -> Self {
        Self {
            invoker,
            model: None,
            criteria: Vec::new(),
        }
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Extra evaluation criteria on top of the defaults
    pub fn with_criteria(mut self, criteria: Vec<String>) -> Self {
        self.criteria = criteria;
        self
    }

    fn options(&self, step: DraftReviseStep) -> ChatResult<GenerateOptions> {
        let system = load_prompt_file(step.template(), &json!({ "criteria": self.criteria }))?;
        let options = GenerateOptions::new(system);
        Ok(match &self.model {
            Some(model) => options.with_model(model),
            None => options,
        })
    }

    fn prompt(context: &WorkflowContext) -> Vec<Message> {
        vec![Message::user().with_text(context.render())]
    }

    /// Run DRAFT and EVALUATE, returning the context REVISE is prompted with
    pub async fn prepare(&self, messages: &[UiMessage]) -> ChatResult<WorkflowContext> {
        let mut context = WorkflowContext::new().with_section(HISTORY, format_history(messages));

        let step = DraftReviseStep::Draft;
        debug!(%step, "workflow step");
        let draft = self
            .invoker
            .generate(Self::prompt(&context), &self.options(step)?)
            .await?;
        context.record(DRAFT, step, &draft);

        let step = step.next();
        debug!(%step, "workflow step");
        let feedback = self
            .invoker
            .generate(Self::prompt(&context), &self.options(step)?)
            .await?;
        context.record(FEEDBACK, step, &feedback);

        Ok(context)
    }

    /// Stream the final message
    pub fn revise(
        &self,
        context: &WorkflowContext,
    ) -> ChatResult<BoxStream<'static, ChatResult<Increment>>> {
        let step = DraftReviseStep::Revise;
        debug!(%step, "workflow step");
        Ok(self
            .invoker
            .stream(Self::prompt(context), self.options(step)?))
    }

    pub fn run(&self, messages: Vec<UiMessage>) -> BoxStream<'static, StreamChunk> {
        let workflow = self.clone();
        ui_message_stream(move |writer| async move {
            let context = workflow.prepare(&messages).await?;
            let revised = workflow.revise(&context)?;
            forward_increments(&writer, revised).await?;
            debug!(step = %DraftReviseStep::Done, "workflow step");
            Ok(())
        })
    }
}
