use std::io::Write;

use anyhow::{bail, Result};
use console::style;
use futures::StreamExt;
use parley::chat::ChatOrchestrator;
use parley::dispatcher::{ToolDispatcher, ToolRegistry};
use parley::invoker::ModelInvoker;
use parley::models::role::Role;
use parley::models::ui::{UiMessage, UiPart};
use parley::multiplexer::StreamChunk;
use parley::providers::configs::ProviderConfig;
use parley::providers::factory::get_provider;
use parley::systems::FileSystem;
use parley::workflow::FollowUpSuggestions;
use serde_json::Value;
use std::sync::Arc;

const MAX_INPUT_LENGTH: usize = 80;

pub struct RunOptions {
    /// `None` runs without filesystem tools
    pub sandbox: Option<String>,
    pub max_steps: usize,
    pub suggestions: bool,
}

pub async fn execute(config: ProviderConfig, prompt: &str, options: RunOptions) -> Result<()> {
    let invoker = ModelInvoker::new(get_provider(config)?);
    let mut orchestrator = ChatOrchestrator::new(invoker.clone());
    if let Some(root) = &options.sandbox {
        let filesystem = FileSystem::new(root).await?;
        let registry = ToolRegistry::builder().system(Arc::new(filesystem)).build()?;
        orchestrator =
            orchestrator.with_tools(ToolDispatcher::new(Arc::new(registry), options.max_steps));
    }
    if options.suggestions {
        orchestrator = orchestrator.with_suggestions(FollowUpSuggestions::new(invoker));
    }

    let messages = vec![UiMessage::new("1", Role::User, vec![UiPart::text(prompt)])];
    let mut chunks = orchestrator.respond(messages);
    let mut renderer = Renderer::default();
    let mut stdout = std::io::stdout();
    while let Some(chunk) = chunks.next().await {
        if let Some(out) = renderer.render(&chunk) {
            write!(stdout, "{}", out)?;
            stdout.flush()?;
        }
    }
    if let Some(out) = renderer.finish() {
        write!(stdout, "{}", out)?;
    }
    writeln!(stdout)?;

    if let Some(error) = renderer.error {
        bail!(error);
    }
    Ok(())
}

/// Turns stream chunks into terminal output. Data parts are replaced in
/// place on the wire, so only the latest suggestions are kept and printed
/// once the stream ends.
#[derive(Default)]
struct Renderer {
    suggestions: Option<Vec<String>>,
    error: Option<String>,
}

impl Renderer {
    fn render(&mut self, chunk: &StreamChunk) -> Option<String> {
        match chunk {
            StreamChunk::TextDelta { delta, .. } => Some(delta.clone()),
            StreamChunk::ToolInputAvailable {
                tool_name, input, ..
            } => Some(format!(
                "\n{} {} {}\n",
                style("─── tool").magenta().dim(),
                style(tool_name).magenta(),
                style(truncate(&input.to_string())).dim()
            )),
            StreamChunk::ToolOutputError { error_text, .. } => Some(format!(
                "{} {}\n",
                style("tool failed:").red(),
                style(error_text).dim()
            )),
            StreamChunk::Data { name, data, .. } if name == "suggestions" => {
                self.suggestions = Some(
                    data.as_array()
                        .map(|items| {
                            items
                                .iter()
                                .filter_map(Value::as_str)
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default(),
                );
                None
            }
            StreamChunk::Error { error_text } => {
                self.error = Some(error_text.clone());
                Some(format!("\n{} {}", style("error:").red().bold(), error_text))
            }
            _ => None,
        }
    }

    fn finish(&mut self) -> Option<String> {
        let suggestions = self.suggestions.take().filter(|s| !s.is_empty())?;
        let mut out = format!("\n\n{}", style("You could ask next:").bold());
        for suggestion in suggestions {
            out.push_str(&format!("\n  {} {}", style("-").dim(), style(suggestion).cyan()));
        }
        Some(out)
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() > MAX_INPUT_LENGTH {
        let head: String = text.chars().take(MAX_INPUT_LENGTH).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}
