use serde::Serialize;

use crate::invoker::Generation;
use crate::providers::base::Usage;

/// What one workflow step produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowStepResult {
    pub step: String,
    pub text: String,
    pub usage: Usage,
}

/// Labelled sections accumulated over a workflow run.
///
/// The context is rendered wholesale into the prompt of every later step.
#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
    sections: Vec<(String, String)>,
    results: Vec<WorkflowStepResult>,
}

impl WorkflowContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_section<L: Into<String>, B: Into<String>>(mut self, label: L, body: B) -> Self {
        self.push_section(label, body);
        self
    }

    pub fn push_section<L: Into<String>, B: Into<String>>(&mut self, label: L, body: B) {
        self.sections.push((label.into(), body.into()));
    }

    /// Append the text of a finished step under `label`
    pub fn record<S: ToString>(&mut self, label: &str, step: S, generation: &Generation) {
        self.push_section(label, generation.text.trim());
        self.results.push(WorkflowStepResult {
            step: step.to_string(),
            text: generation.text.clone(),
            usage: generation.usage.clone(),
        });
    }

    /// The most recent section with this label
    pub fn section(&self, label: &str) -> Option<&str> {
        self.sections
            .iter()
            .rev()
            .find(|(l, _)| l == label)
            .map(|(_, body)| body.as_str())
    }

    pub fn results(&self) -> &[WorkflowStepResult] {
        &self.results
    }

    pub fn usage(&self) -> Usage {
        self.results
            .iter()
            .fold(Usage::default(), |total, result| total.add(&result.usage))
    }

    pub fn render(&self) -> String {
        self.sections
            .iter()
            .map(|(label, body)| format!("{}:\n{}", label, body))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
