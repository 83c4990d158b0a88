//! Scoring model output against small datasets
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use futures::Future;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::errors::ChatResult;
use crate::invoker::{GenerateOptions, ModelInvoker};
use crate::models::message::Message;
use crate::prompt_template::load_prompt_file;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalCase {
    pub input: String,
    #[serde(default)]
    pub expected: Option<String>,
}

/// Read a JSON array of `{input, expected?}` cases
pub fn load_dataset<P: AsRef<Path>>(path: P) -> Result<Vec<EvalCase>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read dataset {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid dataset {}", path.display()))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Score {
    /// Between 0 and 1
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

impl Score {
    pub fn pass(passed: bool) -> Self {
        Self {
            score: if passed { 1.0 } else { 0.0 },
            metadata: None,
        }
    }
}

#[async_trait]
pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;

    async fn score(&self, case: &EvalCase, output: &str) -> ChatResult<Score>;
}

/// 1 when the output contains the expected text, ignoring case
pub struct Includes;

#[async_trait]
impl Scorer for Includes {
    fn name(&self) -> &str {
        "includes"
    }

    async fn score(&self, case: &EvalCase, output: &str) -> ChatResult<Score> {
        Ok(match &case.expected {
            Some(expected) => Score::pass(output.to_lowercase().contains(&expected.to_lowercase())),
            None => Score {
                score: 0.0,
                metadata: Some("case has no expected value".to_string()),
            },
        })
    }
}

/// 1 when the output is shorter than the limit, in characters
pub struct MaxLength(pub usize);

#[async_trait]
impl Scorer for MaxLength {
    fn name(&self) -> &str {
        "output length"
    }

    async fn score(&self, _case: &EvalCase, output: &str) -> ChatResult<Score> {
        Ok(Score::pass(output.chars().count() < self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
}

impl Grade {
    pub fn value(self) -> f64 {
        match self {
            Grade::A => 1.0,
            Grade::B => 0.5,
            Grade::C | Grade::D => 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Judgement {
    feedback: String,
    score: Grade,
}

/// A model grades the output from A to D against free-form criteria
pub struct LetterGrade {
    name: String,
    criteria: String,
    invoker: ModelInvoker,
    model: Option<String>,
}

impl LetterGrade {
    pub fn new<N: Into<String>, C: Into<String>>(name: N, criteria: C, invoker: ModelInvoker) -> Self {
        Self {
            name: name.into(),
            criteria: criteria.into(),
            invoker,
            model: None,
        }
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[async_trait]
impl Scorer for LetterGrade {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score(&self, case: &EvalCase, output: &str) -> ChatResult<Score> {
        let system = load_prompt_file("letter_grade.md", &json!({ "criteria": self.criteria }))?;
        let mut options = GenerateOptions::new(system).with_schema(json!({
            "type": "object",
            "properties": {
                "feedback": {"type": "string"},
                "score": {"type": "string", "enum": ["A", "B", "C", "D"]}
            },
            "required": ["feedback", "score"]
        }));
        if let Some(model) = &self.model {
            options = options.with_model(model);
        }
        let prompt = format!(
            "The answer you are evaluating is:\n\n{}\n\nThe original input was:\n\n{}",
            output, case.input
        );

        let judgement: Judgement = self
            .invoker
            .generate_object(vec![Message::user().with_text(prompt)], &options)
            .await?;
        Ok(Score {
            score: judgement.score.value(),
            metadata: Some(judgement.feedback),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub case: EvalCase,
    pub output: Option<String>,
    pub scores: BTreeMap<String, Score>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub name: String,
    pub cases: Vec<CaseReport>,
}

impl EvalReport {
    /// Mean score per scorer; a failed case counts as 0
    pub fn means(&self, scorers: &[String]) -> BTreeMap<String, f64> {
        scorers
            .iter()
            .map(|scorer| {
                let total: f64 = self
                    .cases
                    .iter()
                    .map(|case| case.scores.get(scorer).map_or(0.0, |s| s.score))
                    .sum();
                let mean = if self.cases.is_empty() {
                    0.0
                } else {
                    total / self.cases.len() as f64
                };
                (scorer.clone(), mean)
            })
            .collect()
    }
}

pub struct Evaluation {
    name: String,
    cases: Vec<EvalCase>,
    scorers: Vec<Arc<dyn Scorer>>,
}

impl Evaluation {
    pub fn new<S: Into<String>>(name: S, cases: Vec<EvalCase>) -> Self {
        Self {
            name: name.into(),
            cases,
            scorers: Vec::new(),
        }
    }

    pub fn scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorers.push(scorer);
        self
    }

    pub fn scorer_names(&self) -> Vec<String> {
        self.scorers.iter().map(|s| s.name().to_string()).collect()
    }

    /// Run every case through `task` concurrently, then score each output
    pub async fn run<F, Fut>(&self, task: F) -> EvalReport
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = ChatResult<String>>,
    {
        let cases = self.cases.iter().map(|case| {
            let output = task(case.input.clone());
            async move {
                let output = match output.await {
                    Ok(output) => output,
                    Err(e) => {
                        warn!(input = %case.input, error = %e, "eval task failed");
                        return CaseReport {
                            case: case.clone(),
                            output: None,
                            scores: BTreeMap::new(),
                            error: Some(e.to_string()),
                        };
                    }
                };

                let mut scores = BTreeMap::new();
                let mut error = None;
                for scorer in &self.scorers {
                    match scorer.score(case, &output).await {
                        Ok(score) => {
                            scores.insert(scorer.name().to_string(), score);
                        }
                        Err(e) => {
                            warn!(scorer = scorer.name(), error = %e, "scorer failed");
                            error = Some(format!("{}: {}", scorer.name(), e));
                        }
                    }
                }
                CaseReport {
                    case: case.clone(),
                    output: Some(output),
                    scores,
                    error,
                }
            }
        });

        EvalReport {
            name: self.name.clone(),
            cases: join_all(cases).await,
        }
    }
}
