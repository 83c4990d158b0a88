use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use console::style;
use parley::chat::ChatOrchestrator;
use parley::eval::{load_dataset, EvalReport, Evaluation, Includes, LetterGrade, MaxLength};
use parley::invoker::ModelInvoker;
use parley::providers::configs::ProviderConfig;
use parley::providers::factory::get_provider;

const MAX_OUTPUT_PREVIEW: usize = 60;

pub struct EvalOptions {
    pub max_length: Option<usize>,
    /// Criteria for the model-graded scorer
    pub grade: Option<String>,
    pub json: bool,
}

pub async fn execute(config: ProviderConfig, dataset: &Path, options: EvalOptions) -> Result<()> {
    let cases = load_dataset(dataset)?;
    let invoker = ModelInvoker::new(get_provider(config)?);
    let evaluation = build_evaluation(dataset, cases, invoker.clone(), &options);

    let orchestrator = ChatOrchestrator::new(invoker);
    let report = evaluation
        .run(|input| {
            let orchestrator = orchestrator.clone();
            async move { Ok(orchestrator.ask(&input).await?.text) }
        })
        .await;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, &evaluation.scorer_names());
    }
    Ok(())
}

fn build_evaluation(
    dataset: &Path,
    cases: Vec<parley::eval::EvalCase>,
    invoker: ModelInvoker,
    options: &EvalOptions,
) -> Evaluation {
    let name = dataset
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "eval".to_string());

    let mut evaluation = Evaluation::new(name, cases).scorer(Arc::new(Includes));
    if let Some(max_length) = options.max_length {
        evaluation = evaluation.scorer(Arc::new(MaxLength(max_length)));
    }
    if let Some(criteria) = &options.grade {
        evaluation = evaluation.scorer(Arc::new(LetterGrade::new("grade", criteria, invoker)));
    }
    evaluation
}

fn print_report(report: &EvalReport, scorers: &[String]) {
    println!("{} {}", style("Eval").bold().cyan(), style(&report.name).bold());
    for (i, case) in report.cases.iter().enumerate() {
        println!("\n{} {}", style(format!("{}.", i + 1)).dim(), case.case.input);
        if let Some(output) = &case.output {
            println!("   {}", style(preview(output)).green());
        }
        if let Some(error) = &case.error {
            println!("   {} {}", style("failed:").red(), error);
        }
        for scorer in scorers {
            let score = case.scores.get(scorer).map_or(0.0, |s| s.score);
            println!("   {}: {}", style(scorer).dim(), color_score(score));
        }
    }

    println!("\n{}", style("Mean scores:").bold());
    for (scorer, mean) in report.means(scorers) {
        println!("  {}: {}", style(scorer).dim(), color_score(mean));
    }
}

fn color_score(score: f64) -> String {
    let text = format!("{:.2}", score);
    if score >= 0.75 {
        style(text).green().to_string()
    } else if score >= 0.5 {
        style(text).yellow().to_string()
    } else {
        style(text).red().to_string()
    }
}

fn preview(output: &str) -> String {
    let line = output.lines().next().unwrap_or_default();
    if line.chars().count() > MAX_OUTPUT_PREVIEW || output.lines().count() > 1 {
        let head: String = line.chars().take(MAX_OUTPUT_PREVIEW).collect();
        format!("{}...", head)
    } else {
        line.to_string()
    }
}
