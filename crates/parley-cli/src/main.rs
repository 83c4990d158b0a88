mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use parley::providers::configs::{
    MockProviderConfig, OpenAiProviderConfig, ProviderConfig, OPENAI_DEFAULT_HOST,
    OPENAI_DEFAULT_MODEL,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream the answer to a single prompt
    Run {
        /// The prompt to send
        prompt: String,

        #[command(flatten)]
        provider: ProviderArgs,

        /// Directory the filesystem tools are confined to
        #[arg(long, default_value = "~/.parley/sandbox")]
        sandbox: String,

        /// Model steps allowed before the tool loop is cut short
        #[arg(long, default_value_t = 10)]
        max_steps: usize,

        /// Answer without filesystem tools
        #[arg(long)]
        no_tools: bool,

        /// Follow the answer with suggested next questions
        #[arg(long)]
        suggestions: bool,
    },
    /// Score answers to a JSON dataset of {input, expected} cases
    Eval {
        /// Path to the dataset
        dataset: PathBuf,

        #[command(flatten)]
        provider: ProviderArgs,

        /// Fail the length check at this many characters
        #[arg(long)]
        max_length: Option<usize>,

        /// Let the model grade each answer A to D against these criteria
        #[arg(long)]
        grade: Option<String>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Clone, Debug)]
struct ProviderArgs {
    /// Provider to call
    #[arg(short, long, value_enum, default_value = "openai")]
    provider: ProviderVariant,

    /// API key (can also be set via OPENAI_API_KEY environment variable)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// API host
    #[arg(long, env = "OPENAI_HOST", default_value = OPENAI_DEFAULT_HOST)]
    host: String,

    /// Model to use
    #[arg(short, long, env = "OPENAI_MODEL", default_value = OPENAI_DEFAULT_MODEL)]
    model: String,

    /// Canned reply for the mock provider; repeat for several calls
    #[arg(long = "reply")]
    replies: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ProviderVariant {
    #[value(name = "openai")]
    OpenAi,
    Mock,
}

impl ProviderArgs {
    fn into_config(self) -> Result<ProviderConfig> {
        match self.provider {
            ProviderVariant::OpenAi => {
                let api_key = self.api_key.ok_or_else(|| {
                    anyhow::anyhow!("--api-key or OPENAI_API_KEY is required for openai")
                })?;
                Ok(ProviderConfig::OpenAi(OpenAiProviderConfig {
                    host: self.host,
                    api_key,
                    model: self.model,
                    temperature: None,
                    max_tokens: None,
                }))
            }
            ProviderVariant::Mock => Ok(ProviderConfig::Mock(MockProviderConfig {
                replies: self.replies,
            })),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            prompt,
            provider,
            sandbox,
            max_steps,
            no_tools,
            suggestions,
        } => {
            let options = commands::run::RunOptions {
                sandbox: (!no_tools).then_some(sandbox),
                max_steps,
                suggestions,
            };
            commands::run::execute(provider.into_config()?, &prompt, options).await
        }
        Command::Eval {
            dataset,
            provider,
            max_length,
            grade,
            json,
        } => {
            let options = commands::eval::EvalOptions {
                max_length,
                grade,
                json,
            };
            commands::eval::execute(provider.into_config()?, &dataset, options).await
        }
    }
}
