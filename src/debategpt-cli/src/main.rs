//! DebateGPT CLI
//!
//! Builds the debate tables, prompts models with the research questions and
//! scores their answers against the human votes.

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use debategpt_core::dataset::Dataset;
use debategpt_core::evaluation::{ground_truth, model_agreement, score};
use debategpt_core::pipeline::{filter_tables, process_export};
use debategpt_core::{
    BatchEvent, BatchOrchestrator, BatchSettings, BootstrapSettings, Config, Endpoint, Label,
    ModelSource, OpenAiChatModel, PromptAssembler, ResponseNormalizer, ResultStore,
    TiktokenCounter, Task, default_config,
};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "debategpt",
    version,
    about = "DebateGPT - Can LLMs predict how people vote on debates?",
    long_about = "Builds filtered debate tables from a platform export, prompts OpenAI-compatible models with them and scores the answers against the human votes."
)]
struct Cli {
    /// TOML config file; the built-in configuration is used when omitted
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the intermediate tables from the raw export
    Process {
        /// Raw debates export
        #[arg(long, value_name = "FILE")]
        debates: PathBuf,
        /// Raw users export
        #[arg(long, value_name = "FILE")]
        users: PathBuf,
        /// Directory the tables are written to
        #[arg(long, default_value = "data/processed", value_name = "DIR")]
        out: PathBuf,
    },

    /// Filter the tables and attach propositions
    Filter {
        #[arg(long, default_value = "data/processed", value_name = "DIR")]
        data_dir: PathBuf,
        /// Propositions file, a JSON array of {debate_id, proposition}
        #[arg(long, value_name = "FILE")]
        propositions: PathBuf,
    },

    /// Prompt a model with one of the research questions
    Prompt {
        #[arg(value_enum)]
        question: Question,
        #[arg(long, default_value = "data/processed", value_name = "DIR")]
        data_dir: PathBuf,
        /// Result file; existing results are kept and their debates skipped
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
        /// Model name, overriding the config
        #[arg(short, long, value_name = "MODEL")]
        model: Option<String>,
        #[arg(long, value_enum)]
        source: Option<Source>,
        /// Ask for reasoning before the answer (q2 only)
        #[arg(long)]
        reasoning: bool,
        /// Describe the voter's stances on the big issues (q2 only)
        #[arg(long)]
        big_issues: bool,
        /// Only prompt debates in this category
        #[arg(long, value_name = "CATEGORY")]
        category: Option<String>,
    },

    /// Score result files against the human votes
    Score {
        #[arg(value_enum)]
        question: Question,
        #[arg(long, default_value = "data/processed", value_name = "DIR")]
        data_dir: PathBuf,
        /// Result files; with more than one, cross-model agreement is reported too
        #[arg(required = true, value_name = "FILE")]
        results: Vec<PathBuf>,
        /// Responses end with an `Answer:` line (q2 only)
        #[arg(long)]
        reasoning: bool,
        /// Seed of the bootstrap resampling
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// Print the built-in configuration as TOML
    ExampleConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum Question {
    /// Which side made the more convincing arguments
    Q1,
    /// The voter's stance before the debate, from their profile
    Q2,
    /// The voter's stance after reading the debate
    Q3,
}

impl Question {
    fn task(self, reasoning: bool, big_issues: bool) -> Task {
        match self {
            Question::Q1 => Task::WhoWon,
            Question::Q2 => Task::PropositionVoter {
                reasoning,
                big_issues,
            },
            Question::Q3 => Task::DebateDemographics,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Source {
    Openai,
    OpenSource,
}

impl From<Source> for ModelSource {
    fn from(source: Source) -> Self {
        match source {
            Source::Openai => ModelSource::Openai,
            Source::OpenSource => ModelSource::OpenSource,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => default_config(),
    };
    tracing::debug!(config = ?cli.config, model = %config.model.name, "Configuration loaded");

    match cli.command {
        Command::Process {
            debates,
            users,
            out,
        } => {
            let counter = TiktokenCounter::for_model(config.model.encoding_model())?;
            let summary = process_export(&debates, &users, &out, &config.users, &counter)?;
            print_header("Tables built");
            println!("  {} {}", "Debates:".bold(), summary.debates);
            println!("  {} {}", "Users:".bold(), summary.users);
            println!("  {} {}", "Votes:".bold(), summary.votes);
            println!("  {} {}", "Turns:".bold(), summary.turns);
            println!("  {} {}", "Comments:".bold(), summary.comments);
            println!("  {} {}", "Written to:".bold(), out.display().to_string().dimmed());
        }

        Command::Filter {
            data_dir,
            propositions,
        } => {
            let summary = filter_tables(&data_dir, &propositions, &config.filters)?;
            print_header("Tables filtered");
            println!("  {} {}", "Debates:".bold(), summary.debates);
            println!("  {} {}", "With a proposition:".bold(), summary.with_propositions);
            println!("  {} {}", "Balanced transcript:".bold(), summary.balanced);
            println!(
                "  {} {}",
                "Enough votes:".bold(),
                summary.enough_votes.to_string().bright_green()
            );
            println!("  {} {}", "Votes kept:".bold(), summary.votes);
        }

        Command::Prompt {
            question,
            data_dir,
            output,
            model,
            source,
            reasoning,
            big_issues,
            category,
        } => {
            if let Some(model) = model {
                config.model.name = model;
            }
            if let Some(source) = source {
                config.model.source = source.into();
            }
            if (reasoning || big_issues) && !matches!(question, Question::Q2) {
                eprintln!(
                    "{}",
                    "Warning: --reasoning and --big-issues only apply to q2.".yellow()
                );
            }
            let task = question.task(reasoning, big_issues);

            let endpoint = endpoint(&config);
            let mut dataset = Dataset::load(&data_dir)?;
            if let Some(category) = &category {
                dataset.retain_category(category);
            }
            let counter = TiktokenCounter::for_model(config.model.encoding_model())?;
            let assembler = PromptAssembler::new(task, &config, &dataset, &counter)?;
            let client = OpenAiChatModel::new(&config.model, &endpoint)?;

            print_header(&format!("Prompting {}", task));
            println!("  {} {}", "Model:".bold(), config.model.name.bright_cyan());
            if let Some(max) = assembler.max_debate_tokens() {
                println!("  {} {} tokens", "Transcript budget:".bold(), max);
            }
            if let Some(category) = &category {
                println!("  {} {}", "Category:".bold(), category);
            }
            println!("  {} {}", "Results:".bold(), output.display().to_string().dimmed());
            println!("{}", "─".repeat(70).dimmed());

            let orchestrator = BatchOrchestrator::new(
                assembler,
                &client,
                ResultStore::new(&output),
                BatchSettings::from(&config.batch),
            )
            .with_callback(create_console_callback());
            let summary = orchestrator.run(dataset.debates()).await?;

            print_header("Batch finished");
            println!("  {} {}", "Debates prompted:".bold(), summary.debates_prompted);
            println!("  {} {}", "Debates skipped:".bold(), summary.debates_skipped);
            println!("  {} {}", "Already done:".bold(), summary.already_done);
            println!(
                "  {} {}",
                "Results saved:".bold(),
                summary.results.to_string().bright_green()
            );
        }

        Command::Score {
            question,
            data_dir,
            results,
            reasoning,
            seed,
        } => {
            let task = question.task(reasoning, false);
            let dataset = Dataset::load(&data_dir)?;
            let truth = ground_truth(task, &dataset);
            let normalizer = ResponseNormalizer::new();
            let settings = BootstrapSettings {
                seed,
                ..BootstrapSettings::default()
            };

            let mut runs = Vec::with_capacity(results.len());
            for path in &results {
                let records = ResultStore::new(path).load()?;
                let report = score(task, &records, &truth, &normalizer, settings)?;

                print_header(&format!("{} - {}", task, path.display()));
                println!(
                    "  {} {} ({} matched to votes)",
                    "Responses:".bold(),
                    report.responses,
                    report.scored
                );
                println!("  {} {}", "Exact form:".bold(), percent(Some(report.correct_form)));
                println!("  {} {}", "Unusable:".bold(), report.other());
                let interval = report
                    .bootstrap
                    .as_ref()
                    .map(|b| {
                        format!(
                            " (95% CI {} - {})",
                            percent(Some(b.lower)),
                            percent(Some(b.upper))
                        )
                    })
                    .unwrap_or_default();
                println!(
                    "  {} {}{}",
                    "Accuracy:".bold(),
                    percent(report.accuracy()).bright_green(),
                    interval.dimmed()
                );
                for label in Label::ANSWERS {
                    println!(
                        "    {:<4} precision {:>7}  recall {:>7}",
                        label.as_str().yellow(),
                        percent(report.precision(label)),
                        percent(report.recall(label))
                    );
                }
                runs.push(records);
            }

            if runs.len() > 1 {
                let agreement = model_agreement(task, &runs, &normalizer, 0.05)?;
                let statistic = if agreement.raters == 2 {
                    "Cohen's kappa"
                } else {
                    "Fleiss' kappa"
                };
                print_header("Agreement between models");
                println!(
                    "  {} {:.3} (95% CI {:.3} - {:.3}) over {} shared items",
                    format!("{}:", statistic).bold(),
                    agreement.estimate.kappa,
                    agreement.estimate.lower,
                    agreement.estimate.upper,
                    agreement.items
                );
            }
        }

        Command::ExampleConfig => {
            print!("{}", default_config().to_toml()?);
        }
    }

    Ok(())
}

/// Endpoint from the environment, falling back to the config and then to OpenAI.
fn endpoint(config: &Config) -> Endpoint {
    let api_base = env::var("OPENAI_API_BASE")
        .or_else(|_| env::var("OPENAI_BASE_URL"))
        .ok()
        .or_else(|| config.model.api_base.clone())
        .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

    let api_key = env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
        if config.model.source == ModelSource::Openai {
            eprintln!(
                "{}",
                "Warning: OPENAI_API_KEY not set. API calls may fail.".yellow()
            );
        }
        String::new()
    });

    Endpoint::new(api_base, api_key)
}

fn print_header(title: &str) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", format!("  {}", title).bright_blue().bold());
    println!("{}", "═".repeat(70).bright_blue());
}

fn percent(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.1}%", v * 100.0))
        .unwrap_or_else(|| "n/a".to_string())
}

/// Create a callback that prints batch progress to the console.
fn create_console_callback() -> Box<dyn Fn(BatchEvent) + Send + Sync> {
    Box::new(move |event| match event {
        BatchEvent::RunStart {
            pending,
            already_done,
        } => {
            println!(
                "{} {} debates to prompt, {} already in the result file",
                "▶".bright_cyan(),
                pending.to_string().bold(),
                already_done
            );
        }
        BatchEvent::DebateStart {
            debate_id,
            index,
            total,
        } => {
            println!(
                "  {} debate {}",
                format!("[{}/{}]", index + 1, total).dimmed(),
                debate_id.bright_white()
            );
        }
        BatchEvent::DebateSkipped { debate_id, reason } => {
            println!(
                "    {} debate {} skipped: {}",
                "!".yellow(),
                debate_id,
                reason.dimmed()
            );
        }
        BatchEvent::Retry {
            debate_id,
            attempt,
            error,
        } => {
            eprintln!(
                "    {} debate {}, attempt {} failed: {}",
                "↻".yellow(),
                debate_id,
                attempt,
                error.dimmed()
            );
        }
        BatchEvent::DebateDone { results, .. } => {
            println!(
                "    {} {} result(s)",
                "✓".bright_green(),
                results
            );
        }
        BatchEvent::Flushed { count } => {
            println!("    {}", format!("saved {} result(s)", count).dimmed());
        }
        BatchEvent::RunEnd { .. } => {
            // Handled in main
        }
    })
}
