#![forbid(unsafe_code)]

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use veracity_harness::gateway::{EmbedModel, ProviderGateway, TracingUsageSink};
use veracity_harness::pipeline::run_pipeline_with_trace_file;
use veracity_harness::TrustConfig;

#[derive(Parser)]
#[command(name = "veracity", version, about = "Trust-scored document summaries")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a document and score how far the summary can be trusted
    Score {
        /// Plain-text source document
        #[arg(long)]
        input: PathBuf,
        /// Where to write the JSON report
        #[arg(long)]
        out: PathBuf,
        /// JSON config file (defaults apply to missing fields)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write one JSONL line per model call
        #[arg(long)]
        trace: Option<PathBuf>,
        /// Also write the chosen summary as plain text
        #[arg(long)]
        summary_out: Option<PathBuf>,
        /// Number of candidate summaries
        #[arg(long)]
        candidates: Option<usize>,
        /// Fact-check passes per candidate
        #[arg(long)]
        passes: Option<u32>,
        /// OpenRouter model for both summarizing and fact checking
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        embedding_model: Option<String>,
    },
    /// Validate a config file and print the effective settings
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Score {
            input,
            out,
            config,
            trace,
            summary_out,
            candidates,
            passes,
            model,
            embedding_model,
        } => {
            let mut config = match config {
                Some(path) => TrustConfig::load(path)?,
                None => TrustConfig::default(),
            };
            if let Some(count) = candidates {
                config.candidate_count = count;
            }
            if let Some(passes) = passes {
                config.validation_passes = passes;
            }
            if let Some(model) = model {
                config.summary_model = model.clone();
                config.validation_model = model;
            }
            if let Some(model) = embedding_model {
                config.embedding_model = EmbedModel::from(model);
            }
            config.validate()?;

            let text = std::fs::read_to_string(&input)?;
            let source = config.source(text)?;

            let gateway = ProviderGateway::from_env(Arc::new(TracingUsageSink))?;
            let report =
                run_pipeline_with_trace_file(&gateway, &gateway, &config, &source, trace).await?;

            write_json(&out, &report)?;
            if let Some(path) = summary_out {
                std::fs::write(path, format!("{}\n", report.best_summary))?;
            }

            println!(
                "{} (candidate {}, support {:.0}%, consistency {:?})",
                report.verdict.trust_level,
                report.verdict.best_summary_index,
                report.verdict.support_ratio * 100.0,
                report.verdict.consistency_level
            );
            for sentence in &report.verdict.review_sentences {
                println!("  review: {sentence}");
            }
            println!(
                "cost: ${:.4}; report written to {}",
                report.cost.total_dollars(),
                out.display()
            );
        }
        Commands::CheckConfig { config } => {
            let config = TrustConfig::load(config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn write_json<T: serde::Serialize>(path: &PathBuf, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    std::fs::write(path, json)
}
