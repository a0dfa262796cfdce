//! `finsight` command-line entry point.
//!
//! Reads `finsight.toml` (or the path given with `--config`) plus
//! `FINSIGHT__*` environment overrides, then runs one pipeline command.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};

use finsight_lib::config::{self, AppConfig};
use finsight_lib::core_state::{build_llm_client, CoreState};
use finsight_lib::models::Provenance;
use finsight_lib::pipeline::artifact::inspect_artifact;
use finsight_lib::pipeline::processor::ProcessOutcome;
use finsight_lib::pipeline::rag::{format_context, RetrievalOutcome, DEFAULT_RESULT_COUNT};
use finsight_lib::pipeline::sleeper::ThreadSleeper;
use finsight_lib::pipeline::watch::run_watch_loop;

const VERIFY_QUERY: &str = "What is the outlook for inflation and interest rates?";

#[derive(Parser)]
#[command(author, version, about = "FinSight document ingestion pipeline")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process every scraped document that has no artifact yet.
    Batch {
        /// Only run one side (retail | institutional).
        #[arg(long)]
        provenance: Option<Provenance>,
    },
    /// Process a single raw document.
    Process {
        file: PathBuf,
        #[arg(long)]
        provenance: Provenance,
    },
    /// Watch the data directories and run the pipeline as files arrive.
    Watch {
        /// Also handle files that arrived while the pipeline was down.
        #[arg(long)]
        catch_up: bool,
    },
    /// Load artifacts into the knowledge store.
    Ingest {
        /// Single artifact file; requires --provenance.
        artifact: Option<PathBuf>,
        #[arg(long)]
        provenance: Option<Provenance>,
    },
    /// Semantic search over the knowledge store.
    Query {
        text: String,
        #[arg(long)]
        provenance: Option<Provenance>,
        #[arg(short, long, default_value_t = DEFAULT_RESULT_COUNT)]
        n: usize,
        /// Show institutional and retail results side by side.
        #[arg(long, conflicts_with = "provenance")]
        dual: bool,
    },
    /// Print the store size and run a sample query.
    Verify,
    /// List the models the extraction provider serves.
    Models,
    /// Show the structure of an artifact file.
    Inspect { artifact: PathBuf },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    finsight_lib::init_tracing(&cfg.logging);
    tracing::info!("{} v{}", config::APP_NAME, config::APP_VERSION);

    match cli.command {
        Command::Models => return list_models(&cfg),
        Command::Inspect { artifact } => return inspect(&artifact),
        _ => {}
    }

    let state = CoreState::open(cfg).context("failed to open pipeline")?;
    let result = run(&state, cli.command);
    state.close();
    result
}

fn run(state: &CoreState, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Batch { provenance } => {
            let runner = state.batch_runner();
            let reports = match provenance {
                Some(p) => {
                    let dirs = state.dirs();
                    vec![runner.run_batch(dirs.raw(p), dirs.processed(p), p)]
                }
                None => runner.run_all(state.dirs()),
            };
            for report in reports {
                let side = report.provenance.map(|p| p.as_str()).unwrap_or("-");
                println!(
                    "{side}: {} processed, {} skipped, {} failed",
                    report.processed(),
                    report.skipped(),
                    report.failed()
                );
            }
        }

        Command::Process { file, provenance } => {
            let output_dir = state.dirs().processed(provenance);
            match state.processor().process(&file, provenance, output_dir) {
                ProcessOutcome::Processed { artifact, path } => {
                    println!("saved {} ({} records, model {})", path.display(), artifact.data.len(), artifact.meta.model)
                }
                ProcessOutcome::Skipped { path } => println!("skipped: {} exists", path.display()),
                ProcessOutcome::Failed(e) => bail!("processing failed: {e}"),
            }
        }

        Command::Watch { catch_up } => {
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = shutdown.clone();
            ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
                .context("failed to install signal handler")?;

            let mut observer = state.observer(catch_up || state.config().watch.catch_up);
            let mut dispatcher = state.dispatcher();
            println!("Watching {} (Ctrl+C to stop)", state.config().data_dir.display());
            run_watch_loop(
                &mut observer,
                &mut dispatcher,
                &ThreadSleeper,
                Duration::from_millis(state.config().watch.poll_interval_ms),
                &shutdown,
            )
            .context("watch loop failed")?;
        }

        Command::Ingest {
            artifact,
            provenance,
        } => {
            let writer = state.writer();
            let written = match (artifact, provenance) {
                (Some(path), Some(p)) => writer.ingest(&path, p)?,
                (Some(_), None) => bail!("--provenance is required when ingesting a single artifact"),
                (None, Some(p)) => writer.ingest_directory(state.dirs().processed(p), p)?,
                (None, None) => writer.ingest_all(state.dirs())?,
            };
            println!("{written} entries upserted; store now holds {}", state.store().count()?);
        }

        Command::Query {
            text,
            provenance,
            n,
            dual,
        } => {
            let retrieval = state.retrieval();
            if dual {
                let results = retrieval.retrieve_dual(&text, n)?;
                println!("== Institutional ==");
                print_outcome(&results.institutional);
                println!("== Retail ==");
                print_outcome(&results.retail);
            } else {
                print_outcome(&retrieval.retrieve(&text, provenance, n)?);
            }
        }

        Command::Verify => {
            let count = state.store().count()?;
            println!("Knowledge store holds {count} entries.");
            println!("\nTest query: '{VERIFY_QUERY}'");
            match state.retrieval().retrieve(VERIFY_QUERY, None, 3)? {
                RetrievalOutcome::NoRelevantData => println!("No results."),
                RetrievalOutcome::Ranked(r) => {
                    for (i, ((doc, meta), dist)) in r
                        .documents
                        .iter()
                        .zip(&r.metadatas)
                        .zip(&r.distances)
                        .enumerate()
                    {
                        let preview: String = doc.chars().take(150).collect();
                        println!("\nResult {}:", i + 1);
                        println!("  Source: {} ({})", meta.source_type, meta.filename);
                        println!("  Category: {}", meta.category);
                        println!("  Text: {preview}");
                        println!("  Distance: {dist:.4}");
                    }
                }
            }
        }

        Command::Models | Command::Inspect { .. } => {}
    }
    Ok(())
}

fn print_outcome(outcome: &RetrievalOutcome) {
    print!("{}", format_context(outcome));
    if matches!(outcome, RetrievalOutcome::NoRelevantData) {
        println!();
    }
}

fn list_models(cfg: &AppConfig) -> anyhow::Result<()> {
    let client = build_llm_client(cfg)?;
    let models = client
        .list_models()
        .with_context(|| format!("failed to list {} models", client.provider()))?;
    for model in &models {
        let marker = if cfg.extraction.roster.contains(model) { "*" } else { " " };
        println!("{marker} {model}");
    }
    let missing: Vec<_> = cfg
        .extraction
        .roster
        .iter()
        .filter(|m| !models.contains(m))
        .collect();
    if !missing.is_empty() {
        println!("\nRoster models not served by the provider: {missing:?}");
    }
    Ok(())
}

fn inspect(path: &std::path::Path) -> anyhow::Result<()> {
    let summary = inspect_artifact(path).with_context(|| format!("cannot inspect {}", path.display()))?;
    println!("--- {} ---", path.display());
    println!("root: {}", summary.root);
    for (key, kind) in &summary.keys {
        println!("  {key}: {kind}");
    }
    if let Some(source) = &summary.source {
        println!("source: {source}");
    }
    if let Some(model) = &summary.model {
        println!("model: {model}");
    }
    match summary.record_count {
        Some(n) => println!("records: {n}"),
        None => println!("records: none ('data' missing or not a list)"),
    }
    for (category, n) in &summary.categories {
        println!("  {category}: {n}");
    }
    if let Some(first) = &summary.first_record {
        println!("first record: {first}");
    }
    Ok(())
}
