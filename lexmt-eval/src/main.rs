//! lexmt-eval - ablation experiment harness
//!
//! Runs a dataset through the configured ablations, computes the selected
//! metrics, and persists a timestamped run artifact.
//!
//! Exit codes: 0 success, 2 invalid configuration, 3 upstream unavailable
//! after retries, 4 all samples failed.

use clap::Parser;
use lexmt_common::config::RuntimeConfig;
use lexmt_common::types::{AblationConfig, GatingThresholds, LanguagePair, LayerSet};
use lexmt_common::Error;
use lexmt_engine::{EmbeddingClient, LlmClient, TermStore, TmIndex, VectorDbClient};
use lexmt_eval::dataset::load_dataset;
use lexmt_eval::metrics::remote::ScoringClient;
use lexmt_eval::{ExperimentRunner, MetricKind, MetricSuite, RunArtifactWriter, RunOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

const EXIT_CONFIG: u8 = 2;
const EXIT_UPSTREAM: u8 = 3;
const EXIT_ALL_FAILED: u8 = 4;

#[derive(Parser)]
#[command(name = "lexmt-eval", about = "Ablation experiments for the lexmt pipeline")]
struct Cli {
    /// Dataset JSON path
    #[arg(long)]
    dataset: PathBuf,

    /// Default language pair for records without one
    #[arg(long, default_value = "zh-en")]
    pair: String,

    /// Comma-separated ablation presets to run
    #[arg(long, default_value = "baseline,terminology,terminology_syntax,full")]
    ablations: String,

    /// Comma-separated metric subset
    #[arg(long, default_value = "bleu,chrf,comet")]
    metrics: String,

    /// Max in-flight segments per ablation
    #[arg(long, default_value_t = 10)]
    max_concurrent: usize,

    /// Candidate-selection layers applied to every ablation
    #[arg(long, default_value = "none")]
    selection_layers: String,

    #[arg(long, default_value_t = 1)]
    num_candidates: usize,

    /// Gating layers applied to every ablation
    #[arg(long, default_value = "none")]
    gating_layers: String,

    #[arg(long, default_value_t = 0.90)]
    term_gate_threshold: f64,

    #[arg(long, default_value_t = 0.85)]
    syntax_gate_threshold: f64,

    #[arg(long, default_value_t = 0.75)]
    discourse_gate_threshold: f64,

    /// TM similarity floor
    #[arg(long, default_value_t = 0.7)]
    tm_floor: f64,

    /// Extract terminology-only and terminology+syntax result sets from
    /// the full ablation
    #[arg(long)]
    save_intermediate: bool,

    /// Embed full traces in the artifact
    #[arg(long)]
    save_trace: bool,

    /// Artifact output directory
    #[arg(long, default_value = "outputs")]
    output_dir: PathBuf,

    /// Config file path
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("failed to initialize logging");
        return ExitCode::from(EXIT_CONFIG);
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Run aborted");
            match e {
                Error::Config(_) | Error::InputInvalid(_) => ExitCode::from(EXIT_CONFIG),
                Error::UpstreamUnavailable(_) => ExitCode::from(EXIT_UPSTREAM),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn run(cli: Cli) -> lexmt_common::Result<ExitCode> {
    // Environment preflight: configuration problems exit before any work
    let runtime = RuntimeConfig::resolve(cli.config.as_deref())?;
    let default_pair: LanguagePair = cli.pair.parse()?;

    let ablations = build_ablations(&cli)?;
    let metric_kinds = if cli.metrics.trim().is_empty() {
        MetricKind::default_set()
    } else {
        MetricKind::parse_set(&cli.metrics)?
    };

    let (segments, skipped) = load_dataset(&cli.dataset, default_pair)?;
    info!(
        samples = segments.len(),
        skipped,
        ablations = ablations.len(),
        "Dataset loaded"
    );

    // Shared clients and stores
    let llm = Arc::new(LlmClient::new(&runtime)?);
    let termbase = Arc::new(TermStore::open(&runtime.term_db).await?);
    let mut tm = TmIndex::open(default_pair, Some(runtime.tm_index.clone()))?;

    let mut suite = MetricSuite::new(metric_kinds).with_llm(llm.clone());
    if let Some(url) = &runtime.scoring_url {
        suite = suite.with_scoring(ScoringClient::new(url)?);
    }

    let mut term_vector = None;
    if let Some(url) = &runtime.vector_db_url {
        let embeddings = Arc::new(EmbeddingClient::new(&runtime)?);
        let vector_db = Arc::new(VectorDbClient::new(url)?);
        tm = tm.with_dense(embeddings.clone(), vector_db.clone()).await?;
        term_vector = Some(lexmt_engine::termbase::lookup::VectorLookup {
            embeddings,
            vector_db,
        });
    }

    let mut runner = ExperimentRunner::new(llm.clone())
        .with_termbase(termbase)
        .with_tm(Arc::new(tm));
    if let Some(vector) = term_vector {
        runner = runner.with_term_vector(vector);
    }

    let options = RunOptions {
        save_intermediate: cli.save_intermediate,
        save_trace: cli.save_trace,
    };

    let writer = RunArtifactWriter::create(&cli.output_dir)?;
    info!(run_dir = %writer.run_dir().display(), "Artifacts directory created");

    let mut completed = Vec::new();
    for ablation in &ablations {
        let result = runner
            .run_ablation(&segments, ablation, &suite, &options)
            .await?;

        writer.write_ablation(&result)?;
        if options.save_intermediate && ablation.name == "full" {
            writer.write_intermediates(&result)?;
        }
        completed.push(result);
    }

    writer.write_summary(&cli.dataset, &completed)?;

    // The run always produces an artifact; exit code reflects outcome
    let total: usize = completed.iter().map(|a| a.results.len()).sum();
    let successes: usize = completed
        .iter()
        .map(|a| a.results.iter().filter(|r| r.success).count())
        .sum();

    if total > 0 && successes == 0 {
        let upstream = completed.iter().any(|a| {
            a.results
                .iter()
                .any(|r| r.error_kind.as_deref() == Some("upstream_unavailable"))
        });
        return Ok(ExitCode::from(if upstream {
            EXIT_UPSTREAM
        } else {
            EXIT_ALL_FAILED
        }));
    }

    info!(successes, total, "Run complete");
    Ok(ExitCode::SUCCESS)
}

fn build_ablations(cli: &Cli) -> lexmt_common::Result<Vec<AblationConfig>> {
    let selection: LayerSet = cli.selection_layers.parse()?;
    let gating: LayerSet = cli.gating_layers.parse()?;
    let thresholds = GatingThresholds {
        terminology: cli.term_gate_threshold,
        syntax: cli.syntax_gate_threshold,
        discourse: cli.discourse_gate_threshold,
    };

    let mut ablations = Vec::new();
    for name in cli.ablations.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let mut ablation = AblationConfig::preset(name)?;
        ablation.control.selection_layers = selection.clone();
        ablation.control.num_candidates = cli.num_candidates;
        ablation.control.gating_layers = gating.clone();
        ablation.control.gating_thresholds = thresholds;
        ablation.control.tm_floor = cli.tm_floor;
        ablation.control.max_concurrent = cli.max_concurrent;
        ablation.control.validate()?;
        ablations.push(ablation);
    }
    if ablations.is_empty() {
        return Err(Error::Config("no ablations selected".to_string()));
    }
    Ok(ablations)
}
