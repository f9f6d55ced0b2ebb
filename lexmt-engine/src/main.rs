//! lexmt-translate - single-segment pipeline CLI and corpus tooling
//!
//! Subcommands: translate one segment through the configured layers,
//! preprocess a dataset into the termbase, import/export termbase entries,
//! and import a TM corpus.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use lexmt_common::config::RuntimeConfig;
use lexmt_common::types::{
    ControlConfig, GatingThresholds, LanguagePair, LayerSet, Segment, LAYER_ORDER,
};
use lexmt_engine::termbase::lookup::VectorLookup;
use lexmt_engine::{
    EmbeddingClient, LlmClient, TermPreprocessor, TermStore, TmIndex, Translator, VectorDbClient,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "lexmt-translate", about = "Hierarchical legal translation pipeline")]
struct Cli {
    /// Config file path (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log verbosely
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ControlArgs {
    /// Enabled layers: none, all, or a comma list of terminology,syntax,discourse
    #[arg(long, default_value = "all")]
    layers: String,

    #[arg(long)]
    no_termbase: bool,

    #[arg(long)]
    no_tm: bool,

    /// Layers with candidate selection: none, all, last, or a comma list
    #[arg(long, default_value = "none")]
    selection_layers: String,

    #[arg(long, default_value_t = 1)]
    num_candidates: usize,

    /// Layers with gating: none, all, or a comma list
    #[arg(long, default_value = "none")]
    gating_layers: String,

    #[arg(long, default_value_t = 0.90)]
    term_gate_threshold: f64,

    #[arg(long, default_value_t = 0.85)]
    syntax_gate_threshold: f64,

    #[arg(long, default_value_t = 0.75)]
    discourse_gate_threshold: f64,

    /// TM similarity floor for discourse references
    #[arg(long, default_value_t = 0.7)]
    tm_floor: f64,
}

impl ControlArgs {
    fn to_control(&self, max_concurrent: usize) -> Result<ControlConfig> {
        let enabled_layers = match self.layers.parse::<LayerSet>()? {
            LayerSet::All | LayerSet::Last => LAYER_ORDER.to_vec(),
            LayerSet::None => Vec::new(),
            LayerSet::Layers(layers) => {
                // Keep fixed pipeline order regardless of argument order
                LAYER_ORDER
                    .iter()
                    .copied()
                    .filter(|l| layers.contains(l))
                    .collect()
            }
        };

        let config = ControlConfig {
            enabled_layers,
            use_termbase: !self.no_termbase,
            use_tm: !self.no_tm,
            selection_layers: self.selection_layers.parse()?,
            num_candidates: self.num_candidates,
            gating_layers: self.gating_layers.parse()?,
            gating_thresholds: GatingThresholds {
                terminology: self.term_gate_threshold,
                syntax: self.syntax_gate_threshold,
                discourse: self.discourse_gate_threshold,
            },
            tm_floor: self.tm_floor,
            max_concurrent,
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Translate one segment through the pipeline
    Translate {
        /// Source text
        #[arg(long)]
        source: String,

        /// Language pair, e.g. zh-en
        #[arg(long, default_value = "zh-en")]
        pair: String,

        /// Write the full outcome (trace included) as JSON
        #[arg(long, short)]
        output: Option<PathBuf>,

        #[command(flatten)]
        control: ControlArgs,
    },

    /// Run dataset-wide term preprocessing into the termbase
    Preprocess {
        /// Dataset JSON: array of {id, source, pair, reference?}
        #[arg(long)]
        dataset: PathBuf,

        #[arg(long, default_value = "zh-en")]
        pair: String,
    },

    /// Termbase import/export/statistics
    Termbase {
        #[command(subcommand)]
        action: TermbaseAction,
    },

    /// Translation-memory corpus import
    Tm {
        #[command(subcommand)]
        action: TmAction,
    },
}

#[derive(Subcommand)]
enum TermbaseAction {
    /// Import a JSON array of term entries
    Import { file: PathBuf },
    /// Export entries for a pair as JSON
    Export {
        #[arg(long, default_value = "zh-en")]
        pair: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Print entry counts per pair and domain
    Stats,
}

#[derive(Subcommand)]
enum TmAction {
    /// Import a JSON array of {source_text, target_text} pairs
    Import {
        file: PathBuf,
        #[arg(long, default_value = "zh-en")]
        pair: String,
    },
}

#[derive(Deserialize)]
struct TmImportRecord {
    source_text: String,
    target_text: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let runtime = RuntimeConfig::resolve(cli.config.as_deref())?;

    match cli.command {
        Command::Translate {
            source,
            pair,
            output,
            control,
        } => {
            let pair: LanguagePair = pair.parse()?;
            let control = control.to_control(runtime.max_concurrent)?;

            let llm = Arc::new(LlmClient::new(&runtime)?);
            let termbase = Arc::new(TermStore::open(&runtime.term_db).await?);
            let mut tm = TmIndex::open(pair, Some(runtime.tm_index.clone()))?;

            let mut term_vector = None;
            if let Some(url) = &runtime.vector_db_url {
                let embeddings = Arc::new(EmbeddingClient::new(&runtime)?);
                let vector_db = Arc::new(VectorDbClient::new(url)?);
                tm = tm.with_dense(embeddings.clone(), vector_db.clone()).await?;
                term_vector = Some(VectorLookup {
                    embeddings,
                    vector_db,
                });
            }

            let mut translator = Translator::new(llm, control)?
                .with_termbase(termbase)
                .with_tm(Arc::new(tm));
            if let Some(vector) = term_vector {
                translator = translator.with_term_vector(vector);
            }

            let segment = Segment::new("cli", source, pair);
            let outcome = translator.translate(&segment).await;

            println!("source:      {}", outcome.source);
            println!("translation: {}", outcome.prediction);
            for layer in &outcome.trace.layers {
                println!(
                    "  {:<12} gated={} confidence={:.2}",
                    layer.layer.to_string(),
                    layer.gated,
                    layer.confidence
                );
            }
            if !outcome.success() {
                println!(
                    "status: {:?} ({})",
                    outcome.status,
                    outcome.error.as_deref().unwrap_or("unknown")
                );
            }

            if let Some(path) = output {
                std::fs::write(&path, serde_json::to_string_pretty(&outcome)?)
                    .with_context(|| format!("write {}", path.display()))?;
                info!(path = %path.display(), "Outcome written");
            }
        }

        Command::Preprocess { dataset, pair } => {
            let pair: LanguagePair = pair.parse()?;
            let content = std::fs::read_to_string(&dataset)
                .with_context(|| format!("read dataset {}", dataset.display()))?;
            let segments: Vec<Segment> = serde_json::from_str(&content)?;

            let llm = Arc::new(LlmClient::new(&runtime)?);
            let termbase = Arc::new(TermStore::open(&runtime.term_db).await?);

            let preprocessor =
                TermPreprocessor::new(llm, termbase.clone(), runtime.max_concurrent);
            let report = preprocessor.run(&segments, pair).await?;

            println!("segments:         {}", report.total_segments);
            println!("unique terms:     {}", report.unique_terms);
            println!("db hits:          {}", report.db_hits);
            println!("new translations: {}", report.new_translations);
            println!("failed:           {}", report.translation_failed.len());
            println!("termbase entries: {}", termbase.count(pair).await?);
        }

        Command::Termbase { action } => {
            let termbase = TermStore::open(&runtime.term_db).await?;
            match action {
                TermbaseAction::Import { file } => {
                    let report = termbase.import_json(&file).await?;
                    println!("inserted: {}", report.inserted);
                    println!("merged:   {}", report.merged);
                }
                TermbaseAction::Export { pair, output } => {
                    let pair: LanguagePair = pair.parse()?;
                    let entries = termbase.export(pair).await?;
                    let json = serde_json::to_string_pretty(&entries)?;
                    match output {
                        Some(path) => std::fs::write(path, json)?,
                        None => println!("{json}"),
                    }
                }
                TermbaseAction::Stats => {
                    let stats = termbase.stats().await?;
                    println!("total: {}", stats.total);
                    for (pair, n) in &stats.by_pair {
                        println!("  {pair}: {n}");
                    }
                    for (domain, n) in &stats.by_domain {
                        println!("  [{domain}]: {n}");
                    }
                }
            }
        }

        Command::Tm { action } => match action {
            TmAction::Import { file, pair } => {
                let pair: LanguagePair = pair.parse()?;
                let content = std::fs::read_to_string(&file)
                    .with_context(|| format!("read {}", file.display()))?;
                let records: Vec<TmImportRecord> = serde_json::from_str(&content)?;

                let mut tm = TmIndex::open(pair, Some(runtime.tm_index.clone()))?;
                if let Some(url) = &runtime.vector_db_url {
                    let embeddings = Arc::new(EmbeddingClient::new(&runtime)?);
                    let vector_db = Arc::new(VectorDbClient::new(url)?);
                    tm = tm.with_dense(embeddings, vector_db).await?;
                }

                let pairs: Vec<(String, String)> = records
                    .into_iter()
                    .map(|r| (r.source_text, r.target_text))
                    .collect();
                let inserted = tm.insert_batch(&pairs).await?;
                println!("imported: {inserted}");
                println!("tm size:  {}", tm.size().await);
            }
        },
    }

    Ok(())
}
