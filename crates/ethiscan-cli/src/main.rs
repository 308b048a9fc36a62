//! `ethiscan`: diagnose the ethical risks of an AI service.
//!
//! ```text
//! ethiscan run   --url https://daglo.ai --docs ./data/daglo --terms terms.txt -v
//! ethiscan index --docs ./data/daglo --preview 5
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ethiscan_core::retrieval::{discover_documents, PassageRetriever, RetrieverFactory};
use ethiscan_core::{PipelineState, ReportStatus};
use ethiscan_runtime::{
    Oracle, PipelineBuilder, PipelineError, ProviderRegistry, RuntimeConfig, TaskContext,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ethiscan", version, about = "AI ethics risk diagnosis for online services")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full diagnosis and write the report
    Run(RunArgs),

    /// Build or reuse the document index and preview its chunks
    Index(IndexArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Service URL
    #[arg(long)]
    url: Option<String>,

    /// Directory of service documents (terms, policies, guidelines)
    #[arg(long)]
    docs: Option<PathBuf>,

    /// Terms of service text file
    #[arg(long)]
    terms: Option<PathBuf>,

    /// Privacy policy text file
    #[arg(long)]
    privacy: Option<PathBuf>,

    /// Runtime configuration (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Corpus identifier for the persisted index (default: docs directory name)
    #[arg(long)]
    service_name: Option<String>,
}

#[derive(Args, Debug)]
struct IndexArgs {
    /// Directory of service documents
    #[arg(long)]
    docs: PathBuf,

    /// Runtime configuration (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of chunks to print
    #[arg(long, default_value_t = 5)]
    preview: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Index(args) => index(args),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_yaml::from_str::<RuntimeConfig>(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => RuntimeConfig::default(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn read_text(path: Option<&Path>) -> Result<Option<String>> {
    path.map(|p| std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display())))
        .transpose()
}

fn corpus_id(explicit: Option<&str>, docs: &Path) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| docs.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "default".to_string())
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let config = load_config(args.config.as_deref())?;

    let documents = match &args.docs {
        Some(dir) => discover_documents(dir)
            .with_context(|| format!("listing documents in {}", dir.display()))?,
        None => Vec::new(),
    };

    let mut initial = PipelineState::new(args.url.clone(), documents);
    if let Some(terms) = read_text(args.terms.as_deref())? {
        initial = initial.with_terms_text(terms);
    }
    if let Some(policy) = read_text(args.privacy.as_deref())? {
        initial = initial.with_privacy_policy_text(policy);
    }
    if !initial.has_input() {
        bail!(PipelineError::InputError);
    }

    let provider = ProviderRegistry::with_defaults()
        .from_config(&config.provider)
        .with_context(|| format!("creating '{}' provider", config.provider.kind))?;
    let oracle = Arc::new(Oracle::from_config(provider, &config.oracle));
    tracing::info!(provider = oracle.provider_name(), model = oracle.model(), "Oracle ready");

    let mut ctx = TaskContext::from_config(oracle.clone(), &config);
    if let Some(dir) = &args.docs {
        let id = corpus_id(args.service_name.as_deref(), dir);
        let factory = RetrieverFactory::new(config.retriever.clone());
        if let Some(retriever) = factory.build(&id, &initial.documents) {
            ctx = ctx.with_retriever(Arc::new(retriever));
        }
    }

    let pipeline = PipelineBuilder::from_config(ctx, &config)?.build();
    let state = pipeline.run(initial).await?;

    let Some(report) = &state.final_report else {
        bail!("pipeline finished without a report");
    };

    println!("Status:  {}", report.status);
    println!("Summary: {}", report.summary);
    for path in &report.output_paths {
        println!("Report:  {}", path.display());
    }
    for note in &report.notes {
        println!("Note:    {}", note);
    }
    if let Some(details) = &report.error_details {
        println!("Errors:\n{}", details);
    }

    let usage = oracle.usage();
    for (stage, stage_usage) in usage.by_stage() {
        println!(
            "  {:<28} calls={} tokens={} cache_hits={}",
            stage.display_name(),
            stage_usage.llm_calls,
            stage_usage.total_tokens,
            stage_usage.cache_hits
        );
    }
    let total = usage.total();
    println!(
        "Usage:   {} calls, {} tokens, ~${:.4}",
        total.llm_calls, total.total_tokens, total.estimated_cost
    );

    Ok(if report.status == ReportStatus::Failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn index(args: IndexArgs) -> Result<ExitCode> {
    let config = load_config(args.config.as_deref())?;
    let documents = discover_documents(&args.docs)
        .with_context(|| format!("listing documents in {}", args.docs.display()))?;
    if documents.is_empty() {
        bail!("no documents found in {}", args.docs.display());
    }

    let factory = RetrieverFactory::new(config.retriever.clone());
    let id = corpus_id(None, &args.docs);
    let Some(retriever) = factory.build(&id, &documents) else {
        bail!("no index could be built for {}", args.docs.display());
    };

    let stats = retriever.stats();
    println!("Corpus:   {} ({} documents)", id, documents.len());
    println!("Mode:     {}", retriever.mode());
    println!(
        "Passages: {} lexical, {} semantic{}",
        stats.lexical_passages,
        stats.semantic_passages,
        if stats.semantic_reused { " (reused)" } else { "" }
    );

    for (i, passage) in factory.preview(&documents, args.preview).iter().enumerate() {
        println!(
            "\n[{}] {} ({}, section: {})\n{}",
            i + 1,
            passage.source_document,
            passage.location,
            passage.section_label,
            passage.text.trim()
        );
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::parse_from([
            "ethiscan", "run", "--url", "https://daglo.ai", "--docs", "data", "-v",
        ]);
        assert!(cli.verbose);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.url.as_deref(), Some("https://daglo.ai"));
        assert_eq!(args.docs, Some(PathBuf::from("data")));
    }

    #[test]
    fn test_load_config_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ethiscan.yaml");
        std::fs::write(
            &path,
            "max_join_attempts: 3\njoin_wait: 30s\noracle:\n  model: gpt-4o\nprovider:\n  type: anthropic\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.max_join_attempts, 3);
        assert_eq!(config.join_wait, Duration::from_secs(30));
        assert_eq!(config.oracle.model, "gpt-4o");
        assert_eq!(config.provider.kind, "anthropic");
        assert_eq!(config.retrieval_k, 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "retrieval_k: 0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_corpus_id() {
        assert_eq!(corpus_id(Some("daglo"), Path::new("x/y")), "daglo");
        assert_eq!(corpus_id(None, Path::new("data/daglo")), "daglo");
    }
}
