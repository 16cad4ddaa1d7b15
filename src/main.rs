use mailqa::cli::{Cli, Commands, ConfigAction, HistoryAction};
use mailqa::config::Config;
use mailqa::corpus::Corpus;
use mailqa::error::{MailQaError, Result};
use mailqa::expansion::{OpenAiExpansionService, QueryExpander};
use mailqa::index::FastEmbedProvider;
use mailqa::retrieval::{IndexSnapshot, RetrievalOutcome, RetrievalPipeline};
use mailqa::session::{FileSessionStore, SessionStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Query {
            question,
            session,
            top_k,
            no_expand,
            json,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_query(&config, &question, session, top_k, no_expand, json)?;
        }
        Commands::Stats => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_stats(&config)?;
        }
        Commands::History { action } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_history(&config, action)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "mailqa=debug" } else { "mailqa=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| MailQaError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn build_expander(config: &Config, no_expand: bool) -> QueryExpander {
    let expansion = &config.expansion;
    if no_expand || !expansion.enabled {
        return QueryExpander::disabled();
    }

    match OpenAiExpansionService::from_config(expansion) {
        Ok(service) => QueryExpander::new(
            Arc::new(service),
            expansion.max_variants,
            expansion.history_turns,
            Duration::from_millis(expansion.timeout_ms),
        ),
        Err(e) => {
            tracing::warn!("Query expansion disabled: {}", e);
            QueryExpander::disabled()
        }
    }
}

fn cmd_query(
    config: &Config,
    question: &str,
    session: Option<String>,
    top_k: Option<usize>,
    no_expand: bool,
    json: bool,
) -> Result<()> {
    let corpus_path = expand_path(&config.storage.corpus_file)?;
    let sessions_dir = expand_path(&config.storage.sessions_dir)?;

    let rt = runtime()?;
    let outcome = rt.block_on(async {
        let corpus = Corpus::load_jsonl(&corpus_path, config.indexing.vector_dim)?;

        let indexing = config.indexing.clone();
        let ef_search = config.retrieval.hnsw_ef_search;
        let snapshot =
            tokio::task::spawn_blocking(move || IndexSnapshot::build(corpus, &indexing, ef_search))
                .await
                .map_err(|e| anyhow::anyhow!("Index build task failed: {e}"))??;

        let model = config.embedding.model.clone();
        let embedder = tokio::task::spawn_blocking(move || FastEmbedProvider::new(&model))
            .await
            .map_err(|e| anyhow::anyhow!("Embedding model task failed: {e}"))?
            .map_err(|e| anyhow::anyhow!("Failed to initialize embedding model: {e}"))?;

        let sessions: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(
            sessions_dir,
            config.expansion.history_turns,
        ));

        let pipeline = RetrievalPipeline::from_config(
            config,
            snapshot,
            Arc::new(embedder),
            sessions,
            build_expander(config, no_expand),
        )?;

        let outcome = pipeline
            .retrieve(question, session.as_deref().unwrap_or_default(), top_k)
            .await?;
        Ok::<RetrievalOutcome, MailQaError>(outcome)
    })?;

    if json {
        let out = serde_json::to_string_pretty(&outcome).map_err(|e| MailQaError::Json {
            source: e,
            context: "Failed to serialize results".to_string(),
        })?;
        println!("{}", out);
        return Ok(());
    }

    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &RetrievalOutcome) {
    if outcome.expansions.len() > 1 {
        println!("Searched: {}", outcome.expansions.join(" | "));
    }
    if outcome.is_degraded() {
        let d = &outcome.degradation;
        println!(
            "⚠ Degraded retrieval (expansion: {}, lexical: {}, semantic: {}, history: {})",
            d.expansion, d.lexical, d.semantic, d.history
        );
    }

    if outcome.results.is_empty() {
        println!("No matching passages found");
        return;
    }

    for (i, result) in outcome.results.iter().enumerate() {
        let b = &result.breakdown;
        println!(
            "\n{}. [{:.4}] {} ({})",
            i + 1,
            result.final_score,
            result.subject,
            result.date.format("%Y-%m-%d")
        );
        println!("   From: {}", result.sender);
        println!(
            "   fused {:.4} +subject {:.2} +sender {:.2} +year {:.2} -spam {:.2} | lexical {} semantic {} hits {}",
            b.fused,
            b.subject_boost,
            b.sender_boost,
            b.year_boost,
            b.spam_penalty,
            rank_str(b.lexical_rank),
            rank_str(b.semantic_rank),
            b.expansion_hits
        );
        println!("   {}", result.preview(200).replace('\n', " "));
    }
}

fn rank_str(rank: Option<usize>) -> String {
    rank.map_or_else(|| "-".to_string(), |r| format!("#{}", r + 1))
}

fn cmd_stats(config: &Config) -> Result<()> {
    let corpus_path = expand_path(&config.storage.corpus_file)?;
    let corpus = Corpus::load_jsonl(&corpus_path, config.indexing.vector_dim)?;
    let stats = corpus.stats();

    println!("Corpus: {}", corpus_path.display());
    println!("=======");
    println!("  Chunks:         {}", stats.chunks);
    println!("  Messages:       {}", stats.messages);
    println!("  Threads:        {}", stats.threads);
    println!("  Average tokens: {:.1}", stats.average_tokens);
    println!("  Dimension:      {}", stats.dimension);

    Ok(())
}

fn cmd_history(config: &Config, action: HistoryAction) -> Result<()> {
    let store = FileSessionStore::new(
        expand_path(&config.storage.sessions_dir)?,
        config.expansion.history_turns,
    );
    let rt = runtime()?;

    match action {
        HistoryAction::Show { session } => {
            let turns = rt.block_on(store.get_history(&session))?;
            if turns.is_empty() {
                println!("No history for session {}", session);
                return Ok(());
            }
            for turn in turns {
                println!("[{}]", turn.asked_at.format("%Y-%m-%d %H:%M:%S"));
                println!("  Q: {}", turn.question);
                println!("  A: {}", turn.answer);
            }
        }
        HistoryAction::Clear { session } => {
            if rt.block_on(store.clear(&session))? {
                println!("✓ Cleared history for session {}", session);
            } else {
                println!("No history for session {}", session);
            }
        }
    }

    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, profile)?;
            let value = serde_json::to_value(&config).map_err(|e| MailQaError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            let shown = match section {
                Some(section) => value.get(&section).cloned().ok_or_else(|| {
                    MailQaError::Config(format!("Unknown config section: {}", section))
                })?,
                None => value,
            };

            let json = serde_json::to_string_pretty(&shown).map_err(|e| MailQaError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            let mut config = Config::default();
            config.storage.data_dir = Config::default_data_dir()?;
            config.storage.corpus_file = config.storage.data_dir.join("chunks.jsonl");
            config.storage.sessions_dir = config.storage.data_dir.join("sessions");
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
            println!("  Corpus file: {}", config.storage.corpus_file.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'mailqa config init' to create one."
        );
        return Config::default().finalize(profile.as_deref());
    }

    match profile {
        Some(profile) => Config::load_with_profile(&path, &profile),
        None => Config::load(&path),
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| MailQaError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| MailQaError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
