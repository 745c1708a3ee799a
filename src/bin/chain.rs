use anyhow::{Context, Result};
use clap::Parser;
use curriculum_kg::chain::{ChainInstantiator, ChainRepository};
use curriculum_kg::generation::{ChatScriptGenerator, LearnerState, RetryPolicy, RetryingGenerator};
use curriculum_kg::store::SqliteGraphStore;
use curriculum_kg::{Config, CurriculumEngine, CurriculumError};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "chain")]
#[command(about = "Generate task chains for learning objectives")]
struct Args {
    /// Learning objective (repeatable). Defaults to one objective per configured module.
    #[arg(short, long = "objective")]
    objectives: Vec<String>,

    /// Learner state as a JSON object
    #[arg(long)]
    learner_state: Option<String>,
}

fn default_objectives(config: &Config) -> Vec<String> {
    config
        .retrieval
        .modules
        .keys()
        .map(|module| format!("Master the core content of {}", module))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.curriculum.log_level.as_str()),
    )
    .init();

    let learner_state: LearnerState = match &args.learner_state {
        Some(json) => serde_json::from_str(json).context("--learner-state must be a JSON object")?,
        None => LearnerState::new(),
    };

    let objectives = if args.objectives.is_empty() {
        default_objectives(&config)
    } else {
        args.objectives.clone()
    };
    if objectives.is_empty() {
        anyhow::bail!("No objectives given and no modules configured under [retrieval.modules]");
    }

    let api_key = config.generation.api_key()?;
    let chat = ChatScriptGenerator::new(&config.generation, api_key)?;
    let generator = Arc::new(RetryingGenerator::new(
        Arc::new(chat),
        RetryPolicy::from_config(&config.generation),
    ));

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received; finishing in-flight nodes");
            signal_token.cancel();
        }
    });

    let store = SqliteGraphStore::open(config.db_path(), Path::new("migrations")).await?;
    let instantiator =
        ChainInstantiator::new(generator, config.generation.max_concurrency).with_cancellation(cancel.clone());
    let engine = CurriculumEngine::new(Arc::new(store), config.retrieval.clone(), instantiator);
    let repository = ChainRepository::new(config.chain_dir());

    let mut failures = 0usize;
    for (idx, objective) in objectives.iter().enumerate() {
        if cancel.is_cancelled() {
            log::warn!("Cancelled; {} objectives not started", objectives.len() - idx);
            break;
        }
        log::info!("[{}/{}] Objective: {}", idx + 1, objectives.len(), objective);

        let chain = match engine.generate_chain(objective, &learner_state).await {
            Ok(chain) => chain,
            Err(CurriculumError::NoAnchor(_)) => {
                log::error!("Graph has no nodes to anchor {:?}; run `build-graph` first", objective);
                failures += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let path = repository.save(&chain).await?;
        println!(
            "{} ({} nodes, {} default scripts) -> {}",
            objective,
            chain.nodes.len(),
            chain.default_script_count(),
            path.display()
        );
    }

    if failures > 0 {
        anyhow::bail!("{} objectives produced no chain", failures);
    }
    Ok(())
}
