use anyhow::{Context, Result};
use clap::Parser;
use curriculum_kg::graph::{parse_extraction_output, BuildBatch};
use curriculum_kg::store::SqliteGraphStore;
use curriculum_kg::{Config, GraphBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "build-graph")]
#[command(about = "Build the curriculum graph from triple-extractor output")]
struct Args {
    /// JSONL file, one extractor response per line
    input: PathBuf,

    /// Rebuild even when the graph store already holds nodes
    #[arg(short, long)]
    force: bool,

    /// Skip the CSV export
    #[arg(long)]
    no_export: bool,
}

fn read_batch(path: &Path) -> Result<BuildBatch> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read extractor output: {}", path.display()))?;

    let mut batch = BuildBatch::new();
    let mut skipped = 0usize;
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_extraction_output(line) {
            Ok(output) => batch.push_output(output),
            Err(e) => {
                log::warn!("Line {}: {}", idx + 1, e);
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        log::warn!("Skipped {} malformed extractor responses", skipped);
    }
    Ok(batch)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.curriculum.log_level.as_str()),
    )
    .init();

    log::info!("Starting curriculum graph build");
    log::info!("Database path: {}", config.db_path().display());

    let batch = read_batch(&args.input)?;
    log::info!("Read {} raw records from {}", batch.len(), args.input.display());
    if batch.is_empty() {
        log::warn!("No extractor records found. Nothing to build.");
        return Ok(());
    }

    let store = SqliteGraphStore::open(config.db_path(), Path::new("migrations")).await?;
    let mut builder = GraphBuilder::new(Arc::new(store));
    if !args.no_export {
        builder = builder.with_export_dir(config.export_dir());
    }

    let start = Instant::now();
    let report = builder.build(batch, args.force).await?;
    if report.skipped {
        log::info!("Run with --force to rebuild.");
        return Ok(());
    }

    let n = &report.normalization;
    log::info!("Build complete in {:.2}s", start.elapsed().as_secs_f64());
    log::info!("  Raw entities:         {}", n.raw_entities);
    log::info!("  Raw relations:        {}", n.raw_relations);
    log::info!("  Rejected records:     {}", n.rejected);
    log::info!("  Duplicate entities:   {}", n.duplicate_entities);
    log::info!("  Duplicate relations:  {}", n.duplicate_relations);
    log::info!("  Cyclic edges dropped: {}", n.cyclic_relations);
    log::info!("  Nodes committed:      {}", report.commit.nodes);
    log::info!("  Edges committed:      {}", report.commit.edges);
    log::info!("  Edges skipped:        {}", report.commit.skipped_edges);
    if let Some(export) = &report.export {
        log::info!("  Exports: {} / {}", export.nodes.display(), export.edges.display());
    }
    Ok(())
}
