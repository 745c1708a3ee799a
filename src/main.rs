use anyhow::Result;
use clap::Parser;
use curriculum_kg::db::{migrate, Db};
use curriculum_kg::error::CurriculumError;
use curriculum_kg::Config;
use std::path::Path;

#[derive(Parser, Debug)]
#[command(name = "curriculum-kg")]
#[command(about = "Verify the curriculum graph database and print graph statistics")]
struct Args {
    /// Only verify the schema, skip statistics
    #[arg(long)]
    verify_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.curriculum.log_level.as_str()),
    )
    .init();

    log::info!("Starting curriculum-kg v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Database path: {}", config.db_path().display());

    if let Some(parent) = config.db_path().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Db::new(config.db_path());
    db.migrate(Path::new("migrations")).await?;
    log::info!("Database initialized successfully");

    verify_database_schema(&db).await?;
    log::info!("Schema verified");

    if !args.verify_only {
        print_stats(&db).await?;
    }
    Ok(())
}

/// Verify that every expected table and index exists
async fn verify_database_schema(db: &Db) -> Result<()> {
    db.with_connection(|conn| {
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        let mut missing = Vec::new();
        for table in ["nodes", "edges", "schema_migrations"] {
            if tables.iter().any(|t| t == table) {
                log::debug!("✓ Table exists: {}", table);
            } else {
                log::error!("Missing table: {}", table);
                missing.push(table);
            }
        }
        if !missing.is_empty() {
            return Err(CurriculumError::Config(format!("Missing tables: {}", missing.join(", "))));
        }

        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'")?;
        let indexes: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        for index in ["idx_nodes_name", "idx_nodes_type_name", "idx_edges_tail"] {
            if !indexes.iter().any(|i| i == index) {
                log::warn!("Missing index: {} (lookups will be slower)", index);
            }
        }

        let applied = migrate::get_applied_migrations(conn)?;
        log::debug!("✓ {} migrations applied", applied.len());
        Ok(())
    })
    .await?;
    Ok(())
}

async fn print_stats(db: &Db) -> Result<()> {
    let (by_type, by_relation) = db
        .with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT node_type, COUNT(*) FROM nodes GROUP BY node_type ORDER BY node_type")?;
            let by_type = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

            let mut stmt = conn.prepare("SELECT relation, COUNT(*) FROM edges GROUP BY relation ORDER BY relation")?;
            let by_relation = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
            Ok((by_type, by_relation))
        })
        .await?;

    let nodes: i64 = by_type.iter().map(|(_, n)| n).sum();
    let edges: i64 = by_relation.iter().map(|(_, n)| n).sum();

    println!("Nodes: {}", nodes);
    for (node_type, count) in &by_type {
        println!("  {:<18} {}", node_type, count);
    }
    println!("Edges: {}", edges);
    for (relation, count) in &by_relation {
        println!("  {:<24} {}", relation, count);
    }
    Ok(())
}
