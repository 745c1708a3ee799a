use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use crate::error::{CurriculumError, Result};

/// One `NNN_name.sql` file.
#[derive(Debug)]
struct Migration {
    version: u32,
    name: String,
    sql: String,
    checksum: String,
}

impl Migration {
    fn from_path(path: &Path) -> Result<Option<Self>> {
        if path.extension().and_then(|s| s.to_str()) != Some("sql") {
            return Ok(None);
        }
        let name = path
            .file_stem()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CurriculumError::Config(format!("Invalid migration filename: {}", path.display())))?
            .to_string();

        let (prefix, _) = name
            .split_once('_')
            .ok_or_else(|| CurriculumError::Config(format!("Migration {} has no NNN_ prefix", name)))?;
        let version: u32 = prefix
            .parse()
            .map_err(|_| CurriculumError::Config(format!("Invalid migration version in {}", name)))?;

        let sql = fs::read_to_string(path)?;
        let checksum = format!("{:x}", Sha256::digest(sql.as_bytes()));
        Ok(Some(Self { version, name, sql, checksum }))
    }
}

fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            checksum TEXT NOT NULL DEFAULT '',
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
    )?;
    Ok(())
}

/// Names of applied migrations, oldest first
pub fn get_applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM schema_migrations ORDER BY version")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(names)
}

fn load_migrations(migrations_dir: &Path) -> Result<Vec<Migration>> {
    let mut migrations = Vec::new();
    for entry in fs::read_dir(migrations_dir)? {
        if let Some(migration) = Migration::from_path(&entry?.path())? {
            migrations.push(migration);
        }
    }
    migrations.sort_by_key(|m| m.version);

    if let Some(pair) = migrations.windows(2).find(|w| w[0].version == w[1].version) {
        return Err(CurriculumError::Config(format!(
            "Migrations {} and {} share version {}",
            pair[0].name, pair[1].name, pair[0].version
        )));
    }
    Ok(migrations)
}

/// Apply pending migrations in version order, one transaction each.
///
/// An applied migration whose file has since changed is reported and left alone.
pub fn run_migrations(conn: &mut Connection, migrations_dir: &Path) -> Result<()> {
    ensure_migrations_table(conn)?;

    for migration in load_migrations(migrations_dir)? {
        let recorded: Option<String> = conn
            .query_row(
                "SELECT checksum FROM schema_migrations WHERE version = ?1",
                params![migration.version],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(checksum) = recorded {
            if !checksum.is_empty() && checksum != migration.checksum {
                log::warn!("Migration {} changed after it was applied", migration.name);
            }
            continue;
        }

        log::info!("Applying migration {}", migration.name);
        let tx = conn.transaction()?;
        tx.execute_batch(&migration.sql)
            .map_err(|e| CurriculumError::Config(format!("Migration {} failed: {}", migration.name, e)))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, checksum) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, migration.checksum],
        )?;
        tx.commit()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, sql: &str) {
        fs::write(dir.join(name), sql).unwrap();
    }

    #[test]
    fn test_load_orders_by_version_and_ignores_other_files() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        write(dir, "010_late.sql", "CREATE TABLE late (id INTEGER);");
        write(dir, "002_early.sql", "CREATE TABLE early (id INTEGER);");
        write(dir, "notes.md", "not a migration");

        let migrations = load_migrations(dir).unwrap();
        let names: Vec<&str> = migrations.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["002_early", "010_late"]);
        assert_eq!(migrations[0].checksum.len(), 64);
    }

    #[test]
    fn test_duplicate_versions_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "001_a.sql", "SELECT 1;");
        write(temp_dir.path(), "001_b.sql", "SELECT 2;");
        assert!(matches!(load_migrations(temp_dir.path()), Err(CurriculumError::Config(_))));
    }

    #[test]
    fn test_graph_migrations_apply_once() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = Connection::open(temp_dir.path().join("kg.db")).unwrap();
        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");

        run_migrations(&mut conn, &migrations_dir).unwrap();
        run_migrations(&mut conn, &migrations_dir).unwrap();

        assert_eq!(get_applied_migrations(&conn).unwrap(), vec!["001_graph_tables".to_string()]);
        let nodes: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0)).unwrap();
        assert_eq!(nodes, 0);
    }

    #[test]
    fn test_failed_migration_is_not_recorded() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("migrations");
        fs::create_dir(&dir).unwrap();
        write(&dir, "001_ok.sql", "CREATE TABLE ok (id INTEGER);");
        write(&dir, "002_broken.sql", "CREATE TABLE (;");
        let mut conn = Connection::open(temp_dir.path().join("kg.db")).unwrap();

        assert!(run_migrations(&mut conn, &dir).is_err());
        assert_eq!(get_applied_migrations(&conn).unwrap(), vec!["001_ok".to_string()]);
    }
}
