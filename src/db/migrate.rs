//! Schema migrations: numbered `.sql` files applied in order and recorded
//! by name in `schema_migrations`.
//!
//! A migration file is named `NNN_description.sql`. Files whose name is
//! already recorded are skipped without being read; each pending file runs
//! in one transaction together with the insert that records it, so a failed
//! migration leaves no partial application behind.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};

use crate::error::{FindexError, Result};

/// Apply every pending migration found in `migrations_dir`.
pub fn run_migrations(conn: &mut Connection, migrations_dir: &Path) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let applied: HashSet<String> = applied_names(conn)?.into_iter().collect();

    for (version, name, path) in pending_migrations(migrations_dir, &applied)? {
        let sql = fs::read_to_string(&path)?;
        log::info!("Applying migration {} (version {})", name, version);

        let tx = conn.transaction()?;
        tx.execute_batch(&sql)
            .map_err(|e| FindexError::Config(format!("migration {} failed: {}", name, e)))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![version, name],
        )?;
        tx.commit()?;
    }

    Ok(())
}

/// Names of migrations already recorded, in application order.
pub fn applied_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM schema_migrations ORDER BY version")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut names = Vec::new();
    for row in rows {
        names.push(row?);
    }
    Ok(names)
}

/// Scan the directory for `.sql` files not yet applied, sorted by version.
fn pending_migrations(
    migrations_dir: &Path,
    applied: &HashSet<String>,
) -> Result<Vec<(u32, String, PathBuf)>> {
    let mut pending = Vec::new();

    for entry in fs::read_dir(migrations_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) != Some("sql") {
            continue;
        }

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(String::from)
            .ok_or_else(|| {
                FindexError::Config(format!("unreadable migration filename: {}", path.display()))
            })?;

        if applied.contains(&name) {
            continue;
        }

        pending.push((version_of(&name)?, name, path));
    }

    pending.sort();
    Ok(pending)
}

/// The numeric prefix of a migration name: "001_core_tables" -> 1.
fn version_of(name: &str) -> Result<u32> {
    name.split_once('_')
        .map(|(prefix, _)| prefix)
        .unwrap_or(name)
        .parse()
        .map_err(|_| {
            FindexError::Config(format!(
                "migration name must start with a number: {}",
                name
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_version_of() {
        assert_eq!(version_of("001_core_tables").unwrap(), 1);
        assert_eq!(version_of("012_later").unwrap(), 12);
        assert!(version_of("no_number").is_err());
    }

    #[test]
    fn test_pending_skips_applied_and_sorts() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("002_second.sql"), "SELECT 1;").unwrap();
        fs::write(temp_dir.path().join("001_first.sql"), "SELECT 1;").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();

        let applied: HashSet<String> = ["001_first".to_string()].into_iter().collect();
        let pending = pending_migrations(temp_dir.path(), &applied).unwrap();

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, 2);
        assert_eq!(pending[0].1, "002_second");
    }

    #[test]
    fn test_run_records_applications() {
        let temp_dir = TempDir::new().unwrap();
        let migrations_dir = temp_dir.path().join("migrations");
        fs::create_dir(&migrations_dir).unwrap();
        fs::write(migrations_dir.join("001_test.sql"), "CREATE TABLE test (id INTEGER);").unwrap();

        let mut conn = Connection::open(temp_dir.path().join("test.db")).unwrap();
        run_migrations(&mut conn, &migrations_dir).unwrap();

        assert_eq!(applied_names(&conn).unwrap(), vec!["001_test".to_string()]);
    }

    #[test]
    fn test_failed_migration_rolls_back() {
        let temp_dir = TempDir::new().unwrap();
        let migrations_dir = temp_dir.path().join("migrations");
        fs::create_dir(&migrations_dir).unwrap();
        fs::write(migrations_dir.join("001_bad.sql"), "THIS IS NOT SQL;").unwrap();

        let mut conn = Connection::open(temp_dir.path().join("test.db")).unwrap();
        assert!(run_migrations(&mut conn, &migrations_dir).is_err());

        // Nothing recorded for the failed file
        assert!(applied_names(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_full_migration_schema() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = Connection::open(temp_dir.path().join("test.db")).unwrap();

        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        run_migrations(&mut conn, &migrations_dir).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
            .unwrap();

        assert!(tables.contains(&"chunks".to_string()));
        assert!(tables.contains(&"sources".to_string()));
        assert!(tables.contains(&"directories".to_string()));
        assert!(tables.contains(&"api_keys".to_string()));
        assert!(tables.contains(&"schema_migrations".to_string()));
    }

    #[test]
    fn test_migrations_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = Connection::open(temp_dir.path().join("test.db")).unwrap();

        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        run_migrations(&mut conn, &migrations_dir).unwrap();
        run_migrations(&mut conn, &migrations_dir).unwrap();

        assert_eq!(applied_names(&conn).unwrap().len(), 2);
    }
}
