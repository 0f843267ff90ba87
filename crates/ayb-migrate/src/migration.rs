//! A single versioned migration and the sources that produce them.

use ayb_error::{AybError, Result};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub sql: String,
}

/// Where migrations come from — a directory of numbered `.sql` files in
/// production, an in-memory list in tests.
pub trait MigrationSource {
    /// # Errors
    ///
    /// Returns an error if the source can't be read, or two migrations share
    /// a version.
    fn migrations(&self) -> Result<Vec<Migration>>;
}

pub struct FileSystemSource {
    dir: std::path::PathBuf,
}

impl FileSystemSource {
    #[must_use]
    pub fn new(dir: impl Into<std::path::PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl MigrationSource for FileSystemSource {
    fn migrations(&self) -> Result<Vec<Migration>> {
        let mut migrations = Vec::new();
        let entries = std::fs::read_dir(&self.dir).map_err(AybError::internal)?;
        for entry in entries {
            let entry = entry.map_err(AybError::internal)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("sql") {
                continue;
            }
            let (version, name) = parse_filename(&path)?;
            let sql = std::fs::read_to_string(&path).map_err(AybError::internal)?;
            migrations.push(Migration { version, name, sql });
        }
        validate_unique_versions(&migrations)?;
        migrations.sort_by_key(|m| m.version);
        Ok(migrations)
    }
}

/// `0001_create_users.sql` → `(1, "create_users")`.
fn parse_filename(path: &Path) -> Result<(i64, String)> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| AybError::Validation(format!("unreadable migration filename: {}", path.display())))?;

    let (version_str, name) = stem
        .split_once('_')
        .ok_or_else(|| AybError::Validation(format!("migration filename missing version prefix: {stem}")))?;

    let version = version_str
        .parse::<i64>()
        .map_err(|_| AybError::Validation(format!("migration filename has a non-numeric version: {stem}")))?;

    Ok((version, name.to_string()))
}

/// In-memory source for migrations driven from a test.
pub struct InMemorySource {
    migrations: Vec<Migration>,
}

impl InMemorySource {
    #[must_use]
    pub fn new(migrations: Vec<Migration>) -> Self {
        Self { migrations }
    }
}

impl MigrationSource for InMemorySource {
    fn migrations(&self) -> Result<Vec<Migration>> {
        validate_unique_versions(&self.migrations)?;
        let mut sorted = self.migrations.clone();
        sorted.sort_by_key(|m| m.version);
        Ok(sorted)
    }
}

fn validate_unique_versions(migrations: &[Migration]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for m in migrations {
        if !seen.insert(m.version) {
            return Err(AybError::Validation(format!(
                "duplicate migration version: {}",
                m.version
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_version_and_name_from_filename() {
        let (version, name) = parse_filename(Path::new("0001_create_users.sql")).unwrap();
        assert_eq!(version, 1);
        assert_eq!(name, "create_users");
    }

    #[test]
    fn rejects_filename_without_separator() {
        assert!(parse_filename(Path::new("createusers.sql")).is_err());
    }

    #[test]
    fn rejects_non_numeric_version() {
        assert!(parse_filename(Path::new("abc_create_users.sql")).is_err());
    }

    #[test]
    fn in_memory_source_sorts_by_version() {
        let source = InMemorySource::new(vec![
            Migration {
                version: 2,
                name: "second".into(),
                sql: "SELECT 2".into(),
            },
            Migration {
                version: 1,
                name: "first".into(),
                sql: "SELECT 1".into(),
            },
        ]);
        let migrations = source.migrations().unwrap();
        assert_eq!(migrations[0].version, 1);
        assert_eq!(migrations[1].version, 2);
    }

    #[test]
    fn filesystem_source_reads_and_sorts_sql_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0002_add_index.sql"), "CREATE INDEX ...").unwrap();
        std::fs::write(dir.path().join("0001_create_users.sql"), "CREATE TABLE users ()").unwrap();
        std::fs::write(dir.path().join("README.md"), "not a migration").unwrap();

        let source = FileSystemSource::new(dir.path());
        let migrations = source.migrations().unwrap();

        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].version, 1);
        assert_eq!(migrations[0].name, "create_users");
        assert_eq!(migrations[1].version, 2);
    }

    #[test]
    fn rejects_duplicate_versions() {
        let source = InMemorySource::new(vec![
            Migration {
                version: 1,
                name: "a".into(),
                sql: "SELECT 1".into(),
            },
            Migration {
                version: 1,
                name: "b".into(),
                sql: "SELECT 2".into(),
            },
        ]);
        assert!(source.migrations().is_err());
    }
}
