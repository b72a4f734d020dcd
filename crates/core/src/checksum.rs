//! Content-derived checksums describing what a database should contain.
//!
//! Three values are derived from a [`BuildSpec`]:
//!
//! - the *build* checksum covers everything that shapes schema and seed data
//!   (migrations, imports, invalidation locations, the relevant configuration),
//! - the *scenario* checksum narrows it to one ordered seeder list,
//! - the *snapshot token* is a filename-safe key for snapshot files.
//!
//! Databases and snapshots with equal scenario checksums are interchangeable.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::Error;
use crate::config::InvalidationMethod;
use crate::spec::BuildSpec;

/// Length of the build-checksum prefix embedded in snapshot tokens.
const TOKEN_BUILD_LEN: usize = 16;

/// Length of the seeder-list digest embedded in snapshot tokens.
const TOKEN_SEEDERS_LEN: usize = 16;

/// Compute the build checksum for a specification.
///
/// A pre-calculated checksum on the [`BuildSpec`] is trusted as-is.
///
/// # Errors
///
/// Returns an error if an invalidation location cannot be read.
pub fn build_checksum(spec: &BuildSpec) -> Result<String, Error> {
    if let Some(pre_calculated) = &spec.pre_calculated_build_checksum {
        return Ok(pre_calculated.clone());
    }

    let mut hasher = Sha256::new();
    hasher.update(format!("driver:{}\n", spec.driver.as_str()).as_bytes());
    hasher.update(format!("migrations:{}\n", spec.migrations.describe()).as_bytes());
    for import in &spec.pre_migration_imports {
        hasher.update(format!("import:{}\n", import.display()).as_bytes());
    }

    if spec.invalidation.enabled {
        hasher.update(format!("method:{:?}\n", spec.invalidation.method).as_bytes());
        for file in watched_files(spec)? {
            hasher.update(format!("file:{}\n", file.display()).as_bytes());
            hasher.update(file_identity(&file, spec.invalidation.method)?.as_bytes());
            hasher.update(b"\n");
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the scenario checksum: the build checksum narrowed to an ordered seeder list.
pub fn scenario_checksum(build_checksum: &str, seeders: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"build:");
    hasher.update(build_checksum.as_bytes());
    hasher.update(b"\nseeders:");
    hasher.update(seeder_digest(seeders).as_bytes());
    hex::encode(hasher.finalize())
}

/// Compute the filename token for a snapshot taken after `seeders` ran.
pub fn snapshot_token(build_checksum: &str, seeders: &[String]) -> String {
    let seeders = seeder_digest(seeders);
    format!("{}-{}", short(build_checksum, TOKEN_BUILD_LEN), short(&seeders, TOKEN_SEEDERS_LEN))
}

/// Whether a snapshot token was derived from `build_checksum`.
pub fn token_matches_build(token: &str, build_checksum: &str) -> bool {
    token
        .strip_prefix(short(build_checksum, TOKEN_BUILD_LEN))
        .is_some_and(|rest| rest.starts_with('-'))
}

/// The leading `len` characters of a checksum (or all of it when shorter).
pub fn short(checksum: &str, len: usize) -> &str {
    checksum.get(..len).unwrap_or(checksum)
}

fn seeder_digest(seeders: &[String]) -> String {
    let mut hasher = Sha256::new();
    for seeder in seeders {
        hasher.update(seeder.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Every file under the invalidation locations, the migrations and seeders directories and the imports.
fn watched_files(spec: &BuildSpec) -> Result<BTreeSet<PathBuf>, Error> {
    let mut roots: Vec<&Path> = spec.invalidation.locations.iter().map(PathBuf::as_path).collect();
    if let Some(path) = spec.migrations.path() {
        roots.push(path);
    }
    roots.push(spec.seeders_dir.as_path());
    roots.extend(spec.pre_migration_imports.iter().map(PathBuf::as_path));

    let mut files = BTreeSet::new();
    for root in roots {
        if !root.exists() {
            tracing::debug!(location = %root.display(), "invalidation location does not exist");
            continue;
        }
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if entry.file_type().is_file() {
                files.insert(entry.into_path());
            }
        }
    }
    Ok(files)
}

fn file_identity(path: &Path, method: InvalidationMethod) -> Result<String, Error> {
    match method {
        InvalidationMethod::Content => {
            let bytes = std::fs::read(path)?;
            Ok(hex::encode(Sha256::digest(&bytes)))
        }
        InvalidationMethod::Modified => {
            let modified = std::fs::metadata(path)?.modified()?;
            let nanos = modified.duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or_default();
            Ok(nanos.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::spec::{BuildRequest, MigrationSource};
    use std::fs::File;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn spec_for(dir: &TempDir, method: InvalidationMethod) -> BuildSpec {
        let migrations = dir.path().join("migrations");
        std::fs::create_dir_all(&migrations).unwrap();
        std::fs::write(migrations.join("001_users.sql"), "CREATE TABLE users (id INTEGER PRIMARY KEY);").unwrap();
        let config = AppConfig {
            storage_dir: dir.path().join("storage"),
            invalidation_method: method,
            invalidation_locations: vec![],
            migrations: MigrationSource::Path(migrations),
            ..Default::default()
        };
        BuildRequest::default().resolve(&config).unwrap()
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        File::options().write(true).open(path).unwrap().set_modified(time).unwrap();
    }

    #[test]
    fn test_build_checksum_stability() {
        let dir = TempDir::new().unwrap();
        let spec = spec_for(&dir, InvalidationMethod::Content);
        let first = build_checksum(&spec).unwrap();
        let second = build_checksum(&spec).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_build_checksum_ignores_project_name() {
        let dir = TempDir::new().unwrap();
        let spec = spec_for(&dir, InvalidationMethod::Content);
        let renamed = BuildSpec { project_name: "another-project".into(), ..spec.clone() };
        assert_eq!(build_checksum(&spec).unwrap(), build_checksum(&renamed).unwrap());
    }

    #[test]
    fn test_build_checksum_ignores_selected_seeders() {
        let dir = TempDir::new().unwrap();
        let spec = spec_for(&dir, InvalidationMethod::Content);
        let seeded = BuildSpec { seeders: vec!["users".into()], ..spec.clone() };
        assert_eq!(build_checksum(&spec).unwrap(), build_checksum(&seeded).unwrap());
    }

    #[test]
    fn test_content_mode_detects_content_change() {
        let dir = TempDir::new().unwrap();
        let spec = spec_for(&dir, InvalidationMethod::Content);
        let migration = dir.path().join("migrations/001_users.sql");
        let original_mtime = std::fs::metadata(&migration).unwrap().modified().unwrap();
        let before = build_checksum(&spec).unwrap();

        std::fs::write(&migration, "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);").unwrap();
        set_mtime(&migration, original_mtime);

        assert_ne!(before, build_checksum(&spec).unwrap());
    }

    #[test]
    fn test_modified_mode_misses_change_with_preserved_mtime() {
        let dir = TempDir::new().unwrap();
        let spec = spec_for(&dir, InvalidationMethod::Modified);
        let migration = dir.path().join("migrations/001_users.sql");
        let original_mtime = std::fs::metadata(&migration).unwrap().modified().unwrap();
        let before = build_checksum(&spec).unwrap();

        std::fs::write(&migration, "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);").unwrap();
        set_mtime(&migration, original_mtime);
        assert_eq!(before, build_checksum(&spec).unwrap());

        set_mtime(&migration, original_mtime + Duration::from_secs(60));
        assert_ne!(before, build_checksum(&spec).unwrap());
    }

    #[test]
    fn test_new_migration_file_changes_checksum() {
        let dir = TempDir::new().unwrap();
        let spec = spec_for(&dir, InvalidationMethod::Content);
        let before = build_checksum(&spec).unwrap();
        std::fs::write(dir.path().join("migrations/002_posts.sql"), "CREATE TABLE posts (id INTEGER);").unwrap();
        assert_ne!(before, build_checksum(&spec).unwrap());
    }

    #[test]
    fn test_seeder_change_changes_checksum() {
        let dir = TempDir::new().unwrap();
        let seeders = dir.path().join("database/seeders");
        std::fs::create_dir_all(&seeders).unwrap();
        std::fs::write(seeders.join("users.sql"), "INSERT INTO users DEFAULT VALUES;").unwrap();
        let spec = BuildSpec { seeders_dir: seeders.clone(), ..spec_for(&dir, InvalidationMethod::Content) };
        let before = build_checksum(&spec).unwrap();

        std::fs::write(seeders.join("users.sql"), "INSERT INTO users DEFAULT VALUES; INSERT INTO users DEFAULT VALUES;")
            .unwrap();
        assert_ne!(before, build_checksum(&spec).unwrap());
    }

    #[test]
    fn test_disabled_invalidation_ignores_files() {
        let dir = TempDir::new().unwrap();
        let mut spec = spec_for(&dir, InvalidationMethod::Content);
        spec.invalidation.enabled = false;
        let before = build_checksum(&spec).unwrap();
        std::fs::write(dir.path().join("migrations/001_users.sql"), "-- changed").unwrap();
        assert_eq!(before, build_checksum(&spec).unwrap());
    }

    #[test]
    fn test_pre_calculated_checksum_is_trusted() {
        let dir = TempDir::new().unwrap();
        let spec = spec_for(&dir, InvalidationMethod::Content);
        let spec = BuildSpec { pre_calculated_build_checksum: Some("abc123".into()), ..spec };
        assert_eq!(build_checksum(&spec).unwrap(), "abc123");
    }

    #[test]
    fn test_scenario_checksum_depends_on_seeder_order() {
        let build = "f".repeat(64);
        let ab = scenario_checksum(&build, &["a".into(), "b".into()]);
        let ba = scenario_checksum(&build, &["b".into(), "a".into()]);
        let none = scenario_checksum(&build, &[]);
        assert_ne!(ab, ba);
        assert_ne!(ab, none);
        assert_eq!(ab, scenario_checksum(&build, &["a".into(), "b".into()]));
    }

    #[test]
    fn test_snapshot_token_format() {
        let build = "0123456789abcdef".repeat(4);
        let token = snapshot_token(&build, &["users".into()]);
        assert!(token.starts_with("0123456789abcdef-"));
        assert_eq!(token.len(), TOKEN_BUILD_LEN + 1 + TOKEN_SEEDERS_LEN);
        assert!(token_matches_build(&token, &build));
        assert!(!token_matches_build(&token, &"f".repeat(64)));
        assert_ne!(token, snapshot_token(&build, &[]));
    }
}
