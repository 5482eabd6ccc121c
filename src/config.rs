//! Store location resolved from the process environment.
//!
//! A `.env` file in the working directory is merged first when present; variables
//! already set in the environment win over the file.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::constants::{DB_DIR_ENV, DB_NAME_ENV, DB_PATH_ENV, DEFAULT_DB_DIR, DEFAULT_DB_NAME};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub db_path: PathBuf,
}

impl StoreConfig {
    /// Reads `DB_PATH`, or `DB_DIR` + `DB_NAME`, after merging `.env`.
    pub fn from_env() -> Result<Self> {
        load_dotenv(Path::new(".env"))?;
        Ok(Self::from_lookup(|key| std::env::var(key).ok()))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = non_empty(DB_PATH_ENV) {
            return Self {
                db_path: PathBuf::from(path.trim()),
            };
        }

        let dir = non_empty(DB_DIR_ENV).unwrap_or_else(|| DEFAULT_DB_DIR.to_string());
        let name = non_empty(DB_NAME_ENV).unwrap_or_else(|| DEFAULT_DB_NAME.to_string());
        let name = name.trim();
        let file_name = if Path::new(name).extension().is_some() {
            name.to_string()
        } else {
            format!("{name}.sqlite")
        };
        Self {
            db_path: PathBuf::from(dir.trim()).join(file_name),
        }
    }

    /// CLI flag beats the environment.
    pub fn with_override(self, db_path: Option<PathBuf>) -> Self {
        match db_path {
            Some(db_path) => Self { db_path },
            None => self,
        }
    }
}

fn load_dotenv(path: &Path) -> Result<()> {
    match dotenvy::from_path(path) {
        Ok(()) => {
            tracing::debug!("Loaded environment overrides from {}", path.display());
            Ok(())
        }
        Err(dotenvy::Error::Io(ref io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
            Ok(())
        }
        Err(err) => Err(err).with_context(|| format!("Failed reading {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = StoreConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config.db_path, PathBuf::from("data").join("sus.sqlite"));
    }

    #[test]
    fn explicit_path_wins_over_dir_and_name() {
        let config = StoreConfig::from_lookup(lookup_from(&[
            ("DB_PATH", "/tmp/custom.db"),
            ("DB_DIR", "/var/lib"),
            ("DB_NAME", "covid"),
        ]));
        assert_eq!(config.db_path, PathBuf::from("/tmp/custom.db"));
    }

    #[test]
    fn dir_and_name_compose_a_sqlite_file() {
        let config = StoreConfig::from_lookup(lookup_from(&[
            ("DB_DIR", "/var/lib/esus"),
            ("DB_NAME", "pa"),
        ]));
        assert_eq!(config.db_path, PathBuf::from("/var/lib/esus/pa.sqlite"));

        let config = StoreConfig::from_lookup(lookup_from(&[("DB_NAME", "pa.db")]));
        assert_eq!(config.db_path, PathBuf::from("data/pa.db"));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = StoreConfig::from_lookup(lookup_from(&[("DB_PATH", "  "), ("DB_NAME", "")]));
        assert_eq!(config.db_path, PathBuf::from("data/sus.sqlite"));
    }

    #[test]
    fn cli_override_replaces_resolved_path() {
        let config = StoreConfig::from_lookup(lookup_from(&[("DB_NAME", "pa")]))
            .with_override(Some(PathBuf::from("other.sqlite")));
        assert_eq!(config.db_path, PathBuf::from("other.sqlite"));
    }
}
