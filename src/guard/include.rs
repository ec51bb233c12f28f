//! Include Guard.
//!
//! Only registered files can be loaded, and only while their content still
//! hashes to the digest recorded at startup. Requested names are reduced to
//! their final path component before lookup.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::audit::AuditLog;
use crate::config::IncludeConfig;
use crate::error::{GuardError, GuardResult};
use crate::guard::{transition, GuardKind, Stage};

/// A registered file that passed its integrity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludedFile {
    pub name: String,
    pub contents: Vec<u8>,
}

impl IncludedFile {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents).into_owned()
    }
}

/// A registered name together with the digest it must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedInclude {
    name: String,
    expected: String,
}

impl ValidatedInclude {
    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct IncludeGuard {
    dir: PathBuf,
    hashes: BTreeMap<String, String>,
    audit: AuditLog,
}

impl IncludeGuard {
    /// Register the configured files. Entries without a pinned digest are
    /// hashed from disk now.
    pub fn new(config: &IncludeConfig, audit: AuditLog) -> GuardResult<Self> {
        let mut hashes = BTreeMap::new();
        for entry in &config.files {
            let digest = match &entry.sha256 {
                Some(pinned) => pinned.to_ascii_lowercase(),
                None => {
                    let path = config.dir.join(&entry.name);
                    let contents = fs::read(&path).map_err(|e| {
                        GuardError::internal(format!(
                            "cannot hash include {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
                    sha256_hex(&contents)
                }
            };
            tracing::debug!(file = %entry.name, sha256 = %digest, "Registered include");
            hashes.insert(entry.name.clone(), digest);
        }

        Ok(Self {
            dir: config.dir.clone(),
            hashes,
            audit,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hashes.keys().map(String::as_str)
    }

    /// Resolve a requested name to a registered file.
    pub fn validate(&self, requested: &str) -> GuardResult<ValidatedInclude> {
        let resolved = base_name(requested)
            .and_then(|n| self.hashes.get_key_value(n))
            .map(|(name, digest)| ValidatedInclude {
                name: name.clone(),
                expected: digest.clone(),
            });

        match resolved {
            Some(include) => {
                transition(GuardKind::Include, Stage::Pending, Stage::Validated, &include.name);
                Ok(include)
            }
            None => Err(self.audit.reject(
                GuardKind::Include,
                GuardError::authorization(format!(
                    "Unauthorized file inclusion attempted: {}",
                    requested
                )),
            )),
        }
    }

    /// Read a resolved file, returning it only if its digest still matches.
    pub fn load(&self, include: &ValidatedInclude) -> GuardResult<IncludedFile> {
        self.read_verified(include)
            .map_err(|e| self.audit.reject(GuardKind::Include, e))
    }

    /// Validate then load.
    pub fn include(&self, requested: &str) -> GuardResult<IncludedFile> {
        let validated = self.validate(requested)?;
        self.load(&validated)
    }

    fn read_verified(&self, include: &ValidatedInclude) -> GuardResult<IncludedFile> {
        let contents = fs::read(self.dir.join(&include.name)).map_err(|e| {
            GuardError::integrity(format!("File not found: {} ({})", include.name, e))
        })?;

        if sha256_hex(&contents) != include.expected {
            return Err(GuardError::integrity(format!(
                "File integrity check failed: {}",
                include.name
            )));
        }

        transition(GuardKind::Include, Stage::Validated, Stage::Executed, &include.name);
        Ok(IncludedFile {
            name: include.name.clone(),
            contents,
        })
    }
}

/// Final path component of `requested`, or `None` when nothing usable is left.
pub fn base_name(requested: &str) -> Option<&str> {
    let name = requested.rsplit(['/', '\\']).next().unwrap_or(requested);
    match name {
        "" | "." | ".." => None,
        n if n.contains('\0') => None,
        n => Some(n),
    }
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::config::IncludeEntry;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, IncludeGuard, Arc<MemoryAuditSink>) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("header.php"), "<header>site</header>").unwrap();
        fs::write(dir.path().join("footer.php"), "<footer>site</footer>").unwrap();
        fs::write(dir.path().join("secret.txt"), "not registered").unwrap();

        let config = IncludeConfig {
            dir: dir.path().to_path_buf(),
            files: vec![
                IncludeEntry {
                    name: "header.php".into(),
                    sha256: None,
                },
                IncludeEntry {
                    name: "footer.php".into(),
                    sha256: Some(sha256_hex(b"<footer>site</footer>").to_uppercase()),
                },
            ],
        };
        let (audit, sink) = AuditLog::in_memory();
        let guard = IncludeGuard::new(&config, audit).unwrap();
        (dir, guard, sink)
    }

    #[test]
    fn test_registered_file_loads() {
        let (_dir, guard, sink) = setup();
        let file = guard.include("header.php").unwrap();
        assert_eq!(file.text(), "<header>site</header>");
        assert_eq!(guard.include("footer.php").unwrap().name, "footer.php");
        assert!(sink.messages().is_empty());
    }

    #[test]
    fn test_traversal_reduced_to_base_name() {
        let (_dir, guard, sink) = setup();

        let err = guard.include("../../../etc/passwd").unwrap_err();
        assert!(matches!(err, GuardError::Authorization(_)));
        assert_eq!(
            sink.messages(),
            vec!["Unauthorized file inclusion attempted: ../../../etc/passwd"]
        );

        // Directory parts are dropped, so this still resolves to the registered file.
        assert!(guard.include("../includes/header.php").is_ok());
        assert!(guard.include("..\\..\\header.php").is_ok());
    }

    #[test]
    fn test_unregistered_file_rejected() {
        let (_dir, guard, _) = setup();
        for name in ["secret.txt", "", "..", "header.php/", "header.php\0"] {
            let err = guard.include(name).unwrap_err();
            assert!(matches!(err, GuardError::Authorization(_)), "{:?}", name);
        }
    }

    #[test]
    fn test_tampered_file_rejected() {
        let (dir, guard, sink) = setup();
        fs::write(dir.path().join("header.php"), "<?php system($_GET['c']); ?>").unwrap();

        let err = guard.include("header.php").unwrap_err();
        assert!(matches!(err, GuardError::Integrity(_)));
        assert_eq!(err.public_message(), "Requested resource is unavailable.");
        assert_eq!(sink.messages(), vec!["File integrity check failed: header.php"]);
    }

    #[test]
    fn test_deleted_file_is_integrity_failure() {
        let (dir, guard, _) = setup();
        fs::remove_file(dir.path().join("footer.php")).unwrap();
        let err = guard.include("footer.php").unwrap_err();
        assert!(matches!(err, GuardError::Integrity(_)));
    }

    #[test]
    fn test_missing_file_at_startup() {
        let dir = TempDir::new().unwrap();
        let config = IncludeConfig {
            dir: dir.path().to_path_buf(),
            files: vec![IncludeEntry {
                name: "config.php".into(),
                sha256: None,
            }],
        };
        let (audit, _) = AuditLog::in_memory();
        assert!(IncludeGuard::new(&config, audit).is_err());
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("a/b/c.php"), Some("c.php"));
        assert_eq!(base_name("c.php"), Some("c.php"));
        assert_eq!(base_name("a\\c.php"), Some("c.php"));
        assert_eq!(base_name("a/"), None);
        assert_eq!(base_name("/.."), None);
    }
}
