//! Upload Guard.
//!
//! Checks run cheapest-first: declared size, extension, sniffed MIME type,
//! signature scan. Only then is the file moved, under a random name, into the
//! upload directory.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::audit::AuditLog;
use crate::config::UploadConfig;
use crate::error::{GuardError, GuardResult};
use crate::guard::scan::SignatureScanner;
use crate::guard::{transition, GuardKind, Stage};

const SNIFF_LEN: usize = 512;

/// An upload as received from the transport.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Client-supplied file name. Only its extension is ever used.
    pub file_name: String,
    /// Size reported by the transport.
    pub declared_size: u64,
    /// Client-supplied content type. Informational only.
    pub declared_mime: Option<String>,
    /// Where the transport staged the bytes.
    pub temp_path: PathBuf,
}

/// An upload that passed every check and may be stored.
#[derive(Debug)]
pub struct ValidatedUpload {
    temp_path: PathBuf,
    extension: String,
    mime: &'static str,
    size: u64,
}

/// Result of a stored upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    pub file_name: String,
    pub path: PathBuf,
    pub mime: &'static str,
    pub size: u64,
}

pub struct UploadGuard {
    max_size: u64,
    upload_dir: PathBuf,
    allowed: BTreeMap<String, String>,
    scanner: SignatureScanner,
    audit: AuditLog,
}

impl UploadGuard {
    pub fn new(config: &UploadConfig, audit: AuditLog) -> Result<Self, regex::Error> {
        Ok(Self {
            max_size: config.max_file_size,
            upload_dir: config.upload_dir.clone(),
            allowed: config.allowed_types.clone(),
            scanner: SignatureScanner::new(&config.signatures)?,
            audit,
        })
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Run every check; on success the upload may be stored.
    pub fn validate(&self, request: &UploadRequest) -> GuardResult<ValidatedUpload> {
        self.check(request)
            .map_err(|e| self.audit.reject(GuardKind::Upload, e))
    }

    fn check(&self, request: &UploadRequest) -> GuardResult<ValidatedUpload> {
        if request.declared_size > self.max_size {
            return Err(GuardError::validation(format!(
                "File too large: {} bytes (limit {})",
                request.declared_size, self.max_size
            )));
        }

        let extension = extension_of(&request.file_name);
        let expected_mime = match self.allowed.get(&extension) {
            Some(mime) => mime,
            None => {
                return Err(GuardError::validation(format!(
                    "Invalid file type attempted: {}",
                    extension
                )));
            }
        };

        let actual_size = fs::metadata(&request.temp_path)?.len();
        if actual_size > self.max_size {
            return Err(GuardError::validation(format!(
                "File too large: {} bytes on disk (limit {})",
                actual_size, self.max_size
            )));
        }

        let mut head = Vec::with_capacity(SNIFF_LEN);
        fs::File::open(&request.temp_path)?
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)?;
        let sniffed = sniff_mime(&head);
        if sniffed != expected_mime.as_str() {
            return Err(GuardError::validation(format!(
                "Invalid MIME type attempted: {} (declared {}, expected {} for .{})",
                sniffed,
                request.declared_mime.as_deref().unwrap_or("none"),
                expected_mime,
                extension
            )));
        }

        let content = fs::read(&request.temp_path)?;
        if !self.scanner.is_clean(&content) {
            let hits = self.scanner.matches(&content);
            let patterns: Vec<&str> = hits.iter().filter_map(|&i| self.scanner.pattern(i)).collect();
            return Err(GuardError::validation(format!(
                "Potential malware detected in upload: {}",
                patterns.join(", ")
            )));
        }

        transition(GuardKind::Upload, Stage::Pending, Stage::Validated, sniffed);
        Ok(ValidatedUpload {
            temp_path: request.temp_path.clone(),
            extension,
            mime: sniffed,
            size: actual_size,
        })
    }

    /// Move a validated upload into the upload directory.
    pub fn store(&self, upload: ValidatedUpload) -> GuardResult<StoredUpload> {
        self.persist(upload)
            .map_err(|e| self.audit.reject(GuardKind::Upload, e))
    }

    /// Validate then store.
    pub fn accept(&self, request: &UploadRequest) -> GuardResult<StoredUpload> {
        let validated = self.validate(request)?;
        self.store(validated)
    }

    fn persist(&self, upload: ValidatedUpload) -> GuardResult<StoredUpload> {
        create_private_dir(&self.upload_dir)
            .map_err(|e| GuardError::internal(format!("File upload failed: {}", e)))?;

        let file_name = random_file_name(&upload.extension);
        let destination = self.upload_dir.join(&file_name);

        move_file(&upload.temp_path, &destination)
            .map_err(|e| GuardError::internal(format!("File upload failed: {}", e)))?;
        restrict_permissions(&destination)
            .map_err(|e| GuardError::internal(format!("File upload failed: {}", e)))?;

        self.audit.record(
            GuardKind::Upload,
            format!("File uploaded successfully: {}", file_name),
        );

        Ok(StoredUpload {
            file_name,
            path: destination,
            mime: upload.mime,
            size: upload.size,
        })
    }
}

/// Lower-cased extension of a client-supplied name, empty when there is none.
pub fn extension_of(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or("");
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() || !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// Identify content by its leading magic bytes.
pub fn sniff_mime(head: &[u8]) -> &'static str {
    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if head.starts_with(PNG) {
        "image/png"
    } else if head.starts_with(b"%PDF-") {
        "application/pdf"
    } else if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        "image/gif"
    } else if head.is_empty() {
        "application/x-empty"
    } else if is_text(head) {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

fn is_text(head: &[u8]) -> bool {
    // A truncated multi-byte sequence at the end of the sniff window is fine.
    let valid = match std::str::from_utf8(head) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    };
    valid && !head.contains(&0)
}

fn random_file_name(extension: &str) -> String {
    let bytes: [u8; 16] = rand::random();
    format!(
        "{}_{}.{}",
        hex::encode(bytes),
        chrono::Utc::now().timestamp(),
        extension
    )
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    if dir.exists() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o750);
    }
    builder.create(dir)
}

fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            // Staging may live on another filesystem.
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o640))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use std::sync::Arc;

    const PNG_BYTES: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

    struct Fixture {
        _dir: tempfile::TempDir,
        staging: PathBuf,
        guard: UploadGuard,
        sink: Arc<MemoryAuditSink>,
    }

    fn fixture(max: u64) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        fs::create_dir_all(&staging).unwrap();

        let config = UploadConfig {
            max_file_size: max,
            upload_dir: dir.path().join("uploads"),
            ..UploadConfig::default()
        };
        let (audit, sink) = AuditLog::in_memory();
        let guard = UploadGuard::new(&config, audit).unwrap();

        Fixture {
            _dir: dir,
            staging,
            guard,
            sink,
        }
    }

    fn staged(fx: &Fixture, name: &str, content: &[u8], declared_mime: &str) -> UploadRequest {
        let temp_path = fx.staging.join(format!("tmp-{:016x}", rand::random::<u64>()));
        fs::write(&temp_path, content).unwrap();
        UploadRequest {
            file_name: name.to_string(),
            declared_size: content.len() as u64,
            declared_mime: Some(declared_mime.to_string()),
            temp_path,
        }
    }

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(sniff_mime(PNG_BYTES), "image/png");
        assert_eq!(sniff_mime(b"%PDF-1.7\n"), "application/pdf");
        assert_eq!(sniff_mime(b"GIF89a...."), "image/gif");
        assert_eq!(sniff_mime(b"Hello, World!"), "text/plain");
        assert_eq!(sniff_mime(&[0x00, 0x01, 0xFE]), "application/octet-stream");
        assert_eq!(sniff_mime(b""), "application/x-empty");
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("photo.JPG"), "jpg");
        assert_eq!(extension_of("archive.tar.gz"), "gz");
        assert_eq!(extension_of("../../x.php"), "php");
        assert_eq!(extension_of("shell.php.png"), "png");
        assert_eq!(extension_of("README"), "");
        assert_eq!(extension_of("C:\\temp\\evil.Php"), "php");
    }

    #[test]
    fn test_oversized_rejected_without_touching_filesystem() {
        let fx = fixture(10);
        let request = UploadRequest {
            file_name: "big.png".into(),
            declared_size: 11,
            declared_mime: Some("image/png".into()),
            // Does not exist: any filesystem access would surface as Internal.
            temp_path: fx.staging.join("never-written"),
        };

        let err = fx.guard.accept(&request).unwrap_err();
        assert!(matches!(err, GuardError::Validation(_)));
        assert!(err.detail().starts_with("File too large"));
        assert!(!fx.guard.upload_dir().exists());
    }

    #[test]
    fn test_php_rejected_regardless_of_declared_mime() {
        let fx = fixture(1024);
        let request = staged(&fx, "x.php", PNG_BYTES, "image/png");

        let err = fx.guard.accept(&request).unwrap_err();
        assert!(matches!(err, GuardError::Validation(_)));
        assert_eq!(fx.sink.messages(), vec!["Invalid file type attempted: php"]);
        assert!(request.temp_path.exists());
    }

    #[test]
    fn test_mime_mismatch_rejected() {
        let fx = fixture(1024);
        let request = staged(&fx, "photo.jpg", PNG_BYTES, "image/jpeg");

        let err = fx.guard.accept(&request).unwrap_err();
        assert!(matches!(err, GuardError::Validation(_)));
        assert!(fx.sink.messages()[0].starts_with("Invalid MIME type attempted: image/png"));
    }

    #[test]
    fn test_text_disguised_as_pdf_rejected() {
        let fx = fixture(1024);
        let request = staged(&fx, "report.pdf", b"just text", "application/pdf");
        assert!(fx.guard.accept(&request).is_err());
    }

    #[test]
    fn test_polyglot_rejected_by_scan() {
        let fx = fixture(1024);
        let mut content = PNG_BYTES.to_vec();
        content.extend_from_slice(b"<?php echo 'pwned'; ?>");
        let request = staged(&fx, "image.png", &content, "image/png");

        let err = fx.guard.accept(&request).unwrap_err();
        assert!(matches!(err, GuardError::Validation(_)));
        assert!(fx.sink.messages()[0].starts_with("Potential malware detected in upload"));
    }

    #[test]
    fn test_accepts_and_renames() {
        let fx = fixture(1024);
        let request = staged(&fx, "../../Holiday.PNG", PNG_BYTES, "image/png");

        let stored = fx.guard.accept(&request).unwrap();

        assert!(stored.file_name.ends_with(".png"));
        assert!(!stored.file_name.contains("Holiday"));
        let (random, rest) = stored.file_name.split_once('_').unwrap();
        assert_eq!(random.len(), 32);
        assert!(rest.trim_end_matches(".png").parse::<i64>().is_ok());

        assert_eq!(stored.path.parent(), Some(fx.guard.upload_dir()));
        assert_eq!(fs::read(&stored.path).unwrap(), PNG_BYTES);
        assert!(!request.temp_path.exists());
        assert_eq!(stored.mime, "image/png");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&stored.path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o640);
        }

        assert_eq!(
            fx.sink.messages(),
            vec![format!("File uploaded successfully: {}", stored.file_name)]
        );
    }

    #[test]
    fn test_names_are_unique() {
        let fx = fixture(1024);
        let a = fx.guard.accept(&staged(&fx, "a.png", PNG_BYTES, "image/png")).unwrap();
        let b = fx.guard.accept(&staged(&fx, "b.png", PNG_BYTES, "image/png")).unwrap();
        assert_ne!(a.file_name, b.file_name);
    }
}
