//! Best-effort content signature scanning.
//!
//! This is naive pattern matching over raw bytes. It catches the obvious
//! script payloads that tend to ride along in uploads and nothing more; it is
//! not a security boundary.

use regex::bytes::RegexSet;

/// Compiled set of byte signatures.
#[derive(Debug, Clone)]
pub struct SignatureScanner {
    set: RegexSet,
}

impl SignatureScanner {
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            set: RegexSet::new(patterns)?,
        })
    }

    /// Indices of the signatures found in `content`.
    pub fn matches(&self, content: &[u8]) -> Vec<usize> {
        self.set.matches(content).into_iter().collect()
    }

    /// True when nothing matched.
    pub fn is_clean(&self, content: &[u8]) -> bool {
        !self.set.is_match(content)
    }

    /// The pattern text for a match index.
    pub fn pattern(&self, index: usize) -> Option<&str> {
        self.set.patterns().get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UploadConfig;

    fn default_scanner() -> SignatureScanner {
        SignatureScanner::new(&UploadConfig::default().signatures).unwrap()
    }

    #[test]
    fn test_flags_script_payload() {
        let scanner = default_scanner();
        assert!(!scanner.is_clean(br#"<?php eval($_GET["cmd"]); ?>"#));
        let hits = scanner.matches(br#"<?PHP eval($x)"#);
        assert_eq!(hits, vec![0, 3]);
        assert_eq!(scanner.pattern(3), Some(r"(?i)eval\("));
    }

    #[test]
    fn test_passes_clean_content() {
        let scanner = default_scanner();
        assert!(scanner.is_clean(b"Hello, World!"));
        // Binary data that is not valid UTF-8
        assert!(scanner.is_clean(&[0x89, 0x50, 0x4E, 0x47, 0xFF, 0xFE, 0x00]));
    }

    #[test]
    fn test_finds_payload_behind_image_header() {
        let scanner = default_scanner();
        let mut polyglot = b"GIF89a".to_vec();
        polyglot.extend_from_slice(b"<?php system($_GET['c']); ?>");
        assert!(!scanner.is_clean(&polyglot));
    }

    #[test]
    fn test_empty_set_is_always_clean() {
        let scanner = SignatureScanner::new(Vec::<String>::new()).unwrap();
        assert!(scanner.is_empty());
        assert!(scanner.is_clean(b"<?php"));
    }
}
