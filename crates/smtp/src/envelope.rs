/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! One MAIL transaction's state (§3 "Envelope"). Recipients count and
//! body size are checked against `recipientsLimit`/`messageSizeLimit`
//! by the extension processors as they mutate the envelope; this
//! module only owns the data and the body artifact's lifetime.

use std::{path::PathBuf, sync::Arc};

use ahash::AHashMap;

/// The message body on disk, immutable once written (§3 "Ownership").
/// Reference-counted by whoever still needs it — the storage chain
/// during scanning, the queue while a relay attempt is pending. The
/// last clone to drop deletes the file, unless `auto_delete` is false.
#[derive(Clone)]
pub struct BodyArtifact(Arc<ArtifactInner>);

struct ArtifactInner {
    path: PathBuf,
    size: u64,
    sha256: String,
    auto_delete: bool,
}

impl BodyArtifact {
    pub fn new(path: PathBuf, size: u64, sha256: String, auto_delete: bool) -> Self {
        BodyArtifact(Arc::new(ArtifactInner {
            path,
            size,
            sha256,
            auto_delete,
        }))
    }

    pub fn path(&self) -> &std::path::Path {
        &self.0.path
    }

    pub fn size(&self) -> u64 {
        self.0.size
    }

    pub fn sha256(&self) -> &str {
        &self.0.sha256
    }
}

impl Drop for ArtifactInner {
    fn drop(&mut self) {
        if self.auto_delete {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Polymorphic scan result record (§3 "Scan result").
#[derive(Debug, Clone)]
pub enum ScanResult {
    Av {
        scanner: String,
        infected: bool,
        parts: Vec<String>,
        virus_names: Vec<String>,
    },
    Spam {
        scanner: String,
        score: f32,
        spam: bool,
        symbols: AHashMap<String, f32>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub id: u64,
    /// The session that opened this envelope; storage processors that
    /// need a stable per-connection component in their filenames
    /// (`LocalFileProcessor`) read it from here instead of being
    /// constructed fresh per connection (§4.5, §6 "Body artifact").
    pub session_id: u64,
    /// May be empty for bounces (§3).
    pub sender: String,
    pub recipients: Vec<String>,
    pub body: Option<BodyArtifact>,
    /// Parsed headers, in original order (§3).
    pub headers: Vec<(String, String)>,
    /// Append-only (§8 property 2); the storage chain only ever pushes.
    pub scan_results: Vec<ScanResult>,
    pub message_id: Option<String>,
    /// Per-envelope transaction entries, scoped copies of the
    /// session-level log (§3 "Transaction log").
    pub transaction_log: Vec<(String, String, bool)>,
}

impl Envelope {
    pub fn record(&mut self, verb: impl Into<String>, response: impl Into<String>, failed: bool) {
        self.transaction_log
            .push((verb.into(), response.into(), failed));
    }

    pub fn push_scan_result(&mut self, result: ScanResult) {
        self.scan_results.push(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_deletes_file_when_last_reference_drops() {
        let dir = std::env::temp_dir().join(format!("envelope-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("artifact.eml");
        std::fs::write(&path, b"hello").unwrap();

        {
            let artifact = BodyArtifact::new(path.clone(), 5, "deadbeef".into(), true);
            let _clone = artifact.clone();
            assert!(path.exists());
        }
        assert!(!path.exists());
        let _ = std::fs::remove_dir(&dir);
    }

    #[test]
    fn artifact_kept_when_auto_delete_is_false() {
        let dir = std::env::temp_dir().join(format!("envelope-test-keep-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("artifact.eml");
        std::fs::write(&path, b"hello").unwrap();

        {
            let _artifact = BodyArtifact::new(path.clone(), 5, "deadbeef".into(), false);
        }
        assert!(path.exists());
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_dir(&dir);
    }
}
