/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Writes the message body to durable storage (§6 "Body artifact on
//! disk"). Filename is `<yyyymmdd>.<session-id>.<envelope-id>.<ext>`;
//! a `localMailbox` mode additionally copies the same bytes into
//! `<store>/<recipient>/new/<filename>` per recipient, maildir-style.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use trc::Error;

use crate::{
    envelope::Envelope,
    storage::{Processor, ProcessorOutcome},
};

pub struct LocalFileProcessor {
    store_dir: PathBuf,
    ext: &'static str,
    local_mailbox: bool,
}

impl LocalFileProcessor {
    pub fn new(store_dir: impl Into<PathBuf>, local_mailbox: bool) -> Self {
        LocalFileProcessor {
            store_dir: store_dir.into(),
            ext: "eml",
            local_mailbox,
        }
    }

    fn filename(&self, session_id: u64, envelope_id: u64) -> String {
        let date = Utc::now().format("%Y%m%d");
        format!("{date}.{session_id}.{envelope_id}.{}", self.ext)
    }

    async fn write_maildir_copy(
        &self,
        recipient: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<(), Error> {
        let new_dir = self.store_dir.join(sanitize(recipient)).join("new");
        tokio::fs::create_dir_all(&new_dir).await?;
        tokio::fs::write(new_dir.join(filename), data).await?;
        Ok(())
    }
}

/// Recipient addresses aren't safe path components as-is; collapse
/// anything but alphanumerics/`.`/`-`/`_`/`@` to `_`.
fn sanitize(recipient: &str) -> String {
    recipient
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl Processor for LocalFileProcessor {
    fn name(&self) -> &'static str {
        "LocalFileStorageProcessor"
    }

    fn reject_response(&self) -> &'static str {
        "451 4.3.0 local storage unavailable"
    }

    async fn process(&self, envelope: &mut Envelope) -> Result<ProcessorOutcome, Error> {
        let artifact = match &envelope.body {
            Some(artifact) => artifact.clone(),
            None => return Ok(ProcessorOutcome::Continue),
        };
        let data = tokio::fs::read(artifact.path()).await?;
        let filename = self.filename(envelope.session_id, envelope.id);

        tokio::fs::create_dir_all(&self.store_dir).await?;
        let dest: &Path = &self.store_dir.join(&filename);
        tokio::fs::write(dest, &data).await?;

        if self.local_mailbox {
            for recipient in &envelope.recipients {
                self.write_maildir_copy(recipient, &filename, &data).await?;
            }
        }
        Ok(ProcessorOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::BodyArtifact;

    fn tmp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("local-file-test-{name}-{}", std::process::id()))
    }

    #[tokio::test]
    async fn writes_artifact_to_store_dir() {
        let src_dir = tmp_dir("src");
        std::fs::create_dir_all(&src_dir).unwrap();
        let src_path = src_dir.join("in.eml");
        std::fs::write(&src_path, b"hello world").unwrap();

        let store_dir = tmp_dir("store");
        let processor = LocalFileProcessor::new(store_dir.clone(), false);

        let mut envelope = Envelope {
            id: 7,
            session_id: 42,
            body: Some(BodyArtifact::new(src_path.clone(), 11, "abc".into(), false)),
            ..Envelope::default()
        };

        let outcome = processor.process(&mut envelope).await.unwrap();
        assert_eq!(outcome, ProcessorOutcome::Continue);
        let entries: Vec<_> = std::fs::read_dir(&store_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);

        let _ = std::fs::remove_dir_all(&src_dir);
        let _ = std::fs::remove_dir_all(&store_dir);
    }

    #[tokio::test]
    async fn local_mailbox_mode_copies_per_recipient() {
        let src_dir = tmp_dir("src2");
        std::fs::create_dir_all(&src_dir).unwrap();
        let src_path = src_dir.join("in.eml");
        std::fs::write(&src_path, b"hello").unwrap();

        let store_dir = tmp_dir("store2");
        let processor = LocalFileProcessor::new(store_dir.clone(), true);

        let mut envelope = Envelope {
            id: 9,
            session_id: 1,
            recipients: vec!["user@example.com".into()],
            body: Some(BodyArtifact::new(src_path.clone(), 5, "abc".into(), false)),
            ..Envelope::default()
        };

        processor.process(&mut envelope).await.unwrap();
        let maildir_new = store_dir.join("user@example.com").join("new");
        let entries: Vec<_> = std::fs::read_dir(&maildir_new).unwrap().collect();
        assert_eq!(entries.len(), 1);

        let _ = std::fs::remove_dir_all(&src_dir);
        let _ = std::fs::remove_dir_all(&store_dir);
    }
}
