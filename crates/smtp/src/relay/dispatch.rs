/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The bridge from a freshly-committed envelope to the outbound relay
//! pipeline (§2 "storage processors (sync) -> bots/queue (async) ->
//! relay pipeline"). After the storage chain has scanned and stored
//! the artifact, any recipient whose domain isn't a locally-delivered
//! one is resolved via [`crate::resolver::Resolver`] and enqueued as a
//! [`RelaySession`] for the retry cron (§4.7, §4.8) instead of being
//! handed to the mailbox backend.

use std::{collections::HashSet, path::Path, time::SystemTime};

use store::queue::{Queue, QueueItem};
use trc::Error;

use crate::resolver::Resolver;

use super::session::{RelayProtocol, RelaySession};

/// Splits recipients by domain and resolves/enqueues the ones that
/// aren't delivered locally.
pub struct RelayDispatch {
    local_domains: HashSet<String>,
    local_hostname: String,
    resolver: Resolver,
}

impl RelayDispatch {
    pub fn new(local_domains: HashSet<String>, local_hostname: impl Into<String>, resolver: Resolver) -> Self {
        RelayDispatch {
            local_domains,
            local_hostname: local_hostname.into(),
            resolver,
        }
    }

    fn domain_of(recipient: &str) -> &str {
        recipient.rsplit_once('@').map(|(_, d)| d).unwrap_or(recipient)
    }

    fn is_local(&self, recipient: &str) -> bool {
        self.local_domains.is_empty()
            || self
                .local_domains
                .contains(&Self::domain_of(recipient).to_ascii_lowercase())
    }

    /// Partitions `recipients` into `(local, remote)`; an empty
    /// configured domain set treats every recipient as local, so a
    /// bootstrap with no `storage.mailbox.local-domains` entries keeps
    /// today's all-local behaviour.
    pub fn partition(&self, recipients: &[String]) -> (Vec<String>, Vec<String>) {
        recipients
            .iter()
            .cloned()
            .partition(|rcpt| self.is_local(rcpt))
    }

    /// Resolves MX for one remote recipient's domain and enqueues a
    /// single-recipient [`RelaySession`] (§4.7, §6 "Queue record").
    pub async fn enqueue(
        &self,
        queue: &dyn Queue,
        sender: &str,
        recipient: &str,
        body_path: &Path,
    ) -> Result<(), Error> {
        let domain = Self::domain_of(recipient);
        let mx_records = self.resolver.resolve(domain).await?;
        let target = mx_records
            .first()
            .ok_or_else(|| Error::relay_permanent(format!("no MX records for {domain}")))?;

        let session = RelaySession {
            sender: sender.to_string(),
            recipients: vec![recipient.to_string()],
            body_path: body_path.to_string_lossy().into_owned(),
            target_host: target.name.clone(),
            target_port: 25,
            protocol: RelayProtocol::Esmtp,
            implicit_tls: false,
            local_hostname: self.local_hostname.clone(),
        };
        let data = bincode::serialize(&session)
            .map_err(|e| Error::local_permanent(format!("cannot serialize relay session: {e}")))?;
        let now = now_millis();
        queue
            .enqueue(QueueItem {
                id: 0,
                data,
                created_at: now,
                attempt_count: 0,
                next_attempt_at: now,
            })
            .await?;
        trc::event!(trc::EventType::RelayAttempt, "enqueued_for" = domain.to_string());
        Ok(())
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatch(domains: &[&str]) -> RelayDispatch {
        RelayDispatch::new(
            domains.iter().map(|d| d.to_string()).collect(),
            "mx.test",
            Resolver::new().unwrap(),
        )
    }

    #[tokio::test]
    async fn partitions_by_configured_local_domains() {
        let dispatch = dispatch(&["x.com"]);
        let (local, remote) = dispatch.partition(&["a@x.com".to_string(), "b@y.com".to_string()]);
        assert_eq!(local, vec!["a@x.com".to_string()]);
        assert_eq!(remote, vec!["b@y.com".to_string()]);
    }

    #[tokio::test]
    async fn empty_local_domain_set_treats_everything_as_local() {
        let dispatch = dispatch(&[]);
        let (local, remote) = dispatch.partition(&["a@x.com".to_string()]);
        assert_eq!(local.len(), 1);
        assert!(remote.is_empty());
    }

    #[tokio::test]
    async fn domain_match_is_case_insensitive() {
        let dispatch = dispatch(&["x.com"]);
        assert!(dispatch.is_local("a@X.COM"));
    }
}
