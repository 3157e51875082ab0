/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! External assertion lookups (§4.12 "external assertions (mailbox
//! fetch, service logs) follow the same retry/wait contract"). Only
//! the contract is specified here, not a mailbox backend or log
//! shipper integration — callers provide an [`ExternalLookup`] that
//! knows how to resolve a `tag` into the text an assertion's regex is
//! matched against.

use async_trait::async_trait;
use trc::Error;

#[async_trait]
pub trait ExternalLookup: Send + Sync {
    /// Resolves `tag` (the first element of an `mta.match` pair) to a
    /// text blob; a fresh call is made on every retry, so the
    /// implementation owns deciding whether to cache.
    async fn fetch(&self, tag: &str) -> Result<String, Error>;
}

/// Used when a case has no `mta` assertion; fails any lookup rather
/// than silently treating it as a pass.
pub struct NullExternalLookup;

#[async_trait]
impl ExternalLookup for NullExternalLookup {
    async fn fetch(&self, tag: &str) -> Result<String, Error> {
        Err(Error::local_transient(format!(
            "no external lookup configured for tag \"{tag}\""
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_lookup_always_fails() {
        let lookup = NullExternalLookup;
        assert!(lookup.fetch("mailbox:jane").await.is_err());
    }
}
