/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Subsequent-auth cache for DIGEST-MD5 (§4.4, §8 scenario E6): keyed
//! by peer identity so a second AUTH within the same session reuses
//! the server-issued nonce with an advanced `nc` instead of the server
//! recomputing the challenge (§5 "Mutable caches ... accessed under
//! locks or concurrent maps").

use dashmap::DashMap;

#[derive(Debug, Clone)]
pub struct DigestState {
    pub nonce: String,
    pub username: String,
    pub nc: u32,
}

#[derive(Default)]
pub struct DigestCache {
    entries: DashMap<String, DigestState>,
}

impl DigestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, peer: &str) -> Option<DigestState> {
        self.entries.get(peer).map(|entry| entry.clone())
    }

    /// Issues a fresh nonce for `peer`, starting `nc` at 1.
    pub fn issue(&self, peer: &str, nonce: impl Into<String>, username: impl Into<String>) {
        self.entries.insert(
            peer.to_string(),
            DigestState {
                nonce: nonce.into(),
                username: username.into(),
                nc: 1,
            },
        );
    }

    /// Advances `nc` on the cached entry for a subsequent AUTH that
    /// reuses the same nonce (E6: nc 00000001 -> 00000002).
    pub fn advance(&self, peer: &str) -> Option<DigestState> {
        let mut entry = self.entries.get_mut(peer)?;
        entry.nc += 1;
        Some(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsequent_auth_advances_nc_and_keeps_nonce() {
        let cache = DigestCache::new();
        cache.issue("127.0.0.1", "abc123", "jane");
        let first = cache.get("127.0.0.1").unwrap();
        assert_eq!(first.nc, 1);

        let second = cache.advance("127.0.0.1").unwrap();
        assert_eq!(second.nc, 2);
        assert_eq!(second.nonce, "abc123");
        assert_eq!(second.username, "jane");
    }

    #[test]
    fn advance_on_unknown_peer_is_none() {
        let cache = DigestCache::new();
        assert!(cache.advance("nowhere").is_none());
    }
}
