/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! MX / MTA-STS resolution (§4.7). For an outbound domain we first try
//! to fetch and validate an MTA-STS policy; if it is `enforce` or
//! `testing` and valid, MX records are filtered by its `mx:` patterns.
//! Falling back to plain MX resolution is the common case. Route
//! grouping canonicalizes a domain's MX list as
//! `p1:name1|p2:name2|...` (priority-asc, name-asc), SHA-256s it, and
//! groups domains sharing that hash into one [`Route`] (§8 E4).

pub mod mta_sts;

use std::time::Duration;

use hickory_resolver::{config::ResolverConfig, TokioAsyncResolver};
use sha2::{Digest, Sha256};
use trc::Error;
use utils::cache::CacheWithTtl;

use self::mta_sts::{fetch_policy, MtaStsMode, MtaStsPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxRecord {
    pub priority: u16,
    pub name: String,
}

pub struct Resolver {
    dns: TokioAsyncResolver,
    mx_cache: CacheWithTtl<String, Vec<MxRecord>>,
    sts_cache: CacheWithTtl<String, Option<MtaStsPolicy>>,
}

impl Resolver {
    pub fn new() -> Result<Self, Error> {
        let dns = TokioAsyncResolver::tokio(ResolverConfig::default(), Default::default());
        Ok(Resolver {
            dns,
            mx_cache: CacheWithTtl::new(Duration::from_secs(300)),
            sts_cache: CacheWithTtl::new(Duration::from_secs(86_400)),
        })
    }

    /// Resolves sorted (priority-asc, name-asc) MX records for
    /// `domain`, filtering them by an enforced/testing MTA-STS policy
    /// when one is published and valid (§4.7).
    pub async fn resolve(&self, domain: &str) -> Result<Vec<MxRecord>, Error> {
        let mut records = self.lookup_mx(domain).await?;

        if let Some(policy) = self.lookup_mta_sts(domain).await {
            if matches!(policy.mode, MtaStsMode::Enforce | MtaStsMode::Testing) {
                let filtered: Vec<MxRecord> = records
                    .iter()
                    .filter(|mx| policy.matches(&mx.name))
                    .cloned()
                    .collect();
                if !filtered.is_empty() {
                    records = filtered;
                }
                trc::event!(trc::EventType::MtaStsPolicy, "domain" = domain.to_string());
            }
        }
        Ok(records)
    }

    async fn lookup_mx(&self, domain: &str) -> Result<Vec<MxRecord>, Error> {
        if let Some(cached) = self.mx_cache.get(&domain.to_string()) {
            return Ok(cached);
        }
        trc::event!(trc::EventType::MxLookup, "domain" = domain.to_string());
        let lookup = self
            .dns
            .mx_lookup(domain)
            .await
            .map_err(|e| Error::relay_transient(format!("MX lookup failed for {domain}: {e}")))?;
        let mut records: Vec<MxRecord> = lookup
            .iter()
            .map(|mx| MxRecord {
                priority: mx.preference(),
                name: mx.exchange().to_string().trim_end_matches('.').to_string(),
            })
            .collect();
        records.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        self.mx_cache.insert(domain.to_string(), records.clone());
        Ok(records)
    }

    async fn lookup_mta_sts(&self, domain: &str) -> Option<MtaStsPolicy> {
        if let Some(cached) = self.sts_cache.get(&domain.to_string()) {
            return cached;
        }
        let policy = fetch_policy(&self.dns, domain).await.ok().flatten();
        self.sts_cache.insert(domain.to_string(), policy.clone());
        policy
    }
}

/// A set of domains that all resolve to the same ordered MX list
/// (§4.7 "group domains sharing the same hash into one route").
#[derive(Debug, Clone)]
pub struct Route {
    pub hash: String,
    pub mx_records: Vec<MxRecord>,
    pub domains: Vec<String>,
}

/// `p1:name1|p2:name2|...`, priority-asc, name-asc (records are
/// assumed pre-sorted by [`Resolver::resolve`]); SHA-256 hex-encoded.
pub fn canonicalize_and_hash(records: &[MxRecord]) -> String {
    let canonical = records
        .iter()
        .map(|mx| format!("{}:{}", mx.priority, mx.name))
        .collect::<Vec<_>>()
        .join("|");
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

/// Groups `(domain, mx_records)` pairs sharing an identical canonical
/// hash into one [`Route`] each.
pub fn group_routes(domains: Vec<(String, Vec<MxRecord>)>) -> Vec<Route> {
    let mut routes: Vec<Route> = Vec::new();
    for (domain, mx_records) in domains {
        let hash = canonicalize_and_hash(&mx_records);
        if let Some(route) = routes.iter_mut().find(|r| r.hash == hash) {
            route.domains.push(domain);
        } else {
            routes.push(Route {
                hash,
                mx_records,
                domains: vec![domain],
            });
        }
    }
    routes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mx(priority: u16, name: &str) -> MxRecord {
        MxRecord {
            priority,
            name: name.to_string(),
        }
    }

    #[test]
    fn canonicalization_is_order_sensitive_on_priority_then_name() {
        let a = vec![mx(10, "mx1.example.com"), mx(20, "mx2.example.com")];
        let b = a.clone();
        assert_eq!(canonicalize_and_hash(&a), canonicalize_and_hash(&b));
    }

    #[test]
    fn domains_sharing_an_mx_set_group_into_one_route() {
        let records = vec![mx(10, "mx1.example.com")];
        let domains = vec![
            ("a.com".to_string(), records.clone()),
            ("b.com".to_string(), records.clone()),
            ("c.com".to_string(), vec![mx(10, "mx9.example.com")]),
        ];
        let routes = group_routes(domains);
        assert_eq!(routes.len(), 2);
        let shared = routes.iter().find(|r| r.domains.len() == 2).unwrap();
        assert_eq!(shared.domains, vec!["a.com".to_string(), "b.com".to_string()]);
    }
}
