/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! DNSBL lookup, the second admission control evaluated in §4.9 (after
//! the static IP blocklist, before connection/rate limits). A IPv4
//! peer address is queried as its octets reversed, prefixed onto each
//! configured zone; any zone answering with an A record lists the peer.

use std::net::IpAddr;
use std::time::Duration;

use hickory_resolver::TokioAsyncResolver;

#[derive(Debug, Clone, Default)]
pub struct RblConfig {
    pub zones: Vec<String>,
    pub timeout: Duration,
}

impl RblConfig {
    pub fn new(zones: Vec<String>, timeout: Duration) -> Self {
        RblConfig { zones, timeout }
    }

    pub fn is_enabled(&self) -> bool {
        !self.zones.is_empty()
    }
}

/// IPv6 peers are never listed; most public DNSBLs only cover IPv4.
fn reverse_query(ip: IpAddr, zone: &str) -> Option<String> {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            Some(format!(
                "{}.{}.{}.{}.{zone}",
                octets[3], octets[2], octets[1], octets[0]
            ))
        }
        IpAddr::V6(_) => None,
    }
}

/// Checks `ip` against every configured zone, short-circuiting on the
/// first hit. A per-zone timeout or lookup failure is treated as "not
/// listed" rather than blocking the connection on a flaky DNSBL.
pub async fn is_listed(resolver: &TokioAsyncResolver, config: &RblConfig, ip: IpAddr) -> bool {
    for zone in &config.zones {
        let Some(query) = reverse_query(ip, zone) else {
            continue;
        };
        let lookup = tokio::time::timeout(config.timeout, resolver.lookup_ip(query));
        if let Ok(Ok(answer)) = lookup.await {
            if answer.iter().next().is_some() {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn reverses_octets_for_ipv4() {
        let ip = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(
            reverse_query(ip, "zen.spamhaus.org").unwrap(),
            "1.2.0.192.zen.spamhaus.org"
        );
    }

    #[test]
    fn skips_ipv6_peers() {
        let ip: IpAddr = "2001:db8::1".parse().unwrap();
        assert!(reverse_query(ip, "zen.spamhaus.org").is_none());
    }

    #[test]
    fn disabled_without_zones() {
        assert!(!RblConfig::default().is_enabled());
    }
}
