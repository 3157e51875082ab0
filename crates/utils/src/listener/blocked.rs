/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! CIDR-matched IP blocklist, the first admission control evaluated
//! in §4.9.

use std::net::IpAddr;

#[derive(Debug, Clone, Copy)]
pub struct Cidr {
    pub addr: IpAddr,
    pub prefix: u8,
}

impl Cidr {
    pub fn parse(s: &str) -> Option<Self> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr.parse().ok()?, prefix.parse().ok()?),
            None => (s.parse().ok()?, if s.contains(':') { 128 } else { 32 }),
        };
        Some(Cidr { addr, prefix })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                mask_eq(u32::from(net), u32::from(*ip), self.prefix.min(32))
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                mask_eq_128(u128::from(net), u128::from(*ip), self.prefix.min(128))
            }
            _ => false,
        }
    }
}

fn mask_eq(a: u32, b: u32, prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    let mask = u32::MAX << (32 - prefix as u32);
    (a & mask) == (b & mask)
}

fn mask_eq_128(a: u128, b: u128, prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    let mask = u128::MAX << (128 - prefix as u32);
    (a & mask) == (b & mask)
}

#[derive(Debug, Clone, Default)]
pub struct BlockedIps {
    pub entries: Vec<Cidr>,
}

impl BlockedIps {
    pub fn from_entries(entries: impl IntoIterator<Item = String>) -> Self {
        BlockedIps {
            entries: entries.into_iter().filter_map(|e| Cidr::parse(&e)).collect(),
        }
    }

    pub fn is_blocked(&self, ip: &IpAddr) -> bool {
        self.entries.iter().any(|c| c.contains(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_cidr_range() {
        let blocked = BlockedIps::from_entries(["10.0.0.0/8".to_string()]);
        assert!(blocked.is_blocked(&"10.1.2.3".parse().unwrap()));
        assert!(!blocked.is_blocked(&"11.1.2.3".parse().unwrap()));
    }

    #[test]
    fn matches_single_ip() {
        let blocked = BlockedIps::from_entries(["192.0.2.1".to_string()]);
        assert!(blocked.is_blocked(&"192.0.2.1".parse().unwrap()));
        assert!(!blocked.is_blocked(&"192.0.2.2".parse().unwrap()));
    }
}
