/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The config snapshot this server consumes. Reading JSON/JSON5 files
//! off disk, watching them for changes, and merging CLI overrides is a
//! job for the external configuration loader; by the time a [`Config`]
//! reaches this crate it is just a flat, already-validated key/value
//! map that `property`/`value` project into typed settings.

use std::{collections::BTreeMap, str::FromStr, time::Duration};

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub keys: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

impl Config {
    pub fn new(keys: BTreeMap<String, String>) -> Self {
        Config {
            keys,
            warnings: Vec::new(),
        }
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.keys.get(key).map(|s| s.as_str())
    }

    pub fn property<T: FromStr>(&self, key: &str) -> Option<T> {
        self.value(key).and_then(|v| v.parse().ok())
    }

    pub fn property_or<T: FromStr>(&self, key: &str, default: T) -> T {
        self.property(key).unwrap_or(default)
    }

    pub fn duration(&self, key: &str) -> Option<Duration> {
        self.value(key).and_then(parse_duration)
    }

    pub fn sub_keys<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.keys.keys().filter_map(move |k| {
            k.strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('.'))
        })
    }

    pub fn new_build_error(&mut self, key: impl Into<String>, reason: impl std::fmt::Display) {
        self.warnings.push(format!("{}: {reason}", key.into()));
    }
}

/// Parses values like `500ms`, `30s`, `5m`, `2h`, `1d`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split_at = value.find(|c: char| !c.is_ascii_digit())?;
    let (num, unit) = value.split_at(split_at);
    let num: u64 = num.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(num)),
        "s" => Some(Duration::from_secs(num)),
        "m" => Some(Duration::from_secs(num * 60)),
        "h" => Some(Duration::from_secs(num * 3600)),
        "d" => Some(Duration::from_secs(num * 86400)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("bogus"), None);
    }

    #[test]
    fn property_roundtrip() {
        let mut keys = BTreeMap::new();
        keys.insert("queue.max-retry-count".into(), "5".into());
        let config = Config::new(keys);
        assert_eq!(config.property::<u32>("queue.max-retry-count"), Some(5));
        assert_eq!(config.property::<u32>("missing"), None);
    }
}
