/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The external configuration loader `utils::config::Config` expects
//! (§6 "Config directory"): every `*.json` file directly under a
//! config directory is parsed, merged (later file names win on key
//! collision), and flattened into dotted keys so the rest of the
//! server can read it with `Config::property`/`Config::duration`.

use std::{collections::BTreeSet, path::Path};

use serde_json::Value;
use trc::Error;
use utils::config::Config;

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut std::collections::BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                flatten(&join(prefix, key), value, out);
            }
        }
        Value::Array(items) => {
            for (index, value) in items.iter().enumerate() {
                flatten(&join(prefix, &index.to_string()), value, out);
            }
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Value::Number(n) => {
            out.insert(prefix.to_string(), n.to_string());
        }
        Value::Bool(b) => {
            out.insert(prefix.to_string(), b.to_string());
        }
        Value::Null => {}
    }
}

/// Reads every `*.json` file directly under `dir` (non-recursive, in
/// filename order) and merges their flattened keys into one snapshot.
pub fn load_dir(dir: &Path) -> Result<Config, Error> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| Error::local_permanent(format!("cannot read config directory {}: {e}", dir.display())))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    paths.sort();

    let mut keys = std::collections::BTreeMap::new();
    for path in paths {
        let text = std::fs::read_to_string(&path)
            .map_err(|e| Error::local_permanent(format!("cannot read {}: {e}", path.display())))?;
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| Error::local_permanent(format!("invalid JSON in {}: {e}", path.display())))?;
        flatten("", &value, &mut keys);
    }
    Ok(Config::new(keys))
}

/// Distinct first path segments under `prefix` (e.g. the listener or
/// scenario ids), numerically sorted when every segment parses as an
/// integer, lexicographically otherwise.
pub fn indices(cfg: &Config, prefix: &str) -> Vec<String> {
    let marker = format!("{prefix}.");
    let mut set = BTreeSet::new();
    for key in cfg.keys.keys() {
        if let Some(rest) = key.strip_prefix(&marker) {
            let first = rest.split_once('.').map(|(first, _)| first).unwrap_or(rest);
            set.insert(first.to_string());
        }
    }
    let mut out: Vec<String> = set.into_iter().collect();
    if out.iter().all(|s| s.parse::<u64>().is_ok()) {
        out.sort_by_key(|s| s.parse::<u64>().unwrap());
    }
    out
}

/// Every value found at `prefix.<index>` for a flat list of scalars
/// (e.g. `admission.blocked.0`, `admission.blocked.1`, ...).
pub fn values(cfg: &Config, prefix: &str) -> Vec<String> {
    indices(cfg, prefix)
        .into_iter()
        .filter_map(|i| cfg.value(&join(prefix, &i)).map(str::to_string))
        .collect()
}
