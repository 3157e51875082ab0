/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! EHLO-keyed table of per-verb canned responses (§3 "Scenario table",
//! §4.3 "Scenario overrides", §6 "Scenario file"). Before emitting the
//! default response for a verb, the extension engine looks this table
//! up first; `*` is the wildcard default used when no entry matches
//! the client's EHLO domain.

use ahash::AHashMap;
use regex::Regex;
use utils::tls::TlsRestriction;

pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Default)]
pub struct ScenarioEntry {
    /// Verb (upper-cased) -> canned response line.
    pub responses: AHashMap<String, String>,
    /// RCPT is matched against each entry's `value` regex rather than
    /// looked up by verb name (§4.3).
    pub rcpt_patterns: Vec<(Regex, String)>,
    pub starttls: Option<TlsRestriction>,
}

impl ScenarioEntry {
    pub fn with_response(mut self, verb: impl Into<String>, response: impl Into<String>) -> Self {
        self.responses.insert(verb.into().to_ascii_uppercase(), response.into());
        self
    }

    pub fn with_rcpt_pattern(mut self, pattern: Regex, response: impl Into<String>) -> Self {
        self.rcpt_patterns.push((pattern, response.into()));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScenarioTable {
    entries: AHashMap<String, ScenarioEntry>,
}

impl ScenarioTable {
    pub fn new() -> Self {
        ScenarioTable::default()
    }

    pub fn insert(&mut self, ehlo: impl Into<String>, entry: ScenarioEntry) {
        self.entries.insert(ehlo.into(), entry);
    }

    fn entry_for(&self, ehlo: &str) -> Option<&ScenarioEntry> {
        self.entries.get(ehlo).or_else(|| self.entries.get(WILDCARD))
    }

    pub fn response_for(&self, ehlo: &str, verb: &str) -> Option<&str> {
        self.entry_for(ehlo)?
            .responses
            .get(&verb.to_ascii_uppercase())
            .map(String::as_str)
    }

    pub fn rcpt_override(&self, ehlo: &str, address: &str) -> Option<&str> {
        self.entry_for(ehlo)?
            .rcpt_patterns
            .iter()
            .find(|(pattern, _)| pattern.is_match(address))
            .map(|(_, response)| response.as_str())
    }

    pub fn starttls_restriction(&self, ehlo: &str) -> Option<&TlsRestriction> {
        self.entry_for(ehlo)?.starttls.as_ref()
    }
}
