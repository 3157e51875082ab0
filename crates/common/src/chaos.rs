/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Parsing of `X-Robin-Chaos` headers (§4.5, §6 "Chaos header
//! format"): `X-Robin-Chaos: <ClassName>; key1=value1; key2=value2`.
//! Multiple chaos headers on one message apply independently. The
//! abstract processor checks these first and returns the forced value
//! without running the real scanner/delivery code (§9 "decorator
//! wrapping every real processor").

use ahash::AHashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChaosDirective {
    pub class_name: String,
    pub params: AHashMap<String, String>,
}

impl ChaosDirective {
    pub fn parse(header_value: &str) -> Option<Self> {
        let mut segments = header_value.split(';').map(str::trim);
        let class_name = segments.next()?.to_string();
        if class_name.is_empty() {
            return None;
        }
        let mut params = AHashMap::new();
        for segment in segments {
            if let Some((key, value)) = segment.split_once('=') {
                params.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Some(ChaosDirective { class_name, params })
    }

    /// Storage processor variant: `processor=<Name>; return=<bool>`.
    pub fn processor_outcome(&self) -> Option<(&str, bool)> {
        let processor = self.params.get("processor")?.as_str();
        let forced = self.params.get("return")?.parse::<bool>().ok()?;
        Some((processor, forced))
    }

    /// Mailbox delivery variant: `recipient=<addr>; exitCode=<int>;
    /// message=<text>`.
    pub fn mailbox_outcome(&self) -> Option<(&str, i32, &str)> {
        let recipient = self.params.get("recipient")?.as_str();
        let exit_code = self.params.get("exitCode")?.parse::<i32>().ok()?;
        let message = self.params.get("message").map(String::as_str).unwrap_or("");
        Some((recipient, exit_code, message))
    }
}

/// Scans a message's raw header list for every `X-Robin-Chaos` entry.
pub fn parse_all<'h>(
    headers: impl IntoIterator<Item = (&'h str, &'h str)>,
) -> Vec<ChaosDirective> {
    headers
        .into_iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("X-Robin-Chaos"))
        .filter_map(|(_, value)| ChaosDirective::parse(value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_processor_variant() {
        let directive =
            ChaosDirective::parse("LocalStorageClient; processor=AVStorageProcessor; return=false")
                .unwrap();
        assert_eq!(directive.class_name, "LocalStorageClient");
        assert_eq!(
            directive.processor_outcome(),
            Some(("AVStorageProcessor", false))
        );
    }

    #[test]
    fn parses_mailbox_variant() {
        let directive = ChaosDirective::parse(
            "MailboxClient; recipient=jane@example.com; exitCode=75; message=try again",
        )
        .unwrap();
        assert_eq!(
            directive.mailbox_outcome(),
            Some(("jane@example.com", 75, "try again"))
        );
    }

    #[test]
    fn independent_headers_parse_independently() {
        let headers = vec![
            ("X-Robin-Chaos", "A; processor=Av; return=true"),
            ("Subject", "hello"),
            ("x-robin-chaos", "B; processor=Spam; return=false"),
        ];
        let directives = parse_all(headers);
        assert_eq!(directives.len(), 2);
        assert_eq!(directives[0].class_name, "A");
        assert_eq!(directives[1].class_name, "B");
    }
}
