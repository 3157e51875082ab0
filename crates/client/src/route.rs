/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Connection parameters for one outbound dialogue (§4.12 "route
//! (hostname/port/protocol/tls/auth)", §6 "wire protocol, client,
//! outbound").

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Smtp,
    Esmtp,
    Lmtp,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Esmtp
    }
}

impl Protocol {
    /// `LHLO` replaces `EHLO` for LMTP; plain `Smtp` skips the
    /// extended greeting (and hence AUTH/STARTTLS/CHUNKING) entirely.
    pub fn greeting_verb(self) -> &'static str {
        match self {
            Protocol::Lmtp => "LHLO",
            Protocol::Smtp | Protocol::Esmtp => "EHLO",
        }
    }
}

/// Outbound TLS posture (§6 "outbound relay may perform implicit
/// TLS if configured").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    #[default]
    None,
    Starttls,
    Implicit,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMechanism {
    Plain,
    Login,
    #[serde(rename = "digest-md5")]
    DigestMd5,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub mechanism: AuthMechanism,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Route {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub tls: TlsMode,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    /// Name this client announces in EHLO/LHLO.
    #[serde(default = "default_hostname")]
    pub local_hostname: String,
}

fn default_port() -> u16 {
    25
}

fn default_hostname() -> String {
    "client.localhost".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lmtp_uses_lhlo() {
        assert_eq!(Protocol::Lmtp.greeting_verb(), "LHLO");
        assert_eq!(Protocol::Esmtp.greeting_verb(), "EHLO");
    }

    #[test]
    fn deserializes_minimal_route_with_defaults() {
        let route: Route = serde_json::from_str(r#"{"host": "mx.example.com"}"#).unwrap();
        assert_eq!(route.port, 25);
        assert_eq!(route.protocol, Protocol::Esmtp);
        assert_eq!(route.tls, TlsMode::None);
        assert!(route.auth.is_none());
    }
}
