/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Outbound TLS connector, the client-side counterpart of
//! `utils::tls`. Used for both STARTTLS upgrade mid-dialogue and
//! implicit-TLS connections (§6 "outbound relay may perform implicit
//! TLS if configured").

use std::sync::Arc;

use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{client::TlsStream, TlsConnector};
use trc::Error;

fn default_root_store() -> RootCertStore {
    let mut store = RootCertStore::empty();
    store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    store
}

pub fn build_connector() -> TlsConnector {
    let config = ClientConfig::builder()
        .with_root_certificates(default_root_store())
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Upgrades `stream` to TLS against `domain`, used both for STARTTLS
/// (after the peer's `220`/`2xx` line has been read) and for an
/// implicit-TLS route's very first byte.
pub async fn connect<S: AsyncRead + AsyncWrite + Unpin>(
    connector: &TlsConnector,
    domain: &str,
    stream: S,
) -> Result<TlsStream<S>, Error> {
    let name = ServerName::try_from(domain.to_string())
        .map_err(|_| Error::local_permanent(format!("invalid TLS server name: {domain}")))?;
    connector
        .connect(name, stream)
        .await
        .map_err(|e| Error::local_transient(format!("TLS handshake failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_store_is_populated() {
        assert!(default_root_store().len() > 0);
    }

    #[tokio::test]
    async fn rejects_invalid_server_name() {
        let connector = build_connector();
        let (client, _server) = tokio::io::duplex(64);
        let err = connect(&connector, "not a domain!", client).await.unwrap_err();
        assert!(matches!(err.kind, trc::ErrorKind::LocalPermanent));
    }
}
