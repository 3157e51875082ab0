/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! TLS acceptor wiring. Certificate/key *file* loading is the external
//! keystore's job (§6); this module only turns already-loaded key
//! material into a [`TlsAcceptor`] and performs the handshake, honoring
//! a scenario's protocol/cipher restriction when one is in force.

use std::sync::Arc;

use rustls::{server::ServerConfig, SupportedProtocolVersion};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{server::TlsStream, TlsAcceptor};
use trc::Error;

/// Restricts the protocol/cipher negotiation for one connection, as a
/// scenario's STARTTLS entry may specify.
#[derive(Debug, Clone, Default)]
pub struct TlsRestriction {
    pub protocols: Vec<String>,
    pub ciphers: Vec<String>,
}

pub fn build_acceptor(
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    restriction: Option<&TlsRestriction>,
) -> Result<TlsAcceptor, Error> {
    let versions: Vec<&'static SupportedProtocolVersion> = match restriction
        .map(|r| r.protocols.as_slice())
    {
        Some(protos) if !protos.is_empty() => protos
            .iter()
            .filter_map(|p| match p.as_str() {
                "TLSv1.3" => Some(&rustls::version::TLS13),
                "TLSv1.2" => Some(&rustls::version::TLS12),
                _ => None,
            })
            .collect(),
        _ => vec![&rustls::version::TLS13, &rustls::version::TLS12],
    };

    let builder = ServerConfig::builder_with_protocol_versions(&versions);
    let config = builder
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| Error::local_permanent(format!("invalid certificate: {e}")))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Performs the server-side handshake over a stream that has just
/// emitted `220 ready to start TLS` (explicit) or is an implicit-TLS
/// listener wrapping the raw socket before any protocol bytes flow.
pub async fn accept<S: AsyncRead + AsyncWrite + Unpin>(
    acceptor: &TlsAcceptor,
    stream: S,
) -> Result<TlsStream<S>, Error> {
    acceptor
        .accept(stream)
        .await
        .map_err(|e| Error::local_transient(format!("TLS handshake failed: {e}")))
}

/// A best-effort self-signed certificate used when no keystore is
/// configured, so implicit-TLS listeners still come up in dev/test.
/// Returns `(cert_der, key_der)`.
pub fn self_signed(subject_names: Vec<String>) -> Result<(Vec<u8>, Vec<u8>), Error> {
    let cert = rcgen::generate_simple_self_signed(subject_names)
        .map_err(|e| Error::local_permanent(format!("self-signed cert generation failed: {e}")))?;
    Ok((
        cert.cert.der().to_vec(),
        cert.key_pair.serialize_der(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_signed_produces_der_bytes() {
        let (cert, key) = self_signed(vec!["localhost".into()]).unwrap();
        assert!(!cert.is_empty());
        assert!(!key.is_empty());
    }
}
