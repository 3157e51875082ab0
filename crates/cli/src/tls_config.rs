/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Turns `server.tls.cert-path`/`server.tls.key-path` into a
//! [`TlsAcceptor`] via `utils::tls`. When neither is configured, a
//! self-signed certificate is generated so implicit-TLS and STARTTLS
//! listeners still come up for local testing (§6).

use std::io::BufReader;

use tokio_rustls::TlsAcceptor;
use trc::Error;
use utils::{config::Config, tls};

fn load_cert_chain(path: &str) -> Result<Vec<rustls_pki_types::CertificateDer<'static>>, Error> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::local_permanent(format!("cannot open certificate file {path}: {e}")))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::local_permanent(format!("invalid certificate file {path}: {e}")))
}

fn load_private_key(path: &str) -> Result<rustls_pki_types::PrivateKeyDer<'static>, Error> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::local_permanent(format!("cannot open key file {path}: {e}")))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::local_permanent(format!("invalid key file {path}: {e}")))?
        .ok_or_else(|| Error::local_permanent(format!("no private key found in {path}")))
}

pub fn build_acceptor(cfg: &Config, hostname: &str) -> Result<Option<TlsAcceptor>, Error> {
    match (cfg.value("server.tls.cert-path"), cfg.value("server.tls.key-path")) {
        (Some(cert_path), Some(key_path)) => {
            let cert_chain = load_cert_chain(cert_path)?;
            let key = load_private_key(key_path)?;
            Ok(Some(tls::build_acceptor(cert_chain, key, None)?))
        }
        _ => {
            let (cert_der, key_der) = tls::self_signed(vec![hostname.to_string()])?;
            let cert_chain = vec![rustls_pki_types::CertificateDer::from(cert_der)];
            let key = rustls_pki_types::PrivateKeyDer::Pkcs8(rustls_pki_types::PrivatePkcs8KeyDer::from(key_der));
            Ok(Some(tls::build_acceptor(cert_chain, key, None)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn falls_back_to_a_self_signed_certificate_without_configured_paths() {
        let cfg = Config::new(BTreeMap::new());
        let acceptor = build_acceptor(&cfg, "mx.test").unwrap();
        assert!(acceptor.is_some());
    }

    #[test]
    fn missing_certificate_file_is_a_configuration_error() {
        let mut keys = BTreeMap::new();
        keys.insert("server.tls.cert-path".to_string(), "/nonexistent/cert.pem".to_string());
        keys.insert("server.tls.key-path".to_string(), "/nonexistent/key.pem".to_string());
        let cfg = Config::new(keys);
        let err = build_acceptor(&cfg, "mx.test").unwrap_err();
        assert!(matches!(err.kind, trc::ErrorKind::LocalPermanent));
    }
}
