/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! MAIL and RCPT (§4.3). RCPT additionally checks the scenario table's
//! RCPT-value regex overrides (§4.3 "RCPT is matched against each
//! entry's value regex") before falling back to a directory lookup.

use trc::Error;

use crate::{
    proxy::{Direction as ProxyDirection, ProxyMatch, ProxyRouter},
    session::Session,
};

fn extract_address(arg: &str, prefix: &str) -> Result<String, Error> {
    let rest = arg
        .strip_prefix(prefix)
        .ok_or_else(|| Error::protocol(501, "5.5.4", "syntax error in parameters"))?;
    let rest = rest.trim();
    let address = rest.strip_prefix('<').unwrap_or(rest);
    let address = address.split_once('>').map(|(a, _)| a).unwrap_or(address);
    Ok(address.to_string())
}

pub async fn handle_mail(session: &mut Session, arg: &str) -> Result<String, Error> {
    if let Some(overridden) = super::resolve_verb_override(session, "MAIL").await? {
        session.record("MAIL", &overridden, !overridden.starts_with('2'));
        return Ok(overridden);
    }
    let sender = extract_address(arg, "FROM:")?;
    session.begin_envelope(sender.clone())?;
    trc::event!(trc::EventType::MailFrom, "sender" = sender);
    let response = "250 2.1.0 OK".to_string();
    session.record("MAIL", &response, false);
    Ok(response)
}

pub async fn handle_rcpt(session: &mut Session, arg: &str, proxy: &ProxyRouter) -> Result<String, Error> {
    let address = extract_address(arg, "TO:")?;

    if let Some(overridden) = session
        .core
        .scenarios
        .rcpt_override(session.ehlo_key(), &address)
        .map(str::to_string)
    {
        let failed = !overridden.starts_with('2');
        session.record("RCPT", &overridden, failed);
        if failed {
            trc::event!(trc::EventType::RcptReject, "recipient" = address);
        }
        return Ok(overridden);
    }
    if let Some(overridden) = super::resolve_verb_override(session, "RCPT").await? {
        session.record("RCPT", &overridden, !overridden.starts_with('2'));
        return Ok(overridden);
    }

    let sender = session.current.as_ref().map(|e| e.sender.as_str()).unwrap_or("");
    let proxy_match = ProxyMatch {
        peer_ip: session.peer_addr,
        ehlo: session.ehlo_domain.as_deref(),
        sender,
        recipient: &address,
        direction: match session.direction {
            crate::session::Direction::Inbound => ProxyDirection::Inbound,
            crate::session::Direction::Outbound => ProxyDirection::Outbound,
        },
    };
    if let Some(rule) = proxy.route(&proxy_match) {
        trc::event!(trc::EventType::ProxyRoute, "rule" = rule.name.clone());
        let response = proxy.forward_command(rule, &format!("RCPT TO:<{address}>")).await?;
        let failed = !response.starts_with('2');
        if !failed {
            session.add_recipient(address.clone())?;
        }
        session.record("RCPT", &response, failed);
        return Ok(response);
    }

    // Relayed (outbound) traffic isn't bound by the local directory;
    // only inbound recipients are checked against it.
    let known = session.direction == crate::session::Direction::Outbound
        || session.core.directory.lookup(&address).await?.is_some();

    if known {
        session.add_recipient(address.clone())?;
        trc::event!(trc::EventType::RcptTo, "recipient" = address);
        let response = "250 2.1.5 OK".to_string();
        session.record("RCPT", &response, false);
        Ok(response)
    } else {
        let response = "550 5.1.1 recipient unknown".to_string();
        trc::event!(trc::EventType::RcptReject, "recipient" = address);
        session.record("RCPT", &response, true);
        Ok(response)
    }
}
