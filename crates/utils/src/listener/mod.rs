/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod blocked;
pub mod limiter;

use std::net::SocketAddr;

use tokio::sync::watch;

use self::limiter::ConcurrencyLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerProtocol {
    Smtp,
    Lmtp,
    ImplicitTls,
    Submission,
}

/// Static description of one of the three listeners (§4.9): plain
/// SMTP, implicit-TLS, submission. `shutdown_rx` is observed by every
/// worker so a graceful shutdown drains in-flight sessions instead of
/// severing them.
pub struct ServerInstance {
    pub id: String,
    pub listener_id: u16,
    pub protocol: ServerProtocol,
    pub hostname: String,
    pub bind_addr: SocketAddr,
    pub is_tls_implicit: bool,
    pub limiter: ConcurrencyLimiter,
    pub shutdown_rx: watch::Receiver<bool>,
}

impl ServerInstance {
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}
