/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Authentication back-ends (§4.4, §6). Selection order is fixed:
//! SASL client socket, then SQL query, then static list — the first
//! one enabled wins.

pub mod dovecot;
pub mod hash;
pub mod sql;
pub mod static_list;

use async_trait::async_trait;
use trc::Error;

#[derive(Debug, Clone)]
pub struct Principal {
    pub name: String,
    pub emails: Vec<String>,
    pub kind: PrincipalKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalKind {
    Individual,
    List,
    Alias,
}

/// A back-end capable of verifying SASL credentials and, separately,
/// of answering whether an address is known (used by RCPT directory
/// lookups and VRFY/EXPN).
#[async_trait]
pub trait Directory: Send + Sync {
    async fn authenticate(&self, username: &str, secret: &str) -> Result<bool, Error>;
    async fn lookup(&self, address: &str) -> Result<Option<Principal>, Error>;
    fn name(&self) -> &str;
}

/// Tries each configured back-end in the fixed precedence order and
/// returns the first one that is enabled (i.e. present in the list).
pub struct DirectoryChain {
    pub backends: Vec<std::sync::Arc<dyn Directory>>,
}

impl DirectoryChain {
    pub fn new(backends: Vec<std::sync::Arc<dyn Directory>>) -> Self {
        DirectoryChain { backends }
    }

    pub async fn authenticate(&self, username: &str, secret: &str) -> Result<bool, Error> {
        for backend in &self.backends {
            if backend.authenticate(username, secret).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn lookup(&self, address: &str) -> Result<Option<Principal>, Error> {
        for backend in &self.backends {
            if let Some(p) = backend.lookup(address).await? {
                return Ok(Some(p));
            }
        }
        Ok(None)
    }
}
