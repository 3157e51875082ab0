/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! SQL-backed directory (§6): a password-verification query returning
//! the stored hash, and a user-existence query returning
//! `(home, uid, gid, maildir)`. The concrete driver (MariaDB,
//! PostgreSQL, SQLite) is supplied by the caller through
//! [`SqlExecutor`] so this crate doesn't have to pick one database
//! client for every deployment.

use async_trait::async_trait;
use trc::Error;

use crate::{
    hash::{self, HashKind},
    Directory, Principal, PrincipalKind,
};

#[derive(Debug, Clone, Default)]
pub struct UserRow {
    pub home: String,
    pub uid: u32,
    pub gid: u32,
    pub maildir: String,
}

/// The two queries an SQL directory needs, executed against whatever
/// pool the deployment wires up.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn password_hash(&self, username: &str) -> Result<Option<String>, Error>;
    async fn user_row(&self, username: &str) -> Result<Option<UserRow>, Error>;
    async fn emails(&self, username: &str) -> Result<Vec<String>, Error>;
}

pub struct SqlDirectory {
    name: String,
    executor: Box<dyn SqlExecutor>,
    hash_kind: HashKind,
}

impl SqlDirectory {
    pub fn new(name: impl Into<String>, executor: Box<dyn SqlExecutor>, hash_kind: HashKind) -> Self {
        SqlDirectory {
            name: name.into(),
            executor,
            hash_kind,
        }
    }
}

#[async_trait]
impl Directory for SqlDirectory {
    async fn authenticate(&self, username: &str, secret: &str) -> Result<bool, Error> {
        Ok(self
            .executor
            .password_hash(username)
            .await?
            .map(|stored| hash::verify(self.hash_kind, secret, &stored))
            .unwrap_or(false))
    }

    async fn lookup(&self, address: &str) -> Result<Option<Principal>, Error> {
        if self.executor.user_row(address).await?.is_none() {
            return Ok(None);
        }
        let emails = self.executor.emails(address).await?;
        Ok(Some(Principal {
            name: address.to_string(),
            emails,
            kind: PrincipalKind::Individual,
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
