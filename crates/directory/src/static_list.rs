/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The simplest back-end: a fixed `(name, secret, email set, type)`
//! table loaded from configuration at startup (§3 "User record"). Used
//! for scripted test scenarios where spinning up a real directory is
//! unwarranted ceremony.

use ahash::AHashMap;
use async_trait::async_trait;
use trc::Error;

use crate::{
    hash::{self, HashKind},
    Directory, Principal, PrincipalKind,
};

pub struct StaticUser {
    pub name: String,
    pub secret: String,
    pub hash: HashKind,
    pub emails: Vec<String>,
    pub kind: PrincipalKind,
}

pub struct StaticList {
    name: String,
    users: AHashMap<String, StaticUser>,
    by_email: AHashMap<String, String>,
}

impl StaticList {
    pub fn new(name: impl Into<String>, users: Vec<StaticUser>) -> Self {
        let mut by_name = AHashMap::new();
        let mut by_email = AHashMap::new();
        for user in users {
            for email in &user.emails {
                by_email.insert(email.to_lowercase(), user.name.clone());
            }
            by_name.insert(user.name.clone(), user);
        }
        StaticList {
            name: name.into(),
            users: by_name,
            by_email,
        }
    }
}

#[async_trait]
impl Directory for StaticList {
    async fn authenticate(&self, username: &str, secret: &str) -> Result<bool, Error> {
        Ok(self
            .users
            .get(username)
            .map(|u| hash::verify(u.hash, secret, &u.secret))
            .unwrap_or(false))
    }

    async fn lookup(&self, address: &str) -> Result<Option<Principal>, Error> {
        let address = address.to_lowercase();
        let name = match self.by_email.get(&address) {
            Some(n) => n,
            None => return Ok(None),
        };
        Ok(self.users.get(name).map(|u| Principal {
            name: u.name.clone(),
            emails: u.emails.clone(),
            kind: u.kind,
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
