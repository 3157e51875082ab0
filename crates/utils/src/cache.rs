/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Small TTL cache used for DNS/MTA-STS lookups so every MAIL FROM
//! doesn't re-resolve MX records.

use std::{
    hash::Hash,
    time::{Duration, Instant},
};

use ahash::AHashMap;
use parking_lot::Mutex;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

pub struct CacheWithTtl<K, V> {
    inner: Mutex<AHashMap<K, Entry<V>>>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> CacheWithTtl<K, V> {
    pub fn new(ttl: Duration) -> Self {
        CacheWithTtl {
            inner: Mutex::new(AHashMap::new()),
            ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock();
        if let Some(entry) = guard.get(key) {
            if entry.expires_at > Instant::now() {
                return Some(entry.value.clone());
            }
            guard.remove(key);
        }
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.inner.lock().insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.inner.lock().insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}
