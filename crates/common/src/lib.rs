/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Shared runtime state (§5 "Shared resources"): the scenario table,
//! directory chain, queue handle, limits, webhook config, and metrics
//! registry are read-mostly and swapped atomically on reload, so a
//! reader observes either the old or the new [`Core`] snapshot, never
//! a torn value (§9 "Global mutable configuration with hot reload").

pub mod chaos;
pub mod digest_cache;
pub mod limits;
pub mod metrics;
pub mod reload;
pub mod scenario;
pub mod webhook;

use std::sync::Arc;

use arc_swap::ArcSwap;
use directory::DirectoryChain;
use store::Queue;

use crate::{
    digest_cache::DigestCache, limits::Limits, metrics::Metrics, scenario::ScenarioTable,
    webhook::WebhookConfig,
};

/// One immutable, fully-built configuration snapshot. A reload builds
/// a brand new `Core` off to the side and swaps it in atomically
/// through [`Data`]; nothing here is ever mutated in place.
pub struct Core {
    pub scenarios: ScenarioTable,
    pub webhooks: WebhookConfig,
    pub directory: Arc<DirectoryChain>,
    pub queue: Arc<dyn Queue>,
    pub limits: Limits,
    pub metrics: Arc<Metrics>,
    /// Shared across sessions (§5): the DIGEST-MD5 subsequent-auth
    /// cache survives a `Core` reload since it's keyed by peer
    /// identity, not by configuration.
    pub digest_cache: Arc<DigestCache>,
}

/// Hot-reloadable handle to the current [`Core`]. Readers call
/// [`Data::current`] once per request/command and hold onto the
/// returned `Arc` for the duration of that unit of work, so a reload
/// racing with an in-flight command never presents a half-old,
/// half-new view.
#[derive(Clone)]
pub struct Data {
    inner: Arc<ArcSwap<Core>>,
}

impl Data {
    pub fn new(core: Core) -> Self {
        Data {
            inner: Arc::new(ArcSwap::from_pointee(core)),
        }
    }

    pub fn current(&self) -> Arc<Core> {
        self.inner.load_full()
    }

    pub fn reload(&self, core: Core) {
        self.inner.store(Arc::new(core));
        trc::event!(trc::EventType::ConfigReload);
    }
}
