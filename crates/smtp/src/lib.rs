/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The SMTP protocol engine, relay pipeline, and storage/processor
//! chain (§1 THE CORE, parts 1 and 2). [`session`]/[`envelope`] hold
//! per-connection and per-transaction state; [`extensions`] is the
//! verb-by-verb state machine; [`storage`] runs the scanner/delivery
//! chain after DATA/BDAT commits, which `extensions::data` splits into
//! locally-delivered recipients (through the chain) and everyone else
//! (handed to [`relay::RelayDispatch`], which resolves MX via
//! [`resolver`] and enqueues onto the retry queue); `extensions::mail`
//! checks [`proxy::ProxyRouter`] at RCPT time and forwards a matched
//! recipient to its configured upstream instead of the local
//! directory; `extensions::data` schedules [`bots::BotExecutor`]
//! against every committed envelope once the response is recorded;
//! [`mime`] wraps message parsing/building; [`listener`] ties
//! admission control and the line-oriented worker loop to all of the
//! above.

pub mod bots;
pub mod envelope;
pub mod extensions;
pub mod listener;
pub mod mime;
pub mod proxy;
pub mod relay;
pub mod resolver;
pub mod session;
pub mod storage;
