/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Well-known field names, kept in one place so an event's context
//! keys don't drift between call sites.

pub const SESSION_ID: &str = "session_id";
pub const ENVELOPE_ID: &str = "envelope_id";
pub const REMOTE_IP: &str = "remote_ip";
pub const DOMAIN: &str = "domain";
pub const RECIPIENT: &str = "recipient";
pub const QUEUE_ID: &str = "queue_id";
pub const ATTEMPT: &str = "attempt";
pub const REASON: &str = "reason";
pub const PROCESSOR: &str = "processor";
