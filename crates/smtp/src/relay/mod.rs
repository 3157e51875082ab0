/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Outbound relay: one attempt's protocol choice and transient/
//! permanent classification (§4.8), plus the retry cron that drains
//! the persistent queue on a schedule (§8 E5).

pub mod cron;
pub mod dispatch;
pub mod session;

pub use dispatch::RelayDispatch;
pub use session::{RelayOutcome, RelaySession};
