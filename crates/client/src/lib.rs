/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The outbound SMTP/ESMTP/LMTP client and its assertion engine
//! (§4.12). A [`case::TestCase`] describes a route, a MAIL/RCPT/MIME
//! envelope (or several), and assertion groups; [`behaviour::run`]
//! drives the wire dialogue and records every command/response pair
//! into a [`report::Transaction`] log; [`assertions`] then evaluates
//! each group against that log, retrying and waiting per the group's
//! own contract before failing.

pub mod assertions;
pub mod behaviour;
pub mod case;
pub mod external;
pub mod report;
pub mod route;
pub mod tls;

pub use behaviour::run;
pub use case::TestCase;
pub use report::{CaseReport, Transaction};
