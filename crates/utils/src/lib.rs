/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod cache;
pub mod config;
pub mod lineio;
pub mod listener;
pub mod snowflake;
pub mod tls;

pub use config::Config;
